use std::collections::HashMap;

use crate::orchestrator::InstructionResolver;
use crate::ActionKind;

const TLDR: &str = "You are a helpful assistant tasked with summarizing social media content.
Provide a concise TL;DR for the post below.

1. Extract key points, highlight the most important points from the post.
Do the key point extraction only if the post contains sufficient detail.

2. Flag potentially biased content in post, only when appropriate.

3. Analyze if the post is sarcastic. Indicate this using the emoji 🙃 for sarcastic, or 🙂 for sincere.

4. Detect if original poster is genuinely asking for help or trolling.
Indicate this (whether they are trolling or not) using the emoji 🤔 for genuine, or 😈 for trolling.

5. Detect hidden agendas. Identify if someone's asking one thing but really wants validation for something else.

If images are included, describe them and incorporate their content into the summary. If not don't say anything about images.

If the post is a joke in textual form, first try to summarize the joke without ruining the humor,
then explain the humor briefly.
The joke summary should still be read as a joke/story and should be entertaining on its own as a mini version of the original joke.
In this case ignore points 1, 2, 3, 4, and 5.";

const ANSWER: &str = "Read the post below. Also take note of the context.
If questions are asked, answer them concisely.
If no questions, offer a concise solution or advice for the situation.
Even if the post content is empty, use the title and context to inform your response.
If images are included, analyze them and incorporate their content into your response.
Always try to include relevant external links and images to support your answer.";

const FACT_CHECK: &str = "Read the post below. Also take note of the context.
Fact check the claims made in the post. Provide evidence-based verification or refutation.
If images are included, analyze them and incorporate their content into your fact check.";

const ANALYZE_USER: &str = "You are an expert behavioural analyst.
Analyze the provided user history (posts and comments) and describe the discussion patterns it shows.

Based *strictly* on the provided content:

1. **Linguistic & Behavioral Patterns**: writing style, vocabulary, emotional tone and consistency.
2. **Interests**: recurring topics and communities.
3. **Community Engagement**: engagement style (confrontational vs. collaborative) and recurring themes.

**Format the output as a markdown report.**
Start with the disclaimer: \"This is an AI-generated analysis based on public activity and may not be accurate.\"";

/// The built-in instruction templates, with optional per-kind overrides.
/// Unknown kinds resolve to an empty instruction.
#[derive(Debug, Clone, Default)]
pub struct StandardInstructions {
    overrides: HashMap<ActionKind, String>,
}

impl StandardInstructions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, kind: ActionKind, instruction: impl Into<String>) -> Self {
        self.overrides.insert(kind, instruction.into());
        self
    }

    pub fn builtin(kind: &ActionKind) -> &'static str {
        match kind {
            ActionKind::Tldr => TLDR,
            ActionKind::Answer => ANSWER,
            ActionKind::FactCheck => FACT_CHECK,
            ActionKind::AnalyzeUser => ANALYZE_USER,
            ActionKind::Custom(_) => "",
        }
    }
}

impl InstructionResolver for StandardInstructions {
    fn instruction(&self, kind: &ActionKind) -> String {
        self.overrides
            .get(kind)
            .cloned()
            .unwrap_or_else(|| Self::builtin(kind).to_string())
    }
}
