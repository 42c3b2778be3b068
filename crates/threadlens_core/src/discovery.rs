//! Content discovery: "tell me, at most once per node, whenever a node
//! matching a pattern appears in the document".
//!
//! The engine consumes the document's mutation feed in batches. For every
//! inserted node it tests the node and its descendants against each pattern,
//! then runs a safety-net rescan (see [`RescanPolicy`]). Each subscription
//! keeps its own seen-set, so rescans are idempotent.
//!
//! Deliveries are queued and dispatched by [`DiscoveryEngine::tick`] or by the
//! [`DiscoveryEngine::watch`] loop, never from inside `observe`. No `Document`
//! borrow may be held while calling into the engine.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use ego_tree::{NodeId, NodeRef};
use scraper::node::Node;
use serde::{Deserialize, Serialize};
use threadlens_logging::{lens_debug, lens_error, lens_trace, lens_warn};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
use tokio::sync::Notify;

use crate::document::{MutationRecord, ObserverId, SharedDocument};
use crate::matcher::Pattern;

pub type MatchCallback = Rc<dyn Fn(NodeId) -> anyhow::Result<()>>;

/// What the engine rescans after each mutation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RescanPolicy {
    /// Rescan the whole document.
    #[default]
    FullTree,
    /// Rescan only the subtrees of the batch's mutation targets.
    MutatedSubtrees,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub rescan: RescanPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveOptions {
    /// Deliver nodes that already match at registration time. When false they
    /// are marked seen and only later insertions are delivered.
    pub process_existing: bool,
    /// Deliver only the matches present at registration, then drop the
    /// subscription.
    pub once: bool,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            process_existing: true,
            once: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy)]
struct Delivery {
    subscription: SubscriptionId,
    node: NodeId,
}

struct SubscriptionEntry {
    id: SubscriptionId,
    callback: MatchCallback,
    seen: HashSet<NodeId>,
    /// Initial deliveries still owed by a `once` subscription.
    once_remaining: Option<usize>,
}

struct PatternEntry {
    pattern: Pattern,
    subscriptions: Vec<SubscriptionEntry>,
}

#[derive(Default)]
struct Registry {
    patterns: BTreeMap<String, PatternEntry>,
    pending: VecDeque<Delivery>,
    next_id: u64,
}

impl Registry {
    fn queue_matches(&mut self, root: NodeRef<'_, Node>) {
        let Registry {
            patterns, pending, ..
        } = self;
        for entry in patterns.values_mut() {
            for node in entry.pattern.match_subtree(root) {
                for subscription in &mut entry.subscriptions {
                    if subscription.once_remaining.is_some() {
                        continue;
                    }
                    if subscription.seen.insert(node) {
                        pending.push_back(Delivery {
                            subscription: subscription.id,
                            node,
                        });
                    }
                }
            }
        }
    }

    fn callback(&self, id: SubscriptionId) -> Option<(MatchCallback, String)> {
        self.patterns.values().find_map(|entry| {
            entry
                .subscriptions
                .iter()
                .find(|subscription| subscription.id == id)
                .map(|subscription| (subscription.callback.clone(), entry.pattern.to_string()))
        })
    }

    fn remove(&mut self, pattern: &str, id: SubscriptionId) -> bool {
        let Some(entry) = self.patterns.get_mut(pattern) else {
            return false;
        };
        let before = entry.subscriptions.len();
        entry.subscriptions.retain(|subscription| subscription.id != id);
        let removed = entry.subscriptions.len() != before;
        if entry.subscriptions.is_empty() {
            self.patterns.remove(pattern);
        }
        self.pending.retain(|delivery| delivery.subscription != id);
        removed
    }

    /// Counts one handled delivery against a `once` subscription and drops the
    /// subscription when nothing is owed any more.
    fn settle_once(&mut self, id: SubscriptionId) {
        let finished = self.patterns.iter_mut().find_map(|(key, entry)| {
            let subscription = entry
                .subscriptions
                .iter_mut()
                .find(|subscription| subscription.id == id)?;
            let remaining = subscription.once_remaining.as_mut()?;
            *remaining = remaining.saturating_sub(1);
            (*remaining == 0).then(|| key.clone())
        });
        if let Some(pattern) = finished {
            self.remove(&pattern, id);
            lens_debug!("discovery: {:?} on `{}` finished its initial matches", id, pattern);
        }
    }
}

enum Wake {
    Record(Option<MutationRecord>),
    Notified,
}

struct Watcher {
    observer: ObserverId,
    receiver: Option<UnboundedReceiver<MutationRecord>>,
}

struct Inner {
    document: SharedDocument,
    settings: DiscoverySettings,
    registry: RefCell<Registry>,
    watcher: RefCell<Option<Watcher>>,
    generation: Cell<u64>,
    dispatching: Cell<bool>,
    wake: Notify,
}

impl Inner {
    fn remove_subscription(&self, pattern: &str, id: SubscriptionId) {
        if self.registry.borrow_mut().remove(pattern, id) {
            lens_debug!("discovery: unsubscribed {:?} from `{}`", id, pattern);
        }
    }
}

/// Instance-scoped discovery engine. Cloning yields another handle to the
/// same engine.
#[derive(Clone)]
pub struct DiscoveryEngine {
    inner: Rc<Inner>,
}

/// Handle returned by [`DiscoveryEngine::observe`].
#[must_use = "dropping a Subscription keeps the callback registered; call unsubscribe() to remove it"]
pub struct Subscription {
    pattern: String,
    id: SubscriptionId,
    engine: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Removes only this callback. The pattern entry disappears with its last
    /// subscription.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.engine.upgrade() {
            inner.remove_subscription(&self.pattern, self.id);
        }
    }

    /// Forgets every node delivered for this subscription's pattern, so the
    /// next scan delivers them again. Same as
    /// [`DiscoveryEngine::reset_selector`].
    pub fn reload(&self) {
        if let Some(inner) = self.engine.upgrade() {
            DiscoveryEngine { inner }.reset_selector(&self.pattern);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .field("id", &self.id)
            .finish()
    }
}

impl DiscoveryEngine {
    pub fn new(document: SharedDocument) -> Self {
        Self::with_settings(document, DiscoverySettings::default())
    }

    pub fn with_settings(document: SharedDocument, settings: DiscoverySettings) -> Self {
        Self {
            inner: Rc::new(Inner {
                document,
                settings,
                registry: RefCell::new(Registry::default()),
                watcher: RefCell::new(None),
                generation: Cell::new(0),
                dispatching: Cell::new(false),
                wake: Notify::new(),
            }),
        }
    }

    pub fn document(&self) -> &SharedDocument {
        &self.inner.document
    }

    pub fn observe<F>(&self, pattern: &Pattern, callback: F, options: ObserveOptions) -> Subscription
    where
        F: Fn(NodeId) -> anyhow::Result<()> + 'static,
    {
        self.ensure_watching();

        let existing = self.inner.document.borrow().select(pattern);
        let mut registry = self.inner.registry.borrow_mut();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);

        let Registry {
            patterns, pending, ..
        } = &mut *registry;
        let entry = patterns
            .entry(pattern.as_str().to_string())
            .or_insert_with(|| PatternEntry {
                pattern: pattern.clone(),
                subscriptions: Vec::new(),
            });

        let mut seen = HashSet::with_capacity(existing.len());
        let mut queued = 0usize;
        for node in existing {
            seen.insert(node);
            if options.process_existing {
                pending.push_back(Delivery {
                    subscription: id,
                    node,
                });
                queued += 1;
            }
        }
        if options.once && queued == 0 {
            if entry.subscriptions.is_empty() {
                patterns.remove(pattern.as_str());
            }
            drop(registry);
            lens_debug!("discovery: {:?} on `{}` has no initial matches, not registered", id, pattern);
            return Subscription {
                pattern: pattern.as_str().to_string(),
                id,
                engine: Rc::downgrade(&self.inner),
            };
        }
        entry.subscriptions.push(SubscriptionEntry {
            id,
            callback: Rc::new(callback),
            seen,
            once_remaining: options.once.then_some(queued),
        });
        drop(registry);

        lens_debug!(
            "discovery: {:?} observes `{}` ({} existing match(es) queued)",
            id,
            pattern,
            queued
        );
        if queued > 0 {
            self.inner.wake.notify_one();
        }

        Subscription {
            pattern: pattern.as_str().to_string(),
            id,
            engine: Rc::downgrade(&self.inner),
        }
    }

    /// Forgets every node delivered for `pattern`, so the next scan delivers
    /// them again.
    pub fn reset_selector(&self, pattern: &str) {
        let mut registry = self.inner.registry.borrow_mut();
        if let Some(entry) = registry.patterns.get_mut(pattern.trim()) {
            for subscription in &mut entry.subscriptions {
                subscription.seen.clear();
            }
            lens_debug!("discovery: reset seen-sets for `{}`", pattern);
        }
    }

    /// Stops watching and drops every registration.
    pub fn disconnect_all(&self) {
        if let Some(watcher) = self.inner.watcher.borrow_mut().take() {
            if let Ok(mut document) = self.inner.document.try_borrow_mut() {
                document.detach_observer(watcher.observer);
            } else {
                lens_warn!("discovery: document busy during disconnect; observer left to expire");
            }
        }
        {
            let mut registry = self.inner.registry.borrow_mut();
            registry.patterns.clear();
            registry.pending.clear();
        }
        self.inner.generation.set(self.inner.generation.get() + 1);
        self.inner.wake.notify_one();
        lens_debug!("discovery: disconnected");
    }

    pub fn is_watching(&self) -> bool {
        self.inner.watcher.borrow().is_some()
    }

    pub fn pattern_count(&self) -> usize {
        self.inner.registry.borrow().patterns.len()
    }

    pub fn subscription_count(&self, pattern: &str) -> usize {
        self.inner
            .registry
            .borrow()
            .patterns
            .get(pattern.trim())
            .map_or(0, |entry| entry.subscriptions.len())
    }

    pub fn pending_deliveries(&self) -> usize {
        self.inner.registry.borrow().pending.len()
    }

    /// Processes every queued mutation record as one batch and dispatches
    /// pending deliveries. Returns the number of callback invocations.
    ///
    /// Re-entrant calls from inside a callback return 0 and leave the work to
    /// the outer call.
    pub fn tick(&self) -> usize {
        if self.inner.dispatching.get() {
            return 0;
        }
        let records = self.drain_records();
        self.process(records)
    }

    /// Scans the whole document against every pattern and dispatches.
    pub fn rescan(&self) -> usize {
        if self.inner.dispatching.get() {
            return 0;
        }
        {
            let document = self.inner.document.borrow();
            self.inner.registry.borrow_mut().queue_matches(document.root());
        }
        self.dispatch_pending()
    }

    /// Watcher loop: waits for mutation records or deferred deliveries and
    /// processes them. Returns after [`DiscoveryEngine::disconnect_all`].
    pub async fn watch(self) {
        loop {
            let generation = self.inner.generation.get();
            let receiver = self
                .inner
                .watcher
                .borrow_mut()
                .as_mut()
                .and_then(|watcher| watcher.receiver.take());
            let Some(mut receiver) = receiver else {
                lens_debug!("discovery: watcher loop has no feed, exiting");
                return;
            };

            let woken = tokio::select! {
                record = receiver.recv() => Wake::Record(record),
                _ = self.inner.wake.notified() => Wake::Notified,
            };
            let first = match woken {
                Wake::Record(Some(record)) => Some(record),
                Wake::Record(None) => return,
                Wake::Notified => None,
            };

            if self.inner.generation.get() != generation {
                return;
            }
            if let Some(watcher) = self.inner.watcher.borrow_mut().as_mut() {
                watcher.receiver = Some(receiver);
            }

            let mut records: Vec<MutationRecord> = first.into_iter().collect();
            records.extend(self.drain_records());
            self.process(records);
        }
    }

    fn ensure_watching(&self) {
        let mut watcher = self.inner.watcher.borrow_mut();
        if watcher.is_some() {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = self.inner.document.borrow_mut().attach_observer(tx);
        *watcher = Some(Watcher {
            observer,
            receiver: Some(rx),
        });
        lens_debug!("discovery: mutation watcher attached");
    }

    fn drain_records(&self) -> Vec<MutationRecord> {
        let mut records = Vec::new();
        let mut watcher = self.inner.watcher.borrow_mut();
        let Some(receiver) = watcher
            .as_mut()
            .and_then(|watcher| watcher.receiver.as_mut())
        else {
            return records;
        };
        loop {
            match receiver.try_recv() {
                Ok(record) => records.push(record),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        records
    }

    fn process(&self, records: Vec<MutationRecord>) -> usize {
        if !records.is_empty() {
            self.scan_batch(&records);
        }
        self.dispatch_pending()
    }

    fn scan_batch(&self, records: &[MutationRecord]) {
        let document = self.inner.document.borrow();
        let mut registry = self.inner.registry.borrow_mut();
        if registry.patterns.is_empty() {
            return;
        }

        for record in records {
            for added in &record.added {
                if !document.is_attached(*added) {
                    continue;
                }
                if let Some(node) = document.node(*added) {
                    registry.queue_matches(node);
                }
            }
        }

        match self.inner.settings.rescan {
            RescanPolicy::FullTree => registry.queue_matches(document.root()),
            RescanPolicy::MutatedSubtrees => {
                let mut targets = HashSet::new();
                for record in records {
                    if targets.insert(record.target) && document.is_attached(record.target) {
                        if let Some(node) = document.node(record.target) {
                            registry.queue_matches(node);
                        }
                    }
                }
            }
        }
        lens_trace!(
            "discovery: batch of {} record(s), {} delivery(ies) pending",
            records.len(),
            registry.pending.len()
        );
    }

    fn dispatch_pending(&self) -> usize {
        if self.inner.dispatching.replace(true) {
            return 0;
        }
        let mut delivered = 0;
        loop {
            let next = self.inner.registry.borrow_mut().pending.pop_front();
            let Some(delivery) = next else {
                break;
            };
            let target = self.inner.registry.borrow().callback(delivery.subscription);
            let Some((callback, pattern)) = target else {
                continue;
            };
            let attached = self
                .inner
                .document
                .try_borrow()
                .map(|document| document.is_attached(delivery.node))
                .unwrap_or(true);
            if attached {
                match panic::catch_unwind(AssertUnwindSafe(|| callback(delivery.node))) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        lens_warn!("discovery: callback for `{}` failed: {:#}", pattern, err);
                    }
                    Err(_) => {
                        lens_error!("discovery: callback for `{}` panicked", pattern);
                    }
                }
                delivered += 1;
            } else {
                lens_trace!("discovery: skipping detached node for `{}`", pattern);
            }
            self.inner
                .registry
                .borrow_mut()
                .settle_once(delivery.subscription);
        }
        self.inner.dispatching.set(false);
        delivered
    }
}

impl fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryEngine")
            .field("patterns", &self.pattern_count())
            .field("watching", &self.is_watching())
            .finish()
    }
}
