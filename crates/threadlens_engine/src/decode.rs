use chardetng::EncodingDetector;
use encoding_rs::Encoding;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding_label: String,
}

/// Decode raw bytes into UTF-8 using: BOM -> Content-Type charset -> chardetng guess.
///
/// Malformed sequences are replaced with U+FFFD.
pub fn decode_text(bytes: &[u8], content_type: Option<&str>) -> DecodedText {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_with(bytes, encoding);
    }

    if let Some(label) = content_type.and_then(extract_charset) {
        if let Some(enc) = Encoding::for_label(label.as_bytes()) {
            return decode_with(bytes, enc);
        }
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let enc = detector.guess(None, true);
    decode_with(bytes, enc)
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            let (key, value) = part.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim_matches([' ', '"', '\''].as_ref()))
        })
        .next()
        .map(|s| s.to_string())
}

fn decode_with(bytes: &[u8], enc: &'static Encoding) -> DecodedText {
    let (text, actual, _) = enc.decode(bytes);
    DecodedText {
        text: text.into_owned(),
        encoding_label: actual.name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::decode_text;

    #[test]
    fn header_charset_wins_over_detection() {
        let bytes = [0x63, 0x61, 0x66, 0xe9];
        let decoded = decode_text(&bytes, Some("text/plain; Charset=\"ISO-8859-1\""));
        assert_eq!(decoded.text, "café");
    }

    #[test]
    fn bom_is_honoured() {
        let bytes = [0xef, 0xbb, 0xbf, b'h', b'i'];
        let decoded = decode_text(&bytes, Some("text/plain; charset=latin1"));
        assert_eq!(decoded.text, "hi");
        assert_eq!(decoded.encoding_label, "UTF-8");
    }
}
