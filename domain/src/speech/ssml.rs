//! SSML document builder for text-to-speech requests.

/// Build a single-voice SSML document.
///
/// `text` is XML-escaped; `voice` and `language` are inserted as attribute
/// values and escaped as well.
pub fn build_ssml(text: &str, voice: &str, language: &str) -> String {
    format!(
        "<speak version='1.0' xml:lang='{lang}'><voice xml:lang='{lang}' name='{voice}'>{text}</voice></speak>",
        lang = escape_xml(language),
        voice = escape_xml(voice),
        text = escape_xml(text),
    )
}

/// Escape the five XML special characters.
pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_voice_document() {
        let ssml = build_ssml("Hello", "en-US-JennyNeural", "en-US");
        assert_eq!(
            ssml,
            "<speak version='1.0' xml:lang='en-US'><voice xml:lang='en-US' name='en-US-JennyNeural'>Hello</voice></speak>"
        );
    }

    #[test]
    fn escapes_markup_in_text() {
        let ssml = build_ssml("a < b & 'c'", "v", "en-US");
        assert!(ssml.contains("a &lt; b &amp; &apos;c&apos;"));
        assert!(!ssml.contains("a < b"));
    }
}
