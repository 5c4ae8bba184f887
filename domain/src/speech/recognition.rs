//! Speech-to-text response payload.

use serde::Deserialize;

/// Simple-format recognition result.
///
/// ```json
/// {"RecognitionStatus":"Success","DisplayText":"Hello there.","Offset":0,"Duration":12300000}
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct RecognitionResult {
    #[serde(default)]
    pub recognition_status: Option<String>,
    #[serde(default)]
    pub display_text: Option<String>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub duration: Option<u64>,
}

impl RecognitionResult {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Recognized text, or `None` for a zero-result response (no speech,
    /// non-`Success` status, or empty text).
    pub fn text(&self) -> Option<&str> {
        if let Some(status) = self.recognition_status.as_deref()
            && status != "Success"
        {
            return None;
        }
        self.display_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_text_without_status() {
        let result = RecognitionResult::parse(br#"{"DisplayText":"hello there"}"#).unwrap();
        assert_eq!(result.text(), Some("hello there"));
    }

    #[test]
    fn full_success_payload() {
        let body = br#"{"RecognitionStatus":"Success","DisplayText":"Hi.","Offset":100,"Duration":2000}"#;
        let result = RecognitionResult::parse(body).unwrap();
        assert_eq!(result.text(), Some("Hi."));
        assert_eq!(result.offset, Some(100));
    }

    #[test]
    fn no_match_is_zero_result() {
        let body = br#"{"RecognitionStatus":"NoMatch","Offset":0,"Duration":0}"#;
        assert_eq!(RecognitionResult::parse(body).unwrap().text(), None);
        let body = br#"{"RecognitionStatus":"Success","DisplayText":"  "}"#;
        assert_eq!(RecognitionResult::parse(body).unwrap().text(), None);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(RecognitionResult::parse(b"<html>").is_err());
    }
}
