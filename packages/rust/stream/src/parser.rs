//! Frame payload → [`BlockUpdate`] parsing.

use edastream_shared::{BlockUpdate, EdaError, Result};

/// Longest payload excerpt carried in a diagnostic.
const PREVIEW_LEN: usize = 120;

/// Report of a frame that was dropped because it did not parse.
///
/// Delivered to [`SessionSubscriber::on_diagnostic`](crate::SessionSubscriber::on_diagnostic);
/// never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDiagnostic {
    /// 1-based position of the frame among the session's `data:` frames.
    pub frame_index: u64,
    /// Deserializer message.
    pub error: String,
    /// Leading part of the offending payload.
    pub preview: String,
}

impl FrameDiagnostic {
    pub(crate) fn new(frame_index: u64, payload: &str, error: &EdaError) -> Self {
        Self {
            frame_index,
            error: error.to_string(),
            preview: payload.chars().take(PREVIEW_LEN).collect(),
        }
    }
}

/// Deserialize one prefix-stripped payload into a [`BlockUpdate`].
///
/// Missing optional fields take their defaults; a missing or non-integer
/// `block_id`, or a payload that is not a JSON object, is an error.
pub fn parse_payload(payload: &str) -> Result<BlockUpdate> {
    serde_json::from_str(payload)
        .map_err(|e| EdaError::parse(format!("invalid block update: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edastream_shared::BlockStatus;

    #[test]
    fn parses_full_update() {
        let payload = r#"{
            "block_id": 2,
            "description": "Revenue by region",
            "code": "df.groupby('region').revenue.sum()",
            "status": "success",
            "output": "north 1200.5",
            "plots_generated": ["a.png", "b.png"]
        }"#;
        let update = parse_payload(payload).expect("parse");
        assert_eq!(update.block_id, 2);
        assert_eq!(update.status, BlockStatus::Success);
        assert_eq!(update.output.as_deref(), Some("north 1200.5"));
        assert_eq!(update.plots_generated, vec!["a.png", "b.png"]);
        assert!(update.error.is_none());
    }

    #[test]
    fn ignores_unknown_fields() {
        let update = parse_payload(r#"{"block_id": 0, "status": "queued", "elapsed_ms": 12}"#)
            .expect("parse");
        assert_eq!(update, BlockUpdate::new(0, BlockStatus::Queued));
    }

    #[test]
    fn null_optionals_are_absent() {
        let update =
            parse_payload(r#"{"block_id": 1, "status": "executing", "output": null, "error": null}"#)
                .expect("parse");
        assert!(update.output.is_none());
        assert!(update.error.is_none());
    }

    #[test]
    fn null_plots_keep_the_rest_of_the_update() {
        let update = parse_payload(
            r#"{"block_id": 1, "description": "Load", "code": "df = load()", "status": "success", "output": "ok", "error": null, "plots_generated": null}"#,
        )
        .expect("parse");
        assert_eq!(update.status, BlockStatus::Success);
        assert_eq!(update.output.as_deref(), Some("ok"));
        assert!(update.plots_generated.is_empty());
    }

    #[test]
    fn null_text_fields_become_empty() {
        let update =
            parse_payload(r#"{"block_id": 2, "description": null, "code": null, "status": null}"#)
                .expect("parse");
        assert!(update.description.is_empty());
        assert!(update.code.is_empty());
        assert_eq!(update.status, BlockStatus::Queued);
    }

    #[test]
    fn rejects_non_json() {
        let err = parse_payload("not-json").unwrap_err();
        assert!(matches!(err, EdaError::Parse { .. }));
        assert!(err.to_string().contains("invalid block update"));
    }

    #[test]
    fn rejects_wrong_shape() {
        assert!(parse_payload(r#"[1, 2, 3]"#).is_err());
        assert!(parse_payload(r#"{"block_id": -1}"#).is_err());
        assert!(parse_payload(r#"{"block_id": "one"}"#).is_err());
    }

    #[test]
    fn tolerates_crlf_line_ending() {
        let update = parse_payload("{\"block_id\": 5}\r").expect("parse");
        assert_eq!(update.block_id, 5);
    }

    #[test]
    fn diagnostic_truncates_preview() {
        let payload = "x".repeat(500);
        let err = parse_payload(&payload).unwrap_err();
        let diag = FrameDiagnostic::new(4, &payload, &err);
        assert_eq!(diag.frame_index, 4);
        assert_eq!(diag.preview.len(), PREVIEW_LEN);
        assert!(diag.error.starts_with("parse error"));
    }
}
