//! Wire and domain types exchanged with the EDA server.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one streaming session (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new time-sortable session identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// BlockStatus / BlockUpdate
// ---------------------------------------------------------------------------

/// Execution status of one analysis block, as reported by the server.
///
/// Values outside the known vocabulary deserialize to [`BlockStatus::Unknown`]
/// instead of failing the whole frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    #[default]
    Queued,
    Executing,
    Success,
    Error,
    #[serde(other)]
    Unknown,
}

impl BlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the block has finished executing, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl std::fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `data:` frame of the EDA stream: the full current record of a block.
///
/// Only `block_id` is required; everything else falls back to an empty value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUpdate {
    /// Stable identity of the pipeline step within one session.
    pub block_id: u64,
    /// Human-readable description of what the block does.
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    /// Generated source code (empty until execution starts).
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: BlockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Plot identifiers produced by the block, in generation order.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub plots_generated: Vec<String>,
}

/// Treat an explicit `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl BlockUpdate {
    /// A bare update carrying only an id and status.
    pub fn new(block_id: u64, status: BlockStatus) -> Self {
        Self {
            block_id,
            description: String::new(),
            code: String::new(),
            status,
            output: None,
            error: None,
            plots_generated: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of `POST /generate-eda-stream` (and the non-streaming `/generate-eda`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateEdaRequest {
    /// Server-side path of the uploaded dataset.
    pub file_path: String,
    /// Free-form user guidance for the generated analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub uid: String,
    pub csv_id: String,
}

// ---------------------------------------------------------------------------
// Dataset summary (`POST /load`)
// ---------------------------------------------------------------------------

/// Summary returned by the upload+analyze call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// Dataset identifier; required to open a stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_id: Option<String>,
    #[serde(default)]
    pub file_type: String,
    pub total_rows: u64,
    pub total_columns: u64,
    #[serde(default)]
    pub columns_info: Vec<ColumnInfo>,
    #[serde(default)]
    pub sample_rows: Vec<serde_json::Map<String, serde_json::Value>>,
    /// AI-generated prose description of the dataset.
    #[serde(default)]
    pub ai_summary: String,
}

/// Per-column metadata inside a [`DatasetSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: String,
    #[serde(default)]
    pub non_null_count: u64,
    #[serde(default)]
    pub null_count: u64,
    #[serde(default)]
    pub unique_count: u64,
    #[serde(default)]
    pub sample_values: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Report history (`/storage/...`, `/list-plots`)
// ---------------------------------------------------------------------------

/// A previously uploaded dataset and its stored analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub uid: String,
    pub csv_name: String,
    pub csv_url: String,
    /// Serialized [`DatasetSummary`] as stored by the server.
    #[serde(default)]
    pub json_response: String,
    pub created_at: String,
}

/// A user comment (analysis request) attached to a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub uid: String,
    pub csv_id: String,
    pub comment: String,
    pub created_at: String,
}

/// Code and plot images produced for a comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentAsset {
    #[serde(rename = "_id")]
    pub id: String,
    pub comment_id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub created_at: String,
}

/// Response of `GET /list-plots`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotListing {
    pub output_dir: String,
    pub total_plots: u64,
    #[serde(default)]
    pub plots: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_roundtrip() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().expect("parse SessionId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn block_update_missing_fields_default() {
        let update: BlockUpdate =
            serde_json::from_str(r#"{"block_id": 3, "status": "executing"}"#).expect("parse");
        assert_eq!(update.block_id, 3);
        assert_eq!(update.status, BlockStatus::Executing);
        assert!(update.description.is_empty());
        assert!(update.code.is_empty());
        assert!(update.output.is_none());
        assert!(update.plots_generated.is_empty());
    }

    #[test]
    fn block_update_requires_block_id() {
        let result = serde_json::from_str::<BlockUpdate>(r#"{"status": "success"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn block_update_status_defaults_to_queued() {
        let update: BlockUpdate = serde_json::from_str(r#"{"block_id": 0}"#).expect("parse");
        assert_eq!(update.status, BlockStatus::Queued);
    }

    #[test]
    fn unknown_status_is_tolerated() {
        let update: BlockUpdate =
            serde_json::from_str(r#"{"block_id": 1, "status": "retrying"}"#).expect("parse");
        assert_eq!(update.status, BlockStatus::Unknown);
        assert!(!update.status.is_terminal());
    }

    #[test]
    fn generate_request_omits_empty_comments() {
        let req = GenerateEdaRequest {
            file_path: "uploads/sales.csv".into(),
            comments: None,
            uid: "user-1".into(),
            csv_id: "abc123".into(),
        };
        let json = serde_json::to_value(&req).expect("serialize");
        assert!(json.get("comments").is_none());
        assert_eq!(json["csv_id"], "abc123");
    }

    #[test]
    fn dataset_summary_fixture_validates() {
        let fixture =
            std::fs::read_to_string("../../../fixtures/json/dataset-summary.fixture.json")
                .expect("read fixture");
        let parsed: DatasetSummary =
            serde_json::from_str(&fixture).expect("deserialize fixture summary");
        assert_eq!(parsed.csv_id.as_deref(), Some("abc123"));
        assert_eq!(parsed.total_rows, 500);
        assert_eq!(parsed.total_columns, 8);
        assert_eq!(parsed.columns_info.len(), 2);
        assert_eq!(parsed.columns_info[0].name, "region");
    }

    #[test]
    fn csv_record_reads_mongo_id() {
        let json = r#"{
            "_id": "65f0c1",
            "uid": "user-1",
            "csv_name": "sales.csv",
            "csv_url": "https://storage.example.com/sales.csv",
            "json_response": "{}",
            "created_at": "2024-03-12T10:00:00Z"
        }"#;
        let record: CsvRecord = serde_json::from_str(json).expect("parse");
        assert_eq!(record.id, "65f0c1");
        assert_eq!(record.csv_name, "sales.csv");
    }
}
