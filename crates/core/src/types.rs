/// Task identifiers are UUID v4 strings.
pub type TaskId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque key/value payload carried by tasks (requests and results).
pub type Payload = serde_json::Map<String, serde_json::Value>;
