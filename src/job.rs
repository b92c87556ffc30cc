//! Job definitions and execution outcomes shared by storage, scheduler and API.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque job identifier. New jobs get a v4 UUID; stored identifiers are
/// carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A persisted job: call `target` whenever `schedule` fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: JobId,
    /// Cron expression, five or six fields, evaluated in UTC.
    pub schedule: String,
    /// Endpoint URL invoked on every fire.
    pub target: String,
    /// Free-form tag supplied by the job creator.
    pub kind: String,
}

/// Result of one invocation attempt. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub job_id: JobId,
    /// HTTP status, `408` for a timeout, `None` for other transport failures.
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub success: bool,
    pub executed_at: DateTime<Utc>,
}

/// An outcome as read back from execution history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: i64,
    pub executed_at: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_job_id_serializes_as_plain_string() {
        let id = JobId::from("job-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"job-1\"");
    }

    #[test]
    fn test_outcome_uses_camel_case_fields() {
        let outcome = ExecutionOutcome {
            job_id: JobId::from("j"),
            status_code: None,
            duration_ms: 12,
            success: false,
            executed_at: Utc::now(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["jobId"], "j");
        assert!(json["statusCode"].is_null());
        assert_eq!(json["durationMs"], 12);
    }
}
