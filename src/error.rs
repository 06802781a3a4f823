//! # Engine Error Types
//!
//! Structural and resolver errors surface to the caller; per-cell
//! evaluation errors are contained, produce a marker value, and never
//! abort a surrounding area or report operation. In both cases a
//! structured [`ErrorRecord`] is delivered to the registered error sink
//! for observability.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Resolver cannot find a member name
    #[error("unknown member: '{0}'")]
    UnknownMember(String),

    /// An unqualified name matches members in two or more dimensions
    #[error("ambiguous member '{name}': found in dimensions '{first}' and '{second}', use the 'dimension:member' form")]
    AmbiguousMember {
        name: String,
        first: String,
        second: String,
    },

    /// Name or alias collision within a dimension
    #[error("duplicate name or alias in dimension '{dimension}': '{name}'")]
    DuplicateName { dimension: String, name: String },

    /// A parent/child edge would introduce a cycle
    #[error("edge '{parent}' -> '{child}' would create a cycle in dimension '{dimension}'")]
    CycleDetected {
        dimension: String,
        parent: String,
        child: String,
    },

    /// A removed member was referenced by stored facts; the facts were
    /// cascade-deleted and the event logged through the error sink.
    #[error("member '{member}' was in use by cube '{cube}': {facts_removed} facts cascade-deleted")]
    InUse {
        member: String,
        cube: String,
        facts_removed: usize,
    },

    /// A dimension has no coordinate and no unique root to default to
    #[error("underdefined address: no coordinate for dimension '{0}' and no unique root")]
    UnderdefinedAddress(String),

    /// Non-numeric input where a numeric value is required, or a
    /// malformed address shape
    #[error("type error: {0}")]
    TypeError(String),

    /// A rule callable failed; contained during evaluation, surfaced on
    /// the write path when an on-entry rule rejects the write
    #[error("rule error: {0}")]
    RuleError(String),

    /// Evaluation re-entered an in-flight address
    #[error("rule recursion at {0}")]
    RuleRecursion(String),

    /// A full area expansion exceeds the configured guardrail
    #[error("area too large: {cells} cells exceeds the configured limit of {limit}")]
    AreaTooLarge { cells: u64, limit: u64 },

    /// Internal: a cache entry was recorded under stale versions.
    /// Auto-retried, never visible to callers.
    #[error("version mismatch")]
    VersionMismatch,

    /// Dimension not found
    #[error("dimension not found: '{0}'")]
    DimensionNotFound(String),

    /// Dimension already exists
    #[error("dimension already exists: '{0}'")]
    DimensionExists(String),

    /// Dropping a dimension that a cube still references is forbidden
    #[error("dimension '{dimension}' is referenced by cube '{cube}'")]
    DimensionInUse { dimension: String, cube: String },

    /// Cube not found
    #[error("cube not found: '{0}'")]
    CubeNotFound(String),

    /// Cube already exists
    #[error("cube already exists: '{0}'")]
    CubeExists(String),

    /// Cubes need at least one dimension
    #[error("cube '{0}' must reference at least one dimension")]
    EmptyCube(String),

    /// More dimensions than the engine supports
    #[error("cube '{cube}' references {got} dimensions, the maximum is {max}")]
    TooManyDimensions { cube: String, got: usize, max: usize },

    /// Writes must target a base address
    #[error("write target contains the aggregated member '{0}'; writes must target base members")]
    NotBaseAddress(String),

    /// Another edit session is already open on the dimension
    #[error("dimension '{0}' already has an open edit session")]
    EditInProgress(String),

    /// I/O error from the persistence backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error from the journal encoding
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot encoding error
    #[error("snapshot encoding error: {0}")]
    Encode(String),

    /// Persistence backend error
    #[error("persistence error: {0}")]
    Persist(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Stable kind tag used in error records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnknownMember(_) => "UnknownMember",
            EngineError::AmbiguousMember { .. } => "AmbiguousMember",
            EngineError::DuplicateName { .. } => "DuplicateName",
            EngineError::CycleDetected { .. } => "CycleDetected",
            EngineError::InUse { .. } => "InUse",
            EngineError::UnderdefinedAddress(_) => "UnderdefinedAddress",
            EngineError::TypeError(_) => "TypeError",
            EngineError::RuleError(_) => "RuleError",
            EngineError::RuleRecursion(_) => "RuleRecursion",
            EngineError::AreaTooLarge { .. } => "AreaTooLarge",
            EngineError::VersionMismatch => "VersionMismatch",
            EngineError::DimensionNotFound(_) => "DimensionNotFound",
            EngineError::DimensionExists(_) => "DimensionExists",
            EngineError::DimensionInUse { .. } => "DimensionInUse",
            EngineError::CubeNotFound(_) => "CubeNotFound",
            EngineError::CubeExists(_) => "CubeExists",
            EngineError::EmptyCube(_) => "EmptyCube",
            EngineError::TooManyDimensions { .. } => "TooManyDimensions",
            EngineError::NotBaseAddress(_) => "NotBaseAddress",
            EngineError::EditInProgress(_) => "EditInProgress",
            EngineError::Io(_) => "Io",
            EngineError::Json(_) => "Json",
            EngineError::Encode(_) => "Encode",
            EngineError::Persist(_) => "Persist",
            EngineError::Config(_) => "Config",
        }
    }
}

/// Structured record delivered to the error sink.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    /// Stable kind tag, e.g. `RuleError`
    pub kind: &'static str,
    /// Cube the error occurred in, if any
    pub cube: Option<String>,
    /// Display form of the address involved, if any
    pub address: Option<String>,
    /// Human-readable message
    pub message: String,
    /// When the record was produced
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        ErrorRecord {
            kind,
            cube: None,
            address: None,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn with_cube(mut self, cube: impl Into<String>) -> Self {
        self.cube = Some(cube.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// Callback receiving structured error records.
pub type ErrorSink = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;

/// Default sink: logs through `tracing` at warn level.
pub fn default_error_sink() -> ErrorSink {
    Arc::new(|record: &ErrorRecord| {
        tracing::warn!(
            kind = record.kind,
            cube = record.cube.as_deref().unwrap_or(""),
            address = record.address.as_deref().unwrap_or(""),
            "{}",
            record.message
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(EngineError::UnknownMember("x".into()).kind(), "UnknownMember");
        assert_eq!(EngineError::VersionMismatch.kind(), "VersionMismatch");
        assert_eq!(
            EngineError::AreaTooLarge { cells: 10, limit: 5 }.kind(),
            "AreaTooLarge"
        );
    }

    #[test]
    fn test_error_record_builder() {
        let record = ErrorRecord::new("RuleError", "boom")
            .with_cube("sales")
            .with_address("Plan, 2021");
        assert_eq!(record.kind, "RuleError");
        assert_eq!(record.cube.as_deref(), Some("sales"));
        assert_eq!(record.address.as_deref(), Some("Plan, 2021"));
    }

    #[test]
    fn test_custom_sink_receives_records() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink: ErrorSink = Arc::new(move |r: &ErrorRecord| {
            seen_clone.lock().push(r.kind.to_string());
        });
        (*sink)(&ErrorRecord::new("CycleDetected", "nope"));
        assert_eq!(seen.lock().as_slice(), ["CycleDetected"]);
    }
}
