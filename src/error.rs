/// A single standard parameter whose value differs from the recorded snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterMismatch {
    /// Name of the offending parameter.
    pub name: String,
    /// The value stored in the tracking table by a previous invocation.
    pub recorded: serde_json::Value,
    /// The value supplied (or defaulted) for the current invocation.
    pub supplied: serde_json::Value,
}

impl std::fmt::Display for ParameterMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: recorded {} but got {}",
            self.name, self.recorded, self.supplied
        )
    }
}

fn mismatch_list(mismatches: &[ParameterMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error type for the pgup crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad or missing parameter value, disallowed value, or a structurally
    /// invalid configuration. Detected before any statement executes.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// SQL text contained a `{name}` placeholder with no matching parameter
    /// definition.
    #[error("unknown placeholder '{{{name}}}' in {context}")]
    UnknownPlaceholder { name: String, context: String },

    /// A standard (non app-only) parameter changed since it was recorded in
    /// the tracking table.
    #[error("standard parameter(s) changed since last invocation: {}", mismatch_list(.mismatches))]
    ParameterConsistency { mismatches: Vec<ParameterMismatch> },

    /// A version string did not match `<major>.<minor>.<patch>`.
    #[error("invalid version '{0}': expected <major>.<minor>.<patch>")]
    VersionFormat(String),

    /// A statement inside a changeset or SQL hook failed. `ordinal` is the
    /// 1-based position of the statement within its source file or text.
    #[error("statement {ordinal} of '{source_id}' failed: {source}")]
    SqlExecution {
        source_id: String,
        ordinal: usize,
        #[source]
        source: postgres::Error,
    },

    /// An application hook failed; wraps the underlying cause.
    #[error("{hook} failed: {source}")]
    HookExecution {
        hook: String,
        #[source]
        source: Box<Error>,
    },

    /// The feedback collaborator requested a stop at a step boundary.
    #[error("operation cancelled")]
    Cancelled,

    /// Catch-all for failures that fit no other variant, used mainly by the
    /// testing harness assertions.
    #[error("{0}")]
    Generic(String),

    #[error(transparent)]
    Postgres(#[from] postgres::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that are guaranteed to be raised before any statement
    /// has executed against the database.
    pub fn is_pre_flight(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::UnknownPlaceholder { .. }
                | Error::ParameterConsistency { .. }
                | Error::VersionFormat(_)
        )
    }
}
