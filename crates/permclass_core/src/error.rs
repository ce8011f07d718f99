use thiserror::Error;

/// Errors surfaced by normalization, the rule catalog, and the pass engine.
///
/// Schema violations (`InvalidType`, `UnsupportedVersion`) fail fast at the
/// collection boundary and are never coerced. Degraded-but-known input is not
/// an error at all; it becomes a warning code on the snapshot.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid type: {0}")]
    InvalidType(String),

    #[error("unsupported {what} version {found} (supported: {supported})")]
    UnsupportedVersion {
        what: &'static str,
        found: i64,
        supported: i64,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}
