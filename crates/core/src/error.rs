use thiserror::Error;

/// Rejection reasons for an incoming reading payload.
///
/// Validation happens at the ingress boundary; nothing invalid reaches the
/// work queue, so downstream parse failures indicate corruption rather than
/// client error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid meter_id: expected a 9-digit string")]
    MeterId,

    #[error("invalid timestamp '{0}': expected ISO-8601")]
    Timestamp(String),

    #[error("invalid reading: must be a finite non-negative number")]
    Reading,

    #[error("missing field: {0}")]
    MissingField(&'static str),
}
