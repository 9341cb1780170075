//! Error types for the Observe provider core.

use thiserror::Error;

/// Errors produced while compiling, submitting or decoding provider objects.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// An object identifier does not match `o:<type>:<id>[:<version>]`.
    #[error("Invalid object id format: {0}")]
    InvalidFormat(String),

    /// An object identifier names a type outside the known set.
    #[error("Unknown object type: {0}")]
    UnknownType(String),

    /// A query input does not carry a usable dataset reference.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A query, or one of its stages, has no input to read from.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// A stage was declared without a pipeline.
    #[error("Missing pipeline: {0}")]
    MissingPipeline(String),

    /// A stage refers to an input or alias that was never declared.
    #[error("Unresolved input: {0}")]
    UnresolvedInput(String),

    /// A query has no stages.
    #[error("Query has no stages")]
    NoStages,

    /// The backend returned an unexpected number of task results.
    #[error("Unexpected number of task results: expected 1, got {0}")]
    UnexpectedResultCount(usize),

    /// The backend reported a failure for the query.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A result cell could not be parsed against its column representation.
    #[error("Failed to decode cell: {0}")]
    CellDecode(String),

    /// The result envelope is missing parts or has inconsistent shapes.
    #[error("Malformed result: {0}")]
    MalformedResult(String),

    /// A monitor rule config sets neither a count nor a change rule.
    #[error("No rule specified")]
    NoRuleSpecified,

    /// The backend returned a monitor rule of an unhandled type.
    #[error("Unhandled rule type: {0}")]
    UnhandledRuleType(String),

    /// The requested object was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Service temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),
}

impl ProviderError {
    /// Get the error message as a string.
    ///
    /// Returns a reference to the error message for any variant.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidFormat(msg) => msg,
            Self::UnknownType(msg) => msg,
            Self::InvalidInput(msg) => msg,
            Self::MissingInput(msg) => msg,
            Self::MissingPipeline(msg) => msg,
            Self::UnresolvedInput(msg) => msg,
            Self::NoStages => "query has no stages",
            Self::UnexpectedResultCount(_) => "unexpected number of task results",
            Self::Backend(msg) => msg,
            Self::CellDecode(msg) => msg,
            Self::MalformedResult(msg) => msg,
            Self::NoRuleSpecified => "no rule specified",
            Self::UnhandledRuleType(msg) => msg,
            Self::NotFound(msg) => msg,
            Self::Validation(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::PermissionDenied(msg) => msg,
            Self::Unavailable(msg) => msg,
            Self::DeadlineExceeded(msg) => msg,
            Self::FailedPrecondition(msg) => msg,
        }
    }

    /// Whether the error was caused by the caller's own input.
    ///
    /// These are never worth retrying.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFormat(_)
                | Self::UnknownType(_)
                | Self::InvalidInput(_)
                | Self::MissingInput(_)
                | Self::MissingPipeline(_)
                | Self::UnresolvedInput(_)
                | Self::NoStages
                | Self::NoRuleSpecified
                | Self::Validation(_)
                | Self::Configuration(_)
        )
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidFormat(msg)
            | ProviderError::UnknownType(msg)
            | ProviderError::InvalidInput(msg)
            | ProviderError::MissingInput(msg)
            | ProviderError::MissingPipeline(msg)
            | ProviderError::UnresolvedInput(msg)
            | ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::NoStages | ProviderError::NoRuleSpecified => {
                tonic::Status::invalid_argument(err.to_string())
            },
            ProviderError::UnexpectedResultCount(_) => tonic::Status::internal(err.to_string()),
            ProviderError::Backend(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::CellDecode(msg)
            | ProviderError::MalformedResult(msg)
            | ProviderError::UnhandledRuleType(msg) => tonic::Status::internal(msg),
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            ProviderError::Unavailable(msg) => tonic::Status::unavailable(msg),
            ProviderError::DeadlineExceeded(msg) => tonic::Status::deadline_exceeded(msg),
            ProviderError::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
        }
    }
}
