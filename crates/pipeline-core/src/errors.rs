//! Canonical error taxonomy and the crate-level error type.

use thiserror::Error;

use crate::lifecycle::Stage;

/// The closed set of error codes a stage process function may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ValidationError,
    UnsupportedFormat,
    TelegramUpdateInvalid,
    TelegramFileFetchFailed,
    ArtifactMissing,
    LlmProviderUnavailable,
    SchemaValidationFailed,
    DeliveryTransportFailed,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::UnsupportedFormat => "unsupported_format",
            Self::TelegramUpdateInvalid => "telegram_update_invalid",
            Self::TelegramFileFetchFailed => "telegram_file_fetch_failed",
            Self::ArtifactMissing => "artifact_missing",
            Self::LlmProviderUnavailable => "llm_provider_unavailable",
            Self::SchemaValidationFailed => "schema_validation_failed",
            Self::DeliveryTransportFailed => "delivery_transport_failed",
            Self::InternalError => "internal_error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "validation_error" => Self::ValidationError,
            "unsupported_format" => Self::UnsupportedFormat,
            "telegram_update_invalid" => Self::TelegramUpdateInvalid,
            "telegram_file_fetch_failed" => Self::TelegramFileFetchFailed,
            "artifact_missing" => Self::ArtifactMissing,
            "llm_provider_unavailable" => Self::LlmProviderUnavailable,
            "schema_validation_failed" => Self::SchemaValidationFailed,
            "delivery_transport_failed" => Self::DeliveryTransportFailed,
            "internal_error" => Self::InternalError,
            _ => return None,
        })
    }

    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::TelegramFileFetchFailed
                | Self::ArtifactMissing
                | Self::LlmProviderUnavailable
                | Self::DeliveryTransportFailed
                | Self::InternalError
        )
    }
}

fn stage_allowlist(stage: Stage) -> &'static [ErrorCode] {
    use ErrorCode::*;
    match stage {
        Stage::Raw => &[TelegramUpdateInvalid, TelegramFileFetchFailed, InternalError],
        Stage::Normalized => &[
            UnsupportedFormat,
            ValidationError,
            ArtifactMissing,
            InternalError,
        ],
        Stage::LlmOutput => &[
            LlmProviderUnavailable,
            SchemaValidationFailed,
            ArtifactMissing,
            InternalError,
        ],
        Stage::Exports => &[DeliveryTransportFailed, ArtifactMissing, InternalError],
    }
}

/// Normalize a raw code string to a code this stage is permitted to report,
/// falling back to `internal_error` for anything unknown or disallowed.
pub fn resolve_stage_error(stage: Stage, code: Option<&str>) -> ErrorCode {
    let Some(code) = code.and_then(ErrorCode::from_str) else {
        return ErrorCode::InternalError;
    };
    if stage_allowlist(stage).contains(&code) {
        code
    } else {
        ErrorCode::InternalError
    }
}

/// How a finalize failure should route a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClassification {
    /// Recoverable and within budget: back to the stage's source state.
    Retry,
    /// Recoverable but attempt budget is exhausted: dead letter.
    Exhausted,
    /// Not retryable regardless of remaining budget: failed_<stage>.
    Terminal,
}

pub fn classify_error(code: ErrorCode, attempts_after: u32, max_attempts: u32) -> RetryClassification {
    if !code.is_recoverable() {
        return RetryClassification::Terminal;
    }
    if attempts_after < max_attempts {
        RetryClassification::Retry
    } else {
        RetryClassification::Exhausted
    }
}

/// Errors surfaced by `pipeline-core` public APIs.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage backend error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("pool error: {0}")]
    Pool(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_code_normalizes_to_internal_error() {
        assert_eq!(
            resolve_stage_error(Stage::Normalized, Some("bogus")),
            ErrorCode::InternalError
        );
    }

    #[test]
    fn code_outside_stage_allowlist_normalizes_to_internal_error() {
        assert_eq!(
            resolve_stage_error(Stage::Normalized, Some("delivery_transport_failed")),
            ErrorCode::InternalError
        );
    }

    #[test]
    fn terminal_code_classifies_as_terminal_even_with_budget_left() {
        assert_eq!(
            classify_error(ErrorCode::SchemaValidationFailed, 1, 3),
            RetryClassification::Terminal
        );
    }

    #[test]
    fn recoverable_code_exhausts_at_max_attempts() {
        assert_eq!(
            classify_error(ErrorCode::InternalError, 3, 3),
            RetryClassification::Exhausted
        );
        assert_eq!(
            classify_error(ErrorCode::InternalError, 2, 3),
            RetryClassification::Retry
        );
    }
}
