//! Static state machine: lifecycle stages, allowed transitions, attempt budgets.

use std::fmt;

/// A submission's place in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    TelegramUpdateReceived,
    TelegramIngestInProgress,
    Uploaded,
    NormalizationInProgress,
    Normalized,
    EvaluationInProgress,
    Evaluated,
    DeliveryInProgress,
    Delivered,
    FailedTelegramIngest,
    FailedNormalization,
    FailedEvaluation,
    FailedDelivery,
    DeadLetter,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TelegramUpdateReceived => "telegram_update_received",
            Self::TelegramIngestInProgress => "telegram_ingest_in_progress",
            Self::Uploaded => "uploaded",
            Self::NormalizationInProgress => "normalization_in_progress",
            Self::Normalized => "normalized",
            Self::EvaluationInProgress => "evaluation_in_progress",
            Self::Evaluated => "evaluated",
            Self::DeliveryInProgress => "delivery_in_progress",
            Self::Delivered => "delivered",
            Self::FailedTelegramIngest => "failed_telegram_ingest",
            Self::FailedNormalization => "failed_normalization",
            Self::FailedEvaluation => "failed_evaluation",
            Self::FailedDelivery => "failed_delivery",
            Self::DeadLetter => "dead_letter",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "telegram_update_received" => Self::TelegramUpdateReceived,
            "telegram_ingest_in_progress" => Self::TelegramIngestInProgress,
            "uploaded" => Self::Uploaded,
            "normalization_in_progress" => Self::NormalizationInProgress,
            "normalized" => Self::Normalized,
            "evaluation_in_progress" => Self::EvaluationInProgress,
            "evaluated" => Self::Evaluated,
            "delivery_in_progress" => Self::DeliveryInProgress,
            "delivered" => Self::Delivered,
            "failed_telegram_ingest" => Self::FailedTelegramIngest,
            "failed_normalization" => Self::FailedNormalization,
            "failed_evaluation" => Self::FailedEvaluation,
            "failed_delivery" => Self::FailedDelivery,
            "dead_letter" => Self::DeadLetter,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Delivered
                | Self::FailedTelegramIngest
                | Self::FailedNormalization
                | Self::FailedEvaluation
                | Self::FailedDelivery
                | Self::DeadLetter
        )
    }

    /// The set of states this status may transition into.
    pub fn allowed_next(self) -> &'static [SubmissionStatus] {
        use SubmissionStatus::*;
        match self {
            TelegramUpdateReceived => &[TelegramIngestInProgress],
            TelegramIngestInProgress => {
                &[Uploaded, TelegramUpdateReceived, FailedTelegramIngest, DeadLetter]
            }
            Uploaded => &[NormalizationInProgress],
            NormalizationInProgress => {
                &[Normalized, Uploaded, FailedNormalization, DeadLetter]
            }
            Normalized => &[EvaluationInProgress],
            EvaluationInProgress => {
                &[Evaluated, Normalized, FailedEvaluation, DeadLetter]
            }
            Evaluated => &[DeliveryInProgress],
            DeliveryInProgress => {
                &[Delivered, Evaluated, FailedDelivery, DeadLetter]
            }
            Delivered
            | FailedTelegramIngest
            | FailedNormalization
            | FailedEvaluation
            | FailedDelivery
            | DeadLetter => &[],
        }
    }

    pub fn can_transition_to(self, to: SubmissionStatus) -> bool {
        self == to || self.allowed_next().contains(&to)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four processing stages, each owning one slice of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Raw,
    Normalized,
    LlmOutput,
    Exports,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Normalized => "normalized",
            Self::LlmOutput => "llm-output",
            Self::Exports => "exports",
        }
    }
}

/// Source / in-progress / success / failed states plus the attempt budget for one stage.
#[derive(Debug, Clone, Copy)]
pub struct StageLifecycle {
    pub stage: Stage,
    pub source_state: SubmissionStatus,
    pub in_progress_state: SubmissionStatus,
    pub success_state: SubmissionStatus,
    pub failed_state: SubmissionStatus,
    pub max_attempts: u32,
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub const STAGE_LIFECYCLES: [StageLifecycle; 4] = [
    StageLifecycle {
        stage: Stage::Raw,
        source_state: SubmissionStatus::TelegramUpdateReceived,
        in_progress_state: SubmissionStatus::TelegramIngestInProgress,
        success_state: SubmissionStatus::Uploaded,
        failed_state: SubmissionStatus::FailedTelegramIngest,
        max_attempts: DEFAULT_MAX_ATTEMPTS,
    },
    StageLifecycle {
        stage: Stage::Normalized,
        source_state: SubmissionStatus::Uploaded,
        in_progress_state: SubmissionStatus::NormalizationInProgress,
        success_state: SubmissionStatus::Normalized,
        failed_state: SubmissionStatus::FailedNormalization,
        max_attempts: DEFAULT_MAX_ATTEMPTS,
    },
    StageLifecycle {
        stage: Stage::LlmOutput,
        source_state: SubmissionStatus::Normalized,
        in_progress_state: SubmissionStatus::EvaluationInProgress,
        success_state: SubmissionStatus::Evaluated,
        failed_state: SubmissionStatus::FailedEvaluation,
        max_attempts: DEFAULT_MAX_ATTEMPTS,
    },
    StageLifecycle {
        stage: Stage::Exports,
        source_state: SubmissionStatus::Evaluated,
        in_progress_state: SubmissionStatus::DeliveryInProgress,
        success_state: SubmissionStatus::Delivered,
        failed_state: SubmissionStatus::FailedDelivery,
        max_attempts: DEFAULT_MAX_ATTEMPTS,
    },
];

pub fn lifecycle_for(stage: Stage) -> StageLifecycle {
    STAGE_LIFECYCLES
        .into_iter()
        .find(|l| l.stage == stage)
        .expect("every Stage variant has a STAGE_LIFECYCLES entry")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_to_in_progress_is_allowed() {
        assert!(SubmissionStatus::Uploaded.can_transition_to(SubmissionStatus::NormalizationInProgress));
    }

    #[test]
    fn dead_letter_is_terminal_with_no_outgoing_edges() {
        assert!(SubmissionStatus::DeadLetter.is_terminal());
        assert!(SubmissionStatus::DeadLetter.allowed_next().is_empty());
    }

    #[test]
    fn skipping_in_progress_is_rejected() {
        assert!(!SubmissionStatus::Uploaded.can_transition_to(SubmissionStatus::Normalized));
    }

    #[test]
    fn round_trips_through_as_str() {
        for s in [
            SubmissionStatus::TelegramUpdateReceived,
            SubmissionStatus::DeadLetter,
            SubmissionStatus::Delivered,
        ] {
            assert_eq!(SubmissionStatus::from_str(s.as_str()), Some(s));
        }
    }
}
