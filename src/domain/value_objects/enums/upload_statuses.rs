use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    #[default]
    Pending,
    Uploading,
    Complete,
    Failed,
}

impl Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Complete => "complete",
            UploadStatus::Failed => "failed",
        };
        write!(f, "{}", status)
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(UploadStatus::Pending),
            "uploading" => Ok(UploadStatus::Uploading),
            "complete" => Ok(UploadStatus::Complete),
            "failed" => Ok(UploadStatus::Failed),
            other => Err(format!("Unknown upload status: {}", other)),
        }
    }
}

impl UploadStatus {
    /// Records in these states may be picked up by a delivery pass.
    pub fn is_eligible_for_pickup(&self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::Failed)
    }

    /// `pending -> uploading -> {complete | failed}`, `failed -> uploading`.
    /// Completion is normally represented by deleting the record.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (UploadStatus::Pending, UploadStatus::Uploading)
                | (UploadStatus::Failed, UploadStatus::Uploading)
                | (UploadStatus::Uploading, UploadStatus::Failed)
                | (UploadStatus::Uploading, UploadStatus::Complete)
        )
    }

    /// A transition that starts a new delivery attempt bumps `retry_count`.
    pub fn counts_as_attempt(&self) -> bool {
        matches!(self, UploadStatus::Uploading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_column_text() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Uploading,
            UploadStatus::Complete,
            UploadStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<UploadStatus>(), Ok(status));
        }
        assert!("queued".parse::<UploadStatus>().is_err());
    }

    #[test]
    fn only_documented_transitions_are_allowed() {
        use UploadStatus::*;

        assert!(Pending.can_transition_to(Uploading));
        assert!(Failed.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Complete));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Uploading.can_transition_to(Uploading));
        assert!(!Uploading.can_transition_to(Pending));
    }

    #[test]
    fn pending_and_failed_are_eligible_for_pickup() {
        assert!(UploadStatus::Pending.is_eligible_for_pickup());
        assert!(UploadStatus::Failed.is_eligible_for_pickup());
        assert!(!UploadStatus::Uploading.is_eligible_for_pickup());
        assert!(!UploadStatus::Complete.is_eligible_for_pickup());
    }
}
