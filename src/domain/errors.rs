use thiserror::Error;

use super::value_objects::enums::upload_statuses::UploadStatus;

/// Failure taxonomy shared by the store, the upload drivers and the relay.
#[derive(Debug, Error)]
pub enum UplinkError {
    /// The local durable store could not be opened or written.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("remote endpoint rejected the request with status {status}")]
    RemoteRejected { status: u16 },

    #[error("capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("relay connection lost: {0}")]
    RelayLost(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: UploadStatus,
        to: UploadStatus,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The remote service gave up processing an uploaded asset.
    #[error("asset processing failed: {0}")]
    AssetFailed(String),
}

impl UplinkError {
    /// Network failures and remote rejections share the same retry treatment,
    /// the chunk protocol cannot cheaply tell them apart.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UplinkError::NetworkFailure(_) | UplinkError::RemoteRejected { .. }
        )
    }

    /// Fatal conditions abort the current session outright.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            UplinkError::PermissionDenied(_) | UplinkError::RelayLost(_)
        )
    }
}

impl From<diesel::result::Error> for UplinkError {
    fn from(err: diesel::result::Error) -> Self {
        UplinkError::StorageUnavailable(err.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for UplinkError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        UplinkError::StorageUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for UplinkError {
    fn from(err: reqwest::Error) -> Self {
        // Signed upload URLs carry credentials, never echo them back.
        if err.is_timeout() {
            return UplinkError::NetworkFailure("request timed out".to_string());
        }
        if err.is_connect() {
            return UplinkError::NetworkFailure("connection failed".to_string());
        }
        if let Some(status) = err.status() {
            return UplinkError::RemoteRejected {
                status: status.as_u16(),
            };
        }
        UplinkError::NetworkFailure("request failed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_rejected_are_retryable() {
        assert!(UplinkError::NetworkFailure("reset".into()).is_retryable());
        assert!(UplinkError::RemoteRejected { status: 500 }.is_retryable());
        assert!(!UplinkError::StorageUnavailable("locked".into()).is_retryable());
        assert!(!UplinkError::Timeout("handshake".into()).is_retryable());
    }

    #[test]
    fn permission_and_relay_loss_are_fatal() {
        assert!(UplinkError::PermissionDenied("user refused".into()).is_fatal_to_session());
        assert!(UplinkError::RelayLost("closed".into()).is_fatal_to_session());
        assert!(!UplinkError::NetworkFailure("reset".into()).is_fatal_to_session());
    }
}
