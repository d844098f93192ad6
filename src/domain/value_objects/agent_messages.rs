use serde::{Deserialize, Serialize};

/// Commands a page posts to the background delivery agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum AgentCommand {
    StartUpload { id: String },
    ProcessPending,
    ActivateNow,
}

/// Delivery outcomes the agent broadcasts to every associated page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum AgentNotification {
    UploadComplete { id: String, remote_upload_id: String },
    UploadFailed { id: String, error: String },
}

impl AgentNotification {
    pub fn record_id(&self) -> &str {
        match self {
            AgentNotification::UploadComplete { id, .. } => id,
            AgentNotification::UploadFailed { id, .. } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_use_wire_names() {
        let command: AgentCommand =
            serde_json::from_value(json!({ "type": "START_UPLOAD", "id": "1700000000000-abc" }))
                .unwrap();
        assert_eq!(
            command,
            AgentCommand::StartUpload {
                id: "1700000000000-abc".to_string()
            }
        );

        let command: AgentCommand =
            serde_json::from_value(json!({ "type": "PROCESS_PENDING" })).unwrap();
        assert_eq!(command, AgentCommand::ProcessPending);
    }

    #[test]
    fn completion_carries_remote_upload_id() {
        let value = serde_json::to_value(AgentNotification::UploadComplete {
            id: "r1".to_string(),
            remote_upload_id: "up_9".to_string(),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "type": "UPLOAD_COMPLETE", "id": "r1", "remoteUploadId": "up_9" })
        );
    }
}
