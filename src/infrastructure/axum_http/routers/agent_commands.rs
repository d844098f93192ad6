use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    application::usecases::agent_host::AgentHost,
    domain::value_objects::agent_messages::AgentCommand,
};

// Run example
//   curl -X POST "http://127.0.0.1:$AGENT_SERVER_PORT/internal/agent/commands" \
//     -H "Content-Type: application/json" \
//     -d '{"type":"START_UPLOAD","id":"1718000000000-abcdefghi"}'

pub fn routes(host: AgentHost) -> Router {
    Router::new()
        .route("/commands", post(post_command))
        .route("/recovery", post(post_recovery))
        .with_state(host)
}

pub async fn post_command(State(host): State<AgentHost>, Json(command): Json<AgentCommand>) -> Response {
    if host.dispatch(command.clone()) {
        info!(command = ?command, "agent_commands: command relayed");
        return (StatusCode::ACCEPTED, Json(json!({ "accepted": true }))).into_response();
    }

    warn!(command = ?command, "agent_commands: no active agent");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "accepted": false, "error": "no active agent" })),
    )
        .into_response()
}

/// Connectivity is back; fire the registered recovery signals.
pub async fn post_recovery(State(host): State<AgentHost>) -> Response {
    let fired = host.connectivity_restored();
    info!(fired, "agent_commands: recovery signal fired");
    (StatusCode::ACCEPTED, Json(json!({ "fired": fired }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        application::usecases::{agent_bridge::RECOVERY_TAG, agent_host::tests::host_for_tests},
        domain::repositories::upload_records::UploadRecordRepository,
    };
    use serde_json::Value;
    use tempfile::TempDir;

    async fn serve(host: AgentHost) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, routes(host)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn commands_are_refused_until_an_agent_is_active() {
        let dir = TempDir::new().unwrap();
        let (host, _store) = host_for_tests(&dir, true);
        let base = serve(host.clone()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/commands"))
            .json(&json!({ "type": "PROCESS_PENDING" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 503);

        host.register();
        host.ready().wait_for(|ready| *ready).await.unwrap();

        let response = client
            .post(format!("{base}/commands"))
            .json(&json!({ "type": "PROCESS_PENDING" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);
    }

    #[tokio::test]
    async fn start_upload_over_http_delivers_the_record() {
        let dir = TempDir::new().unwrap();
        let (host, store) = host_for_tests(&dir, true);
        host.register();
        host.ready().wait_for(|ready| *ready).await.unwrap();
        let mut notifications = host.subscribe();
        let base = serve(host).await;

        let id = store
            .save(vec![1; 32], "up_5", "https://storage.test/u/5")
            .await
            .unwrap();
        let response = reqwest::Client::new()
            .post(format!("{base}/commands"))
            .json(&json!({ "type": "START_UPLOAD", "id": id }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);

        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.record_id(), id);
    }

    #[tokio::test]
    async fn recovery_reports_fired_signals() {
        let dir = TempDir::new().unwrap();
        let (host, _store) = host_for_tests(&dir, true);
        host.register();
        host.ready().wait_for(|ready| *ready).await.unwrap();
        host.register_recovery(RECOVERY_TAG);
        let base = serve(host).await;

        let body: Value = reqwest::Client::new()
            .post(format!("{base}/recovery"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["fired"], 1);
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (host, _store) = host_for_tests(&dir, true);
        let base = serve(host).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/commands"))
            .json(&json!({ "type": "SELF_DESTRUCT" }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
