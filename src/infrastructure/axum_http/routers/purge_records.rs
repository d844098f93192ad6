use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    config::config_model::UplinkConfig,
    domain::repositories::upload_records::UploadRecordRepository,
    infrastructure::sqlite::repositories::upload_records::purge_older_than,
};

// Run example
//   curl -X POST "http://127.0.0.1:$AGENT_SERVER_PORT/internal/v1/purge/records" \
//     -H "Authorization: Bearer $AGENT_INTERNAL_TOKEN" \
//     -H "Content-Type: application/json" \
//     -d '{"older_than_hours":72}'

#[derive(Clone)]
pub struct PurgeRouteState {
    config: Arc<UplinkConfig>,
    store: Arc<dyn UploadRecordRepository + Send + Sync>,
}

pub fn routes(
    config: Arc<UplinkConfig>,
    store: Arc<dyn UploadRecordRepository + Send + Sync>,
) -> Router {
    Router::new()
        .route("/records", post(purge_records))
        .with_state(PurgeRouteState { config, store })
}

#[derive(Debug, Default, Deserialize)]
pub struct PurgeRecordsRequest {
    pub older_than_hours: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PurgeRecordsResponse {
    pub purged: usize,
}

pub async fn purge_records(
    State(state): State<PurgeRouteState>,
    headers: HeaderMap,
    Json(payload): Json<PurgeRecordsRequest>,
) -> Response {
    let Some(expected_token) = state.config.agent_server.internal_token.as_deref() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "purge token is not configured").into_response();
    };

    if let Err(status) = authorize_bearer(&headers, expected_token) {
        return (status, "unauthorized").into_response();
    }

    let max_age = payload
        .older_than_hours
        .map(|hours| Duration::from_secs(hours.saturating_mul(3600)))
        .unwrap_or(state.config.store.purge_max_age);

    match purge_older_than(state.store.as_ref(), max_age).await {
        Ok(purged) => {
            info!(purged, max_age_secs = max_age.as_secs(), "purge_records: store purged");
            Json(PurgeRecordsResponse { purged }).into_response()
        }
        Err(err) => {
            error!(error = %err, "purge_records: purge failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "purge failed").into_response()
        }
    }
}

fn authorize_bearer(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if token == expected_token {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::config_loader::load_from,
        domain::repositories::upload_records::MockUploadRecordRepository,
    };
    use axum::http::HeaderValue;
    use serde_json::{Value, json};

    fn config(token: Option<&'static str>) -> Arc<UplinkConfig> {
        Arc::new(
            load_from(move |key| match key {
                "AGENT_INTERNAL_TOKEN" => token.map(str::to_string),
                _ => None,
            })
            .unwrap(),
        )
    }

    async fn serve(config: Arc<UplinkConfig>, store: MockUploadRecordRepository) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = routes(config, Arc::new(store));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/records")
    }

    #[test]
    fn bearer_must_match_exactly() {
        let mut headers = HeaderMap::new();
        assert_eq!(authorize_bearer(&headers, "s3cret"), Err(StatusCode::UNAUTHORIZED));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert_eq!(authorize_bearer(&headers, "s3cret"), Err(StatusCode::UNAUTHORIZED));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("s3cret"));
        assert_eq!(authorize_bearer(&headers, "s3cret"), Err(StatusCode::UNAUTHORIZED));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(authorize_bearer(&headers, "s3cret"), Ok(()));
    }

    #[tokio::test]
    async fn purge_is_unavailable_without_a_token() {
        let url = serve(config(None), MockUploadRecordRepository::new()).await;

        let response = reqwest::Client::new()
            .post(url)
            .bearer_auth("anything")
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn purge_uses_requested_age() {
        let mut store = MockUploadRecordRepository::new();
        store
            .expect_purge_created_before()
            .times(1)
            .returning(|cutoff_ms| {
                let expected = chrono::Utc::now().timestamp_millis() - 72 * 3_600_000;
                assert!((cutoff_ms - expected).abs() < 60_000);
                Ok(4)
            });
        let url = serve(config(Some("s3cret")), store).await;
        let client = reqwest::Client::new();

        let rejected = client
            .post(&url)
            .bearer_auth("nope")
            .json(&json!({ "older_than_hours": 72 }))
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status(), 401);

        let body: Value = client
            .post(&url)
            .bearer_auth("s3cret")
            .json(&json!({ "older_than_hours": 72 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["purged"], 4);
    }
}
