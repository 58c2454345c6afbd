//! API routes
//!
//! Local HTTP surface the browser client talks to. Every display surface can
//! follow store changes through `GET /events`.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::conversation::ConversationRecord;
use crate::events::CONVERSATIONS_UPDATED;
use crate::store::{ConversationStore, SaveRequest, StoreError};

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: ConversationStore,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    pub new_title: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Store failures reported to the browser as 502
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (StatusCode::BAD_GATEWAY, Json(body)).into_response()
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<ConversationRecord>> {
    Json(state.store.list(query.title.as_deref(), query.force).await)
}

async fn save(
    State(state): State<AppState>,
    Json(request): Json<SaveRequest>,
) -> Result<Json<Option<ConversationRecord>>, ApiError> {
    Ok(Json(state.store.save(request).await?))
}

async fn ensure_full(
    State(state): State<AppState>,
    Json(record): Json<ConversationRecord>,
) -> Json<ConversationRecord> {
    Json(state.store.ensure_full(record).await)
}

async fn rename(
    State(state): State<AppState>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<Option<ConversationRecord>>, ApiError> {
    let renamed = state
        .store
        .rename(&request.reference, &request.new_title)
        .await?;
    Ok(Json(renamed))
}

async fn remove(State(state): State<AppState>, Path(reference): Path<String>) -> StatusCode {
    state.store.remove(&reference).await;
    StatusCode::NO_CONTENT
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut receiver = state.store.subscribe();

    let stream = async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(change) => match Event::default().event(CONVERSATIONS_UPDATED).json_data(&change) {
                    Ok(event) => yield Ok(event),
                    Err(e) => warn!(error = %e, "Failed to serialize change event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "SSE client lagged behind change bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route(
            "/conversations",
            get(list).post(save).put(rename),
        )
        .route("/conversations/full", post(ensure_full))
        .route("/conversations/:reference", axum::routing::delete(remove))
        .route("/events", get(events))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use futures::StreamExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::events::ChangeBus;
    use crate::gateway::fake::{Call, FakeGateway, Scripted};
    use crate::store::{ConversationCache, KeyValueBackend, MemoryBackend, CACHE_KEY};

    async fn app(gateway: FakeGateway, cached: Value) -> (Router, Arc<FakeGateway>) {
        let backend = Arc::new(MemoryBackend::new());
        backend.set(CACHE_KEY, &cached.to_string()).await.unwrap();

        let gateway = Arc::new(gateway);
        let store = ConversationStore::new(
            gateway.clone(),
            ConversationCache::new(backend),
            ChangeBus::new(),
        );
        (router().with_state(AppState { store }), gateway)
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app(FakeGateway::new(), json!([])).await;

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let (app, _) = app(
            FakeGateway::new(),
            json!([{ "_id": "abc123", "title": "Rust" }, { "_id": "def456", "title": "Go" }]),
        )
        .await;

        let response = app
            .oneshot(
                Request::get("/conversations?title=rus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["title"], "Rust");
    }

    #[tokio::test]
    async fn test_save_failure_is_bad_gateway() {
        let (app, _) = app(FakeGateway::new().with_save(Scripted::Fail(500)), json!([])).await;

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/conversations",
                json!({ "userPrompt": "hello", "botResponse": "hi" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("500"));
    }

    #[tokio::test]
    async fn test_save_accepts_unique_id_alias() {
        let (app, gateway) = app(
            FakeGateway::new().with_save(Scripted::Ok(json!({ "_id": "abc123", "title": "T" }))),
            json!([]),
        )
        .await;

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/conversations",
                json!({ "title": "T", "uniqueId": "abc123", "userPrompt": "q", "botResponse": "a" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["id"], "abc123");
        match &gateway.calls()[0] {
            Call::Upsert(payload) => assert_eq!(payload.unique_id.as_deref(), Some("abc123")),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let (app, gateway) = app(
            FakeGateway::new(),
            json!([{ "_id": "abc123", "title": "Old" }]),
        )
        .await;

        let response = app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                "/conversations",
                json!({ "ref": "Old", "newTitle": "New" }),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["title"], "New");

        let response = app
            .oneshot(
                Request::delete("/conversations/abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(gateway.count(|c| matches!(c, Call::Rename(_))), 1);
    }

    #[tokio::test]
    async fn test_events_stream_changes() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set(CACHE_KEY, &json!([{ "_id": "abc123", "title": "Doomed" }]).to_string())
            .await
            .unwrap();
        let store = ConversationStore::new(
            Arc::new(FakeGateway::new()),
            ConversationCache::new(backend),
            ChangeBus::new(),
        );
        let app = router().with_state(AppState {
            store: store.clone(),
        });

        let response = app
            .oneshot(Request::get("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        store.remove("abc123").await;

        let mut body = response.into_body().into_data_stream();
        let frame = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.contains("event: conversations:updated"));
        assert!(text.contains("data: []"));
    }

    #[tokio::test]
    async fn test_ensure_full_route() {
        let (app, _) = app(
            FakeGateway::new().with_conversation(
                "abc123",
                Scripted::Ok(json!({
                    "_id": "abc123",
                    "title": "Chat",
                    "messages": [{ "userPrompt": "q", "botResponse": "a" }, { "userPrompt": "q2", "botResponse": "a2" }]
                })),
            ),
            json!([]),
        )
        .await;

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/conversations/full",
                json!({ "id": "abc123", "title": "Chat", "messages": [], "messageCount": 2, "raw": {} }),
            ))
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }
}
