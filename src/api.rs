//! HTTP boundary: accepts user messages for dialogs and returns the answered
//! message.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::domain::Photo;
use crate::error::TurnError;
use crate::memory::MemoryStore;
use crate::orchestrator::{AnsweredMessage, DialogTurnOrchestrator};

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<DialogTurnOrchestrator>,
    pub store: MemoryStore,
}

#[derive(Debug, Deserialize)]
pub struct SubmitMessageRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub photo: Option<Photo>,
}

#[derive(Debug, Serialize)]
struct DialogResponse {
    id: i64,
    instance_id: i64,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("instance {0} not found")]
    InstanceNotFound(i64),

    #[error(transparent)]
    Turn(#[from] TurnError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::InstanceNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Turn(e) if e.is_not_found() => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Turn(TurnError::Handler { .. } | TurnError::AnswerHook { .. }) => {
                (StatusCode::BAD_GATEWAY, "BOT_FAILURE")
            }
            ApiError::Turn(TurnError::HandlerTimeout { .. }) => {
                (StatusCode::GATEWAY_TIMEOUT, "BOT_TIMEOUT")
            }
            ApiError::Turn(_) | ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/instances/{instance_id}/dialogs", post(create_dialog))
        .route("/dialogs/{dialog_id}/messages", post(submit_message))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn create_dialog(
    State(state): State<ApiState>,
    Path(instance_id): Path<i64>,
) -> Result<(StatusCode, Json<DialogResponse>), ApiError> {
    let dialog = state
        .store
        .create_dialog(instance_id)
        .await?
        .ok_or(ApiError::InstanceNotFound(instance_id))?;

    Ok((
        StatusCode::CREATED,
        Json(DialogResponse {
            id: dialog.id,
            instance_id: dialog.instance.id,
            created_at: dialog.created_at,
        }),
    ))
}

async fn submit_message(
    State(state): State<ApiState>,
    Path(dialog_id): Path<i64>,
    payload: Result<Json<SubmitMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AnsweredMessage>), ApiError> {
    let Json(request) = payload?;
    if request.text.trim().is_empty() && request.photo.is_none() {
        return Err(ApiError::Validation(
            "message needs text or a photo".to_string(),
        ));
    }

    // The orchestrator blocks its caller for the whole turn, so give it a
    // thread of its own.
    let orchestrator = Arc::clone(&state.orchestrator);
    let answered = tokio::task::spawn_blocking(move || {
        orchestrator.submit_message(dialog_id, request.text, request.photo)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("turn task panicked: {}", e)))??;

    Ok((StatusCode::CREATED, Json(answered)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::{Bot, BotContext, BotResolver};
    use crate::config::{BotConfig, TurnConfig};
    use crate::domain::{MultiPartAnswer, Update};
    use crate::instance_lock::InstanceLocks;
    use crate::memory::Role;
    use crate::platform::{ApiPlatform, Platform, DEFAULT_PLATFORM};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Bots that misbehave in one specific way.
    #[derive(Clone, Copy)]
    enum Misbehavior {
        Fail,
        Hang,
        FailHook,
    }

    struct BrokenBot(Misbehavior);

    #[async_trait]
    impl Bot for BrokenBot {
        async fn handle_update(
            &mut self,
            _update: Update,
        ) -> anyhow::Result<Option<MultiPartAnswer>> {
            match self.0 {
                Misbehavior::Fail => anyhow::bail!("backend down"),
                Misbehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(None)
                }
                Misbehavior::FailHook => Ok(Some(MultiPartAnswer::text("half done"))),
            }
        }

        async fn on_answer_sent(&mut self, _answer: &MultiPartAnswer) -> anyhow::Result<()> {
            anyhow::bail!("delivery failed")
        }
    }

    async fn app() -> (Router, MemoryStore) {
        let store = MemoryStore::open_in_memory().unwrap();
        store.upsert_instance(1, "helper", "alice").await.unwrap();
        store.upsert_instance(2, "ghost-bot", "bob").await.unwrap();

        let resolver = BotResolver::from_config(&[BotConfig {
            codename: "helper".into(),
            kind: "echo".into(),
            platforms: vec!["default_platform".into()],
        }])
        .unwrap();
        let router = app_with(store.clone(), resolver, TurnConfig::default());
        (router, store)
    }

    /// Router over a single instance (id 1) bound to a broken bot.
    async fn broken_app(misbehavior: Misbehavior) -> (Router, MemoryStore) {
        let store = MemoryStore::open_in_memory().unwrap();
        store.upsert_instance(1, "broken", "alice").await.unwrap();

        let mut resolver = BotResolver::new();
        let platforms: Vec<Arc<dyn Platform>> = vec![Arc::new(ApiPlatform)];
        resolver.register(
            "broken",
            Arc::new(move |_ctx: BotContext| Box::new(BrokenBot(misbehavior)) as Box<dyn Bot>),
            platforms,
        );
        let turn = TurnConfig {
            handler_timeout_secs: 1,
            platform: DEFAULT_PLATFORM.to_string(),
        };
        let router = app_with(store.clone(), resolver, turn);
        (router, store)
    }

    fn app_with(store: MemoryStore, resolver: BotResolver, turn: TurnConfig) -> Router {
        let orchestrator = DialogTurnOrchestrator::new(
            store.clone(),
            Arc::new(resolver),
            Arc::new(InstanceLocks::new()),
            tokio::runtime::Handle::current(),
            turn,
        );

        router(ApiState {
            orchestrator: Arc::new(orchestrator),
            store,
        })
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_message_returns_answered_user_message() {
        let (app, store) = app().await;
        let dialog = store.create_dialog(1).await.unwrap().unwrap();

        let response = app
            .oneshot(post_json(
                &format!("/dialogs/{}/messages", dialog.id),
                json!({ "text": "Hello" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["sequence_id"], 0);
        assert_eq!(body["role"], "user");
        assert_eq!(body["content"], "Hello");
        assert_eq!(body["answer"], "Hello");
        assert_eq!(store.count_messages(dialog.id).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_message_is_rejected() {
        let (app, store) = app().await;
        let dialog = store.create_dialog(1).await.unwrap().unwrap();

        let response = app
            .oneshot(post_json(
                &format!("/dialogs/{}/messages", dialog.id),
                json!({ "text": "  " }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.count_messages(dialog.id).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_bot_maps_to_not_found() {
        let (app, store) = app().await;
        let dialog = store.create_dialog(2).await.unwrap().unwrap();

        let response = app
            .oneshot(post_json(
                &format!("/dialogs/{}/messages", dialog.id),
                json!({ "text": "boo" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(store.count_messages(dialog.id).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_create_dialog_for_unknown_instance() {
        let (app, _) = app().await;
        let response = app
            .oneshot(post_json("/instances/77/dialogs", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_create_dialog() {
        let (app, _) = app().await;
        let response = app
            .oneshot(post_json("/instances/1/dialogs", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["instance_id"], 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_malformed_payload_is_a_validation_error() {
        let (app, store) = app().await;
        let dialog = store.create_dialog(1).await.unwrap().unwrap();

        let response = app
            .oneshot(post_json(
                &format!("/dialogs/{}/messages", dialog.id),
                json!({ "text": 5 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(body["error"]["message"].as_str().unwrap().contains("text"));
        assert_eq!(store.count_messages(dialog.id).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failing_bot_maps_to_bad_gateway() {
        let (app, store) = broken_app(Misbehavior::Fail).await;
        let dialog = store.create_dialog(1).await.unwrap().unwrap();

        let response = app
            .oneshot(post_json(
                &format!("/dialogs/{}/messages", dialog.id),
                json!({ "text": "hello" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "BOT_FAILURE");

        let messages = store.list_messages(dialog.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failing_answer_hook_maps_to_bad_gateway() {
        let (app, store) = broken_app(Misbehavior::FailHook).await;
        let dialog = store.create_dialog(1).await.unwrap().unwrap();

        let response = app
            .oneshot(post_json(
                &format!("/dialogs/{}/messages", dialog.id),
                json!({ "text": "hello" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "BOT_FAILURE");
        assert_eq!(store.count_messages(dialog.id).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_hanging_bot_maps_to_gateway_timeout() {
        let (app, store) = broken_app(Misbehavior::Hang).await;
        let dialog = store.create_dialog(1).await.unwrap().unwrap();

        let response = app
            .oneshot(post_json(
                &format!("/dialogs/{}/messages", dialog.id),
                json!({ "text": "hello" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "BOT_TIMEOUT");
        assert_eq!(store.count_messages(dialog.id).await.unwrap(), 1);
    }

    #[test]
    fn test_storage_failure_maps_to_internal_error() {
        let err = ApiError::from(TurnError::Storage(anyhow::anyhow!("disk full")));
        assert_eq!(
            err.status(),
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        );
    }
}
