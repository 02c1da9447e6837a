//! Remote HTTP backend responder.
//!
//! Posts `{numero, mensaje}` to the configured endpoint. When the primary
//! endpoint fails the same body is retried once against a fallback URL.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use super::Responder;
use super::error::{ResponderError, check_response_error};
use super::types::{BackendRequest, extract_reply};

/// Derive the fallback URL from the primary endpoint.
///
/// `.../api/chat` becomes `.../api/chat/send`; anything else gets `/send`
/// appended unless it already ends with it.
pub fn fallback_url(endpoint: &str) -> String {
    if let Some(base) = endpoint.strip_suffix("/api/chat") {
        return format!("{base}/api/chat/send");
    }
    if endpoint.ends_with("/send") {
        return endpoint.to_string();
    }
    format!("{}/send", endpoint.trim_end_matches('/'))
}

pub struct BackendResponder {
    client: Client,
    endpoint: String,
    fallback: String,
    api_key: Option<String>,
}

impl BackendResponder {
    pub fn new(
        client: Client,
        endpoint: String,
        fallback: String,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint,
            fallback,
            api_key,
        }
    }

    async fn post(&self, url: &str, numero: &str, text: &str) -> Result<String, ResponderError> {
        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("X-API-KEY", key);
        }

        let body = BackendRequest {
            numero,
            mensaje: text,
        };
        let response = req.json(&body).send().await?;

        if let Some(err) = check_response_error(&response) {
            return Err(err);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ResponderError::Api { status, message });
        }

        let bytes = response.bytes().await?;
        let body: Value = serde_json::from_slice(&bytes)?;
        extract_reply(&body).ok_or(ResponderError::EmptyReply)
    }
}

#[async_trait]
impl Responder for BackendResponder {
    fn name(&self) -> &'static str {
        "backend"
    }

    async fn respond(&self, conversation_id: &str, text: &str) -> Result<String, ResponderError> {
        let numero = conversation_id
            .split_once('@')
            .map_or(conversation_id, |(user, _)| user);

        match self.post(&self.endpoint, numero, text).await {
            Ok(reply) => Ok(reply),
            // Upstream answered; a different URL will not help.
            Err(ResponderError::EmptyReply) => Err(ResponderError::EmptyReply),
            Err(primary) if self.fallback != self.endpoint => {
                warn!(error = %primary, fallback = %self.fallback, "Primary backend failed, trying fallback");
                self.post(&self.fallback, numero, text).await.map_err(|e| {
                    debug!(error = %e, "Fallback backend failed");
                    primary
                })
            }
            Err(primary) => Err(primary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_url_variants() {
        assert_eq!(
            fallback_url("https://brain.example.com/api/chat"),
            "https://brain.example.com/api/chat/send"
        );
        assert_eq!(
            fallback_url("https://brain.example.com/reply/"),
            "https://brain.example.com/reply/send"
        );
        assert_eq!(
            fallback_url("https://brain.example.com/api/chat/send"),
            "https://brain.example.com/api/chat/send"
        );
    }

    #[cfg(feature = "server")]
    mod http {
        use super::*;
        use std::sync::{Arc, Mutex};

        use axum::extract::State;
        use axum::http::{HeaderMap, StatusCode};
        use axum::routing::post;
        use axum::{Json, Router};
        use serde_json::json;

        use crate::testing::serve_router;

        type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

        async fn record(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) {
            let key = headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            seen.lock().unwrap().push((key, body));
        }

        #[tokio::test]
        async fn primary_reply() {
            let seen: Seen = Arc::default();
            let app = Router::new()
                .route(
                    "/api/chat",
                    post(|state: State<Seen>, headers: HeaderMap, body: Json<Value>| async move {
                        record(state, headers, body).await;
                        Json(json!({"respuesta": "hola desde el backend"}))
                    }),
                )
                .with_state(seen.clone());
            let base_url = serve_router(app).await;
            let endpoint = format!("{base_url}/api/chat");
            let backend = BackendResponder::new(
                Client::new(),
                endpoint.clone(),
                fallback_url(&endpoint),
                Some("k-123".to_string()),
            );

            let reply = backend
                .respond("51987654321@s.whatsapp.net", "hola")
                .await
                .unwrap();
            assert_eq!(reply, "hola desde el backend");

            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].0.as_deref(), Some("k-123"));
            assert_eq!(seen[0].1, json!({"numero": "51987654321", "mensaje": "hola"}));
        }

        #[tokio::test]
        async fn falls_back_to_send_url() {
            let app = Router::new()
                .route(
                    "/api/chat",
                    post(|| async { (StatusCode::NOT_FOUND, "no such route") }),
                )
                .route(
                    "/api/chat/send",
                    post(|| async { Json(json!("respuesta directa")) }),
                );
            let base_url = serve_router(app).await;
            let endpoint = format!("{base_url}/api/chat");
            let backend =
                BackendResponder::new(Client::new(), endpoint.clone(), fallback_url(&endpoint), None);

            let reply = backend.respond("51987654321@s.whatsapp.net", "hola").await.unwrap();
            assert_eq!(reply, "respuesta directa");
        }

        #[tokio::test]
        async fn both_failing_reports_primary_error() {
            let app = Router::new()
                .route(
                    "/api/chat",
                    post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
                )
                .route(
                    "/api/chat/send",
                    post(|| async { (StatusCode::NOT_FOUND, "missing") }),
                );
            let base_url = serve_router(app).await;
            let endpoint = format!("{base_url}/api/chat");
            let backend =
                BackendResponder::new(Client::new(), endpoint.clone(), fallback_url(&endpoint), None);

            let err = backend.respond("51987654321", "hola").await.unwrap_err();
            assert!(matches!(err, ResponderError::Api { status: 502, .. }));
        }

        #[tokio::test]
        async fn reply_without_text_is_not_retried() {
            let seen: Seen = Arc::default();
            let app = Router::new()
                .route("/api/chat", post(|| async { Json(json!({"status": "ok"})) }))
                .route(
                    "/api/chat/send",
                    post(|state: State<Seen>, headers: HeaderMap, body: Json<Value>| async move {
                        record(state, headers, body).await;
                        Json(json!({"reply": "should not be used"}))
                    }),
                )
                .with_state(seen.clone());
            let base_url = serve_router(app).await;
            let endpoint = format!("{base_url}/api/chat");
            let backend =
                BackendResponder::new(Client::new(), endpoint.clone(), fallback_url(&endpoint), None);

            let err = backend.respond("51987654321", "hola").await.unwrap_err();
            assert!(matches!(err, ResponderError::EmptyReply));
            assert!(seen.lock().unwrap().is_empty());
        }
    }
}
