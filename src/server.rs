//! Webhook endpoint and the single update worker behind it.
//!
//! The platform expects a fast 2xx for every delivery, so the HTTP handler
//! only decodes and enqueues. One worker drains the queue and runs each
//! update to completion before taking the next.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::platform::{update, InboundUpdate};
use crate::router::UpdateRouter;

#[derive(Clone)]
struct ServerState {
    queue: mpsc::Sender<InboundUpdate>,
}

pub fn build_router(queue: mpsc::Sender<InboundUpdate>) -> Router {
    Router::new()
        .route("/", get(liveness).post(receive_update))
        .with_state(ServerState { queue })
}

async fn liveness() -> &'static str {
    "Bot Active"
}

async fn receive_update(State(state): State<ServerState>, body: Bytes) -> &'static str {
    match update::decode(&body) {
        Ok(Some(update)) => {
            if let Err(e) = state.queue.try_send(update) {
                warn!("Dropping update, queue unavailable: {}", e);
            }
        }
        Ok(None) => debug!("Ignoring unsupported update"),
        Err(e) => warn!("Ignoring undecodable update: {:#}", e),
    }
    "OK"
}

/// Run updates one at a time. A panic inside a handler is contained to
/// that update.
pub fn spawn_worker(
    router: Arc<UpdateRouter>,
    mut queue: mpsc::Receiver<InboundUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = queue.recv().await {
            let router = Arc::clone(&router);
            let handled = tokio::spawn(async move { router.handle(update).await }).await;
            match handled {
                Ok(disposition) => debug!("Update processed: {:?}", disposition),
                Err(e) => error!("Update handler crashed: {}", e),
            }
        }
        info!("Update queue closed, worker exiting");
    })
}

pub async fn serve(listen: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!("Listening for webhook deliveries on {}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Webhook server failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn post(app: Router, body: &'static str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::post("/")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_update_is_enqueued_and_acked() {
        let (tx, mut rx) = mpsc::channel(4);
        let (status, body) = post(
            build_router(tx),
            r#"{"update_id":1,"message":{"message_id":2,"chat":{"id":3},"from":{"id":3,"first_name":"A"},"text":"hi"}}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
        match rx.try_recv().unwrap() {
            InboundUpdate::Message(msg) => assert_eq!(msg.text, "hi"),
            other => panic!("unexpected update {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_is_still_acked() {
        let (tx, mut rx) = mpsc::channel(4);
        let (status, _) = post(build_router(tx), "{{{").await;

        assert_eq!(status, StatusCode::OK);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_is_still_acked() {
        let (tx, _rx) = mpsc::channel(1);
        let body = r#"{"message":{"message_id":2,"chat":{"id":3},"from":{"id":3},"text":"hi"}}"#;
        let app = build_router(tx);

        assert_eq!(post(app.clone(), body).await.0, StatusCode::OK);
        assert_eq!(post(app, body).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_liveness() {
        let (tx, _rx) = mpsc::channel(1);
        let response = build_router(tx)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
