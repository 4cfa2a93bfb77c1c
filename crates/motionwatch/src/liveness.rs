//! HTTP liveness probe and manual cycle trigger.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use motionwatch_core::CycleTrigger;
use tokio::net::TcpListener;

/// Builds the router. Answers independently of how cycles are going.
pub fn router(trigger: CycleTrigger) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/trigger", get(trigger_cycle).post(trigger_cycle))
        .with_state(trigger)
}

async fn healthz() -> &'static str {
    "OK"
}

async fn trigger_cycle(State(trigger): State<CycleTrigger>) -> (StatusCode, &'static str) {
    trigger.fire();
    tracing::info!("Manual cycle requested");
    (StatusCode::ACCEPTED, "Cycle scheduled")
}

/// Binds the listener so address errors surface at startup.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind liveness endpoint on {addr}"))
}

/// Serves until the process exits.
pub async fn serve(listener: TcpListener, trigger: CycleTrigger) -> Result<()> {
    axum::serve(listener, router(trigger))
        .await
        .context("liveness endpoint stopped")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn start(trigger: CycleTrigger) -> String {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, trigger));
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_healthz_answers_ok() {
        let base = start(CycleTrigger::new()).await;
        let resp = reqwest::get(format!("{base}/healthz")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_trigger_wakes_waiter() {
        let trigger = CycleTrigger::new();
        let base = start(trigger.clone()).await;

        let resp = reqwest::get(format!("{base}/trigger")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
        assert_eq!(resp.text().await.unwrap(), "Cycle scheduled");

        tokio::time::timeout(Duration::from_secs(1), trigger.fired())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let base = start(CycleTrigger::new()).await;
        let resp = reqwest::get(format!("{base}/metrics")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
