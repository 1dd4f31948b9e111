//! A tiny axum upstream that replays a scripted sequence of responses.
//!
//! mockito matches requests statelessly, so sequences like "429, then 200" and slow responses
//! are served from here instead.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Router};
use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};

#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl ScriptedResponse {
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: 200, body: body.into(), delay: Duration::ZERO }
    }

    #[must_use]
    pub fn status(status: u16) -> Self {
        Self { status, body: format!("{{\"error\":\"status {status}\"}}"), delay: Duration::ZERO }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone)]
struct ScriptState {
    script: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    fallback: ScriptedResponse,
    hits: Arc<AtomicUsize>,
}

async fn respond(State(state): State<ScriptState>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let next = state.script.lock().await.pop_front().unwrap_or_else(|| state.fallback.clone());

    if !next.delay.is_zero() {
        tokio::time::sleep(next.delay).await;
    }

    let status = StatusCode::from_u16(next.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [("content-type", "application/json")], next.body)
}

/// Serves `script` in order on any method and path, then `fallback` forever.
pub struct ScriptedUpstream {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl ScriptedUpstream {
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start(script: Vec<ScriptedResponse>, fallback: ScriptedResponse) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind scripted upstream");
        let addr = listener.local_addr().expect("scripted upstream address");
        let hits = Arc::new(AtomicUsize::new(0));

        let state = ScriptState {
            script: Arc::new(Mutex::new(script.into())),
            fallback,
            hits: Arc::clone(&hits),
        };
        let app = Router::new().fallback(respond).with_state(state);

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, hits, handle }
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of requests received so far.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for ScriptedUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
