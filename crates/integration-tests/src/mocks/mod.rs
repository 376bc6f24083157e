//! Hand-rolled upstream mocks: tiny axum servers standing in for the real
//! OpenAI, Anthropic, and Google endpoints the gateway dispatches to, bound
//! to an OS-assigned loopback port the same way [`crate::TestServer`] binds
//! the gateway itself.

pub mod anthropic;
pub mod google;
pub mod openai;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use tokio::sync::Mutex;

/// Shared behind every mock: the canned response(s) to hand back, the
/// requests actually received (for assertions), and a call counter so tests
/// can script "fail once, then succeed" sequences.
pub(crate) struct MockState<Req> {
    pub(crate) responses: Mutex<Vec<MockResponse>>,
    pub(crate) received: Mutex<Vec<Req>>,
    pub(crate) call_count: AtomicUsize,
}

impl<Req> Default for MockState<Req> {
    fn default() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }
}

impl<Req> MockState<Req> {
    pub(crate) fn next_call_index(&self) -> usize {
        self.call_count.fetch_add(1, Ordering::SeqCst)
    }
}

/// A queued canned response: either a status+body to return verbatim, or an
/// SSE event sequence for streaming endpoints.
#[derive(Clone)]
pub(crate) enum MockResponse {
    Json { status: u16, body: serde_json::Value },
    Sse { events: Vec<String> },
}

/// Bind `router` on an OS-assigned loopback port and serve it in the
/// background for the lifetime of the returned handle.
pub(crate) async fn spawn(router: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{address}"), handle)
}
