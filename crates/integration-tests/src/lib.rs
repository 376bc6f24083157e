//! Test harness for the LLM gateway: spins up `llm::router` on a loopback
//! port the same way the production binary does, minus config-file loading
//! and logging, plus a handful of hand-rolled mock upstream servers so
//! tests never touch a real provider.

pub mod mocks;

use std::net::SocketAddr;
use std::time::Duration;

use config::Config;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::json;

/// Thin wrapper around a `reqwest::Client` pinned to the test server's base URL.
#[derive(Clone)]
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(format!("{}{path}", self.base_url)).send().await.unwrap()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// A running `llm::router` bound to a loopback port, plus the config that
/// built it.
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    pub config: Config,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Parse `config_toml`, build the gateway router, and serve it on an
    /// OS-assigned loopback port.
    pub async fn start(config_toml: &str) -> Self {
        let config: Config = toml::from_str(config_toml).expect("valid test config");
        config.validate().expect("config passes validation");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let router = llm::router(&config).await.expect("router builds");
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = TestClient::new(format!("http://{address}"));

        Self {
            client,
            address,
            config,
            _handle: handle,
        }
    }

    pub fn openai_completions(&self, body: serde_json::Value) -> CompletionsRequest<'_> {
        let path = format!("{}/v1/chat/completions", self.config.llm.protocols.openai.path);
        CompletionsRequest {
            server: self,
            path,
            body,
            headers: HeaderMap::new(),
        }
    }

    pub fn anthropic_messages(&self, body: serde_json::Value) -> CompletionsRequest<'_> {
        let path = format!("{}/v1/messages", self.config.llm.protocols.anthropic.path);
        CompletionsRequest {
            server: self,
            path,
            body,
            headers: HeaderMap::new(),
        }
    }

    pub fn count_tokens(&self, body: serde_json::Value) -> CompletionsRequest<'_> {
        let path = format!("{}/v1/messages/count_tokens", self.config.llm.protocols.anthropic.path);
        CompletionsRequest {
            server: self,
            path,
            body,
            headers: HeaderMap::new(),
        }
    }
}

/// Fluent builder for a single completions-style request, with optional
/// header injection and both unary and streaming send variants.
pub struct CompletionsRequest<'a> {
    server: &'a TestServer,
    path: String,
    body: serde_json::Value,
    headers: HeaderMap,
}

impl<'a> CompletionsRequest<'a> {
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers
            .insert(HeaderName::from_bytes(key.as_bytes()).unwrap(), HeaderValue::from_str(value).unwrap());
        self
    }

    fn request_builder(&self) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.server.client.base_url(), self.path);
        let mut builder = self.server.client.client.post(url).json(&self.body);
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        builder
    }

    /// Send and return the parsed JSON body, asserting success.
    pub async fn send(self) -> serde_json::Value {
        let response = self.request_builder().send().await.unwrap();
        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(status.is_success(), "expected success, got {status}: {body}");
        body
    }

    /// Send and return the raw status and body, for error-path assertions.
    pub async fn send_raw(self) -> (u16, serde_json::Value) {
        let response = self.request_builder().send().await.unwrap();
        let status = response.status().as_u16();
        let body = response.json().await.unwrap();
        (status, body)
    }

    /// Force `stream: true` and collect every SSE event's `data:` payload.
    pub async fn stream(mut self) -> Vec<serde_json::Value> {
        use eventsource_stream::Eventsource;
        use futures::StreamExt;

        self.body["stream"] = json!(true);
        let response = self.request_builder().send().await.unwrap();
        assert_eq!(response.status(), 200);

        let mut events = Vec::new();
        let mut stream = response.bytes_stream().eventsource();
        while let Some(event) = stream.next().await {
            let event = event.unwrap();
            if event.data == "[DONE]" {
                break;
            }
            events.push(serde_json::from_str(&event.data).unwrap());
        }
        events
    }
}
