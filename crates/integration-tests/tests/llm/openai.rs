use integration_tests::TestServer;
use integration_tests::mocks::openai::OpenAiMock;
use serde_json::json;

#[tokio::test]
async fn basic_completion_round_trips_through_openai_dialect() {
    let upstream = OpenAiMock::start().await;
    upstream.queue_text_response("gpt-4o", "hello there").await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "openai"
        api_key = "sk-test"
        base_url = "{}"
        "#,
        upstream.base_url
    ))
    .await;

    let response = server
        .openai_completions(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await;

    assert_eq!(response["choices"][0]["message"]["content"], "hello there");
    assert_eq!(upstream.call_count(), 1);
}

#[tokio::test]
async fn streaming_completion_forwards_deltas_as_sse() {
    let upstream = OpenAiMock::start().await;
    upstream.queue_stream_response("gpt-4o", &["hel", "lo"]).await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "openai"
        api_key = "sk-test"
        base_url = "{}"
        "#,
        upstream.base_url
    ))
    .await;

    let events = server
        .openai_completions(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .stream()
        .await;

    let text: String = events
        .iter()
        .filter_map(|e| e["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(text, "hello");
}

#[tokio::test]
async fn model_filter_excludes_channel_and_returns_not_found() {
    let upstream = OpenAiMock::start().await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "openai"
        api_key = "sk-test"
        base_url = "{}"
        model_filter = "^gpt-4"
        "#,
        upstream.base_url
    ))
    .await;

    let (status, _) = server
        .openai_completions(json!({
            "model": "gpt-3.5-turbo",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send_raw()
        .await;

    assert_eq!(status, 404);
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn upstream_error_is_surfaced_with_mapped_status() {
    let upstream = OpenAiMock::start().await;
    upstream.queue_error(429, "rate limited").await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "openai"
        api_key = "sk-test"
        base_url = "{}"
        "#,
        upstream.base_url
    ))
    .await;

    let (status, body) = server
        .openai_completions(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send_raw()
        .await;

    assert_eq!(status, 429);
    assert_eq!(body["error"]["type"], "rate_limit_error");
}
