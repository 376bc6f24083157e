use integration_tests::TestServer;
use integration_tests::mocks::anthropic::AnthropicMock;
use serde_json::json;

#[tokio::test]
async fn basic_completion_round_trips_through_anthropic_dialect() {
    let upstream = AnthropicMock::start().await;
    upstream.queue_text_response("claude-3-opus", "hello there").await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "anthropic"
        api_key = "sk-ant-test"
        base_url = "{}"
        "#,
        upstream.base_url
    ))
    .await;

    let response = server
        .anthropic_messages(json!({
            "model": "claude-3-opus",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}],
        }))
        .send()
        .await;

    assert_eq!(response["content"][0]["text"], "hello there");

    let requests = upstream.received_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].api_key.as_deref(), Some("sk-ant-test"));
    assert_eq!(requests[0].anthropic_version.as_deref(), Some("2023-06-01"));
}

#[tokio::test]
async fn streaming_completion_emits_anthropic_event_sequence() {
    let upstream = AnthropicMock::start().await;
    upstream.queue_stream_response("claude-3-opus", &["hel", "lo"]).await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "anthropic"
        api_key = "sk-ant-test"
        base_url = "{}"
        "#,
        upstream.base_url
    ))
    .await;

    let events = server
        .anthropic_messages(json!({
            "model": "claude-3-opus",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}],
        }))
        .stream()
        .await;

    let types: Vec<String> = events.iter().filter_map(|e| e["type"].as_str().map(str::to_string)).collect();
    assert!(types.contains(&"message_start".to_string()));
    assert!(types.contains(&"content_block_delta".to_string()));
    assert!(types.contains(&"message_stop".to_string()));
}

#[tokio::test]
async fn tool_use_response_round_trips_tool_call_block() {
    let upstream = AnthropicMock::start().await;
    upstream
        .queue_tool_use_response("claude-3-opus", "get_weather", json!({"city": "Berlin"}))
        .await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "anthropic"
        api_key = "sk-ant-test"
        base_url = "{}"
        "#,
        upstream.base_url
    ))
    .await;

    let response = server
        .anthropic_messages(json!({
            "model": "claude-3-opus",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": [{"type": "text", "text": "what's the weather in Berlin?"}]}],
            "tools": [{
                "name": "get_weather",
                "description": "Get the weather for a city",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}},
            }],
        }))
        .send()
        .await;

    assert_eq!(response["content"][0]["type"], "tool_use");
    assert_eq!(response["content"][0]["name"], "get_weather");
    assert_eq!(response["stop_reason"], "tool_use");
}

#[tokio::test]
async fn count_tokens_is_answered_locally_without_reaching_upstream() {
    let upstream = AnthropicMock::start().await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "anthropic"
        api_key = "sk-ant-test"
        base_url = "{}"
        "#,
        upstream.base_url
    ))
    .await;

    let response = server
        .count_tokens(json!({
            "model": "claude-3-opus",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "how many tokens is this?"}]}],
        }))
        .send()
        .await;

    assert!(response["input_tokens"].as_u64().unwrap() > 0);
    assert!(upstream.received_requests().await.is_empty());
}
