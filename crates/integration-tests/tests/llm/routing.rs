use integration_tests::TestServer;
use integration_tests::mocks::anthropic::AnthropicMock;
use integration_tests::mocks::openai::OpenAiMock;
use serde_json::json;

#[tokio::test]
async fn model_command_overrides_routing_to_named_provider() {
    let openai_upstream = OpenAiMock::start().await;
    let anthropic_upstream = AnthropicMock::start().await;
    anthropic_upstream.queue_text_response("claude-3-opus", "routed to anthropic").await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.openai_default]
        provider = "openai"
        api_key = "sk-openai"
        base_url = "{}"

        [llm.providers.anthropic_default]
        provider = "anthropic"
        api_key = "sk-anthropic"
        base_url = "{}"
        "#,
        openai_upstream.base_url, anthropic_upstream.base_url
    ))
    .await;

    let response = server
        .openai_completions(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "/model anthropic,claude-3-opus\nwhat's the weather?"}],
        }))
        .send()
        .await;

    assert_eq!(response["choices"][0]["message"]["content"], "routed to anthropic");
    assert_eq!(openai_upstream.call_count(), 0);
    assert_eq!(anthropic_upstream.received_requests().await.len(), 1);
}

#[tokio::test]
async fn background_strategy_routes_to_configured_small_model() {
    let upstream = OpenAiMock::start().await;
    upstream.queue_text_response("gpt-4o-mini", "background reply").await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "openai"
        api_key = "sk-openai"
        base_url = "{}"

        [llm.router]
        background = "gpt-4o-mini"
        default = "gpt-4o"
        "#,
        upstream.base_url
    ))
    .await;

    let response = server
        .openai_completions(json!({
            "model": "background",
            "messages": [{"role": "user", "content": "ping"}],
        }))
        .send()
        .await;

    assert_eq!(response["choices"][0]["message"]["content"], "background reply");
    let requests = upstream.received_requests().await;
    assert_eq!(requests[0]["model"], "gpt-4o-mini");
}

#[tokio::test]
async fn comma_separated_model_list_passes_through_to_first_candidate() {
    let upstream = OpenAiMock::start().await;
    upstream.queue_text_response("gpt-4o", "fallback handled").await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "openai"
        api_key = "sk-openai"
        base_url = "{}"
        "#,
        upstream.base_url
    ))
    .await;

    let response = server
        .openai_completions(json!({
            "model": "gpt-4o,gpt-3.5-turbo",
            "messages": [{"role": "user", "content": "ping"}],
        }))
        .send()
        .await;

    assert_eq!(response["choices"][0]["message"]["content"], "fallback handled");
    let requests = upstream.received_requests().await;
    assert_eq!(requests[0]["model"], "gpt-4o");
}
