use integration_tests::TestServer;
use integration_tests::mocks::openai::OpenAiMock;
use serde_json::json;

#[tokio::test]
async fn unknown_custom_key_is_rejected_with_401() {
    let upstream = OpenAiMock::start().await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "openai"
        api_key = "sk-test"
        base_url = "{}"
        custom_key = "team-a-key"
        "#,
        upstream.base_url
    ))
    .await;

    let (status, body) = server
        .openai_completions(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .header("authorization", "Bearer wrong-key")
        .send_raw()
        .await;

    assert_eq!(status, 401);
    assert_eq!(body["error"]["type"], "authentication_error");
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn matching_custom_key_reaches_its_channel() {
    let upstream = OpenAiMock::start().await;
    upstream.queue_text_response("gpt-4o", "authorized reply").await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "openai"
        api_key = "sk-test"
        base_url = "{}"
        custom_key = "team-a-key"
        "#,
        upstream.base_url
    ))
    .await;

    let response = server
        .openai_completions(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .header("x-api-key", "team-a-key")
        .send()
        .await;

    assert_eq!(response["choices"][0]["message"]["content"], "authorized reply");
}

#[tokio::test]
async fn upstream_internal_errors_surface_the_providers_message() {
    let upstream = OpenAiMock::start().await;
    upstream.queue_error(500, "a stack trace with secrets in it").await;

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

    assert_eq!(status, 500);
    assert_eq!(body["error"]["message"], "a stack trace with secrets in it");
}
