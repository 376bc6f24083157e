use integration_tests::TestServer;
use integration_tests::mocks::openai::OpenAiMock;
use serde_json::json;

#[tokio::test]
async fn fenced_tool_call_in_plain_text_is_recovered() {
    let upstream = OpenAiMock::start().await;
    upstream
        .queue_text_response(
            "gpt-4o",
            "```tool_call\n{\"name\": \"get_weather\", \"arguments\": {\"city\": \"Berlin\"}}\n```",
        )
        .await;

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
            "messages": [{"role": "user", "content": "what's the weather in Berlin?"}],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "description": "Get the weather for a city",
                    "parameters": {"type": "object", "properties": {"city": {"type": "string"}}},
                },
            }],
        }))
        .send()
        .await;

    let tool_calls = &response["choices"][0]["message"]["tool_calls"];
    assert_eq!(tool_calls[0]["function"]["name"], "get_weather");
    let arguments: serde_json::Value = serde_json::from_str(tool_calls[0]["function"]["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(arguments["city"], "Berlin");
}

#[tokio::test]
async fn embedded_tool_call_with_string_encoded_arguments_is_recovered() {
    let upstream = OpenAiMock::start().await;
    upstream
        .queue_text_response(
            "gpt-4o",
            r#"Before {"tool_calls":[{"id":"c1","type":"function","function":{"name":"write_to_file","arguments":"{\"path\":\"/t.txt\",\"content\":\"hi\"}"}}]} after"#,
        )
        .await;

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
            "messages": [{"role": "user", "content": "write hi to /t.txt"}],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "Write",
                    "description": "Write a file",
                    "parameters": {"type": "object", "properties": {"path": {"type": "string"}, "content": {"type": "string"}}},
                },
            }],
        }))
        .send()
        .await;

    let message = &response["choices"][0]["message"];
    assert_eq!(message["content"], "Before after");

    let tool_calls = &message["tool_calls"];
    assert_eq!(tool_calls[0]["function"]["name"], "Write");
    let arguments: serde_json::Value = serde_json::from_str(tool_calls[0]["function"]["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(arguments["path"], "/t.txt");
    assert_eq!(arguments["content"], "hi");
}

#[tokio::test]
async fn text_with_no_tool_call_intent_passes_through_unchanged() {
    let upstream = OpenAiMock::start().await;
    upstream.queue_text_response("gpt-4o", "just a normal reply").await;

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

    assert_eq!(response["choices"][0]["message"]["content"], "just a normal reply");
    assert!(response["choices"][0]["message"]["tool_calls"].is_null());
}
