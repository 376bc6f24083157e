use integration_tests::TestServer;
use integration_tests::mocks::google::GoogleMock;
use serde_json::json;

#[tokio::test]
async fn basic_completion_round_trips_through_google_dialect() {
    let upstream = GoogleMock::start().await;
    upstream.queue_text_response("hello there").await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "google"
        api_key = "AIza-test"
        base_url = "{}"
        "#,
        upstream.base_url
    ))
    .await;

    let response = server
        .openai_completions(json!({
            "model": "gemini-pro",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await;

    assert_eq!(response["choices"][0]["message"]["content"], "hello there");

    let requests = upstream.received_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model_and_action, "gemini-pro:generateContent");
    assert_eq!(requests[0].api_key.as_deref(), Some("AIza-test"));
}

#[tokio::test]
async fn streaming_completion_forwards_deltas() {
    let upstream = GoogleMock::start().await;
    upstream.queue_stream_response(&["hel", "lo"]).await;

    let server = TestServer::start(&format!(
        r#"
        [llm.providers.default]
        provider = "google"
        api_key = "AIza-test"
        base_url = "{}"
        "#,
        upstream.base_url
    ))
    .await;

    let events = server
        .openai_completions(json!({
            "model": "gemini-pro",
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
