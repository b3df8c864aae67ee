use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llm_switchboard::config::{ConfigStore, Settings, StaticCredentials};
use llm_switchboard::http::reqwest::ReqwestTransport;
use llm_switchboard::http::{HttpRequest, HttpTransport, TransportError};
use llm_switchboard::{AdapterErrorKind, Dispatcher, LLMError};

fn transport() -> ReqwestTransport {
    ReqwestTransport::default_client().expect("client")
}

fn dispatcher_for(server: &MockServer) -> Dispatcher {
    let settings = Settings::from_json_str(
        &json!({
            "current_provider": "local",
            "max_retries": 2,
            "retry_base_delay_ms": 0,
            "models": {
                "local": {
                    "kind": "openai",
                    "model": "gpt-test",
                    "base_url": server.uri(),
                    "credential": {"type": "inline", "value": "sk-local"}
                }
            }
        })
        .to_string(),
    )
    .expect("settings");
    let store = ConfigStore::new(settings, Arc::new(StaticCredentials::new())).expect("store");
    Dispatcher::new(Arc::new(store), Arc::new(transport()))
}

#[tokio::test]
async fn non_success_status_is_returned_as_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "3")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let response = transport()
        .send(HttpRequest::post_json(
            format!("{}/echo", server.uri()),
            b"{}".to_vec(),
        ))
        .await
        .expect("response");

    assert_eq!(response.status, 429);
    assert_eq!(response.text(), "slow down");
    assert_eq!(response.headers.get("retry-after").map(String::as_str), Some("3"));
}

#[tokio::test]
async fn slow_response_maps_to_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let err = transport()
        .send(
            HttpRequest::get(format!("{}/slow", server.uri()))
                .with_timeout(Duration::from_millis(50)),
        )
        .await
        .expect_err("timeout");

    assert!(matches!(err, TransportError::Timeout { .. }), "{err:?}");
}

#[tokio::test]
async fn dispatcher_talks_to_openai_compatible_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-local"))
        .and(body_partial_json(json!({"model": "gpt-test", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "pong"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server);
    let result = dispatcher.generate("ping", None, None).await.expect("result");

    assert_eq!(result.text, "pong");
    assert_eq!(result.provider_id, "local");
    assert_eq!(result.model, "gpt-test");
}

#[tokio::test]
async fn dispatcher_streams_server_sent_events() {
    let server = MockServer::start().await;
    let events = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"po\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ng\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(events, "text/event-stream"))
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server);
    let chunks: Vec<_> = dispatcher
        .stream_response("ping", None, None)
        .await
        .expect("stream")
        .map(|chunk| chunk.expect("chunk"))
        .collect()
        .await;

    let text: String = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
    assert_eq!(text, "pong");
    assert!(chunks.last().expect("final").is_final);
}

#[tokio::test]
async fn server_errors_are_retried_then_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "boom"}})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server);
    let err = dispatcher
        .generate("ping", None, None)
        .await
        .expect_err("server error");

    match err {
        LLMError::Adapter(err) => {
            assert_eq!(err.kind, AdapterErrorKind::Vendor);
            assert_eq!(err.message, "boom");
            assert!(!err.retriable);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
