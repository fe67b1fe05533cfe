//! Remote pipeline integration tests
//!
//! Runs the OpenAI client against a local fake service

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::post;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use lumi::config::RemoteConfig;
use lumi::{
    AudioBuffer, AudioFormat, ChatTurn, OpenAiClient, RemoteError, RemotePipeline, WithTimeout,
};

mod common;

/// Start a fake service and return its API base URL
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/v1")
}

fn client_for(base_url: String) -> OpenAiClient {
    let config = RemoteConfig {
        api_key: Some(SecretString::from("sk-test".to_string())),
        base_url,
        ..RemoteConfig::default()
    };
    OpenAiClient::new(&config).unwrap()
}

fn wav() -> AudioBuffer {
    AudioBuffer::new(b"RIFF----WAVEfmt ".to_vec(), AudioFormat::Wav)
}

type Seen = Arc<Mutex<Vec<String>>>;

#[tokio::test]
async fn test_transcribe_posts_multipart_with_language() {
    let seen: Seen = Arc::default();
    let recorder = Arc::clone(&seen);
    let router = Router::new().route(
        "/v1/audio/transcriptions",
        post(move |headers: HeaderMap, body: Bytes| async move {
            let auth = headers[header::AUTHORIZATION].to_str().unwrap().to_string();
            recorder.lock().unwrap().push(auth);
            recorder
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&body).into_owned());
            axum::Json(json!({ "text": "konnichiwa" }))
        }),
    );
    let client = client_for(serve(router).await);

    let text = client
        .transcribe(&wav(), Some("ja"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(text, "konnichiwa");
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], "Bearer sk-test");
    assert!(seen[1].contains("whisper-1"));
    assert!(seen[1].contains("name=\"language\""));
    assert!(seen[1].contains("audio.wav"));
}

#[tokio::test]
async fn test_generate_reply_sends_context() {
    let seen: Arc<Mutex<Option<Value>>> = Arc::default();
    let recorder = Arc::clone(&seen);
    let router = Router::new().route(
        "/v1/chat/completions",
        post(move |axum::Json(body): axum::Json<Value>| async move {
            *recorder.lock().unwrap() = Some(body);
            axum::Json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "hello back" } }]
            }))
        }),
    );
    let client = client_for(serve(router).await);

    let context = [ChatTurn::system("be kind"), ChatTurn::user("hello")];
    let reply = client
        .generate_reply(&context, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(reply, "hello back");
    let body = seen.lock().unwrap().clone().unwrap();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["role"], "user");
    assert_eq!(body["messages"][1]["content"], "hello");
}

#[tokio::test]
async fn test_synthesize_returns_mp3_bytes() {
    let seen: Arc<Mutex<Option<Value>>> = Arc::default();
    let recorder = Arc::clone(&seen);
    let router = Router::new().route(
        "/v1/audio/speech",
        post(move |axum::Json(body): axum::Json<Value>| async move {
            *recorder.lock().unwrap() = Some(body);
            ([(header::CONTENT_TYPE, "audio/mpeg")], vec![0xFF, 0xFB, 0x90, 0x00])
        }),
    );
    let client = client_for(serve(router).await);

    let audio = client
        .synthesize("hello", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(audio.format, AudioFormat::Mp3);
    assert_eq!(audio.data, [0xFF, 0xFB, 0x90, 0x00]);
    let body = seen.lock().unwrap().clone().unwrap();
    assert_eq!(body["input"], "hello");
    assert_eq!(body["model"], "tts-1");
    assert_eq!(body["voice"], "alloy");
}

#[tokio::test]
async fn test_structured_error_maps_to_service_error() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                axum::Json(json!({ "error": { "message": "Incorrect API key" } })),
            )
        }),
    );
    let client = client_for(serve(router).await);

    let result = client
        .generate_reply(&[ChatTurn::user("hi")], &CancellationToken::new())
        .await;

    assert_eq!(
        result,
        Err(RemoteError::Service {
            status: 401,
            message: "Incorrect API key".to_string(),
        })
    );
}

#[tokio::test]
async fn test_plain_error_body_is_kept() {
    let router = Router::new().route(
        "/v1/audio/speech",
        post(|| async { (StatusCode::BAD_GATEWAY, "upstream down").into_response() }),
    );
    let client = client_for(serve(router).await);

    let result = client.synthesize("hi", &CancellationToken::new()).await;

    assert_eq!(
        result,
        Err(RemoteError::Service {
            status: 502,
            message: "upstream down".to_string(),
        })
    );
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let router = Router::new().route(
        "/v1/audio/transcriptions",
        post(|| async { "not json" }),
    );
    let client = client_for(serve(router).await);

    let result = client
        .transcribe(&wav(), None, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(RemoteError::Decode(_))), "{result:?}");
}

#[tokio::test]
async fn test_unreachable_service_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = client_for(format!("http://{addr}/v1"));

    let result = client
        .generate_reply(&[ChatTurn::user("hi")], &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(RemoteError::Transport(_))), "{result:?}");
}

fn slow_router() -> Router {
    Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            axum::Json(json!({ "choices": [] }))
        }),
    )
}

#[tokio::test]
async fn test_cancel_abandons_in_flight_call() {
    let client = client_for(serve(slow_router()).await);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = common::within(client.generate_reply(&[ChatTurn::user("hi")], &cancel)).await;

    assert_eq!(result, Err(RemoteError::Cancelled));
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let limit = Duration::from_millis(100);
    let client = WithTimeout::new(client_for(serve(slow_router()).await), limit);

    let result = common::within(
        client.generate_reply(&[ChatTurn::user("hi")], &CancellationToken::new()),
    )
    .await;

    assert_eq!(result, Err(RemoteError::Timeout(limit)));
}
