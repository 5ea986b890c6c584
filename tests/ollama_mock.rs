use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use caption_gen::caption::{
    CaptionDispatcher, CaptionError, ImageInput, OllamaClient, RecordingObserver, RequestMode,
    UNSURE_PHRASE,
};

const IMAGE_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n-not-really-pixels-";

#[derive(Clone, Copy)]
enum Scenario {
    Healthy,
    ModelMissing,
    Garbage,
    Slow,
}

struct MockOllama {
    scenario: Scenario,
    requests: Mutex<Vec<Value>>,
}

async fn generate(State(state): State<Arc<MockOllama>>, Json(body): Json<Value>) -> Response {
    state.requests.lock().unwrap().push(body.clone());
    let streaming = body["stream"].as_bool().unwrap_or(false);

    match state.scenario {
        Scenario::ModelMissing => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("model '{}' not found", body["model"].as_str().unwrap_or(""))})),
        )
            .into_response(),
        Scenario::Garbage => (StatusCode::OK, "definitely not json").into_response(),
        Scenario::Slow => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"response": "too late"})).into_response()
        }
        Scenario::Healthy if !streaming => Json(json!({
            "model": body["model"],
            "response": "Golden hour vibes #sunset",
            "done": true
        }))
        .into_response(),
        Scenario::Healthy => {
            // The second object is cut in half across two writes.
            let chunks = vec![
                "{\"response\":\"Sunset\"}\n{\"response\":\" gl",
                "ow\"}\n\n",
                "not json at all\n{\"response\":\" #golden\"}\n",
                "{\"response\":\"\",\"done\":true,\"done_reason\":\"stop\",\"eval_count\":4}\n",
            ];
            let stream = async_stream::stream! {
                for chunk in chunks {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    yield Ok::<_, std::io::Error>(Bytes::from(chunk));
                }
            };
            (
                [(header::CONTENT_TYPE, "application/x-ndjson")],
                Body::from_stream(stream),
            )
                .into_response()
        }
    }
}

async fn spawn_mock(scenario: Scenario) -> (String, Arc<MockOllama>) {
    let state = Arc::new(MockOllama {
        scenario,
        requests: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/api/generate", post(generate))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

fn dispatcher_for(endpoint: &str) -> CaptionDispatcher {
    let client = OllamaClient::new(endpoint).unwrap();
    CaptionDispatcher::new(Arc::new(client))
}

fn image() -> ImageInput {
    ImageInput::from_bytes("beach.png", IMAGE_BYTES.to_vec())
}

#[tokio::test]
async fn test_buffered_caption_round_trip() {
    let (endpoint, state) = spawn_mock(Scenario::Healthy).await;
    let dispatcher = dispatcher_for(&endpoint);

    let mut observer = RecordingObserver::default();
    let outcome = dispatcher
        .generate_caption(Some(&image()), RequestMode::Buffered, &mut observer)
        .await
        .unwrap();

    assert_eq!(observer.values, vec!["Golden hour vibes #sunset"]);
    assert_eq!(outcome.caption, "Golden hour vibes #sunset");
    assert!(outcome.done);

    let requests = state.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let sent = &requests[0];
    assert_eq!(sent["model"], "gemma3:4b");
    assert_eq!(sent["stream"], false);
    assert!(sent["prompt"].as_str().unwrap().contains(UNSURE_PHRASE));
    let images = sent["images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(
        STANDARD.decode(images[0].as_str().unwrap()).unwrap(),
        IMAGE_BYTES
    );
}

#[tokio::test]
async fn test_streaming_caption_grows_by_prefix() {
    let (endpoint, state) = spawn_mock(Scenario::Healthy).await;
    let dispatcher = dispatcher_for(&endpoint);

    let mut observer = RecordingObserver::default();
    let outcome = dispatcher
        .generate_caption(Some(&image()), RequestMode::Streaming, &mut observer)
        .await
        .unwrap();

    assert_eq!(
        observer.values,
        vec!["Sunset", "Sunset glow", "Sunset glow #golden"]
    );
    for pair in observer.values.windows(2) {
        assert!(pair[1].starts_with(&pair[0]));
    }
    assert_eq!(outcome.caption, "Sunset glow #golden");
    assert_eq!(outcome.publishes, 3);
    assert!(outcome.done);
    assert_eq!(state.requests.lock().unwrap()[0]["stream"], true);
}

#[tokio::test]
async fn test_missing_model_is_provider_error() {
    let (endpoint, _state) = spawn_mock(Scenario::ModelMissing).await;
    let dispatcher = dispatcher_for(&endpoint).with_model("llava:404");

    for mode in [RequestMode::Buffered, RequestMode::Streaming] {
        let mut observer = RecordingObserver::default();
        let err = dispatcher
            .generate_caption(Some(&image()), mode, &mut observer)
            .await
            .unwrap_err();

        match err {
            CaptionError::Provider { status, ref message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "model 'llava:404' not found");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(observer.values.is_empty());
    }
}

#[tokio::test]
async fn test_malformed_body_leaves_caption_empty() {
    let (endpoint, _state) = spawn_mock(Scenario::Garbage).await;
    let dispatcher = dispatcher_for(&endpoint);

    let mut observer = RecordingObserver::default();
    let err = dispatcher
        .generate_caption(Some(&image()), RequestMode::Buffered, &mut observer)
        .await
        .unwrap_err();
    assert!(err.is_decode());

    let caption = dispatcher
        .generate_caption_or_empty(Some(&image()), RequestMode::Buffered, &mut observer)
        .await;
    assert_eq!(caption, "");
    assert!(observer.values.is_empty());

    // A garbage streaming body is skipped line by line, not an error.
    let outcome = dispatcher
        .generate_caption(Some(&image()), RequestMode::Streaming, &mut observer)
        .await
        .unwrap();
    assert_eq!(outcome.caption, "");
    assert!(!outcome.done);
    assert!(observer.values.is_empty());
}

#[tokio::test]
async fn test_no_image_sends_nothing() {
    let (endpoint, state) = spawn_mock(Scenario::Healthy).await;
    let dispatcher = dispatcher_for(&endpoint);

    let mut observer = RecordingObserver::default();
    let err = dispatcher
        .generate_caption(None, RequestMode::Streaming, &mut observer)
        .await
        .unwrap_err();

    assert!(matches!(err, CaptionError::NoImageSelected));
    assert!(state.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let (endpoint, _state) = spawn_mock(Scenario::Slow).await;
    let dispatcher = dispatcher_for(&endpoint).with_timeout(Some(Duration::from_millis(200)));

    let mut observer = RecordingObserver::default();
    let err = dispatcher
        .generate_caption(Some(&image()), RequestMode::Buffered, &mut observer)
        .await
        .unwrap_err();

    assert!(matches!(err, CaptionError::Timeout(_)));
    assert!(!dispatcher.is_busy());
}

#[tokio::test]
async fn test_nothing_listening_is_connection_refused() {
    let endpoint = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };
    let dispatcher = dispatcher_for(&endpoint);

    let mut observer = RecordingObserver::default();
    let err = dispatcher
        .generate_caption(Some(&image()), RequestMode::Streaming, &mut observer)
        .await
        .unwrap_err();

    assert!(matches!(err, CaptionError::ConnectionRefused(_)), "got {err}");
}
