use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use ctxmcp::{
    BridgeError, backend,
    config::{Config, Settings},
    indexer::Blob,
};
use serde::Deserialize;
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tempfile::TempDir;
use tokio::net::TcpListener;

#[derive(Clone)]
struct StubState {
    upload_calls: Arc<AtomicUsize>,
    retrieval_blobs: Arc<AtomicUsize>,
    fail_first: usize,
    fail_status: StatusCode,
}

#[derive(Deserialize)]
struct UploadPayload {
    blobs: Vec<Blob>,
}

#[derive(Deserialize)]
struct RetrievalPayload {
    information_request: String,
    blobs: RetrievalBlobs,
}

#[derive(Deserialize)]
struct RetrievalBlobs {
    added_blobs: Vec<String>,
}

async fn start_stub(
    fail_first: usize,
    fail_status: StatusCode,
) -> (SocketAddr, StubState, tokio::task::JoinHandle<()>) {
    let state = StubState {
        upload_calls: Arc::new(AtomicUsize::new(0)),
        retrieval_blobs: Arc::new(AtomicUsize::new(0)),
        fail_first,
        fail_status,
    };
    let app = Router::new()
        .route(
            "/batch-upload",
            post(
                |State(st): State<StubState>, Json(p): Json<UploadPayload>| async move {
                    let n = st.upload_calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= st.fail_first {
                        return (st.fail_status, "boom".to_string()).into_response();
                    }
                    let names: Vec<String> =
                        p.blobs.iter().map(|b| format!("n:{}", b.path)).collect();
                    Json(json!({ "blob_names": names })).into_response()
                },
            ),
        )
        .route(
            "/agents/codebase-retrieval",
            post(
                |State(st): State<StubState>, Json(p): Json<RetrievalPayload>| async move {
                    st.retrieval_blobs
                        .store(p.blobs.added_blobs.len(), Ordering::SeqCst);
                    let formatted = if p.information_request == "give me nothing" {
                        String::new()
                    } else {
                        format!("OK: {}", p.information_request)
                    };
                    Json(json!({ "formatted_retrieval": formatted })).into_response()
                },
            ),
        )
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, state, handle)
}

fn test_config(base_url: String) -> (Config, TempDir) {
    let td = tempfile::tempdir().unwrap();
    let root_dir = td.path().join("cfg");
    let data_dir = td.path().join("data");
    std::fs::create_dir_all(&root_dir).unwrap();
    std::fs::create_dir_all(&data_dir).unwrap();
    let cfg = Config {
        settings: Settings {
            batch_size: 2,
            max_retries: 3,
            retry_base_delay: 0.1,
            base_url,
            token: "TEST".into(),
            text_extensions: vec![".txt".into()],
            exclude_patterns: vec![],
            ..Settings::default()
        },
        root_dir: root_dir.clone(),
        data_dir,
        settings_path: root_dir.join("settings.toml"),
    };
    (cfg, td)
}

fn sample_blobs(n: usize) -> Vec<Blob> {
    (0..n)
        .map(|i| Blob {
            path: format!("f{i}.txt"),
            content: format!("c{i}"),
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_retries_transient_until_success() {
    let (addr, state, _h) = start_stub(2, StatusCode::SERVICE_UNAVAILABLE).await;
    let (cfg, _td) = test_config(format!("http://{addr}"));
    let client = backend::http_client();

    let names = backend::upload_batch(&cfg, &client, &sample_blobs(2))
        .await
        .unwrap();
    assert_eq!(names, vec!["n:f0.txt", "n:f1.txt"]);
    assert_eq!(state.upload_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_4xx_is_permanent_and_not_retried() {
    let (addr, state, _h) = start_stub(usize::MAX, StatusCode::BAD_REQUEST).await;
    let (cfg, _td) = test_config(format!("http://{addr}"));
    let client = backend::http_client();

    let err = backend::upload_batch(&cfg, &client, &sample_blobs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::UploadPermanent { .. }));
    assert_eq!(state.upload_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_exhausting_retries_is_transient() {
    let (addr, state, _h) = start_stub(usize::MAX, StatusCode::SERVICE_UNAVAILABLE).await;
    let (cfg, _td) = test_config(format!("http://{addr}"));
    let client = backend::http_client();

    let err = backend::upload_batch(&cfg, &client, &sample_blobs(1))
        .await
        .unwrap_err();
    assert!(err.is_transient());
    match err {
        BridgeError::UploadTransient { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected transient failure, got {other:?}"),
    }
    assert_eq!(state.upload_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_batch_makes_no_request() {
    let (addr, state, _h) = start_stub(0, StatusCode::OK).await;
    let (cfg, _td) = test_config(format!("http://{addr}"));
    let client = backend::http_client();

    let names = backend::upload_batch(&cfg, &client, &[]).await.unwrap();
    assert!(names.is_empty());
    assert_eq!(state.upload_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn retrieval_returns_formatted_text_and_carries_identities() {
    let (addr, state, _h) = start_stub(0, StatusCode::OK).await;
    let (cfg, _td) = test_config(format!("http://{addr}"));
    let client = backend::http_client();

    let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let ans = backend::retrieve_formatted(&cfg, &client, &names, "hello")
        .await
        .unwrap();
    assert_eq!(ans, "OK: hello");
    assert_eq!(state.retrieval_blobs.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_retrieval_yields_fallback_message() {
    let (addr, _state, _h) = start_stub(0, StatusCode::OK).await;
    let (cfg, _td) = test_config(format!("http://{addr}"));
    let client = backend::http_client();

    let ans = backend::retrieve_formatted(&cfg, &client, &[], "give me nothing")
        .await
        .unwrap();
    assert_eq!(ans, "No relevant code context found for your query.");
}
