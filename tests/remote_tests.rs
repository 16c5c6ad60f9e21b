/// Integration tests for memoized functions backed by a REST document store,
/// served by a mock server.
use once_cell::sync::OnceCell;
use persisto::{persist, BackendError, PersistError};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DOCUMENT_PATH: &str = r"^/memos/remote_square/[A-Za-z0-9_-]{43}$";

static SQUARE_ADDRESS: OnceCell<String> = OnceCell::new();
static SQUARE_CALLS: AtomicU32 = AtomicU32::new(0);

#[persist(cache = SQUARE_ADDRESS.get().cloned().unwrap_or_default())]
fn remote_square(x: i64) -> i64 {
    SQUARE_CALLS.fetch_add(1, Ordering::SeqCst);
    x * x
}

#[tokio::test(flavor = "multi_thread")]
async fn test_miss_posts_then_hit_reads() {
    let server = MockServer::start().await;

    // First lookup misses, every later one finds the stored document.
    Mock::given(method("GET"))
        .and(path_regex(DOCUMENT_PATH))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(DOCUMENT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_id": "6650a1",
            "_etag": "3f2a",
            "identifier": "ignored",
            "funcname": "remote_square",
            "representation": "16",
            "metadata": {
                "function": "remote_square",
                "key": [["x", 4]],
                "created_at": "2024-05-01T12:00:00Z"
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/memos/remote_square"))
        .and(body_partial_json(json!({
            "funcname": "remote_square",
            "representation": "16",
            "metadata": {"function": "remote_square", "key": [["x", 4]]}
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    // `mongodb://host:port` addresses the store over HTTP.
    SQUARE_ADDRESS
        .set(format!("mongodb://{}", server.address()))
        .unwrap();

    let results = tokio::task::spawn_blocking(|| {
        let first = remote_square(4).unwrap();
        let second = remote_square(4).unwrap();
        (first, second)
    })
    .await
    .unwrap();

    assert_eq!(results, (16, 16));
    assert_eq!(SQUARE_CALLS.load(Ordering::SeqCst), 1);
}

static FLAKY_ADDRESS: OnceCell<String> = OnceCell::new();
static FLAKY_CALLS: AtomicU32 = AtomicU32::new(0);

#[persist(cache = FLAKY_ADDRESS.get().cloned().unwrap_or_default())]
fn remote_flaky(x: i64) -> i64 {
    FLAKY_CALLS.fetch_add(1, Ordering::SeqCst);
    x + 1
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_error_is_not_treated_as_miss() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    FLAKY_ADDRESS.set(server.uri()).unwrap();

    let err = tokio::task::spawn_blocking(|| remote_flaky(1).unwrap_err())
        .await
        .unwrap();
    match err {
        PersistError::Unavailable(BackendError::Http { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "maintenance");
        }
        other => panic!("expected an unavailable store, got {other:?}"),
    }
    assert_eq!(FLAKY_CALLS.load(Ordering::SeqCst), 0);
}

static RACE_ADDRESS: OnceCell<String> = OnceCell::new();

#[persist(cache = RACE_ADDRESS.get().cloned().unwrap_or_default())]
fn remote_race(x: i64) -> i64 {
    x * 10
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_insert_counts_as_stored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    // Another writer stored the same identifier first.
    Mock::given(method("POST"))
        .and(path("/memos/remote_race"))
        .respond_with(ResponseTemplate::new(409))
        .expect(1)
        .mount(&server)
        .await;

    RACE_ADDRESS.set(server.uri()).unwrap();

    let value = tokio::task::spawn_blocking(|| remote_race(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value, 50);
}
