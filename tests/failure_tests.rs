/// Integration tests for failure handling: computation errors, corrupted
/// entries, unreachable stores and failed writes.
use once_cell::sync::Lazy;
use persisto::{
    persist, BackendError, CacheBackend, CacheEntry, CacheLocation, EntryMetadata, FsBackend,
    KeyError, Memoizer, PersistError,
};
use std::collections::BTreeMap;
use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

static CACHE_ROOT: Lazy<TempDir> = Lazy::new(|| tempfile::tempdir().unwrap());

fn cache_root() -> String {
    format!("file://{}", CACHE_ROOT.path().display())
}

static DIVIDE_CALLS: AtomicU32 = AtomicU32::new(0);

#[persist(cache = cache_root())]
fn divide(a: i64, b: i64) -> Result<i64, String> {
    DIVIDE_CALLS.fetch_add(1, Ordering::SeqCst);
    if b == 0 {
        return Err("division by zero".to_string());
    }
    Ok(a / b)
}

#[test]
fn test_computation_errors_are_not_stored() {
    assert_eq!(divide(10, 2).unwrap(), 5);
    assert_eq!(divide(10, 2).unwrap(), 5);
    assert_eq!(DIVIDE_CALLS.load(Ordering::SeqCst), 1);

    for _ in 0..2 {
        match divide(1, 0) {
            Err(PersistError::Computation(message)) => assert_eq!(message, "division by zero"),
            other => panic!("expected the function's own error, got {other:?}"),
        }
    }
    assert_eq!(DIVIDE_CALLS.load(Ordering::SeqCst), 3);
}

static PARSE_CALLS: AtomicU32 = AtomicU32::new(0);

#[persist(cache = cache_root())]
fn parse_version(text: String) -> Vec<u32> {
    PARSE_CALLS.fetch_add(1, Ordering::SeqCst);
    text.split('.').filter_map(|part| part.parse().ok()).collect()
}

#[test]
fn test_truncated_entry_is_a_decode_error() {
    assert_eq!(parse_version("1.22.3".to_string()).unwrap(), vec![1, 22, 3]);

    let dir = CACHE_ROOT.path().join("parse_version");
    let value_file = fs::read_dir(&dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| path.extension().map_or(false, |ext| ext == "out"))
        .unwrap();
    let stored = fs::read_to_string(&value_file).unwrap();
    fs::write(&value_file, &stored[..stored.len() / 2]).unwrap();

    let err = parse_version("1.22.3".to_string()).unwrap_err();
    assert!(matches!(err, PersistError::Decode { .. }), "got {err:?}");
    assert_eq!(PARSE_CALLS.load(Ordering::SeqCst), 1);
}

static GREET_CALLS: AtomicU32 = AtomicU32::new(0);

#[persist(cache = cache_root())]
fn greet(name: String) -> String {
    GREET_CALLS.fetch_add(1, Ordering::SeqCst);
    format!("héé {name}")
}

#[test]
fn test_value_cut_inside_a_character_is_a_decode_error() {
    assert_eq!(greet("ana".to_string()).unwrap(), "héé ana");

    let dir = CACHE_ROOT.path().join("greet");
    let value_file = fs::read_dir(&dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| path.extension().map_or(false, |ext| ext == "out"))
        .unwrap();
    // `"h` and the first byte of `é`.
    let stored = fs::read(&value_file).unwrap();
    fs::write(&value_file, &stored[..3]).unwrap();

    let err = greet("ana".to_string()).unwrap_err();
    assert!(matches!(err, PersistError::Decode { .. }), "got {err:?}");
    assert_eq!(GREET_CALLS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_non_finite_arguments_are_not_merged() {
    let calls = AtomicU32::new(0);
    let memo: Memoizer<(f64,), String> = Memoizer::builder("format_float")
        .location(CacheLocation::filesystem(CACHE_ROOT.path()))
        .build()
        .unwrap();

    for x in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
        let result = memo.invoke((x,), |(x,)| {
            calls.fetch_add(1, Ordering::SeqCst);
            format!("{x}")
        });
        assert!(
            matches!(result, Err(PersistError::KeyDerivation(KeyError::NonFinite(_)))),
            "got {result:?} for {x}"
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(memo.is_empty().unwrap());

    assert_eq!(memo.invoke((1.5,), |(x,)| format!("{x}")).unwrap(), "1.5");
}

#[test]
fn test_non_finite_result_is_not_stored() {
    let memo: Memoizer<(i64,), f64> = Memoizer::builder("reciprocal")
        .location(CacheLocation::filesystem(CACHE_ROOT.path()))
        .build()
        .unwrap();

    for _ in 0..2 {
        match memo.invoke((0,), |(n,)| 1.0 / n as f64) {
            Err(PersistError::Encode { value, .. }) => assert_eq!(value, f64::INFINITY),
            other => panic!("expected an encode error, got {other:?}"),
        }
    }
    assert!(memo.is_empty().unwrap());
    assert_eq!(memo.invoke((4,), |(n,)| 1.0 / n as f64).unwrap(), 0.25);
}

/// A cache root below a regular file cannot be created.
fn blocked_root() -> String {
    let file = CACHE_ROOT.path().join("not-a-directory");
    fs::write(&file, "").unwrap();
    format!("file://{}", file.join("cache").display())
}

static BLOCKED_CALLS: AtomicU32 = AtomicU32::new(0);

#[persist(cache = blocked_root())]
fn blocked(n: u8) -> u8 {
    BLOCKED_CALLS.fetch_add(1, Ordering::SeqCst);
    n
}

#[persist(cache = blocked_root(), on_unavailable = "bypass")]
fn bypassed(n: u8) -> u8 {
    n + 1
}

#[test]
fn test_unreachable_store_fails_without_computing() {
    let err = blocked(1).unwrap_err();
    assert!(
        matches!(err, PersistError::Unavailable(BackendError::Io { .. })),
        "got {err:?}"
    );
    assert_eq!(BLOCKED_CALLS.load(Ordering::SeqCst), 0);
}

#[test]
fn test_bypass_computes_when_store_is_unreachable() {
    assert_eq!(bypassed(1).unwrap(), 2);
    assert_eq!(bypassed(1).unwrap(), 2);
}

/// Root that is blocked by a regular file until a test removes it.
static LATE_ROOT: Lazy<std::path::PathBuf> = Lazy::new(|| {
    let root = CACHE_ROOT.path().join("late-mount");
    fs::write(&root, "").unwrap();
    root
});

fn late_root() -> String {
    format!("file://{}", LATE_ROOT.display())
}

static LATE_CALLS: AtomicU32 = AtomicU32::new(0);

#[persist(cache = late_root())]
fn late(n: u8) -> u8 {
    LATE_CALLS.fetch_add(1, Ordering::SeqCst);
    n * 3
}

#[test]
fn test_store_becoming_reachable_is_picked_up() {
    let err = late(2).unwrap_err();
    assert!(matches!(err, PersistError::Unavailable(_)), "got {err:?}");
    assert_eq!(LATE_CALLS.load(Ordering::SeqCst), 0);

    fs::remove_file(&*LATE_ROOT).unwrap();
    assert_eq!(late(2).unwrap(), 6);
    assert_eq!(late(2).unwrap(), 6);
    assert_eq!(LATE_CALLS.load(Ordering::SeqCst), 1);
    assert!(LATE_ROOT.join("late").is_dir());
}

static PORT_CALLS: AtomicU32 = AtomicU32::new(0);

#[persist(cache = cache_root())]
fn parse_port(text: String) -> std::io::Result<u16> {
    PORT_CALLS.fetch_add(1, Ordering::SeqCst);
    text.trim()
        .parse()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))
}

#[test]
fn test_result_alias_keeps_errors_out_of_the_cache() {
    assert_eq!(parse_port(" 8080 ".to_string()).unwrap(), 8080);
    assert_eq!(parse_port(" 8080 ".to_string()).unwrap(), 8080);
    assert_eq!(PORT_CALLS.load(Ordering::SeqCst), 1);

    for _ in 0..2 {
        match parse_port("eighty".to_string()) {
            Err(PersistError::Computation(err)) => {
                assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput)
            }
            other => panic!("expected the function's own error, got {other:?}"),
        }
    }
    assert_eq!(PORT_CALLS.load(Ordering::SeqCst), 3);
}

/// Filesystem store whose writes always fail.
#[derive(Debug)]
struct ReadOnly(FsBackend);

impl CacheBackend for ReadOnly {
    fn exists(&self, id: &str) -> Result<bool, BackendError> {
        self.0.exists(id)
    }
    fn read(&self, id: &str) -> Result<String, BackendError> {
        self.0.read(id)
    }
    fn metadata(&self, id: &str) -> Result<Option<EntryMetadata>, BackendError> {
        self.0.metadata(id)
    }
    fn write(&self, _entry: &CacheEntry) -> Result<(), BackendError> {
        Err(BackendError::Http {
            status: 503,
            message: "read-only replica".to_string(),
        })
    }
    fn remove(&self, id: &str) -> Result<bool, BackendError> {
        self.0.remove(id)
    }
    fn len(&self) -> Result<usize, BackendError> {
        self.0.len()
    }
    fn clear(&self) -> Result<(), BackendError> {
        self.0.clear()
    }
    fn entries(&self) -> Result<Vec<EntryMetadata>, BackendError> {
        self.0.entries()
    }
}

#[test]
fn test_failed_write_still_returns_the_value() {
    let backend = ReadOnly(FsBackend::new(CACHE_ROOT.path(), "read_only").unwrap());
    let memo: Memoizer<(u64,), u64> = Memoizer::builder("read_only")
        .backend(backend)
        .build()
        .unwrap();

    let err = memo.invoke((7,), |(n,)| n * 6).unwrap_err();
    assert!(err.has_value());
    assert!(err.to_string().contains("read-only replica"));
    assert!(matches!(
        &err,
        PersistError::Store {
            source: BackendError::Http { status: 503, .. },
            ..
        }
    ));
    assert_eq!(err.into_value(), Some(42));
    assert!(memo.is_empty().unwrap());
}

#[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct Grid {
    cells: BTreeMap<(u8, u8), f64>,
}

#[test]
fn test_unencodable_value_is_returned_with_encode_error() {
    let memo: Memoizer<(u8,), Grid> = Memoizer::builder("grid")
        .location(CacheLocation::filesystem(CACHE_ROOT.path()))
        .build()
        .unwrap();

    // JSON object keys must be strings.
    let err = memo
        .invoke((1,), |(n,)| Grid {
            cells: BTreeMap::from([((n, n), 0.5)]),
        })
        .unwrap_err();
    match err {
        PersistError::Encode { value, .. } => assert_eq!(value.cells.len(), 1),
        other => panic!("expected an encode error, got {other:?}"),
    }
    assert!(memo.is_empty().unwrap());
}
