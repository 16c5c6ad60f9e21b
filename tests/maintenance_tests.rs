/// Integration tests for entry annotations, the in-memory front and the
/// maintenance operations of a memoizer.
use once_cell::sync::Lazy;
use persisto::{persist, CacheKey, CacheLocation, Memoizer};
use serde_json::{json, Value};
use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

static CACHE_ROOT: Lazy<TempDir> = Lazy::new(|| tempfile::tempdir().unwrap());

fn cache_root() -> String {
    format!("file://{}", CACHE_ROOT.path().display())
}

#[persist(cache = cache_root(), metadata = || format!("built by {}", env!("CARGO_PKG_NAME")))]
fn annotated(n: u8) -> u8 {
    n.saturating_mul(2)
}

#[test]
fn test_annotation_is_written_to_metadata() {
    assert_eq!(annotated(4).unwrap(), 8);

    let dir = CACHE_ROOT.path().join("annotated");
    let meta_file = fs::read_dir(&dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| path.extension().map_or(false, |ext| ext == "meta"))
        .unwrap();
    let meta: Value = serde_json::from_str(&fs::read_to_string(meta_file).unwrap()).unwrap();
    assert_eq!(meta["annotation"], "built by persisto");
    assert_eq!(meta["key"], json!([["n", 4]]));
}

static FRONT_CALLS: AtomicU32 = AtomicU32::new(0);

#[persist(cache = cache_root(), in_memory = true)]
fn fronted(text: String) -> usize {
    FRONT_CALLS.fetch_add(1, Ordering::SeqCst);
    text.len()
}

#[test]
fn test_in_memory_front_serves_deleted_entries() {
    assert_eq!(fronted("abc".to_string()).unwrap(), 3);

    // Another process wiping the directory is not seen by the front.
    let dir = CACHE_ROOT.path().join("fronted");
    for entry in fs::read_dir(&dir).unwrap().filter_map(Result::ok) {
        fs::remove_file(entry.path()).unwrap();
    }
    assert_eq!(fronted("abc".to_string()).unwrap(), 3);
    assert_eq!(FRONT_CALLS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_maintenance_operations() {
    let memo: Memoizer<(String, u32), String> = Memoizer::builder("repeat")
        .location(CacheLocation::filesystem(CACHE_ROOT.path()))
        .build()
        .unwrap();
    let repeat = |(text, n): (String, u32)| text.repeat(n as usize);

    assert!(memo.is_empty().unwrap());
    memo.invoke(("ab".to_string(), 2), repeat).unwrap();
    memo.invoke(("c".to_string(), 3), repeat).unwrap();
    assert_eq!(memo.len().unwrap(), 2);

    let args = ("ab".to_string(), 2);
    assert!(memo.contains(&args).unwrap());
    assert_eq!(memo.lookup(&args).unwrap(), Some("abab".to_string()));

    let mut keys: Vec<String> = memo.keys().unwrap().iter().map(CacheKey::canonical).collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            r#"[["arg0","ab"],["arg1",2]]"#.to_string(),
            r#"[["arg0","c"],["arg1",3]]"#.to_string(),
        ]
    );

    assert!(memo.remove(&args).unwrap());
    assert!(!memo.remove(&args).unwrap());
    assert_eq!(memo.lookup(&args).unwrap(), None);
    assert_eq!(memo.len().unwrap(), 1);

    memo.clear().unwrap();
    assert!(memo.is_empty().unwrap());
    assert!(memo.entries().unwrap().is_empty());
}
