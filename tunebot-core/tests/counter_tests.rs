// File: tunebot-core/tests/counter_tests.rs

use std::collections::HashSet;
use std::sync::Arc;

use tunebot_core::counters::CounterStore;
use tunebot_core::Error;

#[tokio::test]
async fn increments_are_distinct_and_consecutive() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(CounterStore::open(dir.path().join("counts.json")));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.increment("hug").await }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let count = handle.await.map_err(|e| Error::Platform(e.to_string()))??;
        assert!(seen.insert(count), "count {count} was handed out twice");
    }

    assert_eq!(seen.len(), 20);
    assert_eq!(store.get("hug").await, 20);
    // Every value 1..=20 appeared exactly once.
    for expected in 1..=20u64 {
        assert!(seen.contains(&expected));
    }
    Ok(())
}

#[tokio::test]
async fn counts_survive_reopen() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("counts.json");

    {
        let store = CounterStore::open(&path);
        store.increment("song").await?;
        store.increment("song").await?;
        store.increment("lurk").await?;
    }

    let store = CounterStore::open(&path);
    assert_eq!(store.get("song").await, 2);
    assert_eq!(store.get("lurk").await, 1);
    assert_eq!(store.get("never").await, 0);
    Ok(())
}

#[tokio::test]
async fn trigger_keys_are_normalized() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let store = CounterStore::open(dir.path().join("counts.json"));

    store.increment("!Hug").await?;
    store.increment("hug").await?;

    assert_eq!(store.get("HUG").await, 2);
    assert!(store.contains("!hug").await);
    Ok(())
}

#[tokio::test]
async fn corrupt_file_starts_empty() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("counts.json");
    std::fs::write(&path, "{ not json")?;

    let store = CounterStore::open(&path);
    assert_eq!(store.get("hug").await, 0);

    // And a fresh increment repairs the file on disk.
    store.increment("hug").await?;
    let raw = std::fs::read_to_string(&path)?;
    let parsed: std::collections::HashMap<String, u64> = serde_json::from_str(&raw)
        .map_err(|e| Error::Parse(e.to_string()))?;
    assert_eq!(parsed.get("hug"), Some(&1));
    Ok(())
}

#[tokio::test]
async fn reset_removes_the_counter() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let store = CounterStore::open(dir.path().join("counts.json"));

    store.increment("hug").await?;
    assert!(store.contains("hug").await);

    store.reset("hug").await?;
    assert!(!store.contains("hug").await);
    assert_eq!(store.get("hug").await, 0);
    Ok(())
}
