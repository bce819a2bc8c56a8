//! Request Parsing Integration Tests
//!
//! Tests for structured and plain-text request payloads and their side
//! effects on session state and the cache.

use stagehand::core::{apply_request, hash_key, keys, parse_request, Cache, SessionState};
use stagehand::domain::Request;

#[test]
fn test_structured_json_request() {
    let parsed = parse_request(r#"{"id":"c1","prompt":"Generate X"}"#);

    assert_eq!(parsed.effective_prompt(), "Generate X");
    assert_eq!(parsed.request.component_id(), Some("c1"));
    assert!(parsed.invalidate_key.is_none());
}

#[test]
fn test_plain_text_request() {
    let parsed = parse_request("hello");

    assert_eq!(parsed.request, Request::RawText("hello".to_string()));
    assert_eq!(parsed.effective_prompt(), "hello");
}

#[test]
fn test_dict_literal_request() {
    let parsed = parse_request("{'id': 7, 'prompt': 'Add a table', 'invalidate_cache_key': None,}");

    assert_eq!(parsed.request.component_id(), Some("7"));
    assert_eq!(parsed.effective_prompt(), "Add a table");
    assert!(parsed.invalidate_key.is_none());
}

#[test]
fn test_malformed_literal_is_plain_text() {
    let raw = "{'id': 'c1', 'prompt': ";
    let parsed = parse_request(raw);

    assert!(!parsed.request.is_structured());
    assert_eq!(parsed.effective_prompt(), raw);
}

#[tokio::test]
async fn test_apply_records_component_and_invalidates() {
    let cache = Cache::memory(10);
    let key = hash_key("old prompt");
    cache.set(&key, "old").await.unwrap();
    let state = SessionState::new("s1");

    let raw = format!(r#"{{"id":"c1","prompt":"Generate X","invalidate_cache_key":"{}"}}"#, key);
    let parsed = apply_request(&raw, &state, &cache).await;

    assert_eq!(parsed.effective_prompt(), "Generate X");
    assert_eq!(state.get(&keys::component("c1")).as_deref(), Some("Generate X"));
    assert!(!cache.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_invalidation_without_prompt_still_applies() {
    let cache = Cache::memory(10);
    let key = hash_key("p");
    cache.set(&key, "v").await.unwrap();
    let state = SessionState::new("s1");

    let raw = format!(r#"{{"invalidate_cache_key":"{}"}}"#, key);
    let parsed = apply_request(&raw, &state, &cache).await;

    assert!(!parsed.request.is_structured());
    assert!(!cache.exists(&key).await.unwrap());
    assert!(state.is_empty());
}
