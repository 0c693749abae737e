//! Cache behavior seen through the engine: validation, redirects, resume
//! offsets and garbage collection.

mod common;

use std::time::Duration;

use common::{config, conn_of, harness, request, uri};
use termweb_core::cache::CacheMode;
use termweb_core::config::EngineConfig;
use termweb_core::scheduler::{ConnectionState, Priority};
use termweb_core::{Engine, Uri};

/// Fetch `u` completely with `body` through the engine.
fn fetch(engine: &mut Engine, u: &Uri, body: &[u8]) -> termweb_core::cache::EntryId {
    let d = request(engine, u, Priority::Main);
    engine.tick();
    let conn = conn_of(engine, d);
    engine.receive(conn, body).unwrap();
    engine.abort(conn, Ok(()));
    engine.download(d).unwrap().cached().unwrap()
}

#[test]
fn force_reload_bypasses_a_fresh_entry() {
    let mut h = harness(config(10, 2));
    let u = uri("http://a.example/");
    fetch(&mut h.engine, &u, b"v1");

    let d = h.engine.create_download();
    h.engine
        .load_uri(&u, None, Some(d), Priority::Main, CacheMode::ForceReload, 0)
        .unwrap();
    h.engine.tick();
    assert_eq!(h.http.start_count(), 2);
    let conn = conn_of(&h.engine, d);
    assert_eq!(h.engine.connection(conn).unwrap().from(), 0);
}

#[test]
fn partial_entry_resumes_where_it_stopped() {
    let mut h = harness(config(10, 2));
    let u = uri("http://a.example/big");
    let d = request(&mut h.engine, &u, Priority::Main);
    h.engine.tick();
    let conn = conn_of(&h.engine, d);
    h.engine.receive(conn, &[5; 1000]).unwrap();
    h.engine.abort(conn, Err(termweb_core::ConnError::Transport("cut".into())));

    let again = request(&mut h.engine, &u, Priority::Main);
    let conn = conn_of(&h.engine, again);
    assert_eq!(h.engine.connection(conn).unwrap().from(), 1000);
    h.engine.tick();
    h.engine.receive(conn, &[6; 500]).unwrap();
    h.engine.abort(conn, Ok(()));

    let entry = h.engine.download(again).unwrap().cached().unwrap();
    let e = h.engine.cache().get(entry).unwrap();
    assert_eq!(e.length(), 1500);
    assert!(!e.is_incomplete());
}

#[test]
fn never_cached_entries_are_refetched() {
    let mut h = harness(config(10, 2));
    let u = uri("http://a.example/private");
    let entry = fetch(&mut h.engine, &u, b"secret");
    h.engine.cache_mut().get_mut(entry).unwrap().cache_mode = CacheMode::Never;

    assert!(h.engine.get_validated_cache_entry(&u, CacheMode::Normal).is_none());
    assert!(h.engine.find_in_cache(&u).is_none());
    assert_eq!(h.engine.cache_entry_count(), 0);
}

#[test]
fn expired_entries_are_dropped_on_lookup() {
    let mut h = harness(config(10, 2));
    let u = uri("http://a.example/news");
    let entry = fetch(&mut h.engine, &u, b"today");
    let now = h.engine.now();
    h.engine.cache_mut().get_mut(entry).unwrap().expires_at = Some(now + Duration::from_secs(60));

    assert_eq!(h.engine.get_validated_cache_entry(&u, CacheMode::Normal), Some(entry));
    h.clock.advance(Duration::from_secs(61));
    assert!(h.engine.get_validated_cache_entry(&u, CacheMode::Normal).is_none());
    assert_eq!(h.engine.cache_entry_count(), 0);
}

#[test]
fn entries_with_validators_are_revalidated_after_the_interval() {
    let mut cfg = config(10, 2);
    cfg.cache.revalidation_interval_secs = Some(30);
    let mut h = harness(cfg);
    let u = uri("http://a.example/doc");
    let entry = fetch(&mut h.engine, &u, b"doc");
    h.engine.cache_mut().get_mut(entry).unwrap().etag = Some("\"v1\"".into());

    assert_eq!(h.engine.get_validated_cache_entry(&u, CacheMode::Normal), Some(entry));
    h.clock.advance(Duration::from_secs(31));
    assert!(h.engine.get_validated_cache_entry(&u, CacheMode::Normal).is_none());
    // Kept for the conditional request.
    assert_eq!(h.engine.find_in_cache(&u), Some(entry));
}

#[test]
fn redirect_loops_are_cut_off() {
    let mut h = harness(EngineConfig::default());
    let a = fetch(&mut h.engine, &uri("http://a.example/a"), b"");
    let b = fetch(&mut h.engine, &uri("http://a.example/b"), b"");
    h.engine.redirect_cache(a, "/b", false, Some(false)).unwrap();
    h.engine.redirect_cache(b, "http://a.example/a", false, Some(false)).unwrap();

    assert!(h.engine.follow_cached_redirects(a).is_none());
}

#[test]
fn redirect_chain_ends_at_the_final_entry() {
    let mut h = harness(EngineConfig::default());
    let a = fetch(&mut h.engine, &uri("http://a.example/old"), b"");
    let b = fetch(&mut h.engine, &uri("http://a.example/new"), b"content");
    let target = h.engine.redirect_cache(a, "new", false, Some(false)).unwrap();
    assert_eq!(target, uri("http://a.example/new"));
    assert_eq!(h.engine.follow_cached_redirects(a), Some(b));
}

#[test]
fn cached_redirects_are_not_served_by_default() {
    let mut h = harness(EngineConfig::default());
    let u = uri("http://a.example/dir");
    let entry = fetch(&mut h.engine, &u, b"");
    let target = h.engine.redirect_cache(entry, "/", false, Some(false)).unwrap();
    assert_eq!(target, uri("http://a.example/dir/"));

    assert!(h.engine.get_validated_cache_entry(&u, CacheMode::Normal).is_none());
    assert_eq!(h.engine.cache_entry_count(), 0);
}

#[test]
fn garbage_collection_spares_entries_in_use() {
    let mut cfg = config(10, 2);
    cfg.cache.memory_size = 1000;
    let mut h = harness(cfg);

    let pinned = fetch(&mut h.engine, &uri("http://a.example/pinned"), &[1; 400]);
    let _pin = h.engine.cache().pin(pinned).unwrap();
    fetch(&mut h.engine, &uri("http://a.example/old"), &[2; 400]);

    // Still loading: referenced by its connection.
    let d = request(&mut h.engine, &uri("http://a.example/loading"), Priority::Main);
    h.engine.tick();
    let conn = conn_of(&h.engine, d);
    h.engine.receive(conn, &[3; 400]).unwrap();

    let report = h.engine.garbage_collection(true);
    assert_eq!(report.freed_entries, 1);
    assert_eq!(report.freed_bytes, 400);
    assert_eq!(h.engine.cache_entry_count(), 2);
    assert_eq!(h.engine.cache_size(), 800);
    assert!(h.engine.cache().contains(pinned));
}

#[test]
fn new_entries_trigger_a_bounded_collection() {
    let mut cfg = config(10, 2);
    cfg.cache.memory_size = 1000;
    cfg.cache.gc_percent = 50;
    let mut h = harness(cfg);

    for i in 0..6 {
        fetch(&mut h.engine, &uri(&format!("http://a.example/{i}")), &[0; 300]);
    }
    // Each new entry collects first, so the unused total stays bounded.
    assert!(h.engine.cache_size() <= 1000 + 300);
    assert!(h.engine.cache_entry_count() < 6);

    let state = h
        .engine
        .poll_events()
        .into_iter()
        .filter(|e| e.is_final())
        .all(|e| e.state == ConnectionState::Done(Ok(())));
    assert!(state);
}
