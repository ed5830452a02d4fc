mod common;

use common::{offer, Harness};
use std::sync::Arc;
use synthwire::error::SessionError;

#[test]
fn test_missing_identifier() {
    let h = Harness::new();
    assert!(matches!(
        h.registry.get_or_create(None),
        Err(SessionError::MissingIdentifier)
    ));
    assert!(matches!(
        h.registry.get_or_create(Some("")),
        Err(SessionError::MissingIdentifier)
    ));
    assert!(h.registry.is_empty());
}

#[test]
fn test_hostile_identifier_creates_nothing() {
    let h = Harness::new();
    let err = h
        .registry
        .get_or_create(Some("x ! filesink location=/tmp/pwned ! fakesrc name=y"))
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidIdentifier(_)));
    assert!(err.is_client_error());
    assert!(h.registry.is_empty());
    assert!(h.synths.built.lock().unwrap().is_empty());
}

#[test]
fn test_same_id_same_session() {
    let h = Harness::new();
    let a = h.registry.get_or_create(Some("abc123")).unwrap();
    let b = h.registry.get_or_create(Some("abc123")).unwrap();
    let other = h.registry.get_or_create(Some("xyz999")).unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &other));
    assert_eq!(h.registry.len(), 2);
    assert_eq!(h.synths.built.lock().unwrap().len(), 2);
}

#[test]
fn test_audio_source_names_session() {
    let h = Harness::new();
    let session = h.registry.get_or_create(Some("abc123")).unwrap();
    assert!(session.audio_source().contains("abc123"));
    assert!(!session.audio_source().contains("{session_id}"));
}

#[test]
fn test_concurrent_creation_yields_one_session() {
    let h = Harness::new();
    let registry = h.registry.clone();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || registry.get_or_create(Some("abc123")).unwrap())
        })
        .collect();
    let sessions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    assert_eq!(h.synths.built.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_sessions_survive_stop() {
    let h = Harness::new();
    let session = h.registry.get_or_create(Some("abc123")).unwrap();
    h.orchestrator.handle_offer(&session, offer()).await.unwrap();
    h.orchestrator.stop(&session).await;

    let again = h.registry.get("abc123").unwrap();
    assert!(Arc::ptr_eq(&session, &again));

    // A second offer on the same session works after a stop.
    h.orchestrator.handle_offer(&again, offer()).await.unwrap();
    assert_eq!(h.synths.synth(0).starts(), 2);
}

#[tokio::test]
async fn test_shutdown_tears_down_every_session() {
    let h = Harness::new();
    for id in ["abc123", "xyz999"] {
        let session = h.registry.get_or_create(Some(id)).unwrap();
        h.orchestrator.handle_offer(&session, offer()).await.unwrap();
    }

    synthwire::shutdown_sessions(&h.registry, std::time::Duration::from_secs(5)).await;

    assert_eq!(h.connector.link(0).closes(), 1);
    assert_eq!(h.connector.link(1).closes(), 1);
    assert_eq!(h.pipelines.stops(), 2);
}
