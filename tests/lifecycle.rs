//! Engine lifecycle and progress reporting through the service

mod common;

use std::sync::Arc;

use common::{lang, page_surface, service, service_with, wait_until, Script};
use pagelens::{EngineState, OcrConfig, OcrEvent};

#[tokio::test]
async fn initialization_progress_only_moves_forward() {
    let script = Script::new();
    let service = service(&script);
    let mut events = service.subscribe();

    service.initialize(lang("eng")).await;

    let mut percents = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let OcrEvent::InitProgress(progress) = event {
            percents.push(progress.percent);
        }
    }
    // Initializing, loading core x2, core ready, language half, language ready, api ready, Ready
    assert_eq!(percents, vec![0, 10, 20, 50, 68, 90, 99, 100]);
    assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(service.init_progress().label, "Ready");
}

#[tokio::test]
async fn state_changes_are_published() {
    let script = Script::new();
    let service = service(&script);
    let mut events = service.subscribe();

    service.initialize(lang("eng")).await;
    service.initialize(lang("spa")).await;

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let OcrEvent::EngineStateChanged { state, language } = event {
            states.push((state, language.code().to_string()));
        }
    }
    assert_eq!(
        states,
        vec![
            (EngineState::Initializing, "eng".to_string()),
            (EngineState::Ready, "eng".to_string()),
            (EngineState::Uninitialized, "eng".to_string()),
            (EngineState::Initializing, "spa".to_string()),
            (EngineState::Ready, "spa".to_string()),
        ]
    );
    assert_eq!(script.terminated(), 1);
}

#[tokio::test]
async fn superseded_initialization_is_discarded() {
    let script = Script::new();
    let service = service(&script);
    script.hold_init(true);

    let first = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.initialize(lang("eng")).await }
    });
    wait_until(|| script.init_calls() == 1).await;
    let second = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.initialize(lang("fra")).await }
    });
    wait_until(|| script.init_calls() == 2).await;

    // permits go out in arrival order: the eng creation finishes first
    script.release_init(1);
    assert_ne!(first.await.unwrap(), EngineState::Ready);
    assert_eq!(service.engine_state(), EngineState::Initializing);
    assert_eq!(script.terminated(), 1);

    script.release_init(1);
    assert_eq!(second.await.unwrap(), EngineState::Ready);
    assert_eq!(service.active_language().code(), "fra");
}

#[tokio::test]
async fn rolling_log_keeps_newest_entries() {
    let script = Script::new();
    let mut config = OcrConfig::default();
    config.progress.log_capacity = 5;
    let service = service_with(config, &script);
    service.initialize(lang("eng")).await;

    for page in 1u32..=8 {
        service.run_ocr(page_surface(page as u8), page, 1.0, false).await;
    }

    let entries = service.log_entries();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0].message, "Page 8: recognized 10 characters");
    assert!(entries.windows(2).all(|pair| pair[0].at >= pair[1].at));
    assert!(entries[0].to_string().starts_with('['));
}

#[tokio::test]
async fn shutdown_releases_engine() {
    let script = Script::new();
    let service = service(&script);
    service.initialize(lang("eng")).await;

    service.shutdown().await;
    assert_eq!(service.engine_state(), EngineState::Uninitialized);
    assert_eq!(script.terminated(), 1);
    assert_eq!(service.run_ocr(page_surface(1), 1u32, 1.0, false).await, None);
}
