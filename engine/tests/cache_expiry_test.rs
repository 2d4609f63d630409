use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use engine::{Engine, EngineEvent, EvictionReason, ManualClock};
use std::sync::Arc;
use task_core::{BackendKind, StaticSettings, TaskRequest};
use testing::{FakeContextHost, ScriptedBackend, test_config, translation};

fn engine_at(clock: Arc<ManualClock>, backend: Arc<ScriptedBackend>) -> Engine {
    Engine::builder(test_config())
        .settings(Arc::new(StaticSettings::default()))
        .host(Arc::new(FakeContextHost::new()))
        .backends(vec![backend])
        .clock(clock)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_entry_expires_after_a_day() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()));
    let backend = Arc::new(ScriptedBackend::succeeding(BackendKind::OnDevice, translation("Hello", "en")));
    let engine = engine_at(clock.clone(), backend.clone());
    let request = TaskRequest::translate("Bonjour", "en");

    engine.execute(request.clone()).await;
    clock.advance(ChronoDuration::hours(23) + ChronoDuration::minutes(59));
    let warm = engine.execute(request.clone()).await;
    assert!(warm.is_cached());
    assert_eq!(backend.calls(), 1);

    let mut events = engine.events();
    clock.advance(ChronoDuration::minutes(2));
    let cold = engine.execute(request).await;
    assert!(!cold.is_cached());
    assert_eq!(backend.calls(), 2);

    let expired = std::iter::from_fn(|| events.try_recv().ok()).any(|event| {
        matches!(
            event,
            EngineEvent::CacheEvicted {
                reason: EvictionReason::Expired,
                ..
            }
        )
    });
    assert!(expired);
}

#[tokio::test]
async fn test_disabled_cache_always_calls_backend() {
    let mut config = test_config();
    config.cache.enabled = false;
    let backend = Arc::new(ScriptedBackend::succeeding(BackendKind::Cloud, translation("Hello", "en")));
    let engine = Engine::builder(config)
        .settings(Arc::new(StaticSettings::default()))
        .host(Arc::new(FakeContextHost::new()))
        .backends(vec![backend.clone()])
        .build()
        .unwrap();

    for _ in 0..3 {
        let result = engine.execute(TaskRequest::translate("Bonjour", "en")).await;
        assert!(!result.is_cached());
    }
    assert_eq!(backend.calls(), 3);
    assert_eq!(engine.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_purge_expired_through_engine() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()));
    let backend = Arc::new(ScriptedBackend::succeeding(BackendKind::OnDevice, translation("Hi", "en")));
    let engine = engine_at(clock.clone(), backend);

    engine.execute(TaskRequest::translate("Salut", "en")).await;
    engine.execute(TaskRequest::translate("Coucou", "en")).await;
    assert_eq!(engine.cache_stats().entries, 2);

    clock.advance(ChronoDuration::days(2));
    assert_eq!(engine.cache().purge_expired(), 2);
    assert_eq!(engine.cache_stats().entries, 0);
}
