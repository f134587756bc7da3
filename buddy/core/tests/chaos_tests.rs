//! Chaos tests for session streaming
//!
//! Stress the registry and sessions under concurrent load:
//! - Many observers on one session all see the same final text
//! - Many callers dispatching at once never exceed their limits
//! - Cancellation racing the producer never yields a non-prefix snapshot
//! - Reclamation with live and dropped observers

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use buddy_core::{
    Action, ActionKind, Agents, CallerId, DirectoryKnowledgeBase, Dispatcher, Document,
    GenerationRequest, Generator, RegistryConfig, ScriptedGenerator, SessionRegistry,
    SessionState, TranscriptStore,
};

const WAIT: Duration = Duration::from_secs(10);

fn fragments(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("<{i}>")).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_many_observers_see_same_text() {
    let registry = SessionRegistry::default();
    let parts = fragments(200);
    let expected = parts.concat();
    let generator: Arc<dyn Generator> = Arc::new(ScriptedGenerator::streaming(parts));

    let request = GenerationRequest::new(ActionKind::Chat, "q");
    let id = registry.open(&request).unwrap();
    let session = registry.get(id).unwrap();

    let mut observers = JoinSet::new();
    for _ in 0..32 {
        let mut observer = registry.observe(id).unwrap();
        observers.spawn(async move {
            let mut last_len = 0;
            while !observer.is_terminal() {
                if !observer.changed().await {
                    break;
                }
                let snapshot = observer.snapshot();
                // snapshots only ever grow
                assert!(snapshot.len() >= last_len);
                last_len = snapshot.len();
            }
            (observer.state(), observer.snapshot())
        });
    }

    tokio::spawn(Arc::clone(&session).drive(generator, request));

    while let Some(result) = tokio::time::timeout(WAIT, observers.join_next()).await.unwrap() {
        let (state, snapshot) = result.unwrap();
        assert_eq!(state, SessionState::Completed);
        assert_eq!(snapshot, expected);
    }
    assert_eq!(session.observer_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_concurrent_dispatch_respects_limits() {
    let dir = tempfile::tempdir().unwrap();
    let knowledge = DirectoryKnowledgeBase::open(dir.path()).await.unwrap();
    let generator: Arc<dyn Generator> =
        Arc::new(ScriptedGenerator::streaming(["x"]).then_stall());
    let dispatcher = Arc::new(Dispatcher::new(
        SessionRegistry::new(RegistryConfig {
            max_sessions_per_caller: 3,
            ..RegistryConfig::default()
        }),
        TranscriptStore::new(),
        Arc::new(knowledge),
        Agents::uniform(generator),
    ));
    dispatcher
        .ingest(vec![Document::new("a.pdf", b"%PDF-1.4".to_vec())])
        .await
        .unwrap();

    let mut tasks = JoinSet::new();
    for caller in 0..5 {
        for attempt in 0..10 {
            let dispatcher = Arc::clone(&dispatcher);
            tasks.spawn(async move {
                let caller = CallerId::new(format!("caller-{caller}"));
                let ok = dispatcher
                    .dispatch(&caller, Action::chat(format!("question {attempt}")))
                    .await
                    .is_ok();
                (caller, ok)
            });
        }
    }

    let mut accepted = std::collections::HashMap::new();
    while let Some(result) = tasks.join_next().await {
        let (caller, ok) = result.unwrap();
        if ok {
            *accepted.entry(caller).or_insert(0) += 1;
        }
    }

    assert_eq!(accepted.len(), 5);
    for (caller, count) in &accepted {
        assert_eq!(*count, 3, "{caller} got {count}");
        assert_eq!(dispatcher.registry().count_for(caller), 3);
    }
    // only accepted chats recorded a user entry
    assert_eq!(dispatcher.transcript().len(), 15);

    assert_eq!(dispatcher.registry().clear(), 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_cancel_races_producer() {
    let parts = fragments(50);
    let full = parts.concat();

    let mut tasks = JoinSet::new();
    for round in 0..40u64 {
        let parts = parts.clone();
        let full = full.clone();
        tasks.spawn(async move {
            let registry = SessionRegistry::default();
            let request = GenerationRequest::new(ActionKind::Chat, "q");
            let id = registry.open(&request).unwrap();
            let session = registry.get(id).unwrap();
            let generator: Arc<dyn Generator> = Arc::new(ScriptedGenerator::streaming(parts));

            let producer = tokio::spawn(Arc::clone(&session).drive(generator, request));
            for _ in 0..(round % 7) {
                tokio::task::yield_now().await;
            }
            registry.cancel(id).unwrap();
            producer.await.unwrap();

            let state = session.state();
            let snapshot = session.snapshot();
            assert!(full.starts_with(&snapshot));
            match state {
                SessionState::Completed => assert_eq!(snapshot, full),
                SessionState::Cancelled => {}
                other => panic!("unexpected state {other:?}"),
            }
        });
    }

    while let Some(result) = tokio::time::timeout(WAIT, tasks.join_next()).await.unwrap() {
        result.unwrap();
    }
}

#[tokio::test]
async fn chaos_reclaim_with_observers() {
    let registry = SessionRegistry::new(RegistryConfig {
        idle_timeout: Duration::from_millis(30),
        terminal_retention: Duration::from_millis(20),
        sweep_interval: Duration::from_millis(5),
        ..RegistryConfig::default()
    });
    let shutdown = CancellationToken::new();
    let sweeper = registry.spawn_sweeper(shutdown.clone());

    let generator: Arc<dyn Generator> = Arc::new(ScriptedGenerator::streaming(["done"]));
    let request = GenerationRequest::new(ActionKind::Summarize, "v");

    let held = registry.open(&request).unwrap();
    let dropped = registry.open(&request).unwrap();
    let keeper = registry.observe(held).unwrap();
    for id in [held, dropped] {
        let session = registry.get(id).unwrap();
        session.drive(Arc::clone(&generator), request.clone()).await;
    }

    // The unobserved session goes after retention; the observed one lingers
    // until retention + idle timeout
    tokio::time::timeout(WAIT, async {
        while registry.get(dropped).is_ok() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    tokio::time::timeout(WAIT, async {
        while registry.get(held).is_ok() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    // The observer still reads the final result after reclamation
    assert!(!keeper.is_live());
    assert_eq!(keeper.snapshot(), "done");
    assert_eq!(keeper.state(), SessionState::Completed);

    shutdown.cancel();
    sweeper.await.unwrap();
}
