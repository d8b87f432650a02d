//! Full-flow tests over the assembled core with in-memory backends.

use chatseq::{
    CacheConfig, CoreConfig, Error, MemoryIndex, MemoryKv, MemoryStore, MessagingCore,
    QueueConfig, RetryPolicy, WorkerConfig,
};
use core::time::Duration;
use std::sync::Arc;
use tokio::time::{Instant, sleep};

struct Harness {
    kv: Arc<MemoryKv>,
    store: Arc<MemoryStore>,
    index: Arc<MemoryIndex>,
    core: MessagingCore<MemoryKv, MemoryStore, MemoryIndex>,
}

fn harness() -> Harness {
    let kv = Arc::new(MemoryKv::new());
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let config = CoreConfig {
        cache: CacheConfig {
            lock_wait_timeout: Duration::from_millis(500),
            lock_retry_delay: Duration::from_millis(10),
            ..CacheConfig::default()
        },
        worker: WorkerConfig::default(),
        queue: QueueConfig {
            num_workers: 4,
            buffer_size: 64,
            retry: RetryPolicy {
                max_attempts: 10,
                base_backoff: Duration::from_millis(20),
                max_backoff: Duration::from_millis(100),
            },
            shutdown_grace: Duration::from_secs(1),
        },
    };
    let core = MessagingCore::new(
        Arc::clone(&kv),
        Arc::clone(&store),
        Arc::clone(&index),
        config,
    );
    Harness {
        kv,
        store,
        index,
        core,
    }
}

async fn settle(harness: &Harness) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while harness.core.pending_jobs() > 0 {
        assert!(Instant::now() < deadline, "jobs did not settle in time");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn create_resolve_and_read_back() {
    let h = harness();

    let app = h.core.create_application("support").await.unwrap();
    assert_eq!(app.token.len(), 32);

    // Numbers are final at the accepted response, before any row exists.
    let first = h.core.create_chat(&app.token).await.unwrap();
    let second = h.core.create_chat(&app.token).await.unwrap();
    assert_eq!(first.number, 1);
    assert_eq!(second.number, 2);
    assert!(first.job.is_some());

    settle(&h).await;

    let chats = h.core.list_chats(&app.token).await.unwrap();
    let numbers: Vec<_> = chats.iter().map(|c| c.number).collect();
    assert_eq!(numbers, vec![1, 2]);

    let chat = h.core.get_chat(&app.token, 1).await.unwrap();
    assert_eq!(chat.application_id, app.id);

    // Application creation populated the cache eagerly, and chat
    // materialization did the same; lookups here came from the cache.
    assert_eq!(h.store.authoritative_lookups(), 0);

    let app = h.core.get_application(&app.token).await.unwrap();
    assert_eq!(app.chats_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn messages_materialize_index_and_reconcile() {
    let h = harness();

    let app = h.core.create_application("support").await.unwrap();
    h.core.create_chat(&app.token).await.unwrap();
    settle(&h).await;

    let m1 = h
        .core
        .create_message(&app.token, 1, "hello world")
        .await
        .unwrap();
    let m2 = h
        .core
        .create_message(&app.token, 1, "help me please")
        .await
        .unwrap();
    assert_eq!((m1.number, m2.number), (1, 2));
    settle(&h).await;

    let messages = h.core.list_messages(&app.token, 1).await.unwrap();
    assert_eq!(messages.len(), 2);

    let hits = h.core.search_messages(&app.token, 1, "hel").await.unwrap();
    let numbers: Vec<_> = hits.iter().map(|m| m.number).collect();
    assert_eq!(numbers, vec![1, 2]);

    // Blank queries match nothing rather than everything.
    assert!(h.core.search_messages(&app.token, 1, "  ").await.unwrap().is_empty());

    let chat = h.core.get_chat(&app.token, 1).await.unwrap();
    assert_eq!(chat.messages_count, 2);

    // Nothing drifted, so reconciliation is a no-op in effect.
    let report = h.core.reconcile().await.unwrap();
    assert_eq!(report.applications_corrected, 0);
    assert_eq!(report.chats_corrected, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn update_message_edits_body_and_reindexes() {
    let h = harness();

    let app = h.core.create_application("support").await.unwrap();
    h.core.create_chat(&app.token).await.unwrap();
    settle(&h).await;
    h.core
        .create_message(&app.token, 1, "draft wording")
        .await
        .unwrap();
    settle(&h).await;

    let updated = h
        .core
        .update_message(&app.token, 1, 1, "final wording")
        .await
        .unwrap();
    assert_eq!(updated.body, "final wording");

    let hits = h.core.search_messages(&app.token, 1, "final").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(h.core.search_messages(&app.token, 1, "draft").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn update_application_renames_but_keeps_the_token() {
    let h = harness();
    let app = h.core.create_application("support").await.unwrap();

    let updated = h
        .core
        .update_application(&app.token, "customer support")
        .await
        .unwrap();
    assert_eq!(updated.name, "customer support");
    assert_eq!(updated.token, app.token);
    assert_eq!(updated.id, app.id);

    // The rename is visible through the token-addressed read path.
    let fetched = h.core.get_application(&app.token).await.unwrap();
    assert_eq!(fetched.name, "customer support");

    let err = h
        .core
        .update_application("no-such-token", "whatever")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_parents_are_not_found() {
    let h = harness();

    let err = h.core.create_chat("no-such-token").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    let app = h.core.create_application("support").await.unwrap();
    let err = h
        .core
        .create_message(&app.token, 42, "into the void")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_chat_creations_get_dense_unique_numbers() {
    const WRITERS: usize = 64;

    let h = harness();
    let app = h.core.create_application("support").await.unwrap();
    let core = Arc::new(h.core);

    let tasks: Vec<_> = (0..WRITERS)
        .map(|_| {
            let core = Arc::clone(&core);
            let token = app.token.clone();
            tokio::spawn(async move { core.create_chat(&token).await.unwrap().number })
        })
        .collect();

    let mut numbers = std::collections::BTreeSet::new();
    for task in tasks {
        assert!(numbers.insert(task.await.unwrap()));
    }
    let expected: std::collections::BTreeSet<_> = (1..=WRITERS as u64).collect();
    assert_eq!(numbers, expected);

    let deadline = Instant::now() + Duration::from_secs(5);
    while core.pending_jobs() > 0 {
        assert!(Instant::now() < deadline, "jobs did not settle in time");
        sleep(Duration::from_millis(10)).await;
    }

    // Every allocation materialized; counter matches ground truth without
    // reconciliation.
    let app = core.get_application(&app.token).await.unwrap();
    assert_eq!(app.chats_count, WRITERS as u64);
    assert_eq!(core.list_chats(&app.token).await.unwrap().len(), WRITERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn index_outage_degrades_search_but_not_writes() {
    let h = harness();

    let app = h.core.create_application("support").await.unwrap();
    h.core.create_chat(&app.token).await.unwrap();
    settle(&h).await;

    h.index.set_unavailable(true);
    h.core
        .create_message(&app.token, 1, "unindexed")
        .await
        .unwrap();
    settle(&h).await;

    // The row is durable despite the sink being down.
    let messages = h.core.list_messages(&app.token, 1).await.unwrap();
    assert_eq!(messages.len(), 1);

    let err = h.core.search_messages(&app.token, 1, "un").await.unwrap_err();
    assert!(matches!(err, Error::DependencyUnavailable { .. }));

    h.index.set_unavailable(false);
    assert!(h.core.search_messages(&app.token, 1, "un").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn allocation_fails_hard_when_fast_store_is_down() {
    let h = harness();
    let app = h.core.create_application("support").await.unwrap();

    h.kv.set_unavailable(true);
    let err = h.core.create_chat(&app.token).await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable { .. }));

    h.kv.set_unavailable(false);
    assert_eq!(h.core.create_chat(&app.token).await.unwrap().number, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_is_graceful() {
    let h = harness();
    let app = h.core.create_application("support").await.unwrap();

    h.core.create_chat(&app.token).await.unwrap();
    h.core.shutdown().await;

    // Queued work drained before the pool stopped.
    assert_eq!(h.core.pending_jobs(), 0);
    assert_eq!(h.core.list_chats(&app.token).await.unwrap().len(), 1);

    let err = h.core.create_chat(&app.token).await.unwrap_err();
    assert!(matches!(err, Error::DependencyUnavailable { .. }));
}
