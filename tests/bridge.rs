//! Bridge integration tests
//!
//! Drive the pipeline, webhook delivery, agent trigger, and reconnect
//! supervisor with a scripted mock engine — no real protocol engine, no
//! real network beyond loopback.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{MockEngine, text_message};
use wavelink::agent::AgentTrigger;
use wavelink::config::{AgentConfig, AgentMode, ReconnectConfig, WebhookConfig};
use wavelink::engine::{EngineEvent, MediaKind, MediaRef, MessageBody, Presence, ProtocolEngine};
use wavelink::pipeline::EventPipeline;
use wavelink::session::{SessionManager, reconnect};
use wavelink::store::MessageStore;
use wavelink::webhook::{WebhookPayload, WebhookSender};

/// Assemble a pipeline over a mock engine; returns handles to everything
fn build_pipeline(
    engine: Arc<MockEngine>,
    webhook: WebhookConfig,
    agent: AgentConfig,
    media_dir: &std::path::Path,
) -> (EventPipeline, Arc<SessionManager>, MessageStore) {
    let engine_dyn: Arc<dyn ProtocolEngine> = engine;
    let session = Arc::new(SessionManager::new(Arc::clone(&engine_dyn)));
    let store = MessageStore::open_in_memory().unwrap();
    let pipeline = EventPipeline::new(
        Arc::clone(&engine_dyn),
        Arc::clone(&session),
        store.clone(),
        WebhookSender::new(webhook),
        AgentTrigger::new(agent, engine_dyn),
        media_dir.to_path_buf(),
    );
    (pipeline, session, store)
}

async fn wait_until<F: Fn() -> bool>(cond: F, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Local HTTP endpoint counting POSTs it receives
async fn start_counting_endpoint() -> (String, Arc<AtomicU32>) {
    let counter = Arc::new(AtomicU32::new(0));
    let hits = Arc::clone(&counter);
    let app = axum::Router::new().route(
        "/hook",
        axum::routing::post(move || {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                "ok"
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), counter)
}

// -- pipeline -----------------------------------------------------------------

#[tokio::test]
async fn text_message_is_persisted() {
    let engine = Arc::new(MockEngine::with_session("1000@s.whatsapp.net"));
    let tmp = tempfile::tempdir().unwrap();
    let (pipeline, _, store) = build_pipeline(
        engine,
        WebhookConfig::default(),
        AgentConfig::default(),
        tmp.path(),
    );

    let msg = text_message("m1", "49123@s.whatsapp.net", "49123@s.whatsapp.net", "hello");
    pipeline
        .handle_event(EngineEvent::Message(Box::new(msg)))
        .await;

    let rows = store.messages_for_chat("49123@s.whatsapp.net", 10, 0).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "hello");
    assert_eq!(rows[0].msg_type, "text");
    assert!(!rows[0].is_group);
}

#[tokio::test]
async fn self_and_broadcast_messages_are_discarded() {
    let engine = Arc::new(MockEngine::with_session("1000@s.whatsapp.net"));
    let tmp = tempfile::tempdir().unwrap();
    let (pipeline, _, store) = build_pipeline(
        engine,
        WebhookConfig::default(),
        AgentConfig::default(),
        tmp.path(),
    );

    let mut own = text_message("m1", "49123@s.whatsapp.net", "1000@s.whatsapp.net", "me");
    own.from_me = true;
    pipeline.handle_event(EngineEvent::Message(Box::new(own))).await;

    let broadcast = text_message("m2", "status@broadcast", "49123@s.whatsapp.net", "story");
    pipeline
        .handle_event(EngineEvent::Message(Box::new(broadcast)))
        .await;

    assert!(store.messages_for_chat("49123@s.whatsapp.net", 10, 0).unwrap().is_empty());
    assert!(store.messages_for_chat("status@broadcast", 10, 0).unwrap().is_empty());
}

#[tokio::test]
async fn media_is_downloaded_inline() {
    let engine = Arc::new(MockEngine::with_session("1000@s.whatsapp.net"));
    engine
        .media
        .lock()
        .unwrap()
        .insert("mock://m5".to_string(), vec![0xFF, 0xD8, 0xFF]);

    let tmp = tempfile::tempdir().unwrap();
    let (pipeline, _, store) = build_pipeline(
        Arc::clone(&engine),
        WebhookConfig::default(),
        AgentConfig::default(),
        tmp.path(),
    );

    let mut msg = text_message("m5", "49123@s.whatsapp.net", "49123@s.whatsapp.net", "");
    msg.body = MessageBody::Media {
        kind: MediaKind::Image,
        caption: "pic".to_string(),
        media: Some(MediaRef {
            url: "mock://m5".to_string(),
            mime_type: "image/jpeg".to_string(),
        }),
    };
    pipeline.handle_event(EngineEvent::Message(Box::new(msg))).await;

    let rows = store.messages_for_chat("49123@s.whatsapp.net", 10, 0).unwrap();
    assert_eq!(rows[0].msg_type, "image");
    assert_eq!(rows[0].content, "pic");
    assert!(rows[0].media_path.ends_with("m5.jpg"), "{}", rows[0].media_path);
    assert_eq!(std::fs::read(&rows[0].media_path).unwrap(), vec![0xFF, 0xD8, 0xFF]);
}

#[tokio::test]
async fn failed_download_yields_empty_media_path() {
    let engine = Arc::new(MockEngine::with_session("1000@s.whatsapp.net"));
    let tmp = tempfile::tempdir().unwrap();
    let (pipeline, _, store) = build_pipeline(
        engine,
        WebhookConfig::default(),
        AgentConfig::default(),
        tmp.path(),
    );

    let mut msg = text_message("m6", "49123@s.whatsapp.net", "49123@s.whatsapp.net", "");
    msg.body = MessageBody::Media {
        kind: MediaKind::Document,
        caption: "report".to_string(),
        media: Some(MediaRef {
            url: "mock://missing".to_string(),
            mime_type: "application/pdf".to_string(),
        }),
    };
    pipeline.handle_event(EngineEvent::Message(Box::new(msg))).await;

    // Processing continued: the row exists, just without media.
    let rows = store.messages_for_chat("49123@s.whatsapp.net", 10, 0).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].media_path.is_empty());
}

#[tokio::test]
async fn group_name_is_resolved_best_effort() {
    let engine = Arc::new(MockEngine::with_session("1000@s.whatsapp.net"));
    engine
        .group_names
        .lock()
        .unwrap()
        .insert("123-456@g.us".to_string(), "Team".to_string());

    let tmp = tempfile::tempdir().unwrap();
    let (pipeline, _, store) = build_pipeline(
        Arc::clone(&engine),
        WebhookConfig::default(),
        AgentConfig::default(),
        tmp.path(),
    );

    let msg = text_message("m7", "123-456@g.us", "49123@s.whatsapp.net", "hi all");
    pipeline.handle_event(EngineEvent::Message(Box::new(msg))).await;

    let rows = store.messages_for_chat("123-456@g.us", 10, 0).unwrap();
    assert!(rows[0].is_group);
    assert_eq!(rows[0].group_name, "Team");

    // Unknown group: lookup failure leaves the name empty.
    let msg = text_message("m8", "999-999@g.us", "49123@s.whatsapp.net", "hi");
    pipeline.handle_event(EngineEvent::Message(Box::new(msg))).await;
    let rows = store.messages_for_chat("999-999@g.us", 10, 0).unwrap();
    assert_eq!(rows[0].group_name, "");
}

#[tokio::test]
async fn transport_events_reach_the_session() {
    let engine = Arc::new(MockEngine::with_session("1000@s.whatsapp.net"));
    let tmp = tempfile::tempdir().unwrap();
    let (pipeline, session, _) = build_pipeline(
        Arc::clone(&engine),
        WebhookConfig::default(),
        AgentConfig::default(),
        tmp.path(),
    );

    session.connect().await.unwrap();
    engine.connected.store(false, Ordering::SeqCst);
    pipeline.handle_event(EngineEvent::Disconnected).await;
    assert_eq!(session.status(), wavelink::Status::Disconnected);
}

// -- webhook delivery ---------------------------------------------------------

#[tokio::test]
async fn concurrent_sends_deliver_at_most_once() {
    let (url, counter) = start_counting_endpoint().await;
    let sender = Arc::new(WebhookSender::new(WebhookConfig {
        url: Some(url),
        dm_only: false,
        ignore_groups: Vec::new(),
    }));

    let payload = WebhookPayload {
        from: "49123@s.whatsapp.net".into(),
        name: "Alice".into(),
        message: "hello".into(),
        timestamp: 1_700_000_000,
        kind: "text".into(),
        media_url: String::new(),
        chat_type: "dm".into(),
        group_name: String::new(),
        message_id: "dup-1".into(),
    };

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let sender = Arc::clone(&sender);
        let payload = payload.clone();
        tasks.push(tokio::spawn(async move { sender.send(&payload).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn distinct_ids_each_deliver() {
    let (url, counter) = start_counting_endpoint().await;
    let sender = WebhookSender::new(WebhookConfig {
        url: Some(url),
        dm_only: false,
        ignore_groups: Vec::new(),
    });

    for id in ["a", "b", "c"] {
        let payload = WebhookPayload {
            from: "49123@s.whatsapp.net".into(),
            name: String::new(),
            message: "hi".into(),
            timestamp: 1_700_000_000,
            kind: "text".into(),
            media_url: String::new(),
            chat_type: "dm".into(),
            group_name: String::new(),
            message_id: id.into(),
        };
        sender.send(&payload).await.unwrap();
    }

    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

// -- agent trigger ------------------------------------------------------------

#[tokio::test]
async fn agent_command_runs_with_escaped_template() {
    let engine = Arc::new(MockEngine::with_session("1000@s.whatsapp.net"));
    let tmp = tempfile::tempdir().unwrap();
    let out_path = tmp.path().join("agent-out.txt");

    let agent = AgentConfig {
        enabled: true,
        mode: AgentMode::Command,
        command: format!("printf '%s' '{{message}}' > {}", out_path.display()),
        ..AgentConfig::default()
    };
    let (pipeline, _, _) = build_pipeline(
        Arc::clone(&engine),
        WebhookConfig::default(),
        agent,
        tmp.path(),
    );

    // A single quote in the message must not break out of the argument.
    let msg = text_message(
        "m9",
        "49123@s.whatsapp.net",
        "49123@s.whatsapp.net",
        "it's a trap",
    );
    pipeline.handle_event(EngineEvent::Message(Box::new(msg))).await;

    wait_until(|| out_path.exists(), "agent command output").await;
    wait_until(
        || std::fs::read_to_string(&out_path).unwrap_or_default() == "it's a trap",
        "agent output content",
    )
    .await;

    // Presence choreography: composing before the run, paused after.
    wait_until(|| engine.presence_log().len() == 2, "presence signals").await;
    let log = engine.presence_log();
    assert_eq!(log[0].1, Presence::Composing);
    assert_eq!(log[1].1, Presence::Paused);
}

#[tokio::test]
async fn dm_only_agent_ignores_group_traffic_entirely() {
    let engine = Arc::new(MockEngine::with_session("1000@s.whatsapp.net"));
    let tmp = tempfile::tempdir().unwrap();

    let agent = AgentConfig {
        enabled: true,
        mode: AgentMode::Command,
        command: "true".into(),
        dm_only: true,
        ..AgentConfig::default()
    };
    let (pipeline, _, store) = build_pipeline(
        Arc::clone(&engine),
        WebhookConfig::default(),
        agent,
        tmp.path(),
    );

    let msg = text_message("m10", "123-456@g.us", "49123@s.whatsapp.net", "hi all");
    pipeline.handle_event(EngineEvent::Message(Box::new(msg))).await;

    // The message is still persisted, but the agent stayed silent: no
    // presence signal at all.
    assert_eq!(store.messages_for_chat("123-456@g.us", 10, 0).unwrap().len(), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.presence_log().is_empty());
}

// -- reconnect supervisor -----------------------------------------------------

#[tokio::test]
async fn supervisor_reconnects_with_growing_attempts() {
    let engine = Arc::new(MockEngine::with_session("1000@s.whatsapp.net"));
    engine.start_failures.store(2, Ordering::SeqCst);
    let engine_dyn: Arc<dyn ProtocolEngine> = Arc::clone(&engine) as Arc<dyn ProtocolEngine>;
    let session = Arc::new(SessionManager::new(engine_dyn));

    let cancel = CancellationToken::new();
    let handle = reconnect::spawn(
        Arc::clone(&session),
        ReconnectConfig {
            enabled: true,
            interval: Duration::from_millis(20),
            max_backoff: Duration::from_millis(200),
        },
        cancel.clone(),
    );

    wait_until(|| engine.connected.load(Ordering::SeqCst), "reconnect").await;
    assert!(engine.start_attempts.load(Ordering::SeqCst) >= 3);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("supervisor did not stop")
        .unwrap();
}

#[tokio::test]
async fn supervisor_skips_without_stored_session() {
    let engine = Arc::new(MockEngine::default());
    let engine_dyn: Arc<dyn ProtocolEngine> = Arc::clone(&engine) as Arc<dyn ProtocolEngine>;
    let session = Arc::new(SessionManager::new(engine_dyn));

    let cancel = CancellationToken::new();
    let handle = reconnect::spawn(
        Arc::clone(&session),
        ReconnectConfig {
            enabled: true,
            interval: Duration::from_millis(20),
            max_backoff: Duration::from_millis(200),
        },
        cancel.clone(),
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    // No session to reconnect to — the supervisor never touched the engine.
    assert_eq!(engine.start_attempts.load(Ordering::SeqCst), 0);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("supervisor did not stop")
        .unwrap();
}
