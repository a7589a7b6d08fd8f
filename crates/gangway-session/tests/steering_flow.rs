// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end steering and kill behavior against a scripted backend.

use std::sync::Arc;
use std::time::Duration;

use gangway_core::{DoneReason, StatusKind, UsageUpdate};
use gangway_orchestrator::{PolicyTable, ProviderOrchestrator};
use gangway_session::{ModelContext, Session, SessionConfig};
use gangway_store::SnapshotStore;
use gangway_test_utils::{MockBackend, ScriptStep, StatusCollector};
use tokio::sync::Notify;

fn test_config() -> SessionConfig {
    SessionConfig {
        primary_provider: "mock".to_string(),
        ..SessionConfig::default()
    }
}

struct Fixture {
    session: Arc<Session>,
    backend: Arc<MockBackend>,
    _dir: tempfile::TempDir,
}

fn fixture(scripts: Vec<Vec<ScriptStep>>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::with_scripts("mock", scripts));
    let mut orchestrator = ProviderOrchestrator::new(PolicyTable::default());
    orchestrator.register(Arc::clone(&backend) as Arc<dyn gangway_core::ProviderBackend>);

    let session = Arc::new(Session::new(
        gangway_core::SessionIdentity::new("acme", "telegram", "42").unwrap(),
        dir.path().to_path_buf(),
        test_config(),
        Arc::new(orchestrator),
        Some(Arc::new(SnapshotStore::new(dir.path().join("sessions")))),
    ));

    Fixture {
        session,
        backend,
        _dir: dir,
    }
}

/// Polls until the condition holds or a second passes.
async fn wait_until(mut condition: impl AsyncFnMut() -> bool) {
    for _ in 0..100 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within timeout");
}

#[tokio::test(flavor = "multi_thread")]
async fn steering_through_a_tool_boundary() {
    let gate = Arc::new(Notify::new());
    let fixture = fixture(vec![
        vec![
            ScriptStep::Session {
                id: "prov-1".into(),
                resumed: false,
            },
            ScriptStep::WaitFor(Arc::clone(&gate)),
            ScriptStep::Tool {
                name: "Bash".into(),
                input: serde_json::json!({"command": "echo hi"}),
            },
            ScriptStep::Text("handled A and B".into()),
            ScriptStep::Usage(UsageUpdate {
                input_tokens: 12,
                output_tokens: 7,
                ..Default::default()
            }),
            ScriptStep::Done(DoneReason::Completed),
        ],
        MockBackend::default_script("follow-up answer"),
    ]);

    let session = Arc::clone(&fixture.session);
    let collector = StatusCollector::new();
    let callback = collector.callback();
    let task = tokio::spawn(async move {
        session
            .send_message_streaming("A", ModelContext::General, callback, None)
            .await
    });

    // Wait until the query reached the provider, then steer while the tool
    // boundary is still gated.
    let observations = fixture.backend.observations();
    wait_until(async || !observations.lock().await.prompts.is_empty()).await;
    fixture.session.enqueue_steering("B", 2).await.unwrap();
    gate.notify_one();

    let text = task.await.unwrap().unwrap();
    assert_eq!(text, "handled A and B");

    // The post-tool hook injected "B" as a system payload.
    {
        let observations = observations.lock().await;
        assert_eq!(observations.injected.len(), 1);
        assert!(observations.injected[0].contains("[USER SENT MESSAGE DURING EXECUTION]"));
        assert!(observations.injected[0].contains("B"));
        assert!(observations.injected[0].contains("[END USER MESSAGE]"));
        // The fresh conversation got the date header.
        assert!(observations.prompts[0].contains("Current date and time:"));
    }

    // Active FIFO is empty at done; no steering_pending was emitted.
    assert_eq!(fixture.session.steering_len().await, 0);
    assert!(collector.of_kind(StatusKind::SteeringPending).is_empty());

    // The next query re-anchors the injected message in its prompt
    // envelope and empties the shadow list.
    let collector2 = StatusCollector::new();
    let text = fixture
        .session
        .send_message_streaming("next", ModelContext::General, collector2.callback(), None)
        .await
        .unwrap();
    assert_eq!(text, "follow-up answer");

    let observations = observations.lock().await;
    let second_prompt = &observations.prompts[1];
    assert!(second_prompt.contains("[MESSAGES SENT DURING PREVIOUS EXECUTION]"));
    assert!(second_prompt.contains("B"));
    assert!(second_prompt.contains("[END PREVIOUS MESSAGES]"));
    // Resumed with the provider session id from the first query.
    assert_eq!(observations.resumed_sessions[1].as_deref(), Some("prov-1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn text_only_response_leaves_steering_restorable() {
    let gate = Arc::new(Notify::new());
    let fixture = fixture(vec![
        vec![
            ScriptStep::Session {
                id: "prov-2".into(),
                resumed: false,
            },
            ScriptStep::WaitFor(Arc::clone(&gate)),
            ScriptStep::Text("streamed text only".into()),
            ScriptStep::Done(DoneReason::Completed),
        ],
        MockBackend::default_script("second"),
    ]);

    let session = Arc::clone(&fixture.session);
    let collector = StatusCollector::new();
    let callback = collector.callback();
    let task = tokio::spawn(async move {
        session
            .send_message_streaming("C", ModelContext::General, callback, None)
            .await
    });

    let observations = fixture.backend.observations();
    wait_until(async || !observations.lock().await.prompts.is_empty()).await;
    fixture.session.enqueue_steering("D", 2).await.unwrap();
    gate.notify_one();

    task.await.unwrap().unwrap();

    // No tool boundary fired, so "D" is still buffered and surfaced.
    assert_eq!(fixture.session.steering_len().await, 1);
    let pending = collector.of_kind(StatusKind::SteeringPending);
    assert_eq!(pending.len(), 1);
    assert!(pending[0].content.contains("D"));
    assert_eq!(
        pending[0].metadata.as_ref().unwrap()["steeringCount"],
        serde_json::json!(1)
    );

    // Starting the next query drains it into the prompt envelope.
    let collector2 = StatusCollector::new();
    fixture
        .session
        .send_message_streaming("next", ModelContext::General, collector2.callback(), None)
        .await
        .unwrap();

    assert_eq!(fixture.session.steering_len().await, 0);
    let observations = observations.lock().await;
    assert!(observations.prompts[1].contains("[MESSAGES SENT DURING PREVIOUS EXECUTION]"));
    assert!(observations.prompts[1].contains("D"));
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_during_running_drops_late_events() {
    let gate = Arc::new(Notify::new());
    let fixture = fixture(vec![vec![
        ScriptStep::Session {
            id: "prov-3".into(),
            resumed: false,
        },
        ScriptStep::Text("partial".into()),
        ScriptStep::WaitFor(Arc::clone(&gate)),
        ScriptStep::Text(" never delivered".into()),
        ScriptStep::Done(DoneReason::Completed),
    ]]);

    let session = Arc::clone(&fixture.session);
    let collector = StatusCollector::new();
    let callback = collector.callback();
    let task = tokio::spawn(async move {
        session
            .send_message_streaming("long job", ModelContext::General, callback, None)
            .await
    });

    let observations = fixture.backend.observations();
    wait_until(async || !observations.lock().await.prompts.is_empty()).await;
    fixture.session.enqueue_steering("queued 1", 2).await.unwrap();
    fixture.session.enqueue_steering("queued 2", 3).await.unwrap();

    let outcome = fixture.session.kill().await;
    assert_eq!(outcome.count, 2);
    assert_eq!(outcome.messages[0].content, "queued 1");

    // The generation fence invalidated the query: partial text comes back,
    // but no session id observed mid-stream survives the reset.
    let text = task.await.unwrap().unwrap();
    assert!(text.contains("partial") || text.is_empty());
    assert_eq!(fixture.session.provider_session_id().await, None);
    assert_eq!(fixture.session.runtime_state().await.generation, 1);
    assert_eq!(fixture.session.steering_len().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_query_attempt_is_rejected() {
    let gate = Arc::new(Notify::new());
    let fixture = fixture(vec![vec![
        ScriptStep::WaitFor(Arc::clone(&gate)),
        ScriptStep::Text("done".into()),
        ScriptStep::Done(DoneReason::Completed),
    ]]);

    let session = Arc::clone(&fixture.session);
    let collector = StatusCollector::new();
    let callback = collector.callback();
    let task = tokio::spawn(async move {
        session
            .send_message_streaming("first", ModelContext::General, callback, None)
            .await
    });

    let observations = fixture.backend.observations();
    wait_until(async || !observations.lock().await.prompts.is_empty()).await;

    let second = fixture
        .session
        .send_message_streaming(
            "second",
            ModelContext::General,
            StatusCollector::new().callback(),
            None,
        )
        .await;
    assert!(second.is_err());

    gate.notify_one();
    task.await.unwrap().unwrap();
}
