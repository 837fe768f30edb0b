//! 会话集成测试：脚本化内存传输上的完整会话

use std::sync::Arc;

use bee_sync::config::SyncConfig;
use bee_sync::confirmation::{FileQueueStore, RecordingPresenter};
use bee_sync::core::{ManualClock, ShutdownReason};
use bee_sync::history::HistoryChange;
use bee_sync::protocol::{ConfirmationOutcome, Outbound};
use bee_sync::supervisor::{memory_pair, MemoryTransport, ScriptStep, SupervisorEvent};
use bee_sync::{SessionStreams, SyncSessionBuilder};

const EXEC_REQUEST: &str = r#"{"type":"tool_confirmation","data":{"callId":"call-1","toolName":"run_shell_command","confirmationDetails":{"type":"exec","command":"cargo test"}}}"#;

async fn next_change(streams: &mut SessionStreams) -> HistoryChange {
    streams.history.recv().await.expect("history stream closed")
}

#[tokio::test(start_paused = true)]
async fn test_streamed_reply_merges_and_confirmation_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(10_000));
    let presenter = Arc::new(RecordingPresenter::new());
    let (conn, mut peer) = memory_pair();

    let (session, mut streams) = SyncSessionBuilder::new(SyncConfig::default())
        .with_clock(clock.clone())
        .with_store(Arc::new(FileQueueStore::new(dir.path(), "tab-a")))
        .with_presenter(presenter.clone())
        .build(MemoryTransport::new(vec![ScriptStep::Open(conn)]));

    session.connect();
    assert_eq!(
        streams.connection.recv().await,
        Some(SupervisorEvent::Connected { reopened: false })
    );

    // 流式占位 → 定稿，ID 沿用
    peer.push(r#"{"type":"pending_item","data":{"kind":"assistant","text":"Hel"}}"#);
    let created = match next_change(&mut streams).await {
        HistoryChange::PendingCreated(p) => p,
        other => panic!("unexpected change {:?}", other),
    };
    peer.push(r#"{"type":"pending_item","data":{"kind":"assistant","text":"Hello"}}"#);
    assert!(matches!(
        next_change(&mut streams).await,
        HistoryChange::PendingUpdated(_)
    ));
    peer.push(r#"{"type":"history_item","data":{"kind":"assistant","text":"Hello"}}"#);
    match next_change(&mut streams).await {
        HistoryChange::Promoted(entry) => assert_eq!(entry.id, created.id),
        other => panic!("unexpected change {:?}", other),
    }

    // 窗口内的第二段助手回复合并到同一条目
    clock.advance(2_000);
    peer.push(r#"{"type":"history_item","data":{"kind":"assistant","text":"world"}}"#);
    match next_change(&mut streams).await {
        HistoryChange::Merged(entry) => {
            assert_eq!(entry.id, created.id);
            assert_eq!(entry.text.as_deref(), Some("Hello\n\nworld"));
        }
        other => panic!("unexpected change {:?}", other),
    }

    // 确认请求：展示、回复、出站
    peer.push(EXEC_REQUEST);
    peer.push(r#"{"type":"clear","seq":1}"#);
    assert_eq!(next_change(&mut streams).await, HistoryChange::Reset);
    assert_eq!(presenter.presented_ids(), vec!["call-1".to_string()]);

    session
        .answer(ConfirmationOutcome::ProceedAlways, None)
        .await
        .unwrap();
    let response = Outbound::ToolConfirmationResponse {
        call_id: "call-1".into(),
        outcome: ConfirmationOutcome::ProceedAlways,
        payload: None,
    }
    .encode()
    .unwrap();
    assert_eq!(peer.next_sent().await, Some(response));
    assert!(session.confirmations().lock().unwrap().is_empty());

    session.close(ShutdownReason::UserInitiated).await;
}

#[tokio::test(start_paused = true)]
async fn test_pending_confirmation_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (conn, peer) = memory_pair();
        let (session, mut streams) = SyncSessionBuilder::new(SyncConfig::default())
            .with_store(Arc::new(FileQueueStore::new(dir.path(), "tab-b")))
            .with_presenter(Arc::new(RecordingPresenter::new()))
            .build(MemoryTransport::new(vec![ScriptStep::Open(conn)]));
        session.connect();
        streams.connection.recv().await;

        peer.push(EXEC_REQUEST);
        peer.push(r#"{"type":"clear"}"#);
        assert_eq!(next_change(&mut streams).await, HistoryChange::Reset);
        assert_eq!(session.confirmations().lock().unwrap().len(), 1);

        session.close(ShutdownReason::Navigation).await;
    }

    let presenter = Arc::new(RecordingPresenter::new());
    let (session, _streams) = SyncSessionBuilder::new(SyncConfig::default())
        .with_store(Arc::new(FileQueueStore::new(dir.path(), "tab-b")))
        .with_presenter(presenter.clone())
        .build(MemoryTransport::new(vec![]));
    assert_eq!(presenter.presented_ids(), vec!["call-1".to_string()]);

    // 其他会话（标签页）看不到这个队列
    let other = Arc::new(RecordingPresenter::new());
    let (other_session, _other_streams) = SyncSessionBuilder::new(SyncConfig::default())
        .with_store(Arc::new(FileQueueStore::new(dir.path(), "tab-c")))
        .with_presenter(other.clone())
        .build(MemoryTransport::new(vec![]));
    assert!(other.presented_ids().is_empty());

    session.close(ShutdownReason::Navigation).await;
    other_session.close(ShutdownReason::Navigation).await;
}

#[tokio::test(start_paused = true)]
async fn test_overflow_during_outage_resyncs_after_reconnect() {
    let (first, first_peer) = memory_pair();
    let (second, mut second_peer) = memory_pair();
    let (session, mut streams) = SyncSessionBuilder::new(SyncConfig::default())
        .with_clock(Arc::new(ManualClock::new(0)))
        .with_store(Arc::new(bee_sync::confirmation::MemoryQueueStore::new()))
        .with_presenter(Arc::new(RecordingPresenter::new()))
        .build(MemoryTransport::new(vec![
            ScriptStep::Open(first),
            ScriptStep::Open(second),
        ]));

    session.connect();
    streams.connection.recv().await;

    first_peer.push(r#"{"type":"history_item","data":{"kind":"user","text":"hi"},"seq":1}"#);
    assert!(matches!(
        next_change(&mut streams).await,
        HistoryChange::Appended(_)
    ));

    // 溢出通知之后连接立即断开，同步请求随之失效
    first_peer.push(r#"{"type":"force_resync","seq":2}"#);
    assert_eq!(next_change(&mut streams).await, HistoryChange::Reset);
    first_peer.close();

    assert_eq!(
        streams.connection.recv().await,
        Some(SupervisorEvent::Reconnecting { attempt: 1 })
    );
    assert_eq!(
        streams.connection.recv().await,
        Some(SupervisorEvent::Connected { reopened: true })
    );

    // 重连后先补发同步请求，再探测断线期间的消息
    let mut sent = vec![
        second_peer.next_sent().await.unwrap(),
        second_peer.next_sent().await.unwrap(),
    ];
    sent.sort();
    let mut expected = vec![
        Outbound::RequestHistorySync {}.encode().unwrap(),
        Outbound::CheckMissedMessages { since_seq: Some(2) }
            .encode()
            .unwrap(),
    ];
    expected.sort();
    assert_eq!(sent, expected);

    second_peer.push(
        r#"{"type":"history_sync","data":{"history":[{"kind":"user","text":"hi","timestamp":5},{"kind":"assistant","text":"hello","timestamp":6}]},"seq":3}"#,
    );
    assert_eq!(next_change(&mut streams).await, HistoryChange::Reset);
    assert!(matches!(
        next_change(&mut streams).await,
        HistoryChange::Appended(_)
    ));
    assert!(matches!(
        next_change(&mut streams).await,
        HistoryChange::Appended(_)
    ));
    {
        let history = session.history();
        let history = history.lock().unwrap();
        assert_eq!(history.entries().len(), 2);
        assert!(!history.is_awaiting_sync());
    }

    session.close(ShutdownReason::UserInitiated).await;
}

#[tokio::test(start_paused = true)]
async fn test_answer_lost_with_socket_can_be_resent_after_reconnect() {
    let (first, first_peer) = memory_pair();
    let (second, mut second_peer) = memory_pair();
    let presenter = Arc::new(RecordingPresenter::new());
    let (session, mut streams) = SyncSessionBuilder::new(SyncConfig::default())
        .with_store(Arc::new(bee_sync::confirmation::MemoryQueueStore::new()))
        .with_presenter(presenter.clone())
        .build(MemoryTransport::new(vec![
            ScriptStep::Open(first),
            ScriptStep::Open(second),
        ]));

    session.connect();
    streams.connection.recv().await;
    first_peer.push(EXEC_REQUEST);
    first_peer.push(r#"{"type":"clear"}"#);
    assert_eq!(next_change(&mut streams).await, HistoryChange::Reset);

    // 回复还没写出去，socket 就断了
    first_peer.close();
    assert!(session
        .answer(ConfirmationOutcome::ProceedOnce, None)
        .await
        .is_err());
    {
        let confirmations = session.confirmations();
        let confirmations = confirmations.lock().unwrap();
        assert_eq!(confirmations.len(), 1);
        assert_eq!(confirmations.presented().unwrap().call_id, "call-1");
        assert_eq!(confirmations.in_flight(), None);
    }

    assert_eq!(
        streams.connection.recv().await,
        Some(SupervisorEvent::Reconnecting { attempt: 1 })
    );
    assert_eq!(
        streams.connection.recv().await,
        Some(SupervisorEvent::Connected { reopened: true })
    );

    session
        .answer(ConfirmationOutcome::ProceedOnce, None)
        .await
        .unwrap();
    assert_eq!(
        second_peer.next_sent().await,
        Some(
            Outbound::CheckMissedMessages { since_seq: None }
                .encode()
                .unwrap()
        )
    );
    assert_eq!(
        second_peer.next_sent().await,
        Some(
            Outbound::ToolConfirmationResponse {
                call_id: "call-1".into(),
                outcome: ConfirmationOutcome::ProceedOnce,
                payload: None,
            }
            .encode()
            .unwrap()
        )
    );
    assert!(session.confirmations().lock().unwrap().is_empty());
    assert_eq!(presenter.presented_ids(), vec!["call-1".to_string()]);

    session.close(ShutdownReason::UserInitiated).await;
}
