//! 对账器的分发器订阅端
//!
//! 把入站信封翻译成对账操作，差异推送到渲染通道；缓冲溢出时负责发出全量同步请求。

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::reconciler::{HistoryChange, HistoryReconciler};
use crate::core::{Clock, SyncError};
use crate::protocol::{EnvelopeHandler, EnvelopeKind, Inbound, Outbound, OutboundSink};

/// 历史对账 handler
pub struct HistoryHandler {
    reconciler: Arc<Mutex<HistoryReconciler>>,
    clock: Arc<dyn Clock>,
    outbound: Arc<dyn OutboundSink>,
    changes: Option<mpsc::UnboundedSender<HistoryChange>>,
}

impl HistoryHandler {
    /// 需要订阅的信封类型
    pub const KINDS: &'static [EnvelopeKind] = &[
        EnvelopeKind::Connected,
        EnvelopeKind::Disconnected,
        EnvelopeKind::HistoryItem,
        EnvelopeKind::PendingItem,
        EnvelopeKind::HistorySync,
        EnvelopeKind::ForceResync,
        EnvelopeKind::Clear,
    ];

    pub fn new(
        reconciler: Arc<Mutex<HistoryReconciler>>,
        clock: Arc<dyn Clock>,
        outbound: Arc<dyn OutboundSink>,
    ) -> Self {
        Self {
            reconciler,
            clock,
            outbound,
            changes: None,
        }
    }

    /// 设置差异输出通道
    pub fn with_changes(mut self, tx: mpsc::UnboundedSender<HistoryChange>) -> Self {
        self.changes = Some(tx);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HistoryReconciler> {
        self.reconciler.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, changes: Vec<HistoryChange>) {
        let Some(tx) = &self.changes else { return };
        for change in changes {
            if tx.send(change).is_err() {
                tracing::debug!("History change receiver dropped");
                return;
            }
        }
    }

    fn request_sync(&self, reconciler: &mut HistoryReconciler) {
        if !reconciler.take_sync_request() {
            return;
        }
        match self.outbound.send(Outbound::RequestHistorySync {}) {
            Ok(()) => tracing::info!("Requested authoritative history sync"),
            Err(e) => {
                tracing::warn!("History sync request not delivered, will retry on reconnect: {}", e);
                reconciler.sync_request_lost();
            }
        }
    }
}

impl EnvelopeHandler for HistoryHandler {
    fn name(&self) -> &str {
        "history"
    }

    fn handle(&self, envelope: &Inbound) -> Result<(), SyncError> {
        let now = self.clock.now_ms();
        let mut reconciler = self.lock();
        let changes = match envelope {
            Inbound::PendingItem(item) => reconciler.apply_pending(item.clone(), now),
            Inbound::HistoryItem(item) => reconciler.apply_final(item.clone(), now),
            Inbound::HistorySync { history } => {
                tracing::info!("Rebuilding history from sync ({} items)", history.len());
                reconciler.apply_sync(history.clone(), now)
            }
            Inbound::ForceResync {} => {
                tracing::warn!("Server buffer overrun, discarding local history");
                let changes = reconciler.force_resync();
                self.request_sync(&mut reconciler);
                changes
            }
            Inbound::Clear {} => reconciler.clear(),
            Inbound::Connected {} => {
                self.request_sync(&mut reconciler);
                Vec::new()
            }
            Inbound::Disconnected {} => {
                if reconciler.is_awaiting_sync() {
                    reconciler.sync_request_lost();
                }
                Vec::new()
            }
            other => {
                return Err(SyncError::handler(
                    self.name(),
                    format!("unexpected envelope {:?}", other.kind()),
                ))
            }
        };
        drop(reconciler);
        self.publish(changes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::protocol::{Dispatcher, HistoryItem, RecordingSink, StreamClass};

    struct Fixture {
        dispatcher: Dispatcher,
        reconciler: Arc<Mutex<HistoryReconciler>>,
        clock: Arc<ManualClock>,
        sink: RecordingSink,
        rx: mpsc::UnboundedReceiver<HistoryChange>,
    }

    fn fixture() -> Fixture {
        let reconciler = Arc::new(Mutex::new(HistoryReconciler::default()));
        let clock = Arc::new(ManualClock::new(0));
        let sink = RecordingSink::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = HistoryHandler::new(
            Arc::clone(&reconciler),
            clock.clone(),
            Arc::new(sink.clone()),
        )
        .with_changes(tx);
        let dispatcher = Dispatcher::new();
        dispatcher.register_many(HistoryHandler::KINDS, Arc::new(handler));
        Fixture {
            dispatcher,
            reconciler,
            clock,
            sink,
            rx,
        }
    }

    #[test]
    fn test_merge_scenario_through_dispatcher() {
        let mut f = fixture();
        f.dispatcher
            .dispatch_frame(r#"{"type":"history_item","data":{"kind":"assistant","text":"Hello"}}"#);
        f.clock.set(1_000);
        f.dispatcher
            .dispatch_frame(r#"{"type":"history_item","data":{"kind":"assistant","text":"World"}}"#);

        let r = f.reconciler.lock().unwrap();
        assert_eq!(r.entries().len(), 1);
        assert_eq!(r.entries()[0].text.as_deref(), Some("Hello\n\nWorld"));
        drop(r);

        assert!(matches!(f.rx.try_recv().unwrap(), HistoryChange::Appended(_)));
        assert!(matches!(f.rx.try_recv().unwrap(), HistoryChange::Merged(_)));
    }

    #[test]
    fn test_split_scenario_outside_window() {
        let f = fixture();
        f.dispatcher.dispatch(&Inbound::HistoryItem(HistoryItem::assistant("Hello")));
        f.clock.set(6_000);
        f.dispatcher.dispatch(&Inbound::HistoryItem(HistoryItem::assistant("World")));
        assert_eq!(f.reconciler.lock().unwrap().entries().len(), 2);
    }

    #[test]
    fn test_force_resync_requests_sync_once() {
        let f = fixture();
        f.dispatcher.dispatch(&Inbound::PendingItem(HistoryItem::assistant("partial")));
        f.dispatcher.dispatch(&Inbound::ForceResync {});
        f.dispatcher.dispatch(&Inbound::ForceResync {});

        assert!(f
            .reconciler
            .lock()
            .unwrap()
            .pending(StreamClass::Text)
            .is_none());
        assert_eq!(f.sink.sent(), vec![Outbound::RequestHistorySync {}]);
    }

    #[test]
    fn test_undelivered_sync_request_retried_on_connect() {
        let f = fixture();
        f.sink.set_offline(true);
        f.dispatcher.dispatch(&Inbound::ForceResync {});
        assert!(f.sink.sent().is_empty());

        f.sink.set_offline(false);
        f.dispatcher.dispatch(&Inbound::Connected {});
        assert_eq!(f.sink.sent(), vec![Outbound::RequestHistorySync {}]);

        // 同步完成后重连不再请求
        f.dispatcher.dispatch(&Inbound::HistorySync { history: vec![] });
        f.dispatcher.dispatch(&Inbound::Disconnected {});
        f.dispatcher.dispatch(&Inbound::Connected {});
        assert_eq!(f.sink.sent().len(), 1);
    }

    #[test]
    fn test_sync_request_lost_on_disconnect() {
        let f = fixture();
        f.dispatcher.dispatch(&Inbound::ForceResync {});
        f.dispatcher.dispatch(&Inbound::Disconnected {});
        f.dispatcher.dispatch(&Inbound::Connected {});
        assert_eq!(
            f.sink.sent(),
            vec![Outbound::RequestHistorySync {}, Outbound::RequestHistorySync {}]
        );
    }
}
