//! 会话构建器：统一的同步会话初始化逻辑
//!
//! 把分发器、连接监管任务、历史对账器、确认仲裁器接到一起。
//! 对账器和仲裁器都通过监管句柄发送出站信封，监管任务又通过分发器把入站信封交给它们，
//! 所以分发器先建好，handler 在监管器创建之后再注册。

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::confirmation::{
    ConfirmationArbiter, ConfirmationHandler, ConfirmationPresenter, FileQueueStore, QueueStore,
    TracingPresenter,
};
use crate::core::{Clock, ShutdownManager, ShutdownReason, SyncError, SystemClock};
use crate::history::{HistoryChange, HistoryHandler, HistoryReconciler};
use crate::protocol::{
    ConfirmationOutcome, Dispatcher, EnvelopeHandler, EnvelopeKind, Outbound, OutboundSink,
};
use crate::supervisor::{
    ConnectionSnapshot, ConnectionSupervisor, PageEvent, SupervisorEvent, SupervisorHandle,
    Transport,
};

/// 会话构建器
pub struct SyncSessionBuilder {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn QueueStore>>,
    presenter: Arc<dyn ConfirmationPresenter>,
    shutdown: ShutdownManager,
}

/// 会话的输出流：历史差异与连接通知
pub struct SessionStreams {
    pub history: mpsc::UnboundedReceiver<HistoryChange>,
    pub connection: mpsc::UnboundedReceiver<SupervisorEvent>,
}

impl SyncSessionBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            store: None,
            presenter: Arc::new(TracingPresenter),
            shutdown: ShutdownManager::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 确认队列存储；未设置时落盘到 `<state_dir>/<session_id>/`
    pub fn with_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn ConfirmationPresenter>) -> Self {
        self.presenter = presenter;
        self
    }

    /// 共用外部的关闭信号（例如已安装 Ctrl+C 处理器的管理器）
    pub fn with_shutdown(mut self, shutdown: ShutdownManager) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// 构建会话并启动监管任务（需在 tokio 运行时内调用）
    pub fn build<T: Transport + 'static>(self, transport: T) -> (SyncSession, SessionStreams) {
        let dispatcher = Arc::new(Dispatcher::new());
        let (supervisor, handle, connection_rx) = ConnectionSupervisor::new(
            transport,
            Arc::clone(&dispatcher),
            Arc::clone(&self.clock),
            self.config.reconnect_policy(),
            self.shutdown.token(),
        );
        let outbound: Arc<dyn OutboundSink> = Arc::new(handle.clone());

        let (history_tx, history_rx) = mpsc::unbounded_channel();
        let history = Arc::new(Mutex::new(HistoryReconciler::new(self.config.merge_window())));
        dispatcher.register_many(
            HistoryHandler::KINDS,
            Arc::new(
                HistoryHandler::new(
                    Arc::clone(&history),
                    Arc::clone(&self.clock),
                    Arc::clone(&outbound),
                )
                .with_changes(history_tx),
            ),
        );

        let session_id = self
            .config
            .confirmation
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let store: Arc<dyn QueueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileQueueStore::new(self.config.state_dir(), &session_id)),
        };
        let confirmations = Arc::new(Mutex::new(ConfirmationArbiter::restore(
            store,
            self.presenter,
            outbound,
        )));
        dispatcher.register_many(
            ConfirmationHandler::KINDS,
            Arc::new(ConfirmationHandler::new(Arc::clone(&confirmations))),
        );

        let task = supervisor.spawn();
        tracing::info!("Sync session {} ready", session_id);

        let session = SyncSession {
            session_id,
            url: self.config.connection.url,
            dispatcher,
            supervisor: handle,
            history,
            confirmations,
            shutdown: self.shutdown,
            task,
        };
        let streams = SessionStreams {
            history: history_rx,
            connection: connection_rx,
        };
        (session, streams)
    }
}

/// 一个已接线的同步会话
pub struct SyncSession {
    session_id: String,
    url: String,
    dispatcher: Arc<Dispatcher>,
    supervisor: SupervisorHandle,
    history: Arc<Mutex<HistoryReconciler>>,
    confirmations: Arc<Mutex<ConfirmationArbiter>>,
    shutdown: ShutdownManager,
    task: JoinHandle<()>,
}

impl SyncSession {
    /// 会话标识（决定确认队列的持久化范围）
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 连接配置中的服务端地址
    pub fn connect(&self) {
        self.supervisor.connect(&self.url);
    }

    pub fn connect_to(&self, url: &str) {
        self.supervisor.connect(url);
    }

    /// 注册额外的 handler（展示层订阅 loading_state、footer_data 等透传信封）
    pub fn subscribe(&self, kinds: &[EnvelopeKind], handler: Arc<dyn EnvelopeHandler>) {
        self.dispatcher.register_many(kinds, handler);
    }

    pub fn send_message(&self, content: &str) -> Result<(), SyncError> {
        self.supervisor.send(Outbound::user_message(content))
    }

    pub fn interrupt(&self) -> Result<(), SyncError> {
        self.supervisor.send(Outbound::InterruptRequest {})
    }

    /// 回复当前展示中的确认请求，等到回复写入 socket 才返回。
    ///
    /// 写入前连接断开时返回错误，请求仍在队首，重连后可以再次回复
    pub async fn answer(
        &self,
        outcome: ConfirmationOutcome,
        payload: Option<Value>,
    ) -> Result<(), SyncError> {
        let (call_id, delivery) = {
            let mut arbiter = self.confirmations.lock().unwrap_or_else(|e| e.into_inner());
            let call_id = arbiter
                .presented()
                .map(|request| request.call_id.clone())
                .ok_or_else(|| {
                    SyncError::Confirmation("no confirmation is pending".to_string())
                })?;
            let delivery = arbiter.answer(&call_id, outcome, payload)?;
            (call_id, delivery)
        };
        if !delivery.is_pending() {
            return Ok(());
        }

        let result = delivery.wait().await;
        let mut arbiter = self.confirmations.lock().unwrap_or_else(|e| e.into_inner());
        match &result {
            Ok(()) => {
                arbiter.delivered(&call_id);
            }
            Err(e) => arbiter.delivery_failed(&call_id, e),
        }
        result
    }

    pub fn page_event(&self, event: PageEvent) {
        self.supervisor.page_event(event);
    }

    pub fn connection(&self) -> ConnectionSnapshot {
        self.supervisor.snapshot()
    }

    pub fn supervisor(&self) -> &SupervisorHandle {
        &self.supervisor
    }

    pub fn history(&self) -> Arc<Mutex<HistoryReconciler>> {
        Arc::clone(&self.history)
    }

    pub fn confirmations(&self) -> Arc<Mutex<ConfirmationArbiter>> {
        Arc::clone(&self.confirmations)
    }

    pub fn shutdown_manager(&self) -> &ShutdownManager {
        &self.shutdown
    }

    /// 拆除会话：关闭连接、取消重连定时器并等待监管任务退出
    pub async fn close(self, reason: ShutdownReason) {
        self.shutdown.shutdown(reason);
        if let Err(e) = self.task.await {
            tracing::error!("Connection supervisor task failed: {}", e);
        }
    }
}
