//! 连接监管任务
//!
//! 单个 tokio 任务拥有传输连接：读帧交给分发器，执行出站命令，
//! 按 `ConnectionMachine` 的决策安排重连。传输错误在这里全部转成状态迁移，不向上抛。

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::machine::{
    ConnectionMachine, ConnectionSnapshot, ConnectionState, PageEvent, ReconnectDecision,
    ReconnectPolicy,
};
use super::transport::{Connection, Transport};
use crate::core::{Clock, SyncError, TransportError};
use crate::protocol::{Delivery, Dispatcher, Inbound, Outbound, OutboundSink};

/// 发给监管任务的命令
#[derive(Debug)]
pub enum SupervisorCommand {
    Connect(String),
    /// `ack` 收到写入 socket 的结果；连接在写入前断开时收到 `NotConnected`
    Send {
        message: Outbound,
        ack: Option<oneshot::Sender<Result<(), SyncError>>>,
    },
    Page(PageEvent),
}

/// 监管任务对外发出的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Connected { reopened: bool },
    Reconnecting { attempt: u32 },
    /// 终态：重连耗尽，直到再次调用 connect 前不会重试
    ConnectionLost { attempts: u32 },
}

impl SupervisorEvent {
    /// 终态通知对应的错误（用于展示「连接丢失，请刷新」）
    pub fn as_error(&self) -> Option<SyncError> {
        match self {
            SupervisorEvent::ConnectionLost { attempts } => {
                Some(SyncError::ReconnectExhausted { attempts: *attempts })
            }
            _ => None,
        }
    }
}

/// 监管任务句柄：可克隆，供对账器、仲裁器、UI 共享
#[derive(Clone)]
pub struct SupervisorHandle {
    cmd_tx: mpsc::UnboundedSender<SupervisorCommand>,
    state_rx: watch::Receiver<ConnectionSnapshot>,
    shutdown: CancellationToken,
}

impl SupervisorHandle {
    /// 打开（或重新打开）到 url 的连接；终态之后也可再次调用
    pub fn connect(&self, url: &str) {
        if self
            .cmd_tx
            .send(SupervisorCommand::Connect(url.to_string()))
            .is_err()
        {
            tracing::warn!("Connection supervisor is gone, connect ignored");
        }
    }

    pub fn page_event(&self, event: PageEvent) {
        let _ = self.cmd_tx.send(SupervisorCommand::Page(event));
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        *self.state_rx.borrow()
    }

    /// 订阅连接状态变化
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.state_rx.clone()
    }

    /// 拆除：关闭 socket、取消定时器、结束任务
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl SupervisorHandle {
    fn enqueue(
        &self,
        message: Outbound,
        ack: Option<oneshot::Sender<Result<(), SyncError>>>,
    ) -> Result<(), SyncError> {
        if self.snapshot().state != ConnectionState::Open {
            return Err(TransportError::NotConnected.into());
        }
        self.cmd_tx
            .send(SupervisorCommand::Send { message, ack })
            .map_err(|_| TransportError::NotConnected.into())
    }
}

impl OutboundSink for SupervisorHandle {
    fn send(&self, message: Outbound) -> Result<(), SyncError> {
        self.enqueue(message, None)
    }

    fn deliver(&self, message: Outbound) -> Result<Delivery, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(message, Some(tx))?;
        Ok(Delivery::pending(rx))
    }
}

enum PumpExit {
    /// 对端关闭或传输出错
    Dropped,
    /// 调用方要求连接到新的 url
    Redirect,
    Shutdown,
}

/// 连接监管器
pub struct ConnectionSupervisor<T: Transport> {
    transport: T,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    machine: ConnectionMachine,
    url: Option<String>,
    cmd_rx: mpsc::UnboundedReceiver<SupervisorCommand>,
    state_tx: watch::Sender<ConnectionSnapshot>,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    shutdown: CancellationToken,
}

impl<T: Transport + 'static> ConnectionSupervisor<T> {
    pub fn new(
        transport: T,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        policy: ReconnectPolicy,
        shutdown: CancellationToken,
    ) -> (Self, SupervisorHandle, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let machine = ConnectionMachine::new(policy);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(machine.snapshot());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let handle = SupervisorHandle {
            cmd_tx,
            state_rx,
            shutdown: shutdown.clone(),
        };
        let supervisor = Self {
            transport,
            dispatcher,
            clock,
            machine,
            url: None,
            cmd_rx,
            state_tx,
            events_tx,
            shutdown,
        };
        (supervisor, handle, events_rx)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        loop {
            let Some(url) = self.url.clone() else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(cmd) => self.handle_offline(cmd),
                        None => break,
                    },
                }
                continue;
            };

            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.transport.connect(&url) => result,
            };
            let (exit, was_open) = match attempt {
                Ok(conn) => (self.pump(conn).await, true),
                Err(e) => {
                    tracing::warn!("Connect to {} failed: {}", url, e);
                    (PumpExit::Dropped, false)
                }
            };

            match exit {
                PumpExit::Shutdown => break,
                PumpExit::Redirect => {
                    self.dispatcher.dispatch(&Inbound::Disconnected {});
                    continue;
                }
                PumpExit::Dropped => {}
            }

            let decision = self.machine.closed();
            self.publish();
            if was_open {
                // 状态已离开 Open，handler 在断线通知里发送会直接得到 NotConnected
                self.dispatcher.dispatch(&Inbound::Disconnected {});
            }

            match decision {
                ReconnectDecision::Retry { attempt, delay } => {
                    tracing::warn!(
                        "Reconnecting in {:?} (attempt {}/{})",
                        delay,
                        attempt,
                        self.machine.policy().max_attempts
                    );
                    self.notify(SupervisorEvent::Reconnecting { attempt });
                    if !self.wait_before_retry(delay).await {
                        break;
                    }
                }
                ReconnectDecision::GiveUp { attempts } => {
                    tracing::error!("Connection lost after {} reconnect attempts", attempts);
                    self.url = None;
                    self.notify(SupervisorEvent::ConnectionLost { attempts });
                }
                ReconnectDecision::Idle => self.url = None,
            }
        }

        let was_open = self.machine.state() == ConnectionState::Open;
        self.machine.teardown();
        self.publish();
        if was_open {
            self.dispatcher.dispatch(&Inbound::Disconnected {});
        }
        tracing::info!("Connection supervisor stopped");
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.machine.snapshot());
    }

    fn notify(&self, event: SupervisorEvent) {
        let _ = self.events_tx.send(event);
    }

    fn begin(&mut self, url: String) {
        tracing::info!("Connecting to {}", url);
        self.url = Some(url);
        self.machine.begin_connect();
        self.publish();
    }

    /// 未连接时的命令处理
    fn handle_offline(&mut self, cmd: SupervisorCommand) {
        match cmd {
            SupervisorCommand::Connect(url) => self.begin(url),
            SupervisorCommand::Send { message, ack } => {
                tracing::warn!("Dropping outbound {:?} while disconnected", message);
                if let Some(ack) = ack {
                    let _ = ack.send(Err(TransportError::NotConnected.into()));
                }
            }
            SupervisorCommand::Page(event) => {
                let now = self.clock.now_ms();
                self.machine.page_event(event, now);
                self.publish();
            }
        }
    }

    /// 等待重连间隔；期间显式 connect 会立即重新开始。返回 false 表示应退出
    async fn wait_before_retry(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = &mut sleep => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(SupervisorCommand::Connect(url)) => {
                        self.begin(url);
                        return true;
                    }
                    Some(other) => self.handle_offline(other),
                    None => return false,
                },
            }
        }
    }

    async fn pump(&mut self, mut conn: Box<dyn Connection>) -> PumpExit {
        let reopened = self.machine.opened();
        self.publish();
        tracing::info!("Connection open{}", if reopened { " (reconnected)" } else { "" });
        self.notify(SupervisorEvent::Connected { reopened });
        self.dispatcher.dispatch(&Inbound::Connected {});

        if reopened {
            let probe = self.machine.missed_messages_probe();
            if let Err(e) = send_on(conn.as_mut(), &probe).await {
                tracing::warn!("Failed to request missed messages: {}", e);
            }
        }

        let exit = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    conn.close().await;
                    break PumpExit::Shutdown;
                }
                frame = conn.recv() => match frame {
                    Some(Ok(text)) => {
                        if let Some(seq) = self.dispatcher.dispatch_frame(&text) {
                            self.machine.observe_seq(seq);
                            self.publish();
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Connection error: {}", e);
                        break PumpExit::Dropped;
                    }
                    None => {
                        tracing::warn!("Connection closed by server");
                        break PumpExit::Dropped;
                    }
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(SupervisorCommand::Send { message, ack }) => {
                        let result = send_on(conn.as_mut(), &message).await;
                        let failed = match &result {
                            Err(e) => {
                                tracing::warn!("Send failed, dropping connection: {}", e);
                                true
                            }
                            Ok(()) => false,
                        };
                        if let Some(ack) = ack {
                            let _ = ack.send(result);
                        }
                        if failed {
                            break PumpExit::Dropped;
                        }
                    }
                    Some(SupervisorCommand::Page(event)) => {
                        let now = self.clock.now_ms();
                        let outbound = self.machine.page_event(event, now);
                        self.publish();
                        if let Some(message) = outbound {
                            if let Err(e) = send_on(conn.as_mut(), &message).await {
                                tracing::warn!("Send failed, dropping connection: {}", e);
                                break PumpExit::Dropped;
                            }
                        }
                    }
                    Some(SupervisorCommand::Connect(url)) => {
                        conn.close().await;
                        self.begin(url);
                        break PumpExit::Redirect;
                    }
                    None => {
                        conn.close().await;
                        break PumpExit::Shutdown;
                    }
                },
            }
        };

        exit
    }
}

async fn send_on(conn: &mut dyn Connection, message: &Outbound) -> Result<(), SyncError> {
    let text = message.encode()?;
    conn.send(text).await?;
    Ok(())
}
