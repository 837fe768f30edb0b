//! 连接状态机（纯逻辑，无 I/O）
//!
//! 所有「要不要重连 / 何时放弃 / 可见性变化要发什么」的决策都在这里，
//! 异步监管任务只负责执行这些决策。

use std::time::Duration;

use serde::Serialize;

use crate::config::{DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY_MS};
use crate::protocol::Outbound;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Reconnecting,
}

/// 重连策略：固定间隔 + 次数上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// 对外可见的连接快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    /// 当前连续失败后的重连次数；成功打开后归零
    pub attempt_count: u32,
    /// 最近一次页面隐藏 / 失焦的时间（毫秒）
    pub last_hidden_at: Option<i64>,
    /// 已看到的最大服务端序号
    pub last_seq: Option<u64>,
    pub hidden: bool,
}

/// 连接关闭后的决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// 等待 delay 后进行第 attempt 次重连
    Retry { attempt: u32, delay: Duration },
    /// 达到上限，发出一次性「连接丢失」通知
    GiveUp { attempts: u32 },
    /// 已处于终态或已拆除，不做任何事
    Idle,
}

/// 页面可见性 / 焦点事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    Hidden,
    Blurred,
    Visible,
    Focused,
}

#[derive(Debug)]
pub struct ConnectionMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempt_count: u32,
    last_hidden_at: Option<i64>,
    last_seq: Option<u64>,
    hidden: bool,
    ever_opened: bool,
    lost_reported: bool,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Closed,
            attempt_count: 0,
            last_hidden_at: None,
            last_seq: None,
            hidden: false,
            ever_opened: false,
            lost_reported: false,
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            attempt_count: self.attempt_count,
            last_hidden_at: self.last_hidden_at,
            last_seq: self.last_seq,
            hidden: self.hidden,
        }
    }

    /// 调用方显式 connect：重置计数，允许再次发出终态通知
    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
        self.attempt_count = 0;
        self.lost_reported = false;
    }

    /// 传输已打开；返回这是否是一次重新打开（此前曾经连上过）
    pub fn opened(&mut self) -> bool {
        let reopened = self.ever_opened;
        self.state = ConnectionState::Open;
        self.attempt_count = 0;
        self.ever_opened = true;
        reopened
    }

    /// 打开失败或意外关闭
    pub fn closed(&mut self) -> ReconnectDecision {
        if self.state == ConnectionState::Closed {
            return ReconnectDecision::Idle;
        }
        if self.attempt_count >= self.policy.max_attempts {
            self.state = ConnectionState::Closed;
            if self.lost_reported {
                return ReconnectDecision::Idle;
            }
            self.lost_reported = true;
            return ReconnectDecision::GiveUp {
                attempts: self.attempt_count,
            };
        }
        self.attempt_count += 1;
        self.state = ConnectionState::Reconnecting;
        ReconnectDecision::Retry {
            attempt: self.attempt_count,
            delay: self.policy.delay,
        }
    }

    /// 拆除：不再重连
    pub fn teardown(&mut self) {
        self.state = ConnectionState::Closed;
    }

    pub fn observe_seq(&mut self, seq: u64) {
        self.last_seq = Some(self.last_seq.map_or(seq, |last| last.max(seq)));
    }

    /// 可见性变化；只有连接打开时才产生出站信封
    pub fn page_event(&mut self, event: PageEvent, now: i64) -> Option<Outbound> {
        match event {
            PageEvent::Hidden | PageEvent::Blurred => {
                if self.hidden {
                    return None;
                }
                self.hidden = true;
                self.last_hidden_at = Some(now);
                (self.state == ConnectionState::Open).then_some(Outbound::VisibilityAck {
                    last_seq: self.last_seq,
                })
            }
            PageEvent::Visible | PageEvent::Focused => {
                if !self.hidden {
                    return None;
                }
                self.hidden = false;
                (self.state == ConnectionState::Open).then_some(Outbound::CheckMissedMessages {
                    since_seq: self.last_seq,
                })
            }
        }
    }

    /// 重新打开后用于补齐断线期间消息的请求
    pub fn missed_messages_probe(&self) -> Outbound {
        Outbound::CheckMissedMessages {
            since_seq: self.last_seq,
        }
    }
}
