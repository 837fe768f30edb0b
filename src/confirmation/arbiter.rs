//! 确认仲裁器
//!
//! 服务端下发的工具确认请求排成 FIFO 队列，任何时刻只展示队首一个。
//! 每次变更后整体持久化，页面重载后会重新展示同一个未回复的队首。
//! 服务端撤销非队首请求时静默删除；撤销队首时先撤下对话框再展示新的队首。
//!
//! 回复要等发送端确认写入 socket 之后才出队；写入前连接断开时请求留在队首，可以重新回复。

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;

use super::presenter::ConfirmationPresenter;
use super::store::{decode_queue, encode_queue, QueueStore};
use crate::core::SyncError;
use crate::protocol::{ConfirmationOutcome, ConfirmationRequest, Delivery, Outbound, OutboundSink};

pub struct ConfirmationArbiter {
    queue: VecDeque<ConfirmationRequest>,
    /// 正在展示的请求（总是队首）
    presented: Option<String>,
    /// 回复已交给发送端、尚未确认写入的请求（总是展示中的队首）
    in_flight: Option<String>,
    store: Arc<dyn QueueStore>,
    presenter: Arc<dyn ConfirmationPresenter>,
    outbound: Arc<dyn OutboundSink>,
}

impl ConfirmationArbiter {
    /// 从存储恢复队列并展示队首；存储内容无效时以空队列启动并覆盖旧值
    pub fn restore(
        store: Arc<dyn QueueStore>,
        presenter: Arc<dyn ConfirmationPresenter>,
        outbound: Arc<dyn OutboundSink>,
    ) -> Self {
        let (queue, needs_reset) = match store.load() {
            Ok(None) => (VecDeque::new(), false),
            Ok(Some(raw)) => match decode_queue(&raw) {
                Ok(queue) => (queue.into(), false),
                Err(e) => {
                    tracing::warn!("Discarding invalid persisted confirmation queue: {}", e);
                    (VecDeque::new(), true)
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read confirmation queue, starting empty: {}", e);
                (VecDeque::new(), false)
            }
        };

        if !queue.is_empty() {
            tracing::info!("Restored {} pending confirmation(s)", queue.len());
        }

        let mut arbiter = Self {
            queue,
            presented: None,
            in_flight: None,
            store,
            presenter,
            outbound,
        };
        if needs_reset {
            arbiter.persist();
        }
        arbiter.show_next();
        arbiter
    }

    pub fn queue(&self) -> &VecDeque<ConfirmationRequest> {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 正在展示的请求
    pub fn presented(&self) -> Option<&ConfirmationRequest> {
        let id = self.presented.as_deref()?;
        self.queue.front().filter(|head| head.call_id == id)
    }

    /// 回复正在等待写入结果的请求
    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    fn contains(&self, call_id: &str) -> bool {
        self.queue.iter().any(|r| r.call_id == call_id)
    }

    /// 入队；重复的 callId 直接忽略。返回是否真正入队
    pub fn add(&mut self, request: ConfirmationRequest) -> bool {
        // 空 callId 会让持久化的队列在重载时整体失效
        if request.call_id.is_empty() {
            tracing::warn!("Confirmation without callId ignored: {}", request.tool_name);
            return false;
        }
        if self.contains(&request.call_id) {
            tracing::debug!("Duplicate confirmation ignored: {}", request.call_id);
            return false;
        }
        self.queue.push_back(request);
        self.persist();
        self.show_next();
        true
    }

    /// 服务端撤销；返回该请求是否存在
    pub fn remove(&mut self, call_id: &str) -> bool {
        let Some(pos) = self.queue.iter().position(|r| r.call_id == call_id) else {
            tracing::debug!("Removal for unknown confirmation: {}", call_id);
            return false;
        };
        self.queue.remove(pos);
        self.persist();
        if self.in_flight.as_deref() == Some(call_id) {
            self.in_flight = None;
        }

        if self.presented.as_deref() == Some(call_id) {
            self.presented = None;
            self.presenter.dismiss(call_id);
            self.show_next();
        }
        true
    }

    /// 队首已回复：出队、持久化、展示下一个
    pub fn next(&mut self) {
        self.in_flight = None;
        let Some(head) = self.queue.pop_front() else {
            self.presented = None;
            return;
        };
        if self.presented.as_deref() != Some(head.call_id.as_str()) {
            tracing::warn!("Advancing past confirmation that was not presented: {}", head.call_id);
        }
        self.presented = None;
        self.persist();
        self.show_next();
    }

    /// 展示队首；已有展示中或队列为空时不做任何事
    pub fn show_next(&mut self) {
        if self.presented.is_some() {
            return;
        }
        let Some(head) = self.queue.front() else {
            return;
        };
        self.presented = Some(head.call_id.clone());
        self.presenter.present(head, head.details.options());
    }

    /// 回复展示中的请求。
    ///
    /// 发送端立即确认时直接出队；否则请求进入「写入中」，由调用方等待 `Delivery`
    /// 后调用 `delivered` 或 `delivery_failed`。发送失败时请求保留在队首，可再次回复
    pub fn answer(
        &mut self,
        call_id: &str,
        outcome: ConfirmationOutcome,
        payload: Option<Value>,
    ) -> Result<Delivery, SyncError> {
        if let Some(pending) = &self.in_flight {
            return Err(SyncError::Confirmation(format!(
                "response for {} is still being delivered",
                pending
            )));
        }
        let head = self
            .presented()
            .filter(|head| head.call_id == call_id)
            .ok_or_else(|| {
                SyncError::Confirmation(format!("{} is not the presented request", call_id))
            })?;
        if !head.details.options().contains(&outcome) {
            return Err(SyncError::Confirmation(format!(
                "{} is not a valid answer for a {} confirmation",
                outcome,
                head.details.kind()
            )));
        }

        let delivery = match self.outbound.deliver(Outbound::ToolConfirmationResponse {
            call_id: call_id.to_string(),
            outcome,
            payload,
        }) {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::warn!("Confirmation response for {} not delivered: {}", call_id, e);
                return Err(e);
            }
        };

        if delivery.is_pending() {
            tracing::debug!("Confirmation response for {} queued ({})", call_id, outcome);
            self.in_flight = Some(call_id.to_string());
        } else {
            tracing::info!("Answered confirmation {} with {}", call_id, outcome);
            self.next();
        }
        Ok(delivery)
    }

    /// 回复已写入 socket：出队并展示下一个。请求已被服务端撤销时返回 false
    pub fn delivered(&mut self, call_id: &str) -> bool {
        if self.in_flight.as_deref() != Some(call_id) {
            tracing::debug!("Delivery for {} no longer tracked", call_id);
            return false;
        }
        tracing::info!("Answered confirmation {}", call_id);
        self.next();
        true
    }

    /// 回复没能写入：请求保留在队首并继续展示
    pub fn delivery_failed(&mut self, call_id: &str, error: &SyncError) {
        if self.in_flight.as_deref() == Some(call_id) {
            self.in_flight = None;
            tracing::warn!(
                "Confirmation response for {} lost before it was written: {}",
                call_id,
                error
            );
        }
    }

    fn persist(&self) {
        if let Err(e) = encode_queue(&self.queue).and_then(|raw| self.store.save(&raw)) {
            tracing::warn!("Failed to persist confirmation queue: {}", e);
        }
    }
}
