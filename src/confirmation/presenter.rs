//! 确认对话框的展示接口
//!
//! 仲裁器在持有自身锁时调用 presenter，实现方不得同步回调仲裁器（回复应走异步路径）。

use std::sync::Mutex;

use crate::protocol::{ConfirmationOutcome, ConfirmationRequest};

pub trait ConfirmationPresenter: Send + Sync {
    /// 展示队首请求及其可选回复
    fn present(&self, request: &ConfirmationRequest, options: &[ConfirmationOutcome]);

    /// 撤下正在展示的请求（服务端已取消）
    fn dismiss(&self, call_id: &str);
}

/// 只写日志的 presenter
#[derive(Debug, Default)]
pub struct TracingPresenter;

impl ConfirmationPresenter for TracingPresenter {
    fn present(&self, request: &ConfirmationRequest, options: &[ConfirmationOutcome]) {
        let options: Vec<&str> = options.iter().map(|o| o.as_str()).collect();
        tracing::info!(
            "Confirmation required: {} ({}) [{}] options: {}",
            request.tool_name,
            request.details.kind(),
            request.call_id,
            options.join(" / ")
        );
    }

    fn dismiss(&self, call_id: &str) {
        tracing::info!("Confirmation withdrawn by server: {}", call_id);
    }
}

/// 展示事件（测试断言用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenterEvent {
    Presented(String),
    Dismissed(String),
}

/// 记录展示事件的 presenter
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    events: Mutex<Vec<PresenterEvent>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PresenterEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 依次被展示过的 callId
    pub fn presented_ids(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PresenterEvent::Presented(id) => Some(id),
                PresenterEvent::Dismissed(_) => None,
            })
            .collect()
    }
}

impl ConfirmationPresenter for RecordingPresenter {
    fn present(&self, request: &ConfirmationRequest, _options: &[ConfirmationOutcome]) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PresenterEvent::Presented(request.call_id.clone()));
    }

    fn dismiss(&self, call_id: &str) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PresenterEvent::Dismissed(call_id.to_string()));
    }
}
