//! 协议分发器
//!
//! 按 `EnvelopeKind` 注册任意多个 handler，按注册顺序同步投递。
//! 单个 handler 返回错误或 panic 都会被捕获、记录并跳过，不影响同类型的其他 handler，
//! 也不影响后续信封。对账器与确认仲裁器因此可以各自独立订阅。

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use super::envelope::{EnvelopeKind, Frame, Inbound};
use crate::core::SyncError;

/// 信封 handler：名称用于日志，handle 在分发线程内同步执行
pub trait EnvelopeHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle(&self, envelope: &Inbound) -> Result<(), SyncError>;
}

/// 闭包 handler（展示层透传等轻量订阅）
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Inbound) -> Result<(), SyncError> + Send + Sync,
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            f,
        }
    }
}

impl<F> EnvelopeHandler for FnHandler<F>
where
    F: Fn(&Inbound) -> Result<(), SyncError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, envelope: &Inbound) -> Result<(), SyncError> {
        (self.f)(envelope)
    }
}

/// 单次分发结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// 成功处理的 handler 数
    pub delivered: usize,
    /// 失败（错误或 panic）的 handler 数
    pub failed: usize,
}

/// 协议分发器
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<EnvelopeKind, Vec<Arc<dyn EnvelopeHandler>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 handler；同一类型可注册多个，按注册顺序调用
    pub fn register(&self, kind: EnvelopeKind, handler: Arc<dyn EnvelopeHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.entry(kind).or_default().push(handler);
    }

    /// 为多个类型注册同一个 handler
    pub fn register_many(&self, kinds: &[EnvelopeKind], handler: Arc<dyn EnvelopeHandler>) {
        for kind in kinds {
            self.register(*kind, Arc::clone(&handler));
        }
    }

    pub fn handler_count(&self, kind: EnvelopeKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// 投递信封到该类型的全部 handler
    pub fn dispatch(&self, envelope: &Inbound) -> DispatchReport {
        let kind = envelope.kind();
        // 先快照再释放锁：handler 内部可以重入 register / dispatch
        let handlers: Vec<Arc<dyn EnvelopeHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::debug!("No handler registered for {:?}", kind);
        }

        let mut report = DispatchReport::default();
        for handler in handlers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(envelope)));
            match result {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!("Handler '{}' failed on {:?}: {}", handler.name(), kind, e);
                }
                Err(panic) => {
                    report.failed += 1;
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!("Handler '{}' panicked on {:?}: {}", handler.name(), kind, message);
                }
            }
        }
        report
    }

    /// 解码并投递一帧文本；解码失败时记录并丢弃该帧。返回该帧的序号（若有）
    pub fn dispatch_frame(&self, text: &str) -> Option<u64> {
        match Frame::decode(text) {
            Ok(frame) => {
                self.dispatch(&frame.envelope);
                frame.seq
            }
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {}", e);
                None
            }
        }
    }
}
