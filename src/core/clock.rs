//! 时钟抽象：合并窗口与可见性时间戳都从这里取「现在」
//!
//! 生产环境用 `SystemClock`（chrono 毫秒时间戳），测试用 `ManualClock` 手动推进虚拟时间。

use std::sync::atomic::{AtomicI64, Ordering};

/// 毫秒级时钟
pub trait Clock: Send + Sync {
    /// 当前时间（Unix 毫秒）
    fn now_ms(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// 手动时钟：测试中确定性地推进时间
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
