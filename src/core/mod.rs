//! 核心基础设施：错误分类、时钟抽象、会话拆除

pub mod clock;
pub mod error;
pub mod shutdown;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{SyncError, TransportError};
pub use shutdown::{ShutdownManager, ShutdownReason};
