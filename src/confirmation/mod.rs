//! 工具确认仲裁：持久化 FIFO 队列，任何时刻只展示队首

mod arbiter;
mod handler;
mod presenter;
mod store;

pub use arbiter::ConfirmationArbiter;
pub use handler::ConfirmationHandler;
pub use presenter::{ConfirmationPresenter, PresenterEvent, RecordingPresenter, TracingPresenter};
pub use store::{
    decode_queue, encode_queue, FileQueueStore, MemoryQueueStore, QueueStore,
    CONFIRMATION_QUEUE_KEY,
};
