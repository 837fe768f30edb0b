//! 历史对账：流式占位 → 定稿条目，助手条目合并，全量同步与缓冲溢出重置

mod format;
mod handler;
mod reconciler;

pub use format::{format_elapsed, format_tool_call};
pub use handler::HistoryHandler;
pub use reconciler::{
    EntryId, HistoryChange, HistoryEntry, HistoryReconciler, PendingEntry, MERGE_SEPARATOR,
};
