//! 历史对账状态机
//!
//! 维护一条只追加的定稿历史，以及每个流式类（助手文本 / 工具组）最多一个 Pending 占位。
//! 每个操作都返回一组 `HistoryChange`，渲染层只消费这份差异，不回头查询状态。
//!
//! 合并规则：新定稿的助手条目与上一条助手定稿条目之间没有插入其他类型条目，
//! 且时间差不超过合并窗口，则把文本追加到上一条（分隔符 `MERGE_SEPARATOR`）并刷新时间戳。

use std::time::Duration;

use serde::Serialize;

use crate::config::DEFAULT_MERGE_WINDOW_MS;
use crate::protocol::{HistoryItem, HistoryKind, StreamClass, ToolCall};

/// 合并两段助手文本时使用的分隔符
pub const MERGE_SEPARATOR: &str = "\n\n";

/// 条目 ID：对账器内单调递增，不复用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryId(pub u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry-{}", self.0)
    }
}

/// 定稿历史条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: EntryId,
    pub kind: HistoryKind,
    pub text: Option<String>,
    pub tools: Vec<ToolCall>,
    /// 毫秒时间戳；合并时刷新为最后一次事件的时间
    pub timestamp: i64,
    pub finalized: bool,
}

/// 流式占位条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingEntry {
    /// 提前分配的 ID；提升为定稿条目时沿用
    pub id: EntryId,
    #[serde(skip)]
    pub class: StreamClass,
    pub kind: HistoryKind,
    pub text: Option<String>,
    pub tools: Vec<ToolCall>,
    pub timestamp: i64,
}

/// 对账产生的差异
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryChange {
    PendingCreated(PendingEntry),
    PendingUpdated(PendingEntry),
    /// 占位被合并吞掉，渲染层应删除它
    PendingDiscarded { class: StreamClass, id: EntryId },
    /// 新的定稿条目（没有对应占位）
    Appended(HistoryEntry),
    /// 占位提升为定稿条目，ID 不变
    Promoted(HistoryEntry),
    /// 已有助手条目被合并追加
    Merged(HistoryEntry),
    /// 全部清空
    Reset,
}

/// 历史对账器（纯数据，不做 I/O）
#[derive(Debug)]
pub struct HistoryReconciler {
    entries: Vec<HistoryEntry>,
    pending_text: Option<PendingEntry>,
    pending_tool: Option<PendingEntry>,
    /// 最近一条助手定稿条目；任何非助手条目追加后置空
    last_assistant: Option<EntryId>,
    next_id: u64,
    merge_window_ms: i64,
    /// 已清空本地状态，正在等待权威全量历史
    awaiting_sync: bool,
    /// 全量同步请求已发出（尚未收到回应）
    sync_requested: bool,
}

impl Default for HistoryReconciler {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_MERGE_WINDOW_MS))
    }
}

impl HistoryReconciler {
    pub fn new(merge_window: Duration) -> Self {
        Self {
            entries: Vec::new(),
            pending_text: None,
            pending_tool: None,
            last_assistant: None,
            next_id: 1,
            merge_window_ms: i64::try_from(merge_window.as_millis()).unwrap_or(i64::MAX),
            awaiting_sync: false,
            sync_requested: false,
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn pending(&self, class: StreamClass) -> Option<&PendingEntry> {
        match class {
            StreamClass::Text => self.pending_text.as_ref(),
            StreamClass::Tool => self.pending_tool.as_ref(),
        }
    }

    pub fn last_assistant(&self) -> Option<EntryId> {
        self.last_assistant
    }

    pub fn is_awaiting_sync(&self) -> bool {
        self.awaiting_sync
    }

    fn slot_mut(&mut self, class: StreamClass) -> &mut Option<PendingEntry> {
        match class {
            StreamClass::Text => &mut self.pending_text,
            StreamClass::Tool => &mut self.pending_tool,
        }
    }

    fn alloc_id(&mut self) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        id
    }

    /// 流式更新：无占位则创建，有则原地更新内容与时间戳
    pub fn apply_pending(&mut self, item: HistoryItem, now: i64) -> Vec<HistoryChange> {
        let Some(class) = item.kind.stream_class() else {
            tracing::debug!("Ignoring pending update for non-streaming kind {:?}", item.kind);
            return Vec::new();
        };

        if let Some(pending) = self.slot_mut(class).as_mut() {
            pending.kind = item.kind;
            pending.text = item.text;
            pending.tools = item.tools;
            pending.timestamp = now;
            return vec![HistoryChange::PendingUpdated(pending.clone())];
        }

        let pending = PendingEntry {
            id: self.alloc_id(),
            class,
            kind: item.kind,
            text: item.text,
            tools: item.tools,
            timestamp: now,
        };
        *self.slot_mut(class) = Some(pending.clone());
        vec![HistoryChange::PendingCreated(pending)]
    }

    /// 定稿：合并到上一条助手条目，或提升占位 / 追加新条目。
    /// 服务端带时间戳时以其为准，否则用 `now`
    pub fn apply_final(&mut self, item: HistoryItem, now: i64) -> Vec<HistoryChange> {
        let mut changes = Vec::new();
        self.finalize(item, now, &mut changes);
        changes
    }

    fn finalize(&mut self, item: HistoryItem, now: i64, changes: &mut Vec<HistoryChange>) {
        let at = item.timestamp.unwrap_or(now);
        let class = item.kind.stream_class();
        let target = if item.kind.is_assistant() {
            self.merge_target(at)
        } else {
            None
        };
        // 合并与否确定之后才消费占位槽
        let pending = class.and_then(|class| self.slot_mut(class).take());

        if let Some(idx) = target {
            if let Some(p) = pending {
                changes.push(HistoryChange::PendingDiscarded {
                    class: p.class,
                    id: p.id,
                });
            }
            let entry = &mut self.entries[idx];
            join_text(&mut entry.text, item.text.as_deref());
            entry.timestamp = at;
            changes.push(HistoryChange::Merged(entry.clone()));
            return;
        }

        let (id, promoted) = match pending {
            Some(p) => (p.id, true),
            None => (self.alloc_id(), false),
        };
        let entry = HistoryEntry {
            id,
            kind: item.kind,
            text: item.text,
            tools: item.tools,
            timestamp: at,
            finalized: true,
        };
        self.last_assistant = entry.kind.is_assistant().then_some(id);
        self.entries.push(entry.clone());
        changes.push(if promoted {
            HistoryChange::Promoted(entry)
        } else {
            HistoryChange::Appended(entry)
        });
    }

    /// 可合并的目标下标；指针指向已不存在的条目时视为不可合并
    fn merge_target(&self, at: i64) -> Option<usize> {
        let id = self.last_assistant?;
        let idx = self.entries.iter().rposition(|e| e.id == id)?;
        let entry = &self.entries[idx];
        if !entry.kind.is_assistant() {
            return None;
        }
        (at.saturating_sub(entry.timestamp) <= self.merge_window_ms).then_some(idx)
    }

    /// 全量同步：清空后逐条走与增量相同的定稿逻辑
    pub fn apply_sync(&mut self, history: Vec<HistoryItem>, now: i64) -> Vec<HistoryChange> {
        let mut changes = self.reset();
        for item in history {
            self.finalize(item, now, &mut changes);
        }
        self.awaiting_sync = false;
        self.sync_requested = false;
        changes
    }

    /// 缓冲溢出：与全量同步相同的破坏性清空，并进入等待同步状态。可重复调用
    pub fn force_resync(&mut self) -> Vec<HistoryChange> {
        let changes = self.reset();
        self.awaiting_sync = true;
        changes
    }

    /// 是否需要（再次）发出全量同步请求；返回 true 时视为已发出
    pub fn take_sync_request(&mut self) -> bool {
        if self.awaiting_sync && !self.sync_requested {
            self.sync_requested = true;
            return true;
        }
        false
    }

    /// 请求未能送达（或连接断开使其失效），下次连上时重发
    pub fn sync_request_lost(&mut self) {
        self.sync_requested = false;
    }

    /// 显式清空
    pub fn clear(&mut self) -> Vec<HistoryChange> {
        self.reset()
    }

    fn reset(&mut self) -> Vec<HistoryChange> {
        self.entries.clear();
        self.pending_text = None;
        self.pending_tool = None;
        self.last_assistant = None;
        vec![HistoryChange::Reset]
    }
}

fn join_text(existing: &mut Option<String>, addition: Option<&str>) {
    let Some(addition) = addition.filter(|s| !s.is_empty()) else {
        return;
    };
    match existing {
        Some(text) if !text.is_empty() => {
            text.push_str(MERGE_SEPARATOR);
            text.push_str(addition);
        }
        _ => *existing = Some(addition.to_string()),
    }
}
