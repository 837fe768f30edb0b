//! 信封载荷类型：历史条目、工具调用、确认请求
//!
//! 字段名在线上使用 camelCase，与服务端保持一致。

use serde::{Deserialize, Serialize};

/// 历史条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    User,
    Assistant,
    ToolGroup,
    System,
    Stats,
    Info,
    Error,
    /// 未识别的类型，按普通非助手条目处理
    #[serde(other)]
    Other,
}

impl HistoryKind {
    /// 该类型对应的流式占位类；没有流式形态的类型返回 None
    pub fn stream_class(self) -> Option<StreamClass> {
        match self {
            HistoryKind::Assistant => Some(StreamClass::Text),
            HistoryKind::ToolGroup => Some(StreamClass::Tool),
            _ => None,
        }
    }

    pub fn is_assistant(self) -> bool {
        self == HistoryKind::Assistant
    }
}

/// 流式占位类（每类最多一个 Pending）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamClass {
    /// 助手文本流
    Text,
    /// 工具组流
    Tool,
}

/// 工具执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ToolStatus {
    Pending,
    Executing,
    Success,
    Confirming,
    Canceled,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ToolStatus {
    /// 状态符号（单射映射，未知状态为 '•'）
    pub fn glyph(self) -> char {
        match self {
            ToolStatus::Pending => 'o',
            ToolStatus::Executing => '⊷',
            ToolStatus::Success => '✔',
            ToolStatus::Confirming => '?',
            ToolStatus::Canceled => '-',
            ToolStatus::Error => '✗',
            ToolStatus::Unknown => '•',
        }
    }
}

/// 工具组中的单个工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_display: Option<String>,
}

/// history_item / pending_item / history_sync 中的单条载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub kind: HistoryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolCall>,
    /// 服务端时间戳（毫秒）；全量同步回放时优先使用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl HistoryItem {
    pub fn text(kind: HistoryKind, text: &str) -> Self {
        Self {
            kind,
            text: Some(text.to_string()),
            tools: Vec::new(),
            timestamp: None,
        }
    }

    pub fn assistant(text: &str) -> Self {
        Self::text(HistoryKind::Assistant, text)
    }

    pub fn user(text: &str) -> Self {
        Self::text(HistoryKind::User, text)
    }

    pub fn tool_group(tools: Vec<ToolCall>) -> Self {
        Self {
            kind: HistoryKind::ToolGroup,
            text: None,
            tools,
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// 工具确认详情（按 type 区分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConfirmationDetails {
    #[serde(rename_all = "camelCase")]
    Edit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        file_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_diff: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Exec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root_command: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Info {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        prompt: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        urls: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Mcp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        server_name: String,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_display_name: Option<String>,
    },
}

const EDIT_OPTIONS: &[ConfirmationOutcome] = &[
    ConfirmationOutcome::ProceedOnce,
    ConfirmationOutcome::ProceedAlways,
    ConfirmationOutcome::ModifyWithEditor,
    ConfirmationOutcome::Cancel,
];

const EXEC_OPTIONS: &[ConfirmationOutcome] = &[
    ConfirmationOutcome::ProceedOnce,
    ConfirmationOutcome::ProceedAlways,
    ConfirmationOutcome::Cancel,
];

const MCP_OPTIONS: &[ConfirmationOutcome] = &[
    ConfirmationOutcome::ProceedOnce,
    ConfirmationOutcome::ProceedAlwaysTool,
    ConfirmationOutcome::ProceedAlwaysServer,
    ConfirmationOutcome::Cancel,
];

impl ConfirmationDetails {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfirmationDetails::Edit { .. } => "edit",
            ConfirmationDetails::Exec { .. } => "exec",
            ConfirmationDetails::Info { .. } => "info",
            ConfirmationDetails::Mcp { .. } => "mcp",
        }
    }

    /// 该类型固定的可选回复
    pub fn options(&self) -> &'static [ConfirmationOutcome] {
        match self {
            ConfirmationDetails::Edit { .. } => EDIT_OPTIONS,
            ConfirmationDetails::Exec { .. } | ConfirmationDetails::Info { .. } => EXEC_OPTIONS,
            ConfirmationDetails::Mcp { .. } => MCP_OPTIONS,
        }
    }
}

/// 服务端下发的工具确认请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    pub call_id: String,
    pub tool_name: String,
    #[serde(rename = "confirmationDetails")]
    pub details: ConfirmationDetails,
}

/// 用户对确认请求的回复
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    ProceedOnce,
    ProceedAlways,
    ProceedAlwaysTool,
    ProceedAlwaysServer,
    ModifyWithEditor,
    Cancel,
}

impl ConfirmationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmationOutcome::ProceedOnce => "proceed_once",
            ConfirmationOutcome::ProceedAlways => "proceed_always",
            ConfirmationOutcome::ProceedAlwaysTool => "proceed_always_tool",
            ConfirmationOutcome::ProceedAlwaysServer => "proceed_always_server",
            ConfirmationOutcome::ModifyWithEditor => "modify_with_editor",
            ConfirmationOutcome::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for ConfirmationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConfirmationOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proceed_once" => Ok(ConfirmationOutcome::ProceedOnce),
            "proceed_always" => Ok(ConfirmationOutcome::ProceedAlways),
            "proceed_always_tool" => Ok(ConfirmationOutcome::ProceedAlwaysTool),
            "proceed_always_server" => Ok(ConfirmationOutcome::ProceedAlwaysServer),
            "modify_with_editor" => Ok(ConfirmationOutcome::ModifyWithEditor),
            "cancel" => Ok(ConfirmationOutcome::Cancel),
            other => Err(format!("Unknown confirmation outcome: {other}")),
        }
    }
}
