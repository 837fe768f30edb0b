//! 线上信封协议
//!
//! 每帧一个 `{ "type": ..., "data": {...}, "seq"?: n }`。入站与出站都是封闭的 tagged enum，
//! 新增服务端消息类型必须在这里显式加一个变体，分发器按 `EnvelopeKind` 穷举匹配。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::payload::{ConfirmationOutcome, ConfirmationRequest, HistoryItem};
use crate::core::SyncError;

/// 入站信封（服务端 → 客户端）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Inbound {
    /// 传输已建立（由监管器本地合成）
    Connected {},
    /// 传输已断开（由监管器本地合成）
    Disconnected {},
    /// 会话横幅
    Connection {
        #[serde(default)]
        message: String,
    },
    /// 定稿条目
    HistoryItem(HistoryItem),
    /// 流式占位更新
    PendingItem(HistoryItem),
    /// 权威全量历史
    HistorySync { history: Vec<HistoryItem> },
    /// 服务端缓冲溢出，要求客户端丢弃本地状态并重新同步
    ForceResync {},
    Clear {},
    ToolConfirmation(ConfirmationRequest),
    #[serde(rename_all = "camelCase")]
    ToolConfirmationRemoval { call_id: String },
    #[serde(rename_all = "camelCase")]
    LoadingState {
        is_loading: bool,
        #[serde(default)]
        elapsed_time: u64,
        #[serde(default)]
        thought: Option<Value>,
    },
    FooterData(Value),
    ModelMenuData(Value),
    SlashCommands(Value),
    McpServers(Value),
    ConsoleMessages(Value),
}

/// 入站信封类型标签（分发器的注册键）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Connected,
    Disconnected,
    Connection,
    HistoryItem,
    PendingItem,
    HistorySync,
    ForceResync,
    Clear,
    ToolConfirmation,
    ToolConfirmationRemoval,
    LoadingState,
    FooterData,
    ModelMenuData,
    SlashCommands,
    McpServers,
    ConsoleMessages,
}

impl EnvelopeKind {
    /// 仅透传给展示层、核心不处理的类型
    pub const PASSTHROUGH: &'static [EnvelopeKind] = &[
        EnvelopeKind::Connection,
        EnvelopeKind::LoadingState,
        EnvelopeKind::FooterData,
        EnvelopeKind::ModelMenuData,
        EnvelopeKind::SlashCommands,
        EnvelopeKind::McpServers,
        EnvelopeKind::ConsoleMessages,
    ];
}

impl Inbound {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Inbound::Connected {} => EnvelopeKind::Connected,
            Inbound::Disconnected {} => EnvelopeKind::Disconnected,
            Inbound::Connection { .. } => EnvelopeKind::Connection,
            Inbound::HistoryItem(_) => EnvelopeKind::HistoryItem,
            Inbound::PendingItem(_) => EnvelopeKind::PendingItem,
            Inbound::HistorySync { .. } => EnvelopeKind::HistorySync,
            Inbound::ForceResync {} => EnvelopeKind::ForceResync,
            Inbound::Clear {} => EnvelopeKind::Clear,
            Inbound::ToolConfirmation(_) => EnvelopeKind::ToolConfirmation,
            Inbound::ToolConfirmationRemoval { .. } => EnvelopeKind::ToolConfirmationRemoval,
            Inbound::LoadingState { .. } => EnvelopeKind::LoadingState,
            Inbound::FooterData(_) => EnvelopeKind::FooterData,
            Inbound::ModelMenuData(_) => EnvelopeKind::ModelMenuData,
            Inbound::SlashCommands(_) => EnvelopeKind::SlashCommands,
            Inbound::McpServers(_) => EnvelopeKind::McpServers,
            Inbound::ConsoleMessages(_) => EnvelopeKind::ConsoleMessages,
        }
    }
}

/// 已解码的入站帧
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// 服务端单调递增序号（缺省表示服务端未编号）
    pub seq: Option<u64>,
    pub envelope: Inbound,
}

impl Frame {
    /// 解码一帧文本；`data` 缺失或为 null 时按 `{}` 处理
    pub fn decode(text: &str) -> Result<Self, SyncError> {
        let mut value: Value = serde_json::from_str(text)?;
        let obj = value
            .as_object_mut()
            .ok_or_else(|| SyncError::ProtocolParse("frame is not a JSON object".to_string()))?;

        let seq = match obj.remove("seq") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_u64().ok_or_else(|| {
                SyncError::ProtocolParse(format!("invalid seq: {v}"))
            })?),
        };

        if matches!(obj.get("data"), None | Some(Value::Null)) {
            obj.insert("data".to_string(), Value::Object(Map::new()));
        }

        let envelope: Inbound = serde_json::from_value(value)?;
        Ok(Self { seq, envelope })
    }
}

/// 出站信封（客户端 → 服务端）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Outbound {
    UserMessage {
        content: String,
        /// 附件编码不在核心范围内，原样透传
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Value>,
    },
    InterruptRequest {},
    #[serde(rename_all = "camelCase")]
    ToolConfirmationResponse {
        call_id: String,
        outcome: ConfirmationOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// 页面隐藏 / 失焦时确认已看到的位置
    #[serde(rename_all = "camelCase")]
    VisibilityAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seq: Option<u64>,
    },
    /// 页面重新可见后请求补发错过的消息
    #[serde(rename_all = "camelCase")]
    CheckMissedMessages {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since_seq: Option<u64>,
    },
    /// 缓冲溢出后请求权威全量历史
    RequestHistorySync {},
}

impl Outbound {
    pub fn user_message(content: &str) -> Self {
        Outbound::UserMessage {
            content: content.to_string(),
            attachments: Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payload::HistoryKind;

    #[test]
    fn test_decode_history_item() {
        let frame =
            Frame::decode(r#"{"type":"history_item","data":{"kind":"assistant","text":"Hi"},"seq":7}"#)
                .unwrap();
        assert_eq!(frame.seq, Some(7));
        match frame.envelope {
            Inbound::HistoryItem(item) => {
                assert_eq!(item.kind, HistoryKind::Assistant);
                assert_eq!(item.text.as_deref(), Some("Hi"));
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[test]
    fn test_decode_payloadless_envelopes() {
        for text in [
            r#"{"type":"force_resync"}"#,
            r#"{"type":"force_resync","data":null}"#,
            r#"{"type":"force_resync","data":{}}"#,
        ] {
            let frame = Frame::decode(text).unwrap();
            assert_eq!(frame.envelope.kind(), EnvelopeKind::ForceResync);
            assert_eq!(frame.seq, None);
        }
    }

    #[test]
    fn test_decode_removal_and_loading_state() {
        let frame = Frame::decode(r#"{"type":"tool_confirmation_removal","data":{"callId":"9"}}"#)
            .unwrap();
        assert_eq!(
            frame.envelope,
            Inbound::ToolConfirmationRemoval {
                call_id: "9".to_string()
            }
        );

        let frame = Frame::decode(
            r#"{"type":"loading_state","data":{"isLoading":true,"elapsedTime":65}}"#,
        )
        .unwrap();
        assert!(matches!(
            frame.envelope,
            Inbound::LoadingState {
                is_loading: true,
                elapsed_time: 65,
                thought: None
            }
        ));
    }

    #[test]
    fn test_decode_passthrough_is_opaque() {
        let frame = Frame::decode(r#"{"type":"footer_data","data":{"model":"x","branch":"main"}}"#)
            .unwrap();
        match frame.envelope {
            Inbound::FooterData(v) => assert_eq!(v["branch"], "main"),
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Frame::decode("not json"),
            Err(SyncError::ProtocolParse(_))
        ));
        assert!(Frame::decode(r#"[1,2]"#).is_err());
        assert!(Frame::decode(r#"{"type":"no_such_type","data":{}}"#).is_err());
        assert!(Frame::decode(r#"{"type":"clear","seq":-1}"#).is_err());
    }

    #[test]
    fn test_encode_outbound() {
        let json = Outbound::ToolConfirmationResponse {
            call_id: "1".into(),
            outcome: ConfirmationOutcome::ProceedOnce,
            payload: None,
        }
        .encode()
        .unwrap();
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "tool_confirmation_response");
        assert_eq!(v["data"]["callId"], "1");
        assert_eq!(v["data"]["outcome"], "proceed_once");
        assert!(v["data"].get("payload").is_none());

        let json = Outbound::CheckMissedMessages { since_seq: Some(3) }
            .encode()
            .unwrap();
        assert_eq!(
            json,
            r#"{"type":"check_missed_messages","data":{"sinceSeq":3}}"#
        );
    }

    #[test]
    fn test_cursor_omitted_before_first_numbered_frame() {
        let ack = Outbound::VisibilityAck { last_seq: None }.encode().unwrap();
        assert_eq!(ack, r#"{"type":"visibility_ack","data":{}}"#);

        let check = Outbound::CheckMissedMessages { since_seq: None }
            .encode()
            .unwrap();
        let v: Value = serde_json::from_str(&check).unwrap();
        assert!(v["data"].as_object().unwrap().is_empty());
        assert!(v["data"].get("sinceSeq").is_none());

        let ack = Outbound::VisibilityAck { last_seq: Some(0) }.encode().unwrap();
        assert_eq!(ack, r#"{"type":"visibility_ack","data":{"lastSeq":0}}"#);
    }
}
