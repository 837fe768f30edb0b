//! 确认队列持久化
//!
//! 队列以 JSON 数组（`{callId, toolName, confirmationDetails}`）整体保存在固定 key 下，按会话隔离。
//! 读取时做校验：必须是对象数组、每个对象带非空 `callId`、无重复 ID，否则整体视为空队列。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::core::SyncError;
use crate::protocol::ConfirmationRequest;

/// 存储 key（文件存储下即文件名）
pub const CONFIRMATION_QUEUE_KEY: &str = "bee.confirmation_queue";

/// 会话级持久化存储：只负责原始字符串的读写，校验由仲裁器完成
pub trait QueueStore: Send + Sync {
    /// 读取已保存的值；从未保存过返回 None
    fn load(&self) -> Result<Option<String>, SyncError>;

    fn save(&self, value: &str) -> Result<(), SyncError>;
}

/// 内存存储（测试 / 单进程）
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    value: Mutex<Option<String>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一个原始值（模拟上次会话留下的数据）
    pub fn with_value(value: &str) -> Self {
        Self {
            value: Mutex::new(Some(value.to_string())),
        }
    }

    pub fn value(&self) -> Option<String> {
        self.value.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl QueueStore for MemoryQueueStore {
    fn load(&self) -> Result<Option<String>, SyncError> {
        Ok(self.value())
    }

    fn save(&self, value: &str) -> Result<(), SyncError> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(value.to_string());
        Ok(())
    }
}

/// 文件存储：`<state_dir>/<session_id>/bee.confirmation_queue.json`
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    pub fn new(state_dir: impl AsRef<Path>, session_id: &str) -> Self {
        Self {
            path: state_dir
                .as_ref()
                .join(session_id)
                .join(format!("{}.json", CONFIRMATION_QUEUE_KEY)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueueStore for FileQueueStore {
    fn load(&self) -> Result<Option<String>, SyncError> {
        if !self.path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&self.path)
            .map(Some)
            .map_err(|e| SyncError::Persistence(format!("read {}: {}", self.path.display(), e)))
    }

    /// 先写临时文件再 rename，读取方不会看到写了一半的内容
    fn save(&self, value: &str) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::Persistence(format!("create {}: {}", parent.display(), e)))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, value)
            .map_err(|e| SyncError::Persistence(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| SyncError::Persistence(format!("rename {}: {}", self.path.display(), e)))
    }
}

/// 校验并解码持久化的队列
pub fn decode_queue(raw: &str) -> Result<Vec<ConfirmationRequest>, SyncError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| SyncError::Persistence(format!("invalid JSON: {}", e)))?;
    {
        let items = value
            .as_array()
            .ok_or_else(|| SyncError::Persistence("queue is not an array".to_string()))?;
        let mut seen = HashSet::new();
        for item in items {
            let call_id = item
                .as_object()
                .and_then(|obj| obj.get("callId"))
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    SyncError::Persistence("queue item without a non-empty callId".to_string())
                })?;
            if !seen.insert(call_id) {
                return Err(SyncError::Persistence(format!(
                    "duplicate callId in queue: {}",
                    call_id
                )));
            }
        }
    }
    serde_json::from_value(value)
        .map_err(|e| SyncError::Persistence(format!("invalid queue item: {}", e)))
}

pub fn encode_queue<'a, I>(queue: I) -> Result<String, SyncError>
where
    I: IntoIterator<Item = &'a ConfirmationRequest>,
{
    let items: Vec<&ConfirmationRequest> = queue.into_iter().collect();
    serde_json::to_string(&items).map_err(|e| SyncError::Persistence(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ConfirmationDetails;

    fn request(id: &str) -> ConfirmationRequest {
        ConfirmationRequest {
            call_id: id.to_string(),
            tool_name: "run_shell_command".to_string(),
            details: ConfirmationDetails::Exec {
                title: Some("Run".to_string()),
                command: "ls".to_string(),
                root_command: Some("ls".to_string()),
            },
        }
    }

    #[test]
    fn test_round_trip() {
        let queue = vec![request("1"), request("2")];
        let raw = encode_queue(&queue).unwrap();
        assert_eq!(decode_queue(&raw).unwrap(), queue);
    }

    #[test]
    fn test_rejects_invalid_values() {
        for raw in [
            "not json",
            "{}",
            r#"{"callId":"1"}"#,
            r#"[1]"#,
            r#"[{"toolName":"x"}]"#,
            r#"[{"callId":""}]"#,
            r#"[{"callId":7}]"#,
            r#"[{"callId":"1","toolName":"x"}]"#,
        ] {
            assert!(decode_queue(raw).is_err(), "accepted {}", raw);
        }
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let raw = encode_queue(&[request("1"), request("1")]).unwrap();
        assert!(decode_queue(&raw).is_err());
    }

    #[test]
    fn test_empty_array_is_valid() {
        assert!(decode_queue("[]").unwrap().is_empty());
    }

    #[test]
    fn test_file_store_scoped_by_session() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileQueueStore::new(dir.path(), "session-a");
        let b = FileQueueStore::new(dir.path(), "session-b");

        assert_eq!(a.load().unwrap(), None);
        a.save("[]").unwrap();
        assert_eq!(a.load().unwrap().as_deref(), Some("[]"));
        assert_eq!(b.load().unwrap(), None);
        assert!(a.path().ends_with("session-a/bee.confirmation_queue.json"));
    }
}
