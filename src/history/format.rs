//! 确定性格式化：耗时、工具状态行

use crate::protocol::ToolCall;

/// 耗时：60 秒以下为 `Ns`，否则 `Mm Ss`
pub fn format_elapsed(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// 工具调用的一行摘要：`✔ read_file (src/main.rs)`
pub fn format_tool_call(call: &ToolCall) -> String {
    match &call.description {
        Some(desc) if !desc.is_empty() => {
            format!("{} {} ({})", call.status.glyph(), call.name, desc)
        }
        _ => format!("{} {}", call.status.glyph(), call.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolStatus;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "0s");
        assert_eq!(format_elapsed(59), "59s");
        assert_eq!(format_elapsed(60), "1m 0s");
        assert_eq!(format_elapsed(125), "2m 5s");
    }

    #[test]
    fn test_format_tool_call() {
        let mut call = ToolCall {
            call_id: "c".into(),
            name: "shell".into(),
            description: Some("ls -la".into()),
            status: ToolStatus::Error,
            result_display: None,
        };
        assert_eq!(format_tool_call(&call), "✗ shell (ls -la)");
        call.description = None;
        call.status = ToolStatus::Confirming;
        assert_eq!(format_tool_call(&call), "? shell");
    }
}
