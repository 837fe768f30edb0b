//! Bee Sync - 无头同步客户端
//!
//! 入口：加载配置、初始化日志、建立会话，把历史变化与确认请求打印到终端。
//!
//! 标准输入命令：
//! - 普通文本：发送 user_message
//! - `/interrupt`：中断当前回复
//! - `/answer <outcome>`：回复正在展示的确认请求（如 `proceed_once`、`cancel`）
//! - `/hide`、`/show`：模拟页面隐藏 / 恢复可见
//! - `/quit`：拆除会话并退出（Ctrl+C 同理）

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bee_sync::config::load_config;
use bee_sync::confirmation::ConfirmationPresenter;
use bee_sync::core::{ShutdownManager, ShutdownReason};
use bee_sync::history::{format_elapsed, format_tool_call, HistoryChange, HistoryEntry};
use bee_sync::observability;
use bee_sync::protocol::{
    ConfirmationDetails, ConfirmationOutcome, ConfirmationRequest, EnvelopeKind, FnHandler,
    Inbound,
};
use bee_sync::supervisor::{PageEvent, SupervisorEvent, WsTransport};
use bee_sync::SyncSessionBuilder;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    let (session, mut streams) = SyncSessionBuilder::new(cfg)
        .with_shutdown(shutdown.clone())
        .with_presenter(Arc::new(StdoutPresenter))
        .build(WsTransport);

    session.subscribe(
        &[EnvelopeKind::LoadingState, EnvelopeKind::Connection],
        Arc::new(FnHandler::new("status", |envelope: &Inbound| {
            match envelope {
                Inbound::LoadingState {
                    is_loading: true,
                    elapsed_time,
                    ..
                } => println!("… working ({})", format_elapsed(*elapsed_time)),
                Inbound::Connection { message } => println!("[server] {}", message),
                _ => {}
            }
            Ok(())
        })),
    );

    session.connect();
    println!("Session {} (type /quit to exit)", session.session_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            Some(change) = streams.history.recv() => print_change(&change),
            Some(event) = streams.connection.recv() => match event {
                SupervisorEvent::Connected { reopened } => {
                    println!("[connected{}]", if reopened { ", resumed" } else { "" });
                }
                SupervisorEvent::Reconnecting { attempt } => {
                    println!("[reconnecting, attempt {}]", attempt);
                }
                SupervisorEvent::ConnectionLost { .. } => {
                    if let Some(err) = event.as_error() {
                        println!("[{}; type /connect to retry]", err);
                    }
                }
            },
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    shutdown.shutdown(ShutdownReason::UserInitiated);
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let result = match line.split_once(' ').unwrap_or((line, "")) {
                    ("/quit", _) => {
                        shutdown.shutdown(ShutdownReason::UserInitiated);
                        break;
                    }
                    ("/interrupt", _) => session.interrupt(),
                    ("/connect", _) => {
                        session.connect();
                        Ok(())
                    }
                    ("/hide", _) => {
                        session.page_event(PageEvent::Hidden);
                        Ok(())
                    }
                    ("/show", _) => {
                        session.page_event(PageEvent::Visible);
                        Ok(())
                    }
                    ("/answer", outcome) => match outcome.trim().parse::<ConfirmationOutcome>() {
                        Ok(outcome) => session.answer(outcome, None).await,
                        Err(e) => {
                            println!("{}", e);
                            Ok(())
                        }
                    },
                    _ => session.send_message(line),
                };
                if let Err(e) = result {
                    println!("[error] {}", e);
                }
            }
        }
    }

    let reason = shutdown.reason().unwrap_or(ShutdownReason::UserInitiated);
    if reason == ShutdownReason::Signal {
        println!("[interrupted]");
    }
    session.close(reason).await;
    Ok(())
}

/// 把确认请求打印到终端
struct StdoutPresenter;

impl ConfirmationPresenter for StdoutPresenter {
    fn present(&self, request: &ConfirmationRequest, options: &[ConfirmationOutcome]) {
        let subject = match &request.details {
            ConfirmationDetails::Edit { file_name, .. } => format!("edit {}", file_name),
            ConfirmationDetails::Exec { command, .. } => format!("run `{}`", command),
            ConfirmationDetails::Info { prompt, .. } => prompt.clone(),
            ConfirmationDetails::Mcp {
                server_name,
                tool_name,
                ..
            } => format!("{} on {}", tool_name, server_name),
        };
        let options: Vec<&str> = options.iter().map(|o| o.as_str()).collect();
        println!("[confirm] {}: {}", request.tool_name, subject);
        println!("          /answer {}", options.join(" | "));
    }

    fn dismiss(&self, call_id: &str) {
        println!("[confirm] {} withdrawn", call_id);
    }
}

fn print_entry(prefix: &str, entry: &HistoryEntry) {
    if let Some(text) = &entry.text {
        println!("{} #{} {:?}: {}", prefix, entry.id.0, entry.kind, text);
    }
    for tool in &entry.tools {
        println!("{} #{}   {}", prefix, entry.id.0, format_tool_call(tool));
    }
}

fn print_change(change: &HistoryChange) {
    match change {
        HistoryChange::Appended(entry) | HistoryChange::Promoted(entry) => print_entry("+", entry),
        HistoryChange::Merged(entry) => print_entry("~", entry),
        HistoryChange::PendingCreated(pending) | HistoryChange::PendingUpdated(pending) => {
            if let Some(text) = &pending.text {
                println!("… {}", text);
            }
            for tool in &pending.tools {
                println!("…   {}", format_tool_call(tool));
            }
        }
        HistoryChange::PendingDiscarded { .. } => {}
        HistoryChange::Reset => println!("[history cleared]"),
    }
}
