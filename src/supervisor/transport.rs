//! 传输层抽象
//!
//! `Transport` 负责建立连接，`Connection` 是一条已打开的双向文本帧通道。
//! 生产实现基于 tokio-tungstenite；`MemoryTransport` 按脚本返回连接，供测试与离线演示使用。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::core::TransportError;

/// 一条已打开的连接
#[async_trait]
pub trait Connection: Send {
    /// 下一帧文本；None 表示对端关闭
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    async fn close(&mut self);
}

/// 连接工厂
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        (**self).connect(url).await
    }
}

// ============================================================================
// WebSocket
// ============================================================================

/// WebSocket 传输（ws:// 与 wss://）
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        tracing::debug!("WebSocket handshake completed: {}", url);
        Ok(Box::new(WsConnection { stream }))
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text)),
                Ok(WsMessage::Close(_)) => return None,
                // ping/pong 由 tungstenite 自动应答，二进制帧不属于协议
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::ClosedUnexpectedly(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close error: {}", e);
        }
    }
}

// ============================================================================
// 内存传输
// ============================================================================

/// 内存连接的客户端一侧
pub struct MemoryConnection {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

/// 内存连接的服务端一侧：推送帧、读取客户端发出的帧、关闭连接
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

/// 创建一对相连的内存连接
pub fn memory_pair() -> (MemoryConnection, MemoryPeer) {
    let (to_client, incoming) = mpsc::unbounded_channel();
    let (outgoing, from_client) = mpsc::unbounded_channel();
    (
        MemoryConnection { incoming, outgoing },
        MemoryPeer {
            to_client,
            from_client,
        },
    )
}

impl MemoryPeer {
    /// 向客户端推送一帧；客户端已断开时返回 false
    pub fn push(&self, frame: &str) -> bool {
        self.to_client.send(frame.to_string()).is_ok()
    }

    /// 等待客户端发出的下一帧
    pub async fn next_sent(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub fn try_next_sent(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// 服务端关闭连接（客户端视为意外断开）
    pub fn close(self) {}
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::Send("peer closed".to_string()))
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

/// 脚本中的一步：连接失败，或返回一条预先建立的内存连接
pub enum ScriptStep {
    Fail,
    Open(MemoryConnection),
}

/// 按脚本依次应答 connect 的传输；脚本耗尽后一律失败
#[derive(Default)]
pub struct MemoryTransport {
    script: Mutex<VecDeque<ScriptStep>>,
    attempts: AtomicUsize,
}

impl MemoryTransport {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, step: ScriptStep) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(step);
    }

    /// 已发起的 connect 次数
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match step {
            Some(ScriptStep::Open(conn)) => Ok(Box::new(conn)),
            Some(ScriptStep::Fail) | None => Err(TransportError::OpenFailed(format!(
                "{} unreachable",
                url
            ))),
        }
    }
}
