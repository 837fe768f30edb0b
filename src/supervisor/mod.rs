//! 连接监管：状态机、传输抽象与异步监管任务

mod machine;
mod runner;
mod transport;

pub use machine::{
    ConnectionMachine, ConnectionSnapshot, ConnectionState, PageEvent, ReconnectDecision,
    ReconnectPolicy,
};
pub use runner::{ConnectionSupervisor, SupervisorCommand, SupervisorEvent, SupervisorHandle};
pub use transport::{
    memory_pair, Connection, MemoryConnection, MemoryPeer, MemoryTransport, ScriptStep,
    Transport, WsTransport,
};
