//! 线上协议：信封类型、载荷、分发器、出站接口

mod dispatcher;
mod envelope;
mod payload;
mod sink;

pub use dispatcher::{DispatchReport, Dispatcher, EnvelopeHandler, FnHandler};
pub use envelope::{EnvelopeKind, Frame, Inbound, Outbound};
pub use payload::{
    ConfirmationDetails, ConfirmationOutcome, ConfirmationRequest, HistoryItem, HistoryKind,
    StreamClass, ToolCall, ToolStatus,
};
pub use sink::{Delivery, OutboundSink, RecordingSink};
