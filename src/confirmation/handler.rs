//! 确认仲裁器的分发器订阅端

use std::sync::{Arc, Mutex};

use super::arbiter::ConfirmationArbiter;
use crate::core::SyncError;
use crate::protocol::{EnvelopeHandler, EnvelopeKind, Inbound};

pub struct ConfirmationHandler {
    arbiter: Arc<Mutex<ConfirmationArbiter>>,
}

impl ConfirmationHandler {
    pub const KINDS: &'static [EnvelopeKind] = &[
        EnvelopeKind::ToolConfirmation,
        EnvelopeKind::ToolConfirmationRemoval,
    ];

    pub fn new(arbiter: Arc<Mutex<ConfirmationArbiter>>) -> Self {
        Self { arbiter }
    }
}

impl EnvelopeHandler for ConfirmationHandler {
    fn name(&self) -> &str {
        "confirmation"
    }

    fn handle(&self, envelope: &Inbound) -> Result<(), SyncError> {
        let mut arbiter = self.arbiter.lock().unwrap_or_else(|e| e.into_inner());
        match envelope {
            Inbound::ToolConfirmation(request) => {
                arbiter.add(request.clone());
            }
            Inbound::ToolConfirmationRemoval { call_id } => {
                arbiter.remove(call_id);
            }
            other => {
                return Err(SyncError::handler(
                    self.name(),
                    format!("unexpected envelope {:?}", other.kind()),
                ))
            }
        }
        Ok(())
    }
}
