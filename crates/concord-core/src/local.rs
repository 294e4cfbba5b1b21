//! In-process defaults for the delivery and restart seams.
//!
//! Every agent lives in the same process as the bus, so delivery is a
//! mailbox write that cannot fail and a restart is a state reset.

use tracing::debug;

use concord_contracts::{agent::AgentId, error::CoordResult, message::AgentMessage};

use crate::traits::{AgentSupervisor, Transport};

/// Always-reachable transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn deliver(&self, agent_id: &AgentId, message: &AgentMessage) -> CoordResult<()> {
        debug!(agent_id = %agent_id, message_id = %message.message_id, "local delivery");
        Ok(())
    }
}

/// Restart that succeeds immediately; the bus performs the state reset.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedRestart;

impl AgentSupervisor for SimulatedRestart {
    fn restart(&self, agent_id: &AgentId) -> CoordResult<()> {
        debug!(agent_id = %agent_id, "simulated agent restart");
        Ok(())
    }
}
