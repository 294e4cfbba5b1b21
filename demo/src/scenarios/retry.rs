//! Scenario 3: Delivery Retries
//!
//! A transport that cannot reach the frontend developer for a while.
//!
//! Sub-case A: unreachable for good. The message is tried four times (the
//!             initial attempt plus three retries) and then dropped; the
//!             sender receives a delivery-failure alert.
//! Sub-case B: unreachable for two attempts. The third attempt lands.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use concord_contracts::{
    agent::AgentId,
    error::{CoordError, CoordResult},
    message::{AgentMessage, MessageDraft, Receiver},
    payload::{MessagePayload, MessageType, TaskAssignment},
};
use concord_core::traits::Transport;
use concord_roster::Roster;

use super::{describe, Simulation};

const TARGET: &str = "frontend-developer";

/// Fails the next N deliveries to each listed agent.
struct FlakyTransport {
    outages: Mutex<HashMap<AgentId, u32>>,
}

impl FlakyTransport {
    fn new(agent: &str, failures: u32) -> Self {
        let mut outages = HashMap::new();
        outages.insert(AgentId::new(agent), failures);
        Self {
            outages: Mutex::new(outages),
        }
    }
}

impl Transport for FlakyTransport {
    fn deliver(&self, agent_id: &AgentId, _message: &AgentMessage) -> CoordResult<()> {
        let mut outages = self.outages.lock().map_err(|e| CoordError::StatePoisoned {
            reason: format!("transport lock poisoned: {}", e),
        })?;
        match outages.get_mut(agent_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                debug!(agent_id = %agent_id, remaining = *remaining, "simulated outage");
                Err(CoordError::DeliveryFailed {
                    agent_id: agent_id.to_string(),
                    reason: "connection refused".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

fn run_case(roster: &Roster, label: &str, failures: u32) -> CoordResult<()> {
    println!("  {}", label);
    let mut sim = Simulation::with_transport(roster, Box::new(FlakyTransport::new(TARGET, failures)));

    sim.bus.send_message(MessageDraft::new(
        "product-manager",
        Receiver::Unicast(AgentId::new(TARGET)),
        "project-atlas",
        MessagePayload::TaskAssignment(TaskAssignment::new("login-page", "Build the login page")),
    ))?;
    sim.advance(60)?;

    for event in sim.drain_events() {
        if let Some(line) = describe(&event) {
            println!("    - {}", line);
        }
    }

    let delivered = sim.mailbox(TARGET).len();
    let alerts = sim
        .mailbox("product-manager")
        .iter()
        .filter(|m| m.message_type() == MessageType::SystemAlert)
        .count();
    println!(
        "    {} mailbox: {} message(s); product-manager alerts: {}; retries pending: {}",
        TARGET,
        delivered,
        alerts,
        sim.bus.retry_queue_len()
    );
    println!();
    Ok(())
}

pub fn run_scenario(roster: &Roster) -> CoordResult<()> {
    println!("=== Scenario 3: Delivery Retries ===");
    println!();
    run_case(roster, "Sub-case A: agent never comes back", u32::MAX)?;
    run_case(roster, "Sub-case B: agent back after two failed attempts", 2)?;
    Ok(())
}
