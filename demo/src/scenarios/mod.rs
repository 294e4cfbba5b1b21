//! Scripted coordination scenarios.
//!
//! Every scenario runs against a `ManualClock`: minutes of bus time pass in
//! milliseconds, and the output is the same on every run apart from the
//! generated message ids.

pub mod escalation;
pub mod priority;
pub mod retry;
pub mod self_healing;

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::warn;

use concord_contracts::{
    agent::{AgentId, AgentStateUpdate},
    error::CoordResult,
    event::BusEvent,
    message::AgentMessage,
    payload::MessagePayload,
};
use concord_core::{
    clock::ManualClock,
    traits::{Clock, Transport},
    CoordinationBus,
};
use concord_history::InMemoryHistory;
use concord_roster::Roster;

// ── Simulation harness ────────────────────────────────────────────────────────

pub struct Simulation {
    pub bus: CoordinationBus,
    pub clock: Arc<ManualClock>,
    pub history: InMemoryHistory,
    start: DateTime<Utc>,
    events: broadcast::Receiver<BusEvent>,
}

impl Simulation {
    pub fn new(roster: &Roster) -> Self {
        Self::build(roster, None)
    }

    pub fn with_transport(roster: &Roster, transport: Box<dyn Transport>) -> Self {
        Self::build(roster, Some(transport))
    }

    fn build(roster: &Roster, transport: Option<Box<dyn Transport>>) -> Self {
        let start = Utc
            .with_ymd_and_hms(2025, 1, 6, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let clock = Arc::new(ManualClock::new(start));
        let history = InMemoryHistory::new(roster.timing().history_max_records);
        let shared = Arc::new(roster.clone());

        let mut bus = CoordinationBus::new(
            roster.timing().clone(),
            clock.clone(),
            shared.clone(),
            shared,
            Box::new(history.clone()),
        );
        if let Some(transport) = transport {
            bus = bus.with_transport(transport);
        }
        let events = bus.subscribe();

        Self {
            bus,
            clock,
            history,
            start,
            events,
        }
    }

    /// Move bus time forward one second at a time, running due jobs.
    pub fn advance(&self, secs: i64) -> CoordResult<()> {
        for _ in 0..secs {
            self.clock.advance_secs(1);
            self.bus.tick()?;
        }
        Ok(())
    }

    /// Seconds of bus time since the scenario started.
    pub fn elapsed(&self) -> i64 {
        (self.clock.now() - self.start).num_seconds()
    }

    /// Report a heartbeat for each agent.
    pub fn heartbeat(&self, agents: &[AgentId], load: impl Fn(&AgentId) -> f64) -> CoordResult<()> {
        for agent in agents {
            self.bus
                .update_agent_state(agent, AgentStateUpdate::default().with_load(load(agent)))?;
        }
        Ok(())
    }

    pub fn drain_events(&mut self) -> Vec<BusEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event buffer overflowed, oldest events skipped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        out
    }

    pub fn mailbox(&self, agent: &str) -> Vec<AgentMessage> {
        self.bus.messages_for_agent(&AgentId::new(agent))
    }
}

// ── Output helpers ────────────────────────────────────────────────────────────

/// One-line summary of an event, or `None` for routine ones.
pub fn describe(event: &BusEvent) -> Option<String> {
    let line = match event {
        BusEvent::MessageSent { message_type, priority, sender_id, targets, .. } => format!(
            "{:?} {:?} from {} to {} agent(s)",
            priority,
            message_type,
            sender_id,
            targets.len()
        ),
        BusEvent::AgentUnhealthy { agent_id, last_heartbeat } => {
            format!("{} unhealthy (last heartbeat {})", agent_id, last_heartbeat.format("%H:%M:%S"))
        }
        BusEvent::TaskRedistributed { task_id, from_agent, to_agent, .. } => {
            format!("task '{}' moved {} -> {}", task_id, from_agent, to_agent)
        }
        BusEvent::RedistributionUnresolved { task_id, from_agent } => {
            format!("task '{}' from {} has no eligible taker", task_id, from_agent)
        }
        BusEvent::AgentRestarted { agent_id, .. } => format!("{} restarted", agent_id),
        BusEvent::ResponseTimeout { message_type, sender_id, .. } => {
            format!("{:?} from {} timed out without a reply", message_type, sender_id)
        }
        BusEvent::DeliveryRetryScheduled { agent_id, retry_count, next_retry_time, .. } => format!(
            "delivery to {} failed (retry #{}), next attempt at {}",
            agent_id,
            retry_count + 1,
            next_retry_time.format("%H:%M:%S")
        ),
        BusEvent::DeliveryFailed { agent_id, attempts, reason, .. } => {
            format!("delivery to {} dropped after {} attempts: {}", agent_id, attempts, reason)
        }
        BusEvent::MessageDelivered { .. }
        | BusEvent::MessageProcessed { .. }
        | BusEvent::AgentStateUpdated { .. } => return None,
    };
    Some(line)
}

pub fn summarize(message: &AgentMessage) -> String {
    let detail = match &message.payload {
        MessagePayload::TaskAssignment(task) => format!("task '{}'", task.task_id),
        MessagePayload::Query(q) | MessagePayload::GuidanceRequest(q) => format!("\"{}\"", q.question),
        MessagePayload::ConflictResolutionRequest(c) => format!("conflict '{}'", c.conflict_id),
        MessagePayload::SystemAlert(a) => a.action_taken.clone(),
        MessagePayload::StatusUpdate(u) => format!("task '{}' is {:?}", u.task_id, u.status),
        _ => String::new(),
    };
    format!(
        "{:<8} {:<28} from {:<20} {}",
        format!("{:?}", message.priority),
        format!("{:?}", message.message_type()),
        message.sender_id.to_string(),
        detail
    )
}
