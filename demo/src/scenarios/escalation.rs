//! Scenario 4: Escalation
//!
//! Sub-case A : conflicts at each level reach the configured resolver
//! Sub-case B : a task blocked by another agent triggers a HIGH query to it;
//!              the reply cancels the response timer
//! Sub-case C : a task blocked on an unavailable resource is escalated to
//!              every executive role at CRITICAL priority
//! Sub-case D : a guidance request nobody answers times out after five minutes

use serde_json::json;

use concord_contracts::{
    agent::AgentId,
    error::CoordResult,
    message::{MessageDraft, Receiver},
    payload::{
        Blocker, BlockerType, ConflictDetails, ConflictType, EscalationLevel,
        InformationResponse, Inquiry, MessagePayload, MessageType, Severity, StatusUpdate,
    },
    task::TaskStatus,
};
use concord_core::traits::EscalationPolicy;
use concord_roster::Roster;

use super::{describe, summarize, Simulation};

fn conflict(level: EscalationLevel) -> ConflictDetails {
    ConflictDetails {
        conflict_id: format!("schema-ownership-{:?}", level).to_lowercase(),
        conflict_type: ConflictType::TechnicalDisagreement,
        severity: Severity::Medium,
        escalation_level: level,
        description: "Who owns the user table schema?".to_string(),
        involved_agents: vec![AgentId::new("backend-developer"), AgentId::new("database-architect")],
        business_impact: None,
    }
}

pub fn run_scenario(roster: &Roster) -> CoordResult<()> {
    println!("=== Scenario 4: Escalation ===");
    println!();

    let mut sim = Simulation::new(roster);

    // ── Sub-case A: conflict resolver table ───────────────────────────────────

    println!("  Sub-case A: conflict resolution routing");
    for level in [EscalationLevel::Peer, EscalationLevel::Superior, EscalationLevel::Executive] {
        let resolver = roster.resolver_for(level);
        sim.bus
            .resolve_conflict("backend-developer", conflict(level), "project-atlas")?;
        let received = sim.mailbox(resolver.as_str()).len();
        println!("    {:<10} -> {:<18} ({} message(s) in mailbox)", format!("{:?}", level), resolver, received);
    }
    println!();

    // ── Sub-case B: blocked by another agent ──────────────────────────────────

    println!("  Sub-case B: blocked by another agent");
    let blocked = StatusUpdate::new("orders-api", TaskStatus::Blocked).blocked_by(Blocker {
        blocker_type: BlockerType::Dependency,
        blocking_agent: Some(AgentId::new("database-architect")),
        description: "orders table migration not merged".to_string(),
    });
    sim.bus.send_message(MessageDraft::new(
        "api-developer",
        Receiver::Unicast(AgentId::new("program-manager")),
        "project-atlas",
        MessagePayload::StatusUpdate(blocked),
    ))?;

    let inbox = sim.mailbox("database-architect");
    for message in &inbox {
        println!("    database-architect <- {}", summarize(message));
    }
    if let Some(query) = inbox.iter().find(|m| m.message_type() == MessageType::Query) {
        println!("    awaiting reply: {}", sim.bus.is_awaiting_reply(&query.message_id));
        sim.bus.send_message(
            MessageDraft::new(
                "database-architect",
                Receiver::Unicast(query.sender_id.clone()),
                "project-atlas",
                MessagePayload::InformationResponse(InformationResponse {
                    content: json!({ "eta": "merging within the hour" }),
                }),
            )
            .reply_to(query.message_id)
            .conversation(query.conversation_id.clone()),
        )?;
        println!("    after reply, awaiting reply: {}", sim.bus.is_awaiting_reply(&query.message_id));
    }
    println!();

    // ── Sub-case C: resource contention ───────────────────────────────────────

    println!("  Sub-case C: blocked on an unavailable resource");
    let starved = StatusUpdate::new("load-test", TaskStatus::Blocked).blocked_by(Blocker {
        blocker_type: BlockerType::ResourceUnavailable,
        blocking_agent: None,
        description: "staging cluster quota exhausted".to_string(),
    });
    sim.bus.send_message(MessageDraft::new(
        "qa-engineer",
        Receiver::Unicast(AgentId::new("program-manager")),
        "project-atlas",
        MessagePayload::StatusUpdate(starved),
    ))?;
    for executive in roster.executive_roles() {
        let contention = sim
            .bus
            .messages_for_agent(&executive)
            .into_iter()
            .filter(|m| m.sender_id.as_str() == "qa-engineer")
            .count();
        println!("    {:<4} received {} contention escalation(s)", executive, contention);
    }
    println!();

    // ── Sub-case D: unanswered guidance request ───────────────────────────────

    println!("  Sub-case D: unanswered guidance request");
    sim.drain_events();
    sim.bus.send_message(MessageDraft::new(
        "frontend-developer",
        Receiver::Unicast(AgentId::new("system-architect")),
        "project-atlas",
        MessagePayload::GuidanceRequest(Inquiry {
            question: "Should the dashboard poll or subscribe?".to_string(),
            context: json!({ "component": "dashboard" }),
        }),
    ))?;
    let everyone = sim.bus.known_agents();
    while sim.elapsed() < roster.timing().response_timeout_secs as i64 {
        sim.advance(30)?;
        sim.heartbeat(&everyone, |_| 0.2)?;
    }
    for event in sim.drain_events() {
        if let Some(line) = describe(&event) {
            if line.contains("timed out") {
                println!("    - t={}s {}", sim.elapsed(), line);
            }
        }
    }
    println!("    pending responses left: {}", sim.bus.pending_responses());
    println!();
    Ok(())
}
