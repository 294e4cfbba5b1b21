//! Scenario 1: Self-Healing
//!
//! The product manager hands a HIGH priority task to the backend developer,
//! who then goes silent. Everyone else keeps reporting in. Once the silence
//! passes the heartbeat timeout, the next health check moves the unfinished
//! task to the least loaded agent sharing a capability with the backend
//! developer, resets and restarts it, and broadcasts a system alert.

use serde_json::json;

use concord_contracts::{
    agent::AgentId,
    error::CoordResult,
    message::{MessageDraft, Priority, Receiver},
    payload::{MessagePayload, TaskAssignment},
};
use concord_roster::Roster;

use super::{describe, summarize, Simulation};

const SILENT_AGENT: &str = "backend-developer";

fn reported_load(agent: &AgentId) -> f64 {
    match agent.as_str() {
        "api-developer" => 0.3,
        "qa-engineer" => 0.5,
        "database-architect" => 0.6,
        _ => 0.2,
    }
}

pub fn run_scenario(roster: &Roster) -> CoordResult<()> {
    println!("=== Scenario 1: Self-Healing ===");
    println!();

    let mut sim = Simulation::new(roster);
    let silent = AgentId::new(SILENT_AGENT);

    let mut task = TaskAssignment::new("auth-endpoints", "Implement authentication endpoints");
    task.description = "Login, refresh and logout endpoints backed by the session store".to_string();
    task.requirements = vec!["rust".to_string(), "api-design".to_string()];
    task.data = json!({ "story_points": 5 });

    sim.bus.send_message(
        MessageDraft::new(
            "product-manager",
            Receiver::Unicast(silent.clone()),
            "project-atlas",
            MessagePayload::TaskAssignment(task),
        )
        .priority(Priority::High),
    )?;
    println!("  t=0s    product-manager assigned 'auth-endpoints' to {}", SILENT_AGENT);

    let responsive: Vec<AgentId> = sim
        .bus
        .known_agents()
        .into_iter()
        .filter(|a| *a != silent)
        .collect();
    println!(
        "  {} other agents keep reporting; {} stays silent",
        responsive.len(),
        SILENT_AGENT
    );
    println!();

    while sim.elapsed() < 150 {
        sim.advance(29)?;
        sim.heartbeat(&responsive, reported_load)?;
        sim.advance(1)?;
        if let Some(state) = sim.bus.agent_state(&silent) {
            println!(
                "  t={:<4}  {} health: {:?}, status: {:?}",
                format!("{}s", sim.elapsed()),
                SILENT_AGENT,
                state.health_status,
                state.status
            );
        }
    }
    println!();

    println!("  Healing events:");
    for event in sim.drain_events() {
        if let Some(line) = describe(&event) {
            if !line.contains("from product-manager") {
                println!("    - {}", line);
            }
        }
    }
    println!();

    println!("  api-developer mailbox:");
    for message in sim.mailbox("api-developer") {
        println!("    {}", summarize(&message));
    }

    if let Some(state) = sim.bus.agent_state(&silent) {
        println!();
        println!(
            "  {} after restart: status {:?}, health {:?}, load {:.1}, {} task(s)",
            SILENT_AGENT,
            state.status,
            state.health_status,
            state.current_load,
            state.assigned_tasks.len()
        );
    }
    println!();
    Ok(())
}
