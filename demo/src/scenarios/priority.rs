//! Scenario 2: Priority Delivery
//!
//! Five messages arrive for the QA engineer in mixed priority order. The
//! mailbox is kept sorted: higher priority first, arrival order within a
//! priority. Processing a message twice changes nothing the second time.

use concord_contracts::{
    agent::AgentId,
    error::CoordResult,
    message::{MessageDraft, Priority, Receiver},
    payload::{MessagePayload, TaskAssignment},
};
use concord_roster::Roster;

use super::{summarize, Simulation};

const INBOX: &str = "qa-engineer";

pub fn run_scenario(roster: &Roster) -> CoordResult<()> {
    println!("=== Scenario 2: Priority Delivery ===");
    println!();

    let sim = Simulation::new(roster);
    let sends = [
        ("regression-suite", Priority::Medium),
        ("flaky-test-triage", Priority::Low),
        ("release-smoke-test", Priority::High),
        ("hotfix-verification", Priority::Critical),
        ("security-patch-check", Priority::Critical),
    ];

    println!("  Sent, in order:");
    for (task_id, priority) in sends {
        sim.bus.send_message(
            MessageDraft::new(
                "program-manager",
                Receiver::Unicast(AgentId::new(INBOX)),
                "release-2.4",
                MessagePayload::TaskAssignment(TaskAssignment::new(task_id, task_id.replace('-', " "))),
            )
            .priority(priority),
        )?;
        println!("    {:<8} {}", format!("{:?}", priority), task_id);
    }
    println!();

    let mailbox = sim.mailbox(INBOX);
    println!("  {} mailbox:", INBOX);
    for message in &mailbox {
        println!("    {}", summarize(message));
    }
    println!();

    if let Some(first) = mailbox.first() {
        let agent = AgentId::new(INBOX);
        let once = sim.bus.mark_message_processed(&agent, &first.message_id)?;
        let twice = sim.bus.mark_message_processed(&agent, &first.message_id)?;
        println!("  Processed head message: first call removed={}, second call removed={}", once, twice);
        println!("  Remaining in mailbox: {}", sim.mailbox(INBOX).len());
    }
    println!();
    Ok(())
}
