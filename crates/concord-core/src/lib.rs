//! # concord-core
//!
//! The CONCORD coordination bus: routing, priority mailboxes, response
//! timeouts, bounded delivery retries, heartbeat monitoring with
//! self-healing, and conflict escalation.
//!
//! This crate provides:
//! - The seam traits (`Clock`, `Transport`, `AgentSupervisor`,
//!   `EscalationPolicy`, `CapabilityDirectory`, `HistoryStore`)
//! - `CoordinationBus`, which owns all shared state behind one lock
//! - `BusRuntime`, which runs the periodic jobs on tokio intervals
//!
//! ## Usage
//!
//! ```rust,ignore
//! use concord_core::{CoordinationBus, BusRuntime, clock::SystemClock};
//!
//! let bus = Arc::new(CoordinationBus::new(config, Arc::new(SystemClock), policy, directory, history));
//! let runtime = BusRuntime::spawn(bus.clone());
//! ```

pub mod bus;
pub mod clock;
pub mod health;
pub mod local;
pub mod mailbox;
pub mod retry;
pub mod runtime;
pub mod schedule;
pub mod tracker;
pub mod traits;

pub use bus::{CoordinationBus, SYSTEM_SENDER};
pub use health::HealthSweep;
pub use runtime::BusRuntime;
pub use schedule::PeriodicJob;
