//! # concord-roster
//!
//! Declarative agent roster for the CONCORD coordination bus.
//!
//! ## Overview
//!
//! This crate provides [`Roster`], which implements the
//! [`EscalationPolicy`](concord_core::traits::EscalationPolicy) and
//! [`CapabilityDirectory`](concord_core::traits::CapabilityDirectory) traits.
//! Agent capability profiles, the conflict resolver table, and bus timing are
//! declared in one TOML file.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use concord_roster::Roster;
//!
//! let roster = Roster::from_file(Path::new("config/roster.toml"))?;
//! // Pass `roster.timing()` and `Arc::new(roster)` to `CoordinationBus::new(...)`.
//! ```

pub mod profile;
pub mod roster;

pub use profile::{AgentProfile, EscalationTable, RosterConfig};
pub use roster::Roster;

// ── Tests ─────────────────────────────────────────────────────────────────────
