//! # concord-contracts
//!
//! Shared types for the CONCORD coordination bus: the message envelope, the
//! typed payloads, agent and task state, observable events, timing
//! configuration, and the error type.
//!
//! All crates in the workspace import from here. No routing or scheduling
//! logic lives in this crate, only data definitions and the small amount of
//! behavior that belongs to the data itself (validation, state transitions).

pub mod agent;
pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod payload;
pub mod task;
