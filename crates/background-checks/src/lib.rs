//! Durable orchestration of candidate background checks.
//!
//! The crate drives a background check from the candidate's consent through
//! identity validation and a tier-dependent fan-out of verification searches,
//! journaling every externally visible step so an instance can resume after a
//! restart without repeating notifications.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
