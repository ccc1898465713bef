//! Enforcement on the community platform
//!
//! The [`Enforcer`] applies and lifts restrictions; the [`ExpirySweeper`]
//! lifts them when they run out.

pub mod engine;
pub mod notice;
pub mod sweeper;

pub use engine::{ApplyMode, Enforcer, RemovalCause};
pub use sweeper::{ExpirySweeper, SweepOutcome, SweepRequest};
