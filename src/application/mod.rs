//! Application layer orchestrating payouts.
//!
//! [`processor::PayoutProcessor`] drives a single prize record through its
//! state machine, [`sweep::RetrySweep`] re-admits recoverable records pool by
//! pool, and [`audit::AuditLog`] records outcomes off the main path.

pub mod audit;
pub mod idempotency;
pub mod processor;
pub mod sweep;
