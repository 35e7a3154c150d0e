//! Domain types and the ports through which the payout engine reaches its
//! collaborators. Nothing in here performs I/O.

pub mod audit;
pub mod commit;
pub mod escrow;
pub mod money;
pub mod pool;
pub mod ports;
pub mod prize;
pub mod provider;
pub mod winner;
