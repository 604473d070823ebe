//! Infrastructure layer: the atomic workspace store, the mutation
//! executor, per-actor rate limiting, and realtime fan-out.

pub mod broadcast;
pub mod executor;
pub mod rate_limit;
pub mod store;
