// libs/queue-cell/src/services/mod.rs
pub mod scheduler;
