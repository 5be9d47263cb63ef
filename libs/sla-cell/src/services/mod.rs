// libs/sla-cell/src/services/mod.rs
pub mod deadline;
pub mod escalation;
pub mod notify;
pub mod sweeper;
pub mod tracker;
