// libs/sla-cell/src/lib.rs
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use router::sla_routes;
pub use services::sweeper::PeriodicSweeper;
