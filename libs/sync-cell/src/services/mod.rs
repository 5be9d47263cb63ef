// libs/sync-cell/src/services/mod.rs
pub mod replay;
