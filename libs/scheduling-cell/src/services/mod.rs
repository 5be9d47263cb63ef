// libs/scheduling-cell/src/services/mod.rs
pub mod allocator;
pub mod booking;
pub mod lifecycle;
