//! Application layer - Services that use ports.

pub mod coordinator;
pub mod library;
