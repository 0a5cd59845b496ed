//! Domain layer - Pure business logic.

pub mod analysis;
pub mod jobs;
pub mod progress;
pub mod video;
