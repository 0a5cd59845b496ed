//! Posecheck - Video pose analysis service
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (videos, analysis results, progress, jobs)
//! - ports/: Trait definitions
//! - adapters/: Concrete implementations (filesystem, worker processes, HTTP)
//! - application/: Job coordinator and video library services
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use application::coordinator::{CoordinatorSettings, JobCoordinator, SubmitError};
pub use application::library::{LibraryError, VideoLibrary};
pub use config::LocalConfig;
