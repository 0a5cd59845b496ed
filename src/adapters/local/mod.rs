//! Local adapters for single-node deployment.

pub mod fs;
pub mod http;
pub mod process;

pub use fs::FsStorage;
pub use process::{CommandLine, CommandPreprocessor, ProcessWorker};
