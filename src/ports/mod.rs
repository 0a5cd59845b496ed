//! Ports - Traits implemented by adapters.

pub mod preprocess;
pub mod storage;
pub mod worker;
