//! Local developer analytics collector

pub mod auth;
pub mod clock;
pub mod collector;
pub mod config;
pub mod helpers;
pub mod job;
pub mod logger;
mod prelude;
pub mod process;
pub mod remote;
pub mod storage;

pub use collector::{CollectionEngine, EngineDependencies};
pub use config::CollectorConfig;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
