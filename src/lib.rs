pub mod config;
pub mod history;
pub mod job;
pub mod kyc;
pub mod server;
pub mod sheets;

pub use config::Config;
pub use job::{ImportError, ImportJob, RunReport};
