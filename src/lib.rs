pub mod approvals;
pub mod audit;
pub mod authorization;
pub mod compliance;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod policy;
pub mod sinks;
pub mod workflow;

pub use config::{AppConfig, Environment};
pub use context::RequestContext;
pub use database::Database;
pub use error::{CoreError, CoreResult};
