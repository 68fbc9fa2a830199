// Library exports for sqlproxy-fe
// The binary and the integration tests build on these modules.

pub mod error;
pub mod config;
pub mod mysql;
pub mod http;
pub mod query;
pub mod metadata;
pub mod metrics;

// Re-export commonly used types
pub use error::{ProxyError, Result};
pub use config::Config;
pub use metadata::{CatalogManager, MetadataProvider};
pub use metrics::MetricsRegistry;
pub use mysql::{MysqlServer, StateMachine};
pub use query::{Planner, PlannerError, PlannerOutput};
