mod app;
mod config;
mod metrics;
mod runtime;
mod validation;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use metrics::MetricsError;
pub use runtime::{SubscriberError, SupplyError};
pub use validation::ValidationError;
