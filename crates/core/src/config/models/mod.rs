pub mod app_config;
pub mod broker;
pub mod observability;
pub mod runtime;

pub use app_config::AppConfig;
pub use broker::{BrokerConfig, ResultBackendConfig};
pub use observability::ObservabilityConfig;
pub use runtime::{BeatConfig, WorkerConfig};
