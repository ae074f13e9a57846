//! 配置模型与加载
//!
//! 加载顺序：内置默认值 → TOML 配置文件 → 环境变量（前缀 `JOBCAST__`，层级分隔符 `__`）。
//!
//! ```toml
//! timezone = "UTC"
//!
//! [broker]
//! url = "redis://127.0.0.1:6379/0"
//!
//! [[beat.schedule]]
//! name = "heartbeat"
//! task = "dummy_scheduled_task"
//! args = ["hello BEAT"]
//! trigger = { interval = 10 }
//! ```

pub mod models;
pub mod timezone;

pub use models::{
    AppConfig, BeatConfig, BrokerConfig, ObservabilityConfig, ResultBackendConfig, WorkerConfig,
};
pub use timezone::parse_timezone;
