//! 后台任务调度与执行系统的组装层：内置任务、默认周期调度、应用启动与优雅关闭

pub mod app;
pub mod shutdown;
pub mod tasks;

pub use app::{build_registry, AppMode, Application};
pub use shutdown::ShutdownManager;
