pub mod broker;
pub mod result_store;
pub mod task_handler;

pub use broker::*;
pub use result_store::*;
pub use task_handler::*;
