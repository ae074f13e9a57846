pub mod envelope;
pub mod job_result;
pub mod schedule;
pub mod task;

pub use envelope::*;
pub use job_result::*;
pub use schedule::*;
pub use task::*;
