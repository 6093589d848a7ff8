pub mod compare;
pub mod orchestrator;
pub mod pipeline;
pub mod result;
pub mod stage;
pub mod testcase;

pub use orchestrator::*;
pub use pipeline::*;
pub use result::*;
pub use stage::*;
pub use testcase::*;
