mod api_type;
mod enrichment;
mod frame;
mod task;
mod worker;

pub use api_type::*;
pub use enrichment::*;
pub use frame::*;
pub use task::*;
pub use worker::*;
