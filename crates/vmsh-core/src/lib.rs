mod error;
mod inventory;
mod pool;
mod task;

pub use error::*;
pub use inventory::*;
pub use pool::*;
pub use task::*;
