mod controller;
mod error;
mod gateway;
mod namer;
mod notify;
mod poller;
#[cfg(test)]
mod testing;

pub use controller::*;
pub use error::*;
pub use gateway::*;
pub use namer::*;
pub use notify::*;
pub use poller::*;
