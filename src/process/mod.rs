//! Child process spawning and supervision.

mod command;
mod state;
mod supervisor;

pub use command::*;
pub use state::*;
pub use supervisor::*;
