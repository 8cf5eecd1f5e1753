//! Executes lowered primitive shader programs the way the hardware runs a workgroup: lanes
//! grouped into waves, waves meeting at barriers, shared memory checked for races.

mod dispatch;
mod error;
mod memory;
mod vm;
mod workgroup;

pub use dispatch::*;
pub use error::SimError;
pub use memory::SharedMemory;
pub use vm::*;
pub use workgroup::*;
