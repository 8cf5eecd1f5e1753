//! Lowering of pre-rasterization shader programs to NGG primitive shaders.
//!
//! [`lower_ngg`] rewrites a vertex, tessellation evaluation or geometry program in place so
//! that it allocates its output space, exports its primitives and vertices, and compacts
//! them when the geometry shader emits a runtime dependent amount. The `software` feature
//! adds an executor that runs lowered programs on a simulated workgroup.

pub use nggpass_core::*;

#[cfg(feature = "software")]
pub use nggpass_software as software;
