pub mod ir;
pub mod ngg;

mod config;
mod error;
mod layout;
mod subgroup;

pub use config::{ConfigError, GsConfig, MAX_OUTPUT_VERTICES, MAX_STREAMS, MAX_WORKGROUP_SIZE, NggConfig, ProvokingVertex, Topology};
pub use error::LowerError;
pub use layout::{Region, SharedLayout, SharedLayoutBuilder};
pub use ngg::{NggInfo, lower_ngg};
pub use subgroup::{Subgroup, WaveTarget};
