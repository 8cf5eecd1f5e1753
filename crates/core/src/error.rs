use crate::config::ConfigError;
use crate::ir::{IrError, Stage};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LowerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid program: {0}")]
    Validation(#[from] IrError),
    #[error("geometry shader never sets the vertex count of stream {stream}")]
    MissingVertexCount { stream: u8 },
    #[error("{0:?} programs are not lowered to primitive shaders")]
    UnsupportedStage(Stage),
    #[error("{0} is not implemented")]
    Unimplemented(&'static str),
}
