//! Tool errors

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool '{0}' was not found")]
    NotFound(PathBuf),
}
