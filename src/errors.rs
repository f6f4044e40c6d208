// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::NodeId;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Node {0} is not a connector")]
    NotAConnector(NodeId),

    #[error("Node {0} is not a data node")]
    NotADataNode(NodeId),

    #[error("Data node {0} already has a parent connector")]
    AlreadyAttached(NodeId),

    #[error("Executor channel closed")]
    ExecutorClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WorkflowError>;
