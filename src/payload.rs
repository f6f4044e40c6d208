// src/payload.rs

//! Payload containers owned by data nodes.
//!
//! A payload is the mutable result container of one data node: a taxa list,
//! a character matrix, a distance matrix, a set of trees, and so on. The
//! engine never looks inside a payload; it only needs to clear it before a
//! recompute, report its size, and hand shared references to executions.
//!
//! Payloads live behind `Arc<tokio::sync::RwLock<..>>`: the owning execution
//! takes the write lock for its whole run (the exclusive-writer contract),
//! while child executions and the coordinator take read locks.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

/// Kind tag for a payload, used instead of chained downcasts when deciding
/// what a data node holds and which default pipeline to set up for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Taxa,
    Characters,
    Distances,
    Trees,
    Splits,
    Network,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PayloadKind::Taxa => "taxa",
            PayloadKind::Characters => "characters",
            PayloadKind::Distances => "distances",
            PayloadKind::Trees => "trees",
            PayloadKind::Splits => "splits",
            PayloadKind::Network => "network",
        };
        f.write_str(s)
    }
}

/// Default pipeline shape the load-data logic sets up for an input of the
/// given kind: the chain of payload kinds downstream of the input node.
///
/// Loaders create one data node per entry and wire connectors between
/// consecutive nodes; the transforms themselves are supplied by the caller.
pub fn default_pipeline(kind: PayloadKind) -> &'static [PayloadKind] {
    match kind {
        PayloadKind::Taxa => &[],
        PayloadKind::Characters => {
            &[PayloadKind::Distances, PayloadKind::Splits, PayloadKind::Network]
        }
        PayloadKind::Distances => &[PayloadKind::Splits, PayloadKind::Network],
        PayloadKind::Trees => &[PayloadKind::Splits, PayloadKind::Network],
        PayloadKind::Splits => &[PayloadKind::Network],
        PayloadKind::Network => &[],
    }
}

/// A named, clearable, sized container of analysis results.
///
/// Implementations live outside the engine; the engine only relies on this
/// contract. `new_empty` must produce a fresh, empty payload of the same
/// concrete type (used when duplicating a workflow slice).
pub trait Payload: fmt::Debug + Send + Sync {
    fn kind(&self) -> PayloadKind;

    fn name(&self) -> &str;
    fn set_name(&mut self, name: String);

    /// Number of elements held (taxa, sites, trees, ...); 0 when empty.
    fn size(&self) -> usize;

    /// Drop all content. Executions clear the target payload before running
    /// so a transform never sees stale partial output.
    fn clear(&mut self);

    /// A fresh, empty payload of the same concrete type and name.
    fn new_empty(&self) -> Box<dyn Payload>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Shared handle to a payload, as stored on a data node and handed to
/// executions.
pub type SharedPayload = Arc<RwLock<Box<dyn Payload>>>;

/// Wrap a boxed payload into the shared handle used by the workflow.
pub fn share(payload: Box<dyn Payload>) -> SharedPayload {
    Arc::new(RwLock::new(payload))
}
