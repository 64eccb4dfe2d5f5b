//! Stream cursor — tracks the runner's position in the remote stream.

use serde::{Deserialize, Serialize};

/// A position marker into the remote event stream.
///
/// Cursors are produced by the remote service and are opaque to handlers:
/// the only operations the runner relies on are equality and ordering.
/// Successive `Data` messages carry non-decreasing cursors; an `Invalidate`
/// message's cursor marks the position from which prior writes are undone.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cursor(u64);

impl Cursor {
    /// Create a cursor at the given order key.
    pub fn new(order_key: u64) -> Self {
        Self(order_key)
    }

    /// The raw order key. Storage backends persist this value verbatim.
    pub fn order_key(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Cursor {
    fn from(order_key: u64) -> Self {
        Self(order_key)
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
