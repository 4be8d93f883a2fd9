//! Domain identifiers.
//!
//! Task IDs are ULIDs: sortable by creation time and cheap to generate without
//! coordination, which makes them handy for correlating log lines.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier attached to every submitted task.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Ulid);

impl TaskId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}
