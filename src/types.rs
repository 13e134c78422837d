#![forbid(unsafe_code)]

//! Identifier newtypes shared by the plan graph and its serialized form.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an execution node, unique within one plan.
///
/// Ids are handed out by the owning plan's counter starting at 1; the value 0
/// never names a registered node.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

/// Identifier of a variable binding, unique within one query.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VariableId(pub u32);

impl NodeId {
    /// Returns true when the id could name a registered node.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u64 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl From<u32> for VariableId {
    fn from(value: u32) -> Self {
        VariableId(value)
    }
}

impl From<VariableId> for u32 {
    fn from(value: VariableId) -> Self {
        value.0
    }
}
