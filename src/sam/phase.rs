//! The four S.A.M. phases and their fixed order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::engine::EngineId;

/// ANCHOR → INHERIT → COMPOUND → ARRIVE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamPhase {
    /// Locate where each claim first entered the record.
    Anchor,
    /// Follow unverified adoption of claims into later documents.
    Inherit,
    /// Score accumulated institutional authority.
    Compound,
    /// Link claims to outcomes through explicit references.
    Arrive,
}

impl SamPhase {
    pub const ALL: [SamPhase; 4] = [Self::Anchor, Self::Inherit, Self::Compound, Self::Arrive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anchor => "anchor",
            Self::Inherit => "inherit",
            Self::Compound => "compound",
            Self::Arrive => "arrive",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Anchor => 0,
            Self::Inherit => 1,
            Self::Compound => 2,
            Self::Arrive => 3,
        }
    }

    pub fn next(&self) -> Option<SamPhase> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn previous(&self) -> Option<SamPhase> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// The engine that owns this phase's records by default.
    pub fn primary_engine(&self) -> EngineId {
        match self {
            Self::Anchor => EngineId::Anchor,
            Self::Inherit => EngineId::Inherit,
            Self::Compound => EngineId::Compound,
            Self::Arrive => EngineId::Arrive,
        }
    }
}

impl fmt::Display for SamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SamPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anchor" => Ok(Self::Anchor),
            "inherit" => Ok(Self::Inherit),
            "compound" => Ok(Self::Compound),
            "arrive" => Ok(Self::Arrive),
            _ => Err(format!(
                "Invalid phase '{}'. Valid values: anchor, inherit, compound, arrive",
                s
            )),
        }
    }
}
