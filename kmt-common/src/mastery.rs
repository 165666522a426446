//! Mastery levels and progress percentages
//!
//! A technique without a progress row counts as [`Mastery::NotSeen`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How well a student knows a technique, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mastery {
    #[default]
    NotSeen,
    Seen,
    Known,
    Mastered,
}

impl Mastery {
    pub const ALL: [Mastery; 4] = [Mastery::NotSeen, Mastery::Seen, Mastery::Known, Mastery::Mastered];

    /// Sort rank for the "to work" list, weakest first (0..=3)
    pub fn score(self) -> u8 {
        match self {
            Mastery::NotSeen => 0,
            Mastery::Seen => 1,
            Mastery::Known => 2,
            Mastery::Mastered => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mastery::NotSeen => "NOT_SEEN",
            Mastery::Seen => "SEEN",
            Mastery::Known => "KNOWN",
            Mastery::Mastered => "MASTERED",
        }
    }

    /// KNOWN or MASTERED
    pub fn is_known_plus(self) -> bool {
        matches!(self, Mastery::Known | Mastery::Mastered)
    }
}

impl fmt::Display for Mastery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown mastery level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMasteryError(pub String);

impl fmt::Display for ParseMasteryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid mastery level: {}", self.0)
    }
}

impl std::error::Error for ParseMasteryError {}

impl FromStr for Mastery {
    type Err = ParseMasteryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mastery::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ParseMasteryError(s.to_string()))
    }
}

/// Per-belt or per-module progress figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub known_plus_percent: u32,
    pub mastered_percent: u32,
    pub total_techniques: usize,
}

impl ProgressSummary {
    pub fn from_levels(levels: &[Mastery]) -> Self {
        Self {
            known_plus_percent: known_plus_percent(levels),
            mastered_percent: mastered_percent(levels),
            total_techniques: levels.len(),
        }
    }
}

/// Rounded percentage of `part` over `total`, 0 when `total` is 0
pub fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

/// Share of techniques at KNOWN or above
pub fn known_plus_percent(levels: &[Mastery]) -> u32 {
    let known_plus = levels.iter().filter(|l| l.is_known_plus()).count();
    percent(known_plus, levels.len())
}

/// Share of techniques at MASTERED
pub fn mastered_percent(levels: &[Mastery]) -> u32 {
    let mastered = levels.iter().filter(|l| **l == Mastery::Mastered).count();
    percent(mastered, levels.len())
}
