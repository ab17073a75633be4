//! Age categories and the age → category routing table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entities::Competition;

/// Youngest age that can be enrolled.
pub const MIN_AGE: i32 = 6;
/// Oldest age that can be enrolled.
pub const MAX_AGE: i32 = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeCategory {
    #[serde(rename = "6-8 years old")]
    Young,
    #[serde(rename = "9-11 years old")]
    Middle,
    #[serde(rename = "12-15 years old")]
    Senior,
}

impl AgeCategory {
    pub const ALL: [AgeCategory; 3] = [Self::Young, Self::Middle, Self::Senior];

    /// Category for an age, or `None` outside 6..=15.
    pub fn for_age(age: i32) -> Option<Self> {
        match age {
            6..=8 => Some(Self::Young),
            9..=11 => Some(Self::Middle),
            12..=15 => Some(Self::Senior),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Young => "6-8 years old",
            Self::Middle => "9-11 years old",
            Self::Senior => "12-15 years old",
        }
    }
}

impl fmt::Display for AgeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AgeCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.label() == s)
            .ok_or_else(|| format!("unknown age category: {s}"))
    }
}

/// Pick the first competition of `competition_type` whose category matches
/// the participant's age.
pub fn select_competition<'a>(
    competitions: &'a [Competition],
    age: i32,
    competition_type: &str,
) -> Option<&'a Competition> {
    let category = AgeCategory::for_age(age)?;
    competitions
        .iter()
        .find(|c| c.competition_type == competition_type && c.age_category == category)
}
