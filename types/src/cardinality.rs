// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Component cardinality specs
//!
//! A stack describes how many hosts may run each component with a small
//! constraint string: `"1"` (exactly one), `"1+"` (at least one), `"0-2"`
//! (an inclusive range), or `"ALL"` (every host in the assignment scope).
//! Cardinality is used to *validate* a host-group assignment; it never
//! places hosts itself.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Parsed form of a cardinality constraint string
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema,
)]
pub struct Cardinality {
    min: u32,
    max: Option<u32>,
    /// `"ALL"` asks for the component on every host in scope.  Whether that
    /// is true depends on auto-deploy behavior owned by the stack layer, so
    /// group-level validation treats it as unconstrained.
    all: bool,
}

impl Cardinality {
    /// Returns whether `actual` hosts satisfy this constraint.
    pub fn satisfied_by(&self, actual: usize) -> bool {
        if self.all {
            return true;
        }
        let actual = u32::try_from(actual).unwrap_or(u32::MAX);
        actual >= self.min && self.max.map_or(true, |max| actual <= max)
    }

    /// The smallest host count this constraint accepts
    pub fn minimum(&self) -> u32 {
        self.min
    }

    pub fn maximum(&self) -> Option<u32> {
        self.max
    }

    pub fn is_all(&self) -> bool {
        self.all
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all {
            return write!(f, "ALL");
        }
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", self.min),
            Some(max) => write!(f, "{}-{}", self.min, max),
            None => write!(f, "{}+", self.min),
        }
    }
}

/// Error returned when a cardinality string cannot be parsed
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unparseable cardinality {value:?}")]
pub struct CardinalityParseError {
    pub value: String,
}

impl FromStr for Cardinality {
    type Err = CardinalityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CardinalityParseError { value: s.to_string() };

        if s == "ALL" {
            return Ok(Cardinality { min: 0, max: None, all: true });
        }

        if let Some(min) = s.strip_suffix('+') {
            let min = min.parse().map_err(|_| err())?;
            return Ok(Cardinality { min, max: None, all: false });
        }

        if let Some((min, max)) = s.split_once('-') {
            let min: u32 = min.parse().map_err(|_| err())?;
            let max: u32 = max.parse().map_err(|_| err())?;
            if max < min {
                return Err(err());
            }
            return Ok(Cardinality { min, max: Some(max), all: false });
        }

        let exact: u32 = s.parse().map_err(|_| err())?;
        Ok(Cardinality { min: exact, max: Some(exact), all: false })
    }
}
