//! Pattern matching
//!
//! A [`Matcher`] is created once per reference pattern and reused for every
//! frame; dropping it releases the prepared templates.

pub mod matcher;
pub mod rotation;

pub use matcher::Matcher;
pub use rotation::RotatedTemplate;

use crate::bbox::MatchSet;
use robovision_core::geometry::Point2;
use serde::{Deserialize, Serialize};

/// Result of matching one pattern against one image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub count: usize,
    pub matches: MatchSet,
    /// Centers of `matches`, best first
    pub centers: Vec<Point2>,
}

impl MatchOutcome {
    pub fn from_matches(matches: MatchSet) -> Self {
        Self {
            count: matches.len(),
            centers: matches.centers(),
            matches,
        }
    }

    /// Center of the best match
    pub fn best_center(&self) -> Option<Point2> {
        self.centers.first().copied()
    }
}
