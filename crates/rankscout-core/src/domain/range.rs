use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Number of sub-segments a rank interval is split into.
pub const SEGMENT_COUNT: usize = 3;

/// Optional rank bounds, inclusive on both ends. Lower rank means more popular.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RankRange {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl RankRange {
    pub fn new(min: Option<u64>, max: Option<u64>) -> Result<Self, ValidationError> {
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(ValidationError::InvertedRange {
                    field: "rank",
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
        }
        Ok(Self { min, max })
    }

    pub const fn unbounded() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    /// Both bounds, when present.
    pub fn bounds(self) -> Option<(u64, u64)> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }

    /// Width of a fully bounded range.
    pub fn span(self) -> Option<u64> {
        self.bounds().map(|(min, max)| max - min)
    }

    pub fn contains(self, rank: u64) -> bool {
        self.min.map_or(true, |min| rank >= min) && self.max.map_or(true, |max| rank <= max)
    }

    /// Splits a bounded range into contiguous, non-overlapping segments of equal width.
    ///
    /// The last segment absorbs the remainder so the union covers the whole range.
    pub fn segments(self) -> Option<[Segment; SEGMENT_COUNT]> {
        let (min, max) = self.bounds()?;
        // Offsets stay in u128: a range ending at u64::MAX has a length of 2^64.
        let len = u128::from(max - min) + 1;
        let offset = |index: usize| len * index as u128 / SEGMENT_COUNT as u128;

        Some(std::array::from_fn(|index| {
            let (start, end) = (offset(index), offset(index + 1));
            // start < len, so min + start never exceeds max.
            let lower = min + start as u64;
            if end == start {
                return Segment {
                    index,
                    min: lower,
                    max: lower.saturating_sub(1),
                    empty: true,
                };
            }
            Segment {
                index,
                min: lower,
                max: min + (end - 1) as u64,
                empty: false,
            }
        }))
    }
}

/// One equal-width slice of a requested rank interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub min: u64,
    pub max: u64,
    #[serde(skip)]
    empty: bool,
}

impl Segment {
    pub fn contains(&self, rank: u64) -> bool {
        !self.empty && rank >= self.min && rank <= self.max
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn rank_range(&self) -> RankRange {
        RankRange {
            min: Some(self.min),
            max: Some(self.max),
        }
    }

    pub const fn label(&self) -> &'static str {
        match self.index {
            0 => "low",
            1 => "mid",
            _ => "high",
        }
    }
}

/// Returns the segment index that `rank` falls into.
pub fn segment_of(segments: &[Segment], rank: u64) -> Option<usize> {
    segments
        .iter()
        .find(|segment| segment.contains(rank))
        .map(|segment| segment.index)
}

/// Optional price bounds in the marketplace currency.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PriceRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Result<Self, ValidationError> {
        for (field, value) in [("price_min", min), ("price_max", max)] {
            if let Some(value) = value {
                if !value.is_finite() {
                    return Err(ValidationError::NonFiniteValue { field });
                }
                if value < 0.0 {
                    return Err(ValidationError::NegativeValue { field });
                }
            }
        }
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(ValidationError::InvertedRange {
                    field: "price",
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
        }
        Ok(Self { min, max })
    }

    pub fn contains(self, price: f64) -> bool {
        self.min.map_or(true, |min| price >= min) && self.max.map_or(true, |max| price <= max)
    }

    /// Bounds converted to the provider's integer cent encoding.
    pub fn to_cents(self) -> (Option<i64>, Option<i64>) {
        let cents = |value: f64| (value * 100.0).round() as i64;
        (self.min.map(cents), self.max.map(cents))
    }
}

/// Discovery strategy selecting velocity tiers and recommendation thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Fast-moving inventory: tight rank tiers, lower ROI bar.
    Velocity,
    #[default]
    Balanced,
    /// Long-tail inventory: generous rank tiers, higher ROI bar.
    Patient,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Self::Velocity, Self::Balanced, Self::Patient];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Velocity => "velocity",
            Self::Balanced => "balanced",
            Self::Patient => "patient",
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "velocity" => Ok(Self::Velocity),
            "balanced" => Ok(Self::Balanced),
            "patient" => Ok(Self::Patient),
            _ => Err(ValidationError::InvalidStrategy {
                value: value.to_owned(),
            }),
        }
    }
}
