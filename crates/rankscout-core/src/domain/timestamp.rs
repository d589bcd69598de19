use std::fmt::{Display, Formatter};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::ValidationError;

/// Unix timestamp of 2011-01-01T00:00:00Z, the origin of the provider's minute clock.
pub const PROVIDER_EPOCH_UNIX: i64 = 1_293_840_000;

/// Instant normalized to UTC; serialized as RFC3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Parses any RFC3339 timestamp; non-UTC offsets are converted.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        OffsetDateTime::parse(input.trim(), &Rfc3339)
            .map(Self::from)
            .map_err(|_| ValidationError::InvalidTimestamp {
                value: input.to_owned(),
            })
    }

    /// Converts a provider clock value (minutes since 2011-01-01 UTC).
    ///
    /// Returns `None` for values that fall outside the representable range.
    pub fn from_provider_minutes(minutes: i64) -> Option<Self> {
        let seconds = minutes.checked_mul(60)?.checked_add(PROVIDER_EPOCH_UNIX)?;
        OffsetDateTime::from_unix_timestamp(seconds).ok().map(Self)
    }

    pub fn to_provider_minutes(self) -> i64 {
        (self.0.unix_timestamp() - PROVIDER_EPOCH_UNIX).div_euclid(60)
    }

    /// Elapsed time between `self` and `now`, saturating at zero for future values.
    pub fn age_at(self, now: UtcDateTime) -> Duration {
        let age = now.0 - self.0;
        if age.is_negative() {
            Duration::ZERO
        } else {
            age
        }
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.0.unix_timestamp().to_string())
    }
}

impl From<OffsetDateTime> for UtcDateTime {
    fn from(value: OffsetDateTime) -> Self {
        Self(value.to_offset(UtcOffset::UTC))
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(D::Error::custom)
    }
}
