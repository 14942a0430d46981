use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DAY: u64 = 24 * 60 * 60;

/// Retention class selecting which physical table a write lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Ttl {
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
    #[serde(rename = "90d")]
    NinetyDays,
    #[serde(rename = "180d")]
    HalfYear,
    #[serde(rename = "365d")]
    Year,
}

impl Ttl {
    pub const ALL: [Ttl; 6] = [
        Ttl::ThreeDays,
        Ttl::SevenDays,
        Ttl::ThirtyDays,
        Ttl::NinetyDays,
        Ttl::HalfYear,
        Ttl::Year,
    ];

    pub fn days(&self) -> u64 {
        match self {
            Self::ThreeDays => 3,
            Self::SevenDays => 7,
            Self::ThirtyDays => 30,
            Self::NinetyDays => 90,
            Self::HalfYear => 180,
            Self::Year => 365,
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.days() * DAY)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThreeDays => "3d",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
            Self::NinetyDays => "90d",
            Self::HalfYear => "180d",
            Self::Year => "365d",
        }
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTtlError(pub String);

impl fmt::Display for ParseTtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown ttl {:?}", self.0)
    }
}

impl std::error::Error for ParseTtlError {}

impl FromStr for Ttl {
    type Err = ParseTtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ttl::ALL
            .into_iter()
            .find(|ttl| ttl.as_str() == s)
            .ok_or_else(|| ParseTtlError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for ttl in Ttl::ALL {
            assert_eq!(ttl.to_string().parse::<Ttl>(), Ok(ttl));
        }
        assert!("2d".parse::<Ttl>().is_err());
    }

    #[test]
    fn test_serde_uses_short_names() {
        assert_eq!(serde_json::to_string(&Ttl::NinetyDays).unwrap(), "\"90d\"");
        let ttl: Ttl = serde_json::from_str("\"180d\"").unwrap();
        assert_eq!(ttl, Ttl::HalfYear);
        assert_eq!(Ttl::SevenDays.retention(), Duration::from_secs(7 * 86_400));
    }
}
