//! Bus topics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of channels messages are published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Earnings results and guidance.
    Earnings,
    /// Company press releases.
    PressRelease,
    /// General news.
    News,
    /// Regulatory filings.
    Filing,
    /// Scheduled events.
    Calendar,
}

impl Channel {
    /// Every channel, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Earnings,
        Self::PressRelease,
        Self::News,
        Self::Filing,
        Self::Calendar,
    ];

    /// Returns the wire name of the channel.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Earnings => "earnings",
            Self::PressRelease => "press-release",
            Self::News => "news",
            Self::Filing => "filing",
            Self::Calendar => "calendar",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown channel name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown channel '{0}' (expected one of: earnings, press-release, news, filing, calendar)")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|channel| channel.as_str() == normalized)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for channel in Channel::ALL {
            assert_eq!(channel.as_str().parse::<Channel>().unwrap(), channel);
        }
    }

    #[test]
    fn test_parse_is_lenient_about_case_and_underscores() {
        assert_eq!(
            "Press_Release".parse::<Channel>().unwrap(),
            Channel::PressRelease
        );
    }

    #[test]
    fn test_unknown_channel() {
        let err = "weather".parse::<Channel>().unwrap_err();
        assert!(err.to_string().contains("weather"));
    }

    #[test]
    fn test_serde_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&Channel::PressRelease).unwrap(),
            "\"press-release\""
        );
    }
}
