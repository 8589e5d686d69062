//! Topic identifiers
//!
//! A topic names one logical stream: `"<provider>.<channel>.<instrument>"`,
//! dot-delimited, case-sensitive. The first two components may not contain
//! dots; the instrument keeps any remaining dots so every parsed topic
//! reassembles to its original string.

use crate::FeedError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Logical stream identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    /// Upstream data provider (selects the connection)
    pub provider: String,
    /// Channel within the provider (e.g. trades, quotes)
    pub channel: String,
    /// Instrument the stream covers
    pub instrument: String,
}

impl Topic {
    /// Build a topic from its components
    ///
    /// # Errors
    /// Returns `InvalidTopic` if any component is empty or if provider or
    /// channel contain a dot.
    pub fn new(provider: &str, channel: &str, instrument: &str) -> crate::Result<Self> {
        if provider.is_empty()
            || channel.is_empty()
            || instrument.is_empty()
            || provider.contains('.')
            || channel.contains('.')
        {
            return Err(FeedError::InvalidTopic(format!(
                "{provider}.{channel}.{instrument}"
            )));
        }
        Ok(Self {
            provider: provider.to_string(),
            channel: channel.to_string(),
            instrument: instrument.to_string(),
        })
    }
}

impl FromStr for Topic {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(provider), Some(channel), Some(instrument)) => {
                Topic::new(provider, channel, instrument)
            }
            _ => Err(FeedError::InvalidTopic(s.to_string())),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.provider, self.channel, self.instrument)
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| D::Error::custom("invalid topic"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_basic() {
        let topic: Topic = "binance.trades.BTCUSDT".parse().unwrap();
        assert_eq!(topic.provider, "binance");
        assert_eq!(topic.channel, "trades");
        assert_eq!(topic.instrument, "BTCUSDT");
    }

    #[test]
    fn test_instrument_keeps_extra_dots() {
        let topic: Topic = "p.c.EUR.USD".parse().unwrap();
        assert_eq!(topic.instrument, "EUR.USD");
        assert_eq!(topic.to_string(), "p.c.EUR.USD");
    }

    #[test]
    fn test_rejects_missing_components() {
        assert!("".parse::<Topic>().is_err());
        assert!("binance".parse::<Topic>().is_err());
        assert!("binance.trades".parse::<Topic>().is_err());
        assert!("binance..BTCUSDT".parse::<Topic>().is_err());
        assert!(".trades.BTCUSDT".parse::<Topic>().is_err());
        assert!("binance.trades.".parse::<Topic>().is_err());
    }

    #[test]
    fn test_case_sensitive() {
        let a: Topic = "p.c.btcusdt".parse().unwrap();
        let b: Topic = "p.c.BTCUSDT".parse().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_serde_as_string() {
        let topic: Topic = "p.c.i".parse().unwrap();
        let json = serde_json::to_string(&topic).unwrap();
        assert_eq!(json, "\"p.c.i\"");
        let back: Topic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, topic);
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            provider in "[A-Za-z0-9_-]{1,12}",
            channel in "[A-Za-z0-9_-]{1,12}",
            instrument in "[A-Za-z0-9_.-]{1,16}",
        ) {
            let s = format!("{provider}.{channel}.{instrument}");
            let topic: Topic = s.parse().unwrap();
            prop_assert_eq!(topic.to_string(), s);
        }
    }
}
