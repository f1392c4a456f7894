//! Snowflake identifiers.
//!
//! Every entity id is a 64-bit snowflake assigned by the remote service. The
//! upper 42 bits hold milliseconds since the service epoch, so ids sort by
//! creation time. On the wire ids travel as decimal strings; bare numbers
//! are accepted too.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CacheError;

/// Milliseconds between the Unix epoch and the service epoch (2015-01-01T00:00:00Z).
pub const SERVICE_EPOCH_MS: i64 = 1_420_070_400_000;

/// A raw snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Snowflake(u64);

impl Snowflake {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Creation time encoded in the id.
    pub fn created_at(self) -> DateTime<Utc> {
        let ms = (self.0 >> 22) as i64 + SERVICE_EPOCH_MS;
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }

    /// Smallest snowflake that could have been minted at `at`.
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        let ms = (at.timestamp_millis() - SERVICE_EPOCH_MS).max(0) as u64;
        Self(ms << 22)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Snowflake {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| CacheError::MalformedDelta(format!("invalid snowflake {s:?}")))
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Snowflake);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(Snowflake::new(raw))
            }

            pub const fn get(self) -> u64 {
                self.0.get()
            }

            pub fn created_at(self) -> DateTime<Utc> {
                self.0.created_at()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = CacheError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self::new(raw)
            }
        }
    };
}

id_type!(
    /// Id of a message. Primary cache key.
    MessageId
);
id_type!(
    /// Id of a text channel; selects the channel cache.
    ChannelId
);
id_type!(
    /// Id of a user account.
    UserId
);
id_type!(
    /// Id of a custom (server-uploaded) emoji.
    EmojiId
);
