//! Client configuration relevant to transaction event handling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::strategies::EventStrategy;

/// Commit timeout used when none is configured.
pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options of the client.
///
/// Deserializable from any self-describing format, e.g.:
///
/// ```
/// # use std::time::Duration;
/// # use ledger_gateway::{EventStrategy, GatewayOptions};
/// let options: GatewayOptions = serde_json::from_str(
///     r#"{ "commitTimeout": 10, "strategy": "network_scope_any_for_tx" }"#,
/// ).unwrap();
///
/// assert_eq!(options.commit_timeout, Some(Duration::from_secs(10)));
/// assert_eq!(options.strategy, EventStrategy::NetworkScopeAnyForTx);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayOptions {
    /// How long to wait for the commit of a transaction, in seconds.
    ///
    /// `None` means waiting indefinitely. Zero, negative and non-numeric
    /// values are deserialized as `None`.
    #[serde(default = "default_commit_timeout", with = "commit_timeout")]
    pub commit_timeout: Option<Duration>,
    /// Strategy used to decide when a transaction is committed.
    #[serde(default)]
    pub strategy: EventStrategy,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        GatewayOptions {
            commit_timeout: default_commit_timeout(),
            strategy: EventStrategy::default(),
        }
    }
}

impl GatewayOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.commit_timeout = timeout.filter(|timeout| !timeout.is_zero());
        self
    }

    pub fn with_strategy(mut self, strategy: EventStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

fn default_commit_timeout() -> Option<Duration> {
    Some(DEFAULT_COMMIT_TIMEOUT)
}

/// Custom [`serde`] (de)serializer for the commit timeout in seconds.
mod commit_timeout {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(TimeoutVisitor)
    }

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(timeout) => serializer.serialize_f64(timeout.as_secs_f64()),
            None => serializer.serialize_u64(0),
        }
    }

    struct TimeoutVisitor;

    impl<'de> Visitor<'de> for TimeoutVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("commit timeout in seconds")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok((v > 0).then(|| Duration::from_secs(v)))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(u64::try_from(v).ok().and_then(|v| (v > 0).then(|| Duration::from_secs(v))))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            if v > 0.0 {
                Ok(Duration::try_from_secs_f64(v).ok())
            } else {
                // Also covers NaN
                Ok(None)
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            match v.trim().parse::<f64>() {
                Ok(secs) => self.visit_f64(secs),
                Err(_) => Ok(None),
            }
        }

        fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(self)
        }
    }
}
