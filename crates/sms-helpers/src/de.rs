use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

/// Accepts a duration as bare seconds (`30`) or humantime text (`"30s"`,
/// `"2m"`). Missing fields should pair this with a `#[serde(default)]`.
pub fn deserialize_duration<'de, D>(
    deserializer: D
) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(value) => {
            humantime::parse_duration(value.trim()).map_err(D::Error::custom)
        }
    }
}
