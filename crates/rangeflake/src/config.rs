use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    error::ConfigurationError,
    layout::{DEFAULT_SEQUENCE_BITS, DEFAULT_TIMESTAMP_BITS, DEFAULT_WORKER_BITS},
    registry::default_registry_path,
    worker::{AddressRange, WorkerSource},
};

/// Business label used when none is configured.
pub const DEFAULT_BUSINESS_TYPE: &str = "default";

/// Prefix shared by every recognized property key.
pub const PROPERTY_PREFIX: &str = "snowflake.";

/// Everything needed to build an allocator.
///
/// Fields are only checked when the allocator is built (see
/// [`Bootstrap`](crate::Bootstrap)), so a config can be assembled freely and
/// validated once.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SnowflakeConfig {
    /// Epoch the timestamp field counts from, in Unix milliseconds.
    pub start_timestamp: u64,
    pub worker: WorkerSource,
    pub business_type: String,
    pub reserve_sign_bit: bool,
    pub timestamp_bits: u32,
    pub worker_bits: u32,
    pub sequence_bits: u32,
    pub registry_path: PathBuf,
}

impl SnowflakeConfig {
    /// A config with default widths, label, and registry path.
    ///
    /// ```
    /// use rangeflake::{SnowflakeConfig, WorkerSource};
    ///
    /// let config = SnowflakeConfig::new(1_735_689_600_000, WorkerSource::AppId(5))
    ///     .with_business_type("orders")
    ///     .with_bits(42, 9, 12);
    /// assert_eq!(config.business_type, "orders");
    /// assert!(config.reserve_sign_bit);
    /// ```
    pub fn new(start_timestamp: u64, worker: WorkerSource) -> Self {
        Self {
            start_timestamp,
            worker,
            business_type: DEFAULT_BUSINESS_TYPE.to_owned(),
            reserve_sign_bit: true,
            timestamp_bits: DEFAULT_TIMESTAMP_BITS,
            worker_bits: DEFAULT_WORKER_BITS,
            sequence_bits: DEFAULT_SEQUENCE_BITS,
            registry_path: default_registry_path(),
        }
    }

    #[must_use]
    pub fn with_business_type(mut self, business_type: impl Into<String>) -> Self {
        self.business_type = business_type.into();
        self
    }

    #[must_use]
    pub fn with_reserve_sign_bit(mut self, reserve: bool) -> Self {
        self.reserve_sign_bit = reserve;
        self
    }

    #[must_use]
    pub fn with_bits(mut self, timestamp_bits: u32, worker_bits: u32, sequence_bits: u32) -> Self {
        self.timestamp_bits = timestamp_bits;
        self.worker_bits = worker_bits;
        self.sequence_bits = sequence_bits;
        self
    }

    #[must_use]
    pub fn with_registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_path = path.into();
        self
    }

    /// Loads a `key=value` properties file.
    ///
    /// Recognized keys, all prefixed with `snowflake.`:
    ///
    /// | key                | default                    |
    /// |--------------------|----------------------------|
    /// | `startTimestamp`   | required                   |
    /// | `appId`            | exactly one of these two   |
    /// | `ipRanges`         | (`a.b.c.d-e.f.g.h`)        |
    /// | `businessType`     | `default`                  |
    /// | `reserveSignBit`   | `true`                     |
    /// | `timestampBits`    | 41                         |
    /// | `workerBits`       | 10                         |
    /// | `sequenceBits`     | 12                         |
    /// | `registryFilePath` | `<temp dir>/snowflake.txt` |
    ///
    /// Lines are read as `.env` entries, so unquoted or double-quoted values
    /// expand `$VAR` and `${VAR}` from the environment. Wrap a value in
    /// single quotes to keep a `$` literal:
    ///
    /// ```properties
    /// snowflake.registryFilePath='/srv/$ids/snowflake.txt'
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Load`] if the file cannot be read or
    /// parsed, and any error of [`Self::from_properties`].
    pub fn from_properties_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let load = |source| ConfigurationError::Load {
            path: path.to_path_buf(),
            source,
        };
        let pairs = dotenvy::from_path_iter(path)
            .map_err(load)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(load)?;
        Self::from_properties(pairs)
    }

    /// Builds a config from already-parsed properties. Unknown keys are
    /// ignored and blank values count as absent.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::MissingField`] without `startTimestamp`, or
    ///   without either `appId` or `ipRanges`
    /// - [`ConfigurationError::ConflictingWorkerSource`] with both
    /// - [`ConfigurationError::InvalidValue`] for unparsable numbers/booleans
    /// - [`ConfigurationError::MalformedRange`] for a bad `ipRanges`
    pub fn from_properties<I, K, V>(pairs: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let props = Properties::new(pairs);

        let start_timestamp = props
            .parse("startTimestamp", &[])?
            .ok_or(ConfigurationError::MissingField("startTimestamp"))?;

        let worker = match (props.get("appId", &[]), props.get("ipRanges", &[])) {
            (Some(_), Some(_)) => return Err(ConfigurationError::ConflictingWorkerSource),
            (Some(_), None) => WorkerSource::AppId(
                props
                    .parse("appId", &[])?
                    .ok_or(ConfigurationError::MissingField("appId"))?,
            ),
            (None, Some(range)) => WorkerSource::Range(range.parse::<AddressRange>()?),
            (None, None) => return Err(ConfigurationError::MissingField("appId or ipRanges")),
        };

        let mut config = Self::new(start_timestamp, worker);
        if let Some(business_type) = props.get("businessType", &[]) {
            config.business_type = business_type.to_owned();
        }
        if let Some(reserve) = props.get("reserveSignBit", &["useKeepBit"]) {
            config.reserve_sign_bit = parse_bool(reserve)
                .ok_or_else(|| invalid("reserveSignBit", reserve))?;
        }
        if let Some(bits) = props.parse("timestampBits", &["timestampBit"])? {
            config.timestamp_bits = bits;
        }
        if let Some(bits) = props.parse("workerBits", &["ipBit"])? {
            config.worker_bits = bits;
        }
        if let Some(bits) = props.parse("sequenceBits", &["millisecondBit"])? {
            config.sequence_bits = bits;
        }
        if let Some(path) = props.get("registryFilePath", &["ipSnowflakeTemp"]) {
            config.registry_path = PathBuf::from(path);
        }
        Ok(config)
    }
}

struct Properties(HashMap<String, String>);

impl Properties {
    fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// First non-blank value among `key` and its legacy aliases.
    fn get(&self, key: &'static str, aliases: &[&str]) -> Option<&str> {
        core::iter::once(key)
            .chain(aliases.iter().copied())
            .filter_map(|k| self.0.get(&format!("{PROPERTY_PREFIX}{k}")))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(
        &self,
        key: &'static str,
        aliases: &[&str],
    ) -> Result<Option<T>, ConfigurationError> {
        self.get(key, aliases)
            .map(|v| v.parse().map_err(|_| invalid(key, v)))
            .transpose()
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        key,
        value: value.to_owned(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
