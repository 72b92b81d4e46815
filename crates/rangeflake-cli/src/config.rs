use std::{net::Ipv4Addr, path::PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use rangeflake::{AddressRange, SnowflakeConfig, WorkerSource};

/// Command-line and environment settings for the `rangeflake` binary.
///
/// Either point `--config` at a properties file, or describe the instance
/// with the direct flags (`--start-timestamp` plus exactly one of `--app-id`
/// or `--ip-range`). The two styles cannot be mixed.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "rangeflake",
    version,
    about = "Allocate or decode Snowflake-style IDs"
)]
pub struct CliArgs {
    /// Properties file with `snowflake.*` keys.
    ///
    /// Environment variable: `RANGEFLAKE_CONFIG`
    #[arg(
        long,
        env = "RANGEFLAKE_CONFIG",
        conflicts_with_all = [
            "start_timestamp", "app_id", "ip_range", "business_type", "reserve_sign_bit",
            "timestamp_bits", "worker_bits", "sequence_bits", "registry_path",
        ]
    )]
    pub config: Option<PathBuf>,

    /// Epoch of the timestamp field, in Unix milliseconds.
    ///
    /// Environment variable: `START_TIMESTAMP`
    #[arg(long, env = "START_TIMESTAMP")]
    pub start_timestamp: Option<u64>,

    /// Explicit worker id (at least 1).
    ///
    /// Environment variable: `APP_ID`
    #[arg(long, env = "APP_ID")]
    pub app_id: Option<u64>,

    /// Address range whose offsets become worker ids, e.g.
    /// `192.168.0.1-192.168.0.100`.
    ///
    /// Environment variable: `IP_RANGE`
    #[arg(long, env = "IP_RANGE")]
    pub ip_range: Option<AddressRange>,

    /// Label that only one live process per host may hold.
    ///
    /// Environment variable: `BUSINESS_TYPE`
    #[arg(long, env = "BUSINESS_TYPE")]
    pub business_type: Option<String>,

    /// Keep the top bit clear so IDs are positive as signed 64-bit integers.
    ///
    /// Environment variable: `RESERVE_SIGN_BIT`
    #[arg(long, env = "RESERVE_SIGN_BIT")]
    pub reserve_sign_bit: Option<bool>,

    /// Environment variable: `TIMESTAMP_BITS`
    #[arg(long, env = "TIMESTAMP_BITS")]
    pub timestamp_bits: Option<u32>,

    /// Environment variable: `WORKER_BITS`
    #[arg(long, env = "WORKER_BITS")]
    pub worker_bits: Option<u32>,

    /// Environment variable: `SEQUENCE_BITS`
    #[arg(long, env = "SEQUENCE_BITS")]
    pub sequence_bits: Option<u32>,

    /// Shared registry of business labels.
    ///
    /// Environment variable: `REGISTRY_PATH`
    #[arg(long, env = "REGISTRY_PATH")]
    pub registry_path: Option<PathBuf>,

    /// Use this address instead of asking the OS for the routed one.
    ///
    /// Environment variable: `LOCAL_IP`
    #[arg(long, env = "LOCAL_IP")]
    pub local_ip: Option<Ipv4Addr>,

    /// Skip the business-label registry.
    #[arg(long, default_value_t = false)]
    pub no_register: bool,

    /// How concurrent callers are serialized.
    #[arg(long, value_enum, default_value_t = Strategy::Lock)]
    pub strategy: Strategy,

    /// Number of IDs to print, one per line.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: usize,

    /// Print the fields of this ID instead of allocating.
    #[arg(long, conflicts_with = "count")]
    pub decode: Option<u64>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One mutex around the whole allocation.
    Lock,
    /// Compare-and-swap over the last issued ID.
    Atomic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Allocate { count: usize },
    Decode { id: u64 },
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub snowflake: SnowflakeConfig,
    pub local_ip: Option<Ipv4Addr>,
    pub register: bool,
    pub strategy: Strategy,
    pub mode: Mode,
}

impl TryFrom<CliArgs> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let snowflake = match &args.config {
            Some(path) => SnowflakeConfig::from_properties_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => from_flags(&args)?,
        };

        let mode = match args.decode {
            Some(id) => Mode::Decode { id },
            None if args.count == 0 => bail!("--count must be greater than 0"),
            None => Mode::Allocate { count: args.count },
        };

        Ok(Self {
            snowflake,
            local_ip: args.local_ip,
            register: !args.no_register,
            strategy: args.strategy,
            mode,
        })
    }
}

fn from_flags(args: &CliArgs) -> anyhow::Result<SnowflakeConfig> {
    let Some(start_timestamp) = args.start_timestamp else {
        bail!("either --config or --start-timestamp is required");
    };
    let worker = match (args.app_id, args.ip_range) {
        (Some(id), None) => WorkerSource::AppId(id),
        (None, Some(range)) => WorkerSource::Range(range),
        (Some(_), Some(_)) => bail!("--app-id and --ip-range are mutually exclusive"),
        (None, None) => bail!("one of --app-id or --ip-range is required"),
    };

    let mut config = SnowflakeConfig::new(start_timestamp, worker);
    if let Some(business_type) = &args.business_type {
        config.business_type.clone_from(business_type);
    }
    if let Some(reserve) = args.reserve_sign_bit {
        config.reserve_sign_bit = reserve;
    }
    if let Some(bits) = args.timestamp_bits {
        config.timestamp_bits = bits;
    }
    if let Some(bits) = args.worker_bits {
        config.worker_bits = bits;
    }
    if let Some(bits) = args.sequence_bits {
        config.sequence_bits = bits;
    }
    if let Some(path) = &args.registry_path {
        config.registry_path.clone_from(path);
    }
    Ok(config)
}
