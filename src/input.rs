//! Provides a means to read, parse and hold configuration options for scans.
use clap::{Parser, ValueEnum};
use itertools::Itertools;
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::limiter::{DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT};
use crate::strategy::MulticastProtocol;

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// Represents how scan targets are generated.
///   - Template substitutes every address of a private range into a URL.
///   - Multicast crosses multicast address ranges with a port list.
///   - Batch replays stream URLs read from a file.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Template,
    Multicast,
    Batch,
}

pub type Ports = Vec<u16>;

/// Parses a comma-delimited list of ports and `start-end` ranges.
///
/// Ports keep the order they were given in; repeats are dropped.
#[cfg(not(tarpaulin_include))]
pub fn parse_ports(input: &str) -> Result<Ports, String> {
    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            ports.extend(parse_port_range(part)?);
        } else {
            ports.push(parse_single_port(part)?);
        }
    }

    if ports.is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    Ok(ports.into_iter().unique().collect())
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let Some((start, end)) = range_str.split_once('-') else {
        return Err(format!("Invalid range format '{range_str}'"));
    };
    if end.contains('-') {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 8000-8010.",
        ));
    }

    let start: u16 = start
        .trim()
        .parse()
        .map_err(|_| format!("Invalid start port '{start}' in range '{range_str}'"))?;
    let end: u16 = end
        .trim()
        .parse()
        .map_err(|_| format!("Invalid end port '{end}' in range '{range_str}'"))?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    if start < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok((start..=end).collect())
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "iptvscan",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Finds working IPTV streams on your own network.
/// Template mode only accepts private (RFC1918) ranges. Multicast scans can
/// generate a lot of traffic, scan only networks you operate.
pub struct Opts {
    /// How targets are generated.
    #[arg(short, long, value_enum, ignore_case = true, default_value = "template")]
    pub mode: ScanMode,

    /// URL pattern containing {ip}. Example: http://192.168.1.1:4022/rtp/{ip}
    #[arg(short = 'u', long)]
    pub base_url: Option<String>,

    /// First address substituted into the template.
    #[arg(long)]
    pub start_ip: Option<String>,

    /// Last address substituted into the template, inclusive.
    #[arg(long)]
    pub end_ip: Option<String>,

    /// Multicast transport.
    #[arg(long, value_enum, ignore_case = true, default_value = "udp")]
    pub protocol: MulticastProtocol,

    /// A comma-delimited list of multicast addresses, A-B ranges or CIDRs.
    #[arg(short, long, value_delimiter = ',')]
    pub ranges: Vec<String>,

    /// Multicast ports and port ranges. Examples: 5000,5002 or 8000-8010
    #[arg(short, long, value_parser = parse_ports)]
    pub ports: Option<Ports>,

    /// Id of a multicast preset to scan instead of --ranges/--ports.
    #[arg(long)]
    pub preset: Option<String>,

    /// JSON file holding multicast presets.
    #[arg(long, value_parser)]
    pub preset_file: Option<PathBuf>,

    /// File with one stream URL per line, for batch mode.
    #[arg(short, long, value_parser)]
    pub input: Option<PathBuf>,

    /// Maximum number of probes in flight (1-50).
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Seconds before a probe is abandoned (1-60). RTP probes always get at least 20.
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Probe every multicast address on every port instead of learning the
    /// live ports from the first address.
    #[arg(long)]
    pub no_smart_scan: bool,

    /// Path to the ffprobe binary. Looked up on PATH when omitted.
    #[arg(long, value_parser)]
    pub ffprobe: Option<PathBuf>,

    /// Greppable mode. Only output valid stream URLs.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Print every outcome as a JSON line.
    #[arg(long)]
    pub json: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(long, value_parser)]
    pub config_path: Option<PathBuf>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Self::parse()
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Reads the command line arguments into an Opts struct and merge
    /// values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            mode, protocol, ranges, concurrency, timeout, no_smart_scan, greppable, accessible,
            json
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(base_url, start_ip, end_ip, ports, preset, preset_file, ffprobe);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            mode: ScanMode::Template,
            base_url: None,
            start_ip: None,
            end_ip: None,
            protocol: MulticastProtocol::Udp,
            ranges: vec![],
            ports: None,
            preset: None,
            preset_file: None,
            input: None,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT.as_secs(),
            no_smart_scan: false,
            ffprobe: None,
            greppable: false,
            accessible: false,
            json: false,
            no_config: true,
            config_path: None,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    mode: Option<ScanMode>,
    base_url: Option<String>,
    start_ip: Option<String>,
    end_ip: Option<String>,
    protocol: Option<MulticastProtocol>,
    ranges: Option<Vec<String>>,
    ports: Option<Vec<u16>>,
    preset: Option<String>,
    preset_file: Option<PathBuf>,
    concurrency: Option<usize>,
    timeout: Option<u64>,
    no_smart_scan: Option<bool>,
    ffprobe: Option<PathBuf>,
    greppable: Option<bool>,
    accessible: Option<bool>,
    json: Option<bool>,
}

#[cfg(not(tarpaulin_include))]
#[allow(clippy::doc_link_with_quotes)]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file yields an empty config.
    ///
    /// # Format
    ///
    /// mode = "multicast"
    /// protocol = "rtp"
    /// ranges = ["239.3.1.1-239.3.1.255"]
    /// ports = [8000, 8004, 8008]
    /// concurrency = 20
    /// timeout = 15
    /// preset_file = "/etc/iptvscan/presets.json"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Result<Self, toml::de::Error> {
        let Some(config_path) = custom_config_path.or_else(default_config_path) else {
            return Ok(Self::default());
        };

        let content = if config_path.exists() {
            fs::read_to_string(config_path).unwrap_or_default()
        } else {
            String::new()
        };

        toml::from_str(&content)
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".iptvscan.toml");
    Some(config_path)
}
