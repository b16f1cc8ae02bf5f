// raprs - Configuration Module
// key=value config file, command-line overrides and the validated
// station profile used for every transmission

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::aprs::AprsPosition;
use crate::ax25::{Address, Callsign, MAX_DIGIPEATERS};
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "raprs.cfg";
pub const HOME_CONFIG_FILE: &str = ".raprs.cfg";
pub const DEFAULT_TOCALL: &str = "APZ001";

/// Command line; anything given here overrides the config file
#[derive(Debug, Default, Parser)]
#[command(name = "raprs", version, about = "APRS messaging and beacons over a KISS TNC")]
pub struct Cli {
    /// Config file (default: ./raprs.cfg, then ~/.raprs.cfg)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// KISS TCP host
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// KISS TCP port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Serial TNC device; used instead of TCP when set
    #[arg(short = 'D', long = "device")]
    pub device: Option<String>,

    /// Serial baud rate
    #[arg(short = 'b', long = "baud-rate")]
    pub baud_rate: Option<u32>,

    /// Station callsign with SSID, e.g. IK2ABC-7
    #[arg(short = 'C', long)]
    pub callsign: Option<String>,

    /// AX.25 destination (software id)
    #[arg(short = 'T', long)]
    pub tocall: Option<String>,

    /// Digipeater path, comma separated
    #[arg(long)]
    pub path: Option<String>,

    /// Send messages without ids (no acknowledgements)
    #[arg(long = "no-ack")]
    pub no_ack: bool,

    /// Log level 0-9
    #[arg(short = 'L', long = "log-level", value_parser = clap::value_parser!(u8).range(0..=9))]
    pub log_level: Option<u8>,

    /// Log file path
    #[arg(short = 'l', long)]
    pub logfile: Option<String>,

    /// Log only to the log file
    #[arg(long = "no-console")]
    pub no_console: bool,

    /// Skip the startup banner
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub callsign: String,
    pub tocall: String,
    pub path: Vec<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub symbol_table: char,
    pub symbol_code: char,
    pub pos_comment: String,
    pub ack_enabled: bool,
    pub host: String,
    pub port: u16,
    pub serial_port: Option<String>,
    pub baud_rate: u32,
    pub log_level: u8,
    pub logfile: Option<String>,
    pub log_to_console: bool,
    pub quiet_startup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            callsign: String::new(),
            tocall: DEFAULT_TOCALL.to_string(),
            path: Vec::new(),
            latitude: 0.0,
            longitude: 0.0,
            symbol_table: '/',
            symbol_code: '>',
            pos_comment: String::new(),
            ack_enabled: true,
            host: "localhost".to_string(),
            port: 8001,
            serial_port: None,
            baud_rate: 9600,
            log_level: 5,
            logfile: None,
            log_to_console: true,
            quiet_startup: false,
        }
    }
}

pub(crate) fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Splits a digipeater path on commas and whitespace
pub fn split_path(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("'{}' is not a number", value)))
}

fn parse_char(key: &str, value: &str) -> Result<char, ConfigError> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ConfigError::invalid(key, "must be exactly one character")),
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parses config file contents; missing keys keep their defaults
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut config_map = HashMap::new();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let mut value = value.trim();
                if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
                    value = &value[1..value.len() - 1];
                }
                config_map.insert(key.to_string(), value.to_string());
            }
        }

        let mut config = Config::default();
        for (key, value) in &config_map {
            config.set(key, value)?;
        }
        Ok(config)
    }

    /// Sets one value by its config-file key. Unknown keys are rejected.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "callsign" => self.callsign = value.trim().to_uppercase(),
            "tocall" => self.tocall = value.trim().to_uppercase(),
            "path" => self.path = split_path(value),
            "latitude" => self.latitude = parse_number(key, value)?,
            "longitude" => self.longitude = parse_number(key, value)?,
            "symbol_table" => self.symbol_table = parse_char(key, value)?,
            "symbol_code" => self.symbol_code = parse_char(key, value)?,
            "pos_comment" => self.pos_comment = value.to_string(),
            "ack_enabled" => self.ack_enabled = parse_bool(value),
            "host" => self.host = value.trim().to_string(),
            "port" => self.port = parse_number(key, value)?,
            "serial_port" => {
                let value = value.trim();
                self.serial_port = (!value.is_empty()).then(|| value.to_string());
            }
            "baud_rate" => self.baud_rate = parse_number(key, value)?,
            "log_level" => self.log_level = parse_number::<u8>(key, value)?.min(9),
            "logfile" => {
                let value = value.trim();
                self.logfile = (!value.is_empty()).then(|| value.to_string());
            }
            _ => return Err(ConfigError::invalid(key, "unknown setting")),
        }
        Ok(())
    }

    /// Finds the config file: `-c` must exist, otherwise the first of
    /// ./raprs.cfg and ~/.raprs.cfg that exists. Returns defaults and no
    /// path when there is none.
    pub fn load(cli: &Cli) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(ref path) = cli.config {
            return Ok((Self::from_file(path)?, Some(path.clone())));
        }
        for candidate in Self::candidate_paths() {
            if candidate.is_file() {
                return Ok((Self::from_file(&candidate)?, Some(candidate)));
            }
        }
        Ok((Config::default(), None))
    }

    /// Where `w` saves: the file the config was loaded from, else ./raprs.cfg
    pub fn default_save_path(loaded: Option<&Path>) -> PathBuf {
        loaded
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(DEFAULT_CONFIG_FILE)];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(HOME_CONFIG_FILE));
        }
        paths
    }

    pub fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(ref host) = cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(ref device) = cli.device {
            self.serial_port = Some(device.clone());
        }
        if let Some(baud) = cli.baud_rate {
            self.baud_rate = baud;
        }
        if let Some(ref callsign) = cli.callsign {
            self.callsign = callsign.trim().to_uppercase();
        }
        if let Some(ref tocall) = cli.tocall {
            self.tocall = tocall.trim().to_uppercase();
        }
        if let Some(ref path) = cli.path {
            self.path = split_path(path);
        }
        if cli.no_ack {
            self.ack_enabled = false;
        }
        if let Some(level) = cli.log_level {
            self.log_level = level.min(9);
        }
        if let Some(ref logfile) = cli.logfile {
            self.logfile = Some(logfile.clone());
        }
        if cli.no_console {
            self.log_to_console = false;
        }
        if cli.quiet {
            self.quiet_startup = true;
        }
    }

    /// Validates the station part of the config
    pub fn station(&self) -> Result<Station, ConfigError> {
        if self.callsign.is_empty() {
            return Err(ConfigError::invalid("callsign", "no station callsign configured"));
        }
        if self.path.len() > MAX_DIGIPEATERS {
            return Err(ConfigError::invalid("path", "at most 8 digipeaters"));
        }
        let path = self
            .path
            .iter()
            .map(|p| p.parse::<Address>())
            .collect::<Result<Vec<_>, _>>()?;
        validate_position(self.latitude, self.longitude, self.symbol_table, self.symbol_code)?;

        Ok(Station {
            callsign: self.callsign.parse()?,
            tocall: self.tocall.parse()?,
            path,
            position: AprsPosition {
                latitude: self.latitude,
                longitude: self.longitude,
                symbol_table: self.symbol_table,
                symbol_code: self.symbol_code,
                comment: self.pos_comment.clone(),
            },
        })
    }

    /// Copies runtime station edits back so they can be saved
    pub fn update_from_station(&mut self, station: &Station) {
        self.callsign = station.callsign.to_string();
        self.tocall = station.tocall.to_string();
        self.path = station.path.iter().map(|a| a.callsign.to_string()).collect();
        self.latitude = station.position.latitude;
        self.longitude = station.position.longitude;
        self.symbol_table = station.position.symbol_table;
        self.symbol_code = station.position.symbol_code;
        self.pos_comment = station.position.comment.clone();
    }

    /// Renders the config file. The message-id counter is session state
    /// and is never written.
    pub fn to_file_contents(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# raprs configuration");
        let _ = writeln!(out, "callsign = {}", self.callsign);
        let _ = writeln!(out, "tocall = {}", self.tocall);
        let _ = writeln!(out, "path = {}", self.path.join(","));
        let _ = writeln!(out, "latitude = {}", self.latitude);
        let _ = writeln!(out, "longitude = {}", self.longitude);
        let _ = writeln!(out, "symbol_table = {}", self.symbol_table);
        let _ = writeln!(out, "symbol_code = {}", self.symbol_code);
        let _ = writeln!(out, "pos_comment = \"{}\"", self.pos_comment);
        let _ = writeln!(out, "ack_enabled = {}", self.ack_enabled);
        let _ = writeln!(out, "host = {}", self.host);
        let _ = writeln!(out, "port = {}", self.port);
        if let Some(ref device) = self.serial_port {
            let _ = writeln!(out, "serial_port = {}", device);
        }
        let _ = writeln!(out, "baud_rate = {}", self.baud_rate);
        let _ = writeln!(out, "log_level = {}", self.log_level);
        if let Some(ref logfile) = self.logfile {
            let _ = writeln!(out, "logfile = {}", logfile);
        }
        out
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, self.to_file_contents()).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

fn validate_position(
    latitude: f64,
    longitude: f64,
    symbol_table: char,
    symbol_code: char,
) -> Result<(), ConfigError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ConfigError::invalid("latitude", "must be between -90 and 90"));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ConfigError::invalid("longitude", "must be between -180 and 180"));
    }
    if !(symbol_table == '/'
        || symbol_table == '\\'
        || symbol_table.is_ascii_digit()
        || symbol_table.is_ascii_uppercase())
    {
        return Err(ConfigError::invalid(
            "symbol_table",
            "must be '/', '\\' or an overlay character 0-9/A-Z",
        ));
    }
    if !symbol_code.is_ascii_graphic() {
        return Err(ConfigError::invalid("symbol_code", "must be a printable ASCII character"));
    }
    Ok(())
}

/// Validated station parameters used to build outgoing frames
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub callsign: Callsign,
    /// AX.25 destination, not the APRS addressee
    pub tocall: Callsign,
    pub path: Vec<Address>,
    /// Beacon position; `comment` is the default beacon comment
    pub position: AprsPosition,
}

impl Station {
    /// Runtime edit of one station setting, using config-file keys.
    /// The station is left unchanged if the new value is invalid.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut position = self.position.clone();
        match key {
            "callsign" => self.callsign = value.parse()?,
            "tocall" => self.tocall = value.parse()?,
            "path" => {
                let path = split_path(value)
                    .iter()
                    .map(|p| p.parse::<Address>())
                    .collect::<Result<Vec<_>, _>>()?;
                if path.len() > MAX_DIGIPEATERS {
                    return Err(ConfigError::invalid("path", "at most 8 digipeaters"));
                }
                self.path = path;
            }
            "latitude" => position.latitude = parse_number(key, value)?,
            "longitude" => position.longitude = parse_number(key, value)?,
            "symbol_table" => position.symbol_table = parse_char(key, value)?,
            "symbol_code" => position.symbol_code = parse_char(key, value)?,
            "pos_comment" => position.comment = value.to_string(),
            _ => return Err(ConfigError::invalid(key, "not a station setting")),
        }
        validate_position(
            position.latitude,
            position.longitude,
            position.symbol_table,
            position.symbol_code,
        )?;
        self.position = position;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# station
callsign = ik2abc-7
tocall = APZ001
path = ARISS, WIDE2-1
latitude = 45.67
longitude = -7.89
symbol_table = \
symbol_code = -
pos_comment = "73 de IK2ABC"
ack_enabled = no
port = 8100
log_level = 12
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.callsign, "IK2ABC-7");
        assert_eq!(config.path, vec!["ARISS", "WIDE2-1"]);
        assert_eq!(config.latitude, 45.67);
        assert_eq!(config.longitude, -7.89);
        assert_eq!(config.symbol_table, '\\');
        assert_eq!(config.symbol_code, '-');
        assert_eq!(config.pos_comment, "73 de IK2ABC");
        assert!(!config.ack_enabled);
        assert_eq!(config.port, 8100);
        assert_eq!(config.log_level, 9);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Config::parse("port = eighty").is_err());
        assert!(Config::parse("symbol_code = ab").is_err());
        assert!(Config::parse("colour = blue").is_err());
    }

    #[test]
    fn test_station_validation() {
        let station = Config::parse(SAMPLE).unwrap().station().unwrap();
        assert_eq!(station.callsign.to_string(), "IK2ABC-7");
        assert_eq!(station.path.len(), 2);
        assert_eq!(station.position.comment, "73 de IK2ABC");

        let mut config = Config::default();
        assert!(config.station().is_err());
        config.callsign = "N0CALL".into();
        assert!(config.station().is_ok());
        config.latitude = 91.0;
        assert!(config.station().is_err());
        config.latitude = 0.0;
        config.callsign = "TOOLONGCALL".into();
        assert!(matches!(config.station(), Err(ConfigError::Address(_))));
    }

    #[test]
    fn test_save_roundtrip() {
        let config = Config::parse(SAMPLE).unwrap();
        let reparsed = Config::parse(&config.to_file_contents()).unwrap();
        assert_eq!(reparsed, config);
        assert!(!config.to_file_contents().contains("message_id"));
    }

    #[test]
    fn test_save_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raprs.cfg");
        let config = Config::parse(SAMPLE).unwrap();
        config.save(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_default_save_path() {
        assert_eq!(Config::default_save_path(None), PathBuf::from("raprs.cfg"));
        let loaded = PathBuf::from("/home/op/.raprs.cfg");
        assert_eq!(Config::default_save_path(Some(&loaded)), loaded);
    }

    #[test]
    fn test_missing_explicit_file() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/raprs.cfg")),
            ..Cli::default()
        };
        assert!(matches!(Config::load(&cli), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "raprs", "-C", "n0call-9", "-p", "9001", "--path", "WIDE1-1,WIDE2-1", "--no-ack",
            "-D", "/dev/ttyUSB0", "-L", "7",
        ]);
        let mut config = Config::default();
        config.apply_cli_overrides(&cli);
        assert_eq!(config.callsign, "N0CALL-9");
        assert_eq!(config.port, 9001);
        assert_eq!(config.path, vec!["WIDE1-1", "WIDE2-1"]);
        assert!(!config.ack_enabled);
        assert_eq!(config.serial_port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.log_level, 7);
    }

    #[test]
    fn test_station_runtime_edit() {
        let mut station = Config::parse(SAMPLE).unwrap().station().unwrap();
        station.set("path", "WIDE1-1").unwrap();
        assert_eq!(station.path.len(), 1);
        station.set("latitude", "-10.5").unwrap();
        assert_eq!(station.position.latitude, -10.5);
        assert!(station.set("latitude", "100").is_err());
        assert_eq!(station.position.latitude, -10.5);
        assert!(station.set("callsign", "BAD-99").is_err());
        assert!(station.set("host", "x").is_err());

        let mut config = Config::default();
        config.update_from_station(&station);
        assert_eq!(config.path, vec!["WIDE1-1"]);
        assert_eq!(config.station().unwrap(), station);
    }
}
