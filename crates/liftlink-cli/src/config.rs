//! Configuration Vault – reads/writes `~/.liftlink/config.toml`.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use liftlink_hal::ElevatorTiming;
use liftlink_middleware::SupervisorConfig;
use liftlink_runtime::{RobotTarget, TransitTiming};
use liftlink_types::{DEFAULT_ELEVATOR_PORT, DEFAULT_ROBOT_PORT, DeviceRecord};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Persisted operator configuration stored in `~/.liftlink/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// TCP port of the operator gateway.
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub elevator: ElevatorConfig,

    #[serde(default)]
    pub robots: Vec<RobotConfig>,
}

/// Delays and retry limits, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_five_seconds")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_five_seconds")]
    pub per_floor_travel_ms: u64,
    #[serde(default = "default_five_seconds")]
    pub traverse_ms: u64,
    #[serde(default = "default_door_pulse_ms")]
    pub door_pulse_ms: u64,
    #[serde(default = "default_floor_pulse_ms")]
    pub floor_pulse_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElevatorConfig {
    #[serde(default = "default_elevator_id")]
    pub id: String,
    #[serde(default = "default_elevator_address")]
    pub address: String,
    #[serde(default = "default_elevator_port")]
    pub port: u16,
    /// Optional websocket path on the relay board.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

/// One robot entry.  The secret is wiped from memory on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RobotConfig {
    #[zeroize(skip)]
    pub id: String,
    /// Address for HTTP move commands.  Either address may be omitted.
    #[serde(default)]
    #[zeroize(skip)]
    pub public_address: String,
    /// LAN address for the websocket link.
    #[serde(default)]
    #[zeroize(skip)]
    pub private_address: String,
    #[serde(default = "default_robot_port")]
    #[zeroize(skip)]
    pub port: u16,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    #[zeroize(skip)]
    pub map_id: String,
    /// Waypoint name (`floor_2_entrance`) → map point id.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[zeroize(skip)]
    pub points: HashMap<String, String>,
}

impl std::fmt::Debug for RobotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotConfig")
            .field("id", &self.id)
            .field("public_address", &self.public_address)
            .field("private_address", &self.private_address)
            .field("port", &self.port)
            .field(
                "secret",
                if self.secret.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("map_id", &self.map_id)
            .field("points", &self.points.len())
            .finish()
    }
}

fn default_gateway_port() -> u16 {
    3000
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_five_seconds() -> u64 {
    5_000
}
fn default_door_pulse_ms() -> u64 {
    1_000
}
fn default_floor_pulse_ms() -> u64 {
    500
}
fn default_elevator_id() -> String {
    "elevator".to_string()
}
fn default_elevator_address() -> String {
    "192.168.1.200".to_string()
}
fn default_elevator_port() -> u16 {
    DEFAULT_ELEVATOR_PORT
}
fn default_robot_port() -> u16 {
    DEFAULT_ROBOT_PORT
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_five_seconds(),
            per_floor_travel_ms: default_five_seconds(),
            traverse_ms: default_five_seconds(),
            door_pulse_ms: default_door_pulse_ms(),
            floor_pulse_ms: default_floor_pulse_ms(),
        }
    }
}

impl Default for ElevatorConfig {
    fn default() -> Self {
        Self {
            id: default_elevator_id(),
            address: default_elevator_address(),
            port: default_elevator_port(),
            path: String::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_port: default_gateway_port(),
            timing: TimingConfig::default(),
            elevator: ElevatorConfig::default(),
            robots: Vec::new(),
        }
    }
}

impl Config {
    pub fn elevator_record(&self) -> DeviceRecord {
        let record = DeviceRecord::elevator(
            self.elevator.id.as_str(),
            self.elevator.address.as_str(),
            self.elevator.port,
        );
        if self.elevator.path.is_empty() {
            record
        } else {
            record.with_path(self.elevator.path.as_str())
        }
    }

    pub fn robot_records(&self) -> Vec<DeviceRecord> {
        self.robots.iter().map(RobotConfig::record).collect()
    }

    pub fn robot_targets(&self) -> Vec<RobotTarget> {
        self.robots
            .iter()
            .map(|r| RobotTarget {
                record: r.record(),
                map_id: r.map_id.clone(),
                points: r.points.clone(),
            })
            .collect()
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_reconnect_attempts: self.timing.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.timing.reconnect_delay_ms),
        }
    }

    pub fn elevator_timing(&self) -> ElevatorTiming {
        ElevatorTiming {
            door_pulse: Duration::from_millis(self.timing.door_pulse_ms),
            floor_pulse: Duration::from_millis(self.timing.floor_pulse_ms),
        }
    }

    pub fn transit_timing(&self) -> TransitTiming {
        TransitTiming {
            traverse: Duration::from_millis(self.timing.traverse_ms),
            per_floor_travel: Duration::from_millis(self.timing.per_floor_travel_ms),
        }
    }
}

impl RobotConfig {
    fn record(&self) -> DeviceRecord {
        DeviceRecord::robot(
            self.id.as_str(),
            self.public_address.as_str(),
            self.private_address.as_str(),
            self.secret.as_str(),
        )
        .with_port(self.port)
    }
}

/// Return the path to `~/.liftlink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".liftlink").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `LIFTLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LIFTLINK_ELEVATOR_IP` | `elevator.address` |
/// | `LIFTLINK_ELEVATOR_PORT` | `elevator.port` |
/// | `LIFTLINK_GATEWAY_PORT` | `gateway_port` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("LIFTLINK_ELEVATOR_IP") {
        cfg.elevator.address = v;
    }
    if let Ok(v) = std::env::var("LIFTLINK_ELEVATOR_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.elevator.port = port;
    }
    if let Ok(v) = std::env::var("LIFTLINK_GATEWAY_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.gateway_port = port;
    }
}

/// Save the config to disk, creating `~/.liftlink/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only read/write; the file carries robot secrets.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
