//! Configuration management for the picpd daemon.
//!
//! Handles loading, validating and persisting the YAML configuration file
//! that describes the display, fan and WiFi access-point settings. Running
//! controllers only ever see cloned snapshots of a section; hot updates go
//! through the `set_*` methods on [`ConfigManager`], which validate, apply,
//! persist and roll back on failure.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, sync::RwLock};

use crate::error::ControlError;

/// BCM pins that are wired to one of the two hardware PWM channels.
pub const FAN_PINS: [u8; 7] = [12, 13, 18, 19, 40, 41, 45];

/// Panel sizes the display driver has an initialisation table for.
pub const PANEL_SIZES: [(u16, u16); 4] = [(128, 64), (64, 48), (128, 32), (96, 16)];

/// Main configuration structure for the picpd daemon.
///
/// # Example
///
/// ```yaml
/// version: 1
/// common:
///   log_level: info
/// display:
///   enabled: true
///   bus:
///     id: 1
///     address: 0x3c
///   width: 128
///   height: 64
///   vcc_mode: switch-cap
///   status_interval: 1
/// fan:
///   enabled: true
///   pin: 18
///   duty_percent: 80
///   min_temp: 45.0
///   max_temp: 50.0
/// wifi:
///   enabled: true
///   button_pin: 5
///   ap_name: picp-hotspot
///   ssid: picp
///   password: "12345678"
///   device_name: wlan0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    #[serde(default)]
    pub common: CommonCfg,

    #[serde(default)]
    pub control: ControlCfg,

    #[serde(default)]
    pub display: DisplayCfg,

    #[serde(default)]
    pub fan: FanCfg,

    #[serde(default)]
    pub wifi: WifiCfg,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            common: CommonCfg::default(),
            control: ControlCfg::default(),
            display: DisplayCfg::default(),
            fan: FanCfg::default(),
            wifi: WifiCfg::default(),
        }
    }
}

impl Config {
    /// Validates every section.
    pub fn validate(&self) -> Result<()> {
        self.common.validate()?;
        self.display.validate()?;
        self.fan.validate()?;
        self.wifi.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonCfg {
    /// One of `error`, `warn`, `info`, `debug`, `trace`, `off`.
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

impl Default for CommonCfg {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
        }
    }
}

impl CommonCfg {
    pub fn validate(&self) -> Result<()> {
        self.log_level
            .parse::<log::LevelFilter>()
            .map(|_| ())
            .map_err(|_| {
                ControlError::validation("common", format!("unknown log level '{}'", self.log_level))
                    .into()
            })
    }
}

/// Settings of the D-Bus control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCfg {
    #[serde(default = "defaults::enable_dbus")]
    pub enable_dbus: bool,

    /// Serve on the system bus instead of the session bus.
    #[serde(default = "defaults::system_bus")]
    pub system_bus: bool,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            enable_dbus: defaults::enable_dbus(),
            system_bus: defaults::system_bus(),
        }
    }
}

/// I2C bus the display is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct I2cBusCfg {
    /// Bus number, opened as `/dev/i2c-<id>`.
    pub id: u8,

    /// 7-bit device address.
    pub address: u8,
}

impl Default for I2cBusCfg {
    fn default() -> Self {
        Self {
            id: 1,
            address: 0x3C,
        }
    }
}

impl I2cBusCfg {
    pub fn validate(&self) -> Result<()> {
        if self.id > 1 {
            return Err(ControlError::validation("display", format!("i2c bus {} does not exist", self.id)).into());
        }
        if self.address > 0x7F {
            return Err(ControlError::validation(
                "display",
                format!("i2c address {:#04x} is not a 7-bit address", self.address),
            )
            .into());
        }
        Ok(())
    }
}

/// Panel power supply, selects charge pump, contrast and precharge values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VccMode {
    External,
    #[default]
    SwitchCap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayCfg {
    #[serde(default = "defaults::display_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub bus: I2cBusCfg,

    #[serde(default = "defaults::width")]
    pub width: u16,

    #[serde(default = "defaults::height")]
    pub height: u16,

    #[serde(default)]
    pub vcc_mode: VccMode,

    /// Light pixels where the rendered image is dark.
    #[serde(default)]
    pub invert: bool,

    /// Seconds between two status samples.
    #[serde(default = "defaults::status_interval")]
    pub status_interval: u16,
}

impl Default for DisplayCfg {
    fn default() -> Self {
        Self {
            enabled: defaults::display_enabled(),
            bus: I2cBusCfg::default(),
            width: defaults::width(),
            height: defaults::height(),
            vcc_mode: VccMode::default(),
            invert: false,
            status_interval: defaults::status_interval(),
        }
    }
}

impl DisplayCfg {
    pub fn validate(&self) -> Result<()> {
        self.bus.validate()?;
        if !PANEL_SIZES.contains(&(self.width, self.height)) {
            return Err(ControlError::validation(
                "display",
                format!("unsupported panel size {}x{}", self.width, self.height),
            )
            .into());
        }
        if self.status_interval == 0 {
            return Err(ControlError::validation("display", "status interval must be at least 1s").into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanCfg {
    #[serde(default)]
    pub enabled: bool,

    /// BCM pin number, must be PWM capable.
    #[serde(default = "defaults::fan_pin")]
    pub pin: u8,

    /// Duty cycle while the fan runs, in percent.
    #[serde(default = "defaults::duty_percent")]
    pub duty_percent: u8,

    /// Below this temperature a running fan stops (°C).
    #[serde(default = "defaults::min_temp")]
    pub min_temp: f32,

    /// Above this temperature a stopped fan starts (°C).
    #[serde(default = "defaults::max_temp")]
    pub max_temp: f32,
}

impl Default for FanCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            pin: defaults::fan_pin(),
            duty_percent: defaults::duty_percent(),
            min_temp: defaults::min_temp(),
            max_temp: defaults::max_temp(),
        }
    }
}

impl FanCfg {
    pub fn validate(&self) -> Result<()> {
        if self.duty_percent == 0 || self.duty_percent > 100 {
            return Err(ControlError::validation(
                "fan",
                format!("duty {} must be in (0, 100]", self.duty_percent),
            )
            .into());
        }
        if !(self.min_temp >= 0.0) {
            return Err(ControlError::validation("fan", "min temperature must not be negative").into());
        }
        if !(self.min_temp < self.max_temp) {
            return Err(ControlError::validation(
                "fan",
                format!(
                    "min temperature {} must be lower than max temperature {}",
                    self.min_temp, self.max_temp
                ),
            )
            .into());
        }
        if !FAN_PINS.contains(&self.pin) {
            return Err(ControlError::validation(
                "fan",
                format!("pin {} has no hardware PWM, use one of {:?}", self.pin, FAN_PINS),
            )
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiCfg {
    #[serde(default)]
    pub enabled: bool,

    /// BCM pin of the push button, high while pressed.
    #[serde(default = "defaults::button_pin")]
    pub button_pin: u8,

    /// NetworkManager connection name used for the access point.
    #[serde(default = "defaults::ap_name")]
    pub ap_name: String,

    #[serde(default)]
    pub ssid: String,

    #[serde(default)]
    pub password: String,

    /// Wireless interface, empty lets NetworkManager choose.
    #[serde(default)]
    pub device_name: String,
}

impl Default for WifiCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            button_pin: defaults::button_pin(),
            ap_name: defaults::ap_name(),
            ssid: String::new(),
            password: String::new(),
            device_name: String::new(),
        }
    }
}

impl WifiCfg {
    /// A disabled section is accepted as is.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.ssid.is_empty() {
            return Err(ControlError::validation("wifi", "ssid can not be empty").into());
        }
        if self.ap_name.is_empty() {
            return Err(ControlError::validation("wifi", "connection name can not be empty").into());
        }
        let len = self.password.chars().count();
        if len != 0 && !(8..=32).contains(&len) {
            return Err(ControlError::validation("wifi", "password must be 8 to 32 characters").into());
        }
        Ok(())
    }
}

mod defaults {
    pub fn log_level() -> String {
        "info".to_string()
    }

    pub fn enable_dbus() -> bool {
        true
    }

    pub fn system_bus() -> bool {
        true
    }

    pub fn display_enabled() -> bool {
        true
    }

    pub fn width() -> u16 {
        128
    }

    pub fn height() -> u16 {
        64
    }

    pub fn status_interval() -> u16 {
        1
    }

    pub fn fan_pin() -> u8 {
        18
    }

    pub fn duty_percent() -> u8 {
        100
    }

    pub fn min_temp() -> f32 {
        45.0
    }

    pub fn max_temp() -> f32 {
        50.0
    }

    pub fn button_pin() -> u8 {
        5
    }

    pub fn ap_name() -> String {
        "picp-hotspot".to_string()
    }
}

fn locate_config() -> Result<PathBuf> {
    if let Ok(env_path) = env::var("PICPD_CONFIG") {
        return Ok(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("picpd/config.yml");
        if cfg_dir.exists() {
            return Ok(cfg_dir);
        }
    }

    let etc = Path::new("/etc/picpd/config.yml");
    if etc.exists() {
        return Ok(etc.to_path_buf());
    }

    anyhow::bail!("Configuration file not found in any standard location")
}

/// Configuration manager that owns the committed configuration and its file.
///
/// Cloning is cheap and every clone shares the same state.
///
/// # Example
///
/// ```no_run
/// use picpd::config::ConfigManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(None).await?;
///
/// let mut fan = config_manager.fan().await;
/// fan.duty_percent = 60;
/// config_manager.set_fan(fan).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the given config and path.
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. PICPD_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/picpd/config.yml or ~/.config/picpd/config.yml
    /// 4. /etc/picpd/config.yml
    ///
    /// An explicit path that does not exist yet yields the defaults; the file
    /// is created on the first successful update.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => locate_config().context("No configuration file found")?,
        };

        if !config_path.exists() {
            warn!(
                "Config file {} does not exist, starting from defaults",
                config_path.display()
            );
            return Ok(Self::new(Config::default(), config_path));
        }

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path).await?;

        Ok(Self::new(config, config_path))
    }

    /// Returns the path to the configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clones the whole configuration.
    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    pub async fn common(&self) -> CommonCfg {
        self.config.read().await.common.clone()
    }

    pub async fn control(&self) -> ControlCfg {
        self.config.read().await.control.clone()
    }

    pub async fn display(&self) -> DisplayCfg {
        self.config.read().await.display.clone()
    }

    pub async fn fan(&self) -> FanCfg {
        self.config.read().await.fan.clone()
    }

    pub async fn wifi(&self) -> WifiCfg {
        self.config.read().await.wifi.clone()
    }

    pub async fn set_display(&self, cfg: DisplayCfg) -> Result<()> {
        cfg.validate()?;
        self.commit("display", |config| config.display = cfg).await
    }

    pub async fn set_fan(&self, cfg: FanCfg) -> Result<()> {
        cfg.validate()?;
        self.commit("fan", |config| config.fan = cfg).await
    }

    pub async fn set_wifi(&self, cfg: WifiCfg) -> Result<()> {
        cfg.validate()?;
        self.commit("wifi", |config| config.wifi = cfg).await
    }

    /// Applies `change` to the committed configuration and persists it,
    /// restoring the previous in-memory value if persisting fails.
    async fn commit<F>(&self, section: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.config.write().await;
        let previous = config.clone();
        change(&mut config);

        if let Err(e) = Self::save_to_path(&config, &self.path).await {
            *config = previous;
            return Err(e).with_context(|| format!("Failed to persist {section} config"));
        }

        info!("Configuration section '{section}' updated");
        Ok(())
    }

    /// Saves the current configuration to file.
    pub async fn save(&self) -> Result<()> {
        let config = self.config.read().await;
        Self::save_to_path(&config, &self.path).await
    }

    async fn save_to_path(config: &Config, path: &Path) -> Result<()> {
        let config_yaml =
            serde_yaml::to_string(config).context("Failed to serialize configuration")?;

        let tmp_path = path.with_extension("yml.tmp");
        fs::write(&tmp_path, config_yaml).await.with_context(|| {
            format!("Failed to write temporary config to {}", tmp_path.display())
        })?;

        fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("Failed to move config to {}", path.display()))?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    async fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        if config.version != 1 {
            anyhow::bail!(
                "Unsupported config version {} in file: {}",
                config.version,
                path.display()
            );
        }

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}
