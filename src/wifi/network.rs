//! NetworkManager access through the `nmcli` command line client.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::ControlError;

const SECRETS_MISSING: &str = "Secrets were required, but not provided.";

/// One scan result of `nmcli device wifi list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub ssid: String,
    pub bssid: String,
    pub mode: String,
    pub channel: u32,
    pub frequency: String,
    pub rate: String,
    pub signal: u8,
    pub security: Vec<String>,
    pub active: bool,
    pub device: String,
}

/// Arguments of a `device wifi connect` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectSettings {
    /// Name of the connection profile NetworkManager creates.
    pub name: String,
    pub ssid: String,
    pub hidden: bool,
    pub bssid: String,
    pub device_name: String,
    pub password: String,
    pub wep_key_type: String,
}

impl ConnectSettings {
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["device", "wifi", "connect", self.ssid.as_str()]
            .into_iter()
            .map(String::from)
            .collect();
        if self.hidden {
            args.extend(["hidden".into(), "yes".into()]);
        }
        let optional = [
            ("bssid", &self.bssid),
            ("password", &self.password),
            ("ifname", &self.device_name),
            ("wep-key-type", &self.wep_key_type),
            ("name", &self.name),
        ];
        for (key, value) in optional {
            if !value.is_empty() {
                args.extend([key.to_string(), value.clone()]);
            }
        }
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioBand {
    Wifi,
    Wwan,
}

impl RadioBand {
    fn as_arg(self) -> &'static str {
        match self {
            RadioBand::Wifi => "wifi",
            RadioBand::Wwan => "wwan",
        }
    }
}

/// Hardware and software radio switches as reported by `nmcli radio all`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioStatus {
    pub wifi_hw: bool,
    pub wifi: bool,
    pub wwan_hw: bool,
    pub wwan: bool,
}

/// Connection management, implemented by an out-of-process client.
///
/// Calls may take several seconds. Failures carry the client's output so
/// it can be shown to the user.
#[async_trait]
pub trait NetworkService: Send + Sync {
    async fn list_access_points(&self, device_name: &str) -> Result<Vec<AccessPoint>>;

    /// Fails with [`ControlError::SecretsRequired`] when the network needs a
    /// password that was not supplied.
    async fn connect(&self, settings: &ConnectSettings) -> Result<()>;

    async fn remove_connection_by_name(&self, name: &str) -> Result<()>;

    async fn force_scan(&self) -> Result<()>;

    async fn radio_switch(&self, band: RadioBand, on: bool) -> Result<()>;

    async fn radio_status(&self) -> Result<RadioStatus>;
}

#[derive(Debug, Clone)]
pub struct Nmcli {
    program: String,
}

impl Nmcli {
    pub fn new() -> Self {
        Self {
            program: "nmcli".to_string(),
        }
    }

    /// Runs the client and returns stdout followed by stderr.
    async fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow!("failed to run {}: {e}", self.program))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            warn!("{} {} failed: {}", self.program, args.join(" "), combined.trim_end());
            bail!("ERROR {}: {}", combined.trim_end(), output.status);
        }
        debug!("{} {}: {}", self.program, args.join(" "), combined.trim_end());
        Ok(combined)
    }
}

impl Default for Nmcli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkService for Nmcli {
    async fn list_access_points(&self, device_name: &str) -> Result<Vec<AccessPoint>> {
        let mut args = vec![
            "-t",
            "-f",
            "SSID,BSSID,MODE,CHAN,FREQ,RATE,SIGNAL,SECURITY,ACTIVE,DEVICE",
            "device",
            "wifi",
            "list",
        ];
        if !device_name.is_empty() {
            args.extend(["ifname", device_name]);
        }
        args.extend(["--rescan", "yes"]);
        Ok(parse_access_points(&self.run(&args).await?))
    }

    async fn connect(&self, settings: &ConnectSettings) -> Result<()> {
        let output = self.run(&settings.to_args()).await?;
        if output.contains(SECRETS_MISSING) {
            warn!("Network {} needs a password", settings.ssid);
            if !settings.name.is_empty() {
                let _ = self.remove_connection_by_name(&settings.name).await;
            }
            return Err(ControlError::SecretsRequired.into());
        }
        Ok(())
    }

    async fn remove_connection_by_name(&self, name: &str) -> Result<()> {
        self.run(&["connection", "delete", name]).await.map(|_| ())
    }

    async fn force_scan(&self) -> Result<()> {
        self.run(&["device", "wifi", "rescan"]).await.map(|_| ())
    }

    async fn radio_switch(&self, band: RadioBand, on: bool) -> Result<()> {
        self.run(&["radio", band.as_arg(), if on { "on" } else { "off" }])
            .await
            .map(|_| ())
    }

    async fn radio_status(&self) -> Result<RadioStatus> {
        parse_radio_status(&self.run(&["-t", "radio", "all"]).await?)
    }
}

/// Splits one terse-mode line on `:`, honouring `\:` and `\\` escapes.
pub fn parse_terse_line(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            ':' => fields.push(std::mem::take(&mut current)),
            '\\' => match chars.next() {
                Some((_, escaped @ ('\\' | ':'))) => current.push(escaped),
                _ => bail!("invalid escape sequence at {i}"),
            },
            c => current.push(c),
        }
    }
    fields.push(current);
    Ok(fields)
}

/// Malformed lines are skipped.
pub fn parse_access_points(output: &str) -> Vec<AccessPoint> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| match parse_terse_line(line) {
            Ok(values) if values.len() == 10 => Some(values),
            Ok(_) => {
                warn!("invalid access point line: {line}");
                None
            }
            Err(e) => {
                warn!("failed to parse access point line {line:?}: {e}");
                None
            }
        })
        .map(|v| AccessPoint {
            ssid: v[0].clone(),
            bssid: v[1].clone(),
            mode: v[2].clone(),
            channel: v[3].parse().unwrap_or_default(),
            frequency: v[4].clone(),
            rate: v[5].clone(),
            signal: v[6].parse().unwrap_or_default(),
            security: v[7].split_whitespace().map(String::from).collect(),
            active: v[8] == "yes",
            device: v[9].clone(),
        })
        .collect()
}

pub fn parse_radio_status(output: &str) -> Result<RadioStatus> {
    let values = parse_terse_line(output.trim_end_matches('\n'))?;
    if values.len() != 4 {
        bail!("invalid radio status: {output:?}");
    }
    let enabled = |i: usize| values[i] == "enabled";
    Ok(RadioStatus {
        wifi_hw: enabled(0),
        wifi: enabled(1),
        wwan_hw: enabled(2),
        wwan: enabled(3),
    })
}
