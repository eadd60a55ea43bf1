use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

pub const CPU_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

#[async_trait]
pub trait TemperatureSensor: Send + Sync {
    /// Current temperature in °C.
    async fn read_temperature(&self) -> Result<f32>;
}

/// Kernel thermal zone reporting millidegrees Celsius.
#[derive(Debug, Clone)]
pub struct ThermalZoneSensor {
    path: PathBuf,
}

impl ThermalZoneSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn cpu() -> Self {
        Self::new(CPU_THERMAL_ZONE)
    }
}

#[async_trait]
impl TemperatureSensor for ThermalZoneSensor {
    async fn read_temperature(&self) -> Result<f32> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read cpu temp file {}", self.path.display()))?;
        let millis: i32 = raw
            .trim()
            .parse()
            .with_context(|| format!("convert cpu temp value {:?}", raw.trim()))?;
        Ok(millis as f32 / 1000.0)
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::{collections::VecDeque, sync::Mutex};

    /// Replays a script of readings, repeating the last one forever.
    pub struct ScriptedSensor {
        readings: Mutex<VecDeque<Option<f32>>>,
    }

    impl ScriptedSensor {
        /// `None` entries simulate a failed read.
        pub fn new(readings: impl IntoIterator<Item = Option<f32>>) -> Self {
            Self {
                readings: Mutex::new(readings.into_iter().collect()),
            }
        }
    }

    /// Takes `delay` to answer every read.
    pub struct SlowSensor {
        delay: std::time::Duration,
        reading: f32,
    }

    impl SlowSensor {
        pub fn new(delay: std::time::Duration, reading: f32) -> Self {
            Self { delay, reading }
        }
    }

    #[async_trait]
    impl TemperatureSensor for SlowSensor {
        async fn read_temperature(&self) -> Result<f32> {
            tokio::time::sleep(self.delay).await;
            Ok(self.reading)
        }
    }

    #[async_trait]
    impl TemperatureSensor for ScriptedSensor {
        async fn read_temperature(&self) -> Result<f32> {
            let mut readings = self.readings.lock().unwrap();
            let next = if readings.len() > 1 {
                readings.pop_front().flatten()
            } else {
                readings.front().copied().flatten()
            };
            next.ok_or_else(|| anyhow::anyhow!("sensor unavailable"))
        }
    }
}
