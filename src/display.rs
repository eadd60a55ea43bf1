//! Shared handle to the display, the one device several controllers render to.

use std::sync::Arc;

use anyhow::{Context, Result};
use linux_embedded_hal::Delay;
use log::{info, warn};
use tokio::sync::Mutex;

use crate::{
    config::{ConfigManager, DisplayCfg},
    drivers::{Hardware, sh1106::Sh1106},
    graphics::{DrawOptions, render_text},
};

/// Opens and resets a display, or returns `None` when it is disabled.
pub async fn create_device(hardware: &Arc<dyn Hardware>, cfg: &DisplayCfg) -> Result<Option<Sh1106>> {
    if !cfg.enabled {
        info!("Display disabled");
        return Ok(None);
    }

    let hardware = Arc::clone(hardware);
    let cfg = cfg.clone();
    tokio::task::spawn_blocking(move || -> Result<Option<Sh1106>> {
        let bus = hardware.open_display_bus(&cfg.bus)?;
        let device = Sh1106::new(bus, &cfg, &mut Delay).with_context(|| {
            format!(
                "create {}x{} display on i2c-{} at {:#04x}",
                cfg.width, cfg.height, cfg.bus.id, cfg.bus.address
            )
        })?;
        info!("Display {}x{} ready", cfg.width, cfg.height);
        Ok(Some(device))
    })
    .await?
}

/// Cloneable handle serialising every render, flush and swap.
#[derive(Clone)]
pub struct Display {
    device: Arc<Mutex<Option<Sh1106>>>,
    hardware: Arc<dyn Hardware>,
}

impl Display {
    /// Opens the configured device. Open failures other than a disabled
    /// display are returned.
    pub async fn open(hardware: Arc<dyn Hardware>, cfg: &DisplayCfg) -> Result<Self> {
        let device = create_device(&hardware, cfg).await?;
        Ok(Self {
            device: Arc::new(Mutex::new(device)),
            hardware,
        })
    }

    pub async fn is_present(&self) -> bool {
        self.device.lock().await.is_some()
    }

    pub async fn size(&self) -> Option<(u16, u16)> {
        self.device
            .lock()
            .await
            .as_ref()
            .map(|d| (d.width(), d.height()))
    }

    /// Renders `lines` over the whole panel. A no-op without a device.
    pub async fn render_text(&self, lines: Vec<String>, opts: DrawOptions) -> Result<()> {
        let device = Arc::clone(&self.device);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = device.blocking_lock();
            let Some(device) = guard.as_mut() else {
                return Ok(());
            };
            let canvas = render_text(
                u32::from(device.width()),
                u32::from(device.height()),
                &lines,
                &opts,
            );
            device.render_image(&canvas)
        })
        .await?
    }

    /// Replaces the device with one built from `cfg`.
    ///
    /// The new device is opened and the config persisted before the old
    /// device is closed; any failure on the way leaves the old one in place.
    pub async fn reconfigure(&self, config: &ConfigManager, cfg: DisplayCfg) -> Result<()> {
        cfg.validate()?;

        let mut guard = self.device.lock().await;
        let mut replacement = create_device(&self.hardware, &cfg).await?;

        if let Err(e) = config.set_display(cfg).await {
            if let Some(device) = replacement.as_mut() {
                let _ = device.close();
            }
            return Err(e);
        }

        if let Some(old) = guard.as_mut() {
            if let Err(e) = old.close() {
                warn!("Failed to close previous display: {e:#}");
            }
        }
        *guard = replacement;
        info!("Display reconfigured");
        Ok(())
    }

    /// Blanks and releases the device.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.device.lock().await;
        if let Some(mut device) = guard.take() {
            device.close()?;
            info!("Display closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, I2cBusCfg},
        drivers::mock::MockHardware,
        error::is_validation,
    };
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn open_display(hardware: &MockHardware) -> Display {
        Display::open(Arc::new(hardware.clone()), &DisplayCfg::default())
            .await
            .unwrap()
    }

    fn data_frames(hardware: &MockHardware) -> usize {
        hardware.bus.take().iter().filter(|f| f[0] == 0x40).count()
    }

    #[tokio::test]
    async fn disabled_display_is_absent_and_render_is_noop() {
        let hardware = MockHardware::default();
        let cfg = DisplayCfg {
            enabled: false,
            ..DisplayCfg::default()
        };

        let display = Display::open(Arc::new(hardware.clone()), &cfg).await.unwrap();

        assert!(!display.is_present().await);
        display
            .render_text(vec!["hello".to_string()], DrawOptions::centered())
            .await
            .unwrap();
        assert!(hardware.bus.take().is_empty());
    }

    #[tokio::test]
    async fn open_failure_is_a_hard_error() {
        let hardware = MockHardware::default();
        *hardware.fail_display.lock().unwrap() = true;

        let result = Display::open(Arc::new(hardware), &DisplayCfg::default()).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn render_text_flushes_changed_pages() {
        let hardware = MockHardware::default();
        let display = open_display(&hardware).await;
        hardware.bus.take();

        display
            .render_text(vec!["Connect...".to_string()], DrawOptions::centered())
            .await
            .unwrap();
        let first = data_frames(&hardware);

        display
            .render_text(vec!["Connect...".to_string()], DrawOptions::centered())
            .await
            .unwrap();

        // One 10px line centred on 64 rows spans pages 3 and 4.
        assert_eq!(first, 2);
        assert_eq!(data_frames(&hardware), 0);
        assert_eq!(display.size().await, Some((128, 64)));
    }

    #[tokio::test]
    async fn reconfigure_swaps_device_and_persists() {
        let dir = TempDir::new().unwrap();
        let config = ConfigManager::new(Config::default(), dir.path().join("config.yml"));
        let hardware = MockHardware::default();
        let display = open_display(&hardware).await;

        let cfg = DisplayCfg {
            width: 128,
            height: 32,
            ..DisplayCfg::default()
        };
        display.reconfigure(&config, cfg.clone()).await.unwrap();

        assert_eq!(display.size().await, Some((128, 32)));
        assert_eq!(config.display().await, cfg);
    }

    #[tokio::test]
    async fn reconfigure_to_disabled_removes_device() {
        let dir = TempDir::new().unwrap();
        let config = ConfigManager::new(Config::default(), dir.path().join("config.yml"));
        let hardware = MockHardware::default();
        let display = open_display(&hardware).await;

        display
            .reconfigure(
                &config,
                DisplayCfg {
                    enabled: false,
                    ..DisplayCfg::default()
                },
            )
            .await
            .unwrap();

        assert!(!display.is_present().await);
    }

    #[tokio::test]
    async fn failed_reconfigure_keeps_previous_device() {
        let dir = TempDir::new().unwrap();
        let config = ConfigManager::new(Config::default(), dir.path().join("config.yml"));
        let hardware = MockHardware::default();
        let display = open_display(&hardware).await;
        let before = config.display().await;

        let invalid = DisplayCfg {
            bus: I2cBusCfg { id: 7, address: 0x3C },
            ..DisplayCfg::default()
        };
        let err = display.reconfigure(&config, invalid).await.unwrap_err();
        assert!(is_validation(&err));

        *hardware.fail_display.lock().unwrap() = true;
        let unreachable = DisplayCfg {
            width: 128,
            height: 32,
            ..DisplayCfg::default()
        };
        assert!(display.reconfigure(&config, unreachable).await.is_err());

        assert_eq!(display.size().await, Some((128, 64)));
        assert_eq!(config.display().await, before);
    }

    #[tokio::test]
    async fn close_blanks_and_releases() {
        let hardware = MockHardware::default();
        let display = open_display(&hardware).await;
        hardware.bus.take();

        display.close().await.unwrap();
        display.close().await.unwrap();

        assert_eq!(data_frames(&hardware), 8);
        assert!(!display.is_present().await);
    }
}
