//! Kernel-backed hardware: I2C character devices, sysfs GPIO and sysfs PWM.

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use embedded_hal::i2c::I2c;
use linux_embedded_hal::{
    I2cdev,
    sysfs_gpio::{Direction, Pin},
};
use log::{debug, info};

use super::{ButtonInput, DisplayBus, Hardware, PwmChannel};
use crate::config::I2cBusCfg;

pub const PWM_CHIP: &str = "/sys/class/pwm/pwmchip0";

/// Fan PWM frequency.
pub const PWM_FREQUENCY_HZ: u64 = 144;

const EXPORT_RETRIES: u32 = 10;
const EXPORT_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Maps a BCM pin to its hardware PWM channel.
pub fn pwm_channel(pin: u8) -> Option<u8> {
    match pin {
        12 | 18 | 40 => Some(0),
        13 | 19 | 41 | 45 => Some(1),
        _ => None,
    }
}

/// Opens devices through the Linux userspace interfaces.
///
/// The fan pin must already be muxed to its PWM function, usually with the
/// `pwm-2chan` device-tree overlay.
#[derive(Debug, Clone)]
pub struct LinuxHardware {
    pwm_chip: PathBuf,
}

impl LinuxHardware {
    pub fn new() -> Self {
        Self {
            pwm_chip: PathBuf::from(PWM_CHIP),
        }
    }
}

impl Default for LinuxHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl Hardware for LinuxHardware {
    fn open_display_bus(&self, bus: &I2cBusCfg) -> Result<Box<dyn DisplayBus>> {
        let path = format!("/dev/i2c-{}", bus.id);
        let dev = I2cdev::new(&path).with_context(|| format!("Failed to open {path}"))?;
        info!("Opened {} for device {:#04x}", path, bus.address);
        Ok(Box::new(I2cDisplayBus {
            dev,
            address: bus.address,
        }))
    }

    fn open_pwm(&self, pin: u8) -> Result<Box<dyn PwmChannel>> {
        let channel =
            pwm_channel(pin).ok_or_else(|| anyhow!("pin {pin} has no PWM channel"))?;
        Ok(Box::new(SysfsPwm::open(&self.pwm_chip, channel)?))
    }

    fn open_button(&self, pin: u8) -> Result<Box<dyn ButtonInput>> {
        Ok(Box::new(SysfsButton::open(pin)?))
    }
}

pub struct I2cDisplayBus {
    dev: I2cdev,
    address: u8,
}

impl DisplayBus for I2cDisplayBus {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        I2c::write(&mut self.dev, self.address, frame)
            .map_err(|e| anyhow!("i2c write to {:#04x} failed: {e:?}", self.address))
    }
}

/// One channel of a sysfs PWM chip.
pub struct SysfsPwm {
    chip: PathBuf,
    channel: u8,
    period_ns: u64,
}

impl SysfsPwm {
    /// Exports the channel, programs the period and enables it at 0% duty.
    pub fn open(chip: &Path, channel: u8) -> Result<Self> {
        let pwm = Self {
            chip: chip.to_path_buf(),
            channel,
            period_ns: 1_000_000_000 / PWM_FREQUENCY_HZ,
        };

        if !pwm.channel_dir().exists() {
            write_attr(&chip.join("export"), channel)?;
        }
        retry(|| write_attr(&pwm.attr("period"), pwm.period_ns))?;
        write_attr(&pwm.attr("duty_cycle"), 0)?;
        write_attr(&pwm.attr("enable"), 1)?;

        debug!(
            "PWM channel {} enabled with period {}ns",
            channel, pwm.period_ns
        );
        Ok(pwm)
    }

    fn channel_dir(&self) -> PathBuf {
        self.chip.join(format!("pwm{}", self.channel))
    }

    fn attr(&self, name: &str) -> PathBuf {
        self.channel_dir().join(name)
    }
}

impl PwmChannel for SysfsPwm {
    fn set_duty(&mut self, percent: u8) -> Result<()> {
        let duty = self.period_ns * u64::from(percent.min(100)) / 100;
        write_attr(&self.attr("duty_cycle"), duty)
    }

    fn release(&mut self) -> Result<()> {
        write_attr(&self.attr("duty_cycle"), 0)?;
        write_attr(&self.attr("enable"), 0)?;
        write_attr(&self.chip.join("unexport"), self.channel)
    }
}

/// Active-high button on a sysfs GPIO line.
pub struct SysfsButton {
    pin: Pin,
}

impl SysfsButton {
    pub fn open(pin: u8) -> Result<Self> {
        let pin = Pin::new(u64::from(pin));
        pin.export()
            .with_context(|| format!("Failed to export gpio {}", pin.get_pin_num()))?;
        // udev may still be fixing permissions right after export
        retry(|| Ok(pin.set_direction(Direction::In)?))
            .with_context(|| format!("Failed to configure gpio {}", pin.get_pin_num()))?;
        Ok(Self { pin })
    }
}

impl ButtonInput for SysfsButton {
    fn is_pressed(&mut self) -> Result<bool> {
        Ok(self.pin.get_value()? != 0)
    }

    fn release(&mut self) -> Result<()> {
        self.pin
            .unexport()
            .with_context(|| format!("Failed to unexport gpio {}", self.pin.get_pin_num()))
    }
}

fn write_attr(path: &Path, value: impl ToString) -> Result<()> {
    fs::write(path, value.to_string()).with_context(|| format!("Failed to write {}", path.display()))
}

fn retry<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= EXPORT_RETRIES => return Err(e),
            Err(_) => {
                attempt += 1;
                thread::sleep(EXPORT_RETRY_DELAY);
            }
        }
    }
}
