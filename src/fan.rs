//! Hysteresis fan control on a hardware PWM pin.

use std::{
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ConfigManager, FanCfg},
    drivers::{Blocking, Hardware, PwmChannel},
    sensors::TemperatureSensor,
    task_runner::{RESTART_DEADLINE, TaskRunner},
};

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(3);

/// Whether the fan is currently being driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FanState {
    #[default]
    Off,
    On,
}

impl FanState {
    /// Applies the hysteresis rule to one temperature sample.
    ///
    /// A stopped fan starts above `max_temp`; a running fan stops below
    /// `min_temp`. Anything in between keeps the current state.
    pub fn next(self, temp: f32, min_temp: f32, max_temp: f32) -> FanState {
        match self {
            FanState::Off if temp > max_temp => FanState::On,
            FanState::On if temp < min_temp => FanState::Off,
            state => state,
        }
    }

    fn duty(self, cfg: &FanCfg) -> u8 {
        match self {
            FanState::On => cfg.duty_percent,
            FanState::Off => 0,
        }
    }
}

/// Fan PWM output with the pin it was opened on.
struct FanPwm {
    pin: u8,
    channel: Blocking<dyn PwmChannel>,
}

impl FanPwm {
    async fn open(hardware: Arc<dyn Hardware>, pin: u8) -> Result<Self> {
        let channel = Blocking::open(move || hardware.open_pwm(pin))
            .await
            .with_context(|| format!("open fan pwm on pin {pin}"))?;
        Ok(Self { pin, channel })
    }

    async fn set_duty(&self, percent: u8) -> Result<()> {
        self.channel.call(move |pwm| pwm.set_duty(percent)).await
    }

    async fn release(&self) -> Result<()> {
        self.channel.call(|pwm| pwm.release()).await
    }
}

/// A PWM opened by [`FanController::start_checked`], waiting for the loop.
type Handoff = Arc<StdMutex<Option<FanPwm>>>;

fn take(handoff: &Handoff) -> Option<FanPwm> {
    handoff.lock().unwrap_or_else(PoisonError::into_inner).take()
}

pub struct FanController {
    config: ConfigManager,
    hardware: Arc<dyn Hardware>,
    handoff: Handoff,
    runner: TaskRunner,
}

impl FanController {
    pub fn new(
        config: ConfigManager,
        hardware: Arc<dyn Hardware>,
        sensor: Arc<dyn TemperatureSensor>,
    ) -> Self {
        Self::with_interval(config, hardware, sensor, SAMPLE_INTERVAL)
    }

    pub(crate) fn with_interval(
        config: ConfigManager,
        hardware: Arc<dyn Hardware>,
        sensor: Arc<dyn TemperatureSensor>,
        interval: Duration,
    ) -> Self {
        let handoff: Handoff = Arc::new(StdMutex::new(None));
        let cfg_source = config.clone();
        let loop_hardware = Arc::clone(&hardware);
        let loop_handoff = Arc::clone(&handoff);
        let runner = TaskRunner::new("fan", move |cancel| {
            run_fan(
                cfg_source.clone(),
                Arc::clone(&loop_hardware),
                Arc::clone(&sensor),
                Arc::clone(&loop_handoff),
                interval,
                cancel,
            )
        });
        Self {
            config,
            hardware,
            handoff,
            runner,
        }
    }

    pub fn start(&self) {
        self.runner.start();
    }

    /// Opens the fan PWM before starting the loop, so an unusable pin is
    /// reported to the caller instead of only ending the loop.
    pub async fn start_checked(&self) -> Result<()> {
        let cfg = self.config.fan().await;
        if cfg.enabled && !self.runner.is_running() {
            let pwm = FanPwm::open(Arc::clone(&self.hardware), cfg.pin).await?;
            *self.handoff.lock().unwrap_or_else(PoisonError::into_inner) = Some(pwm);
        }
        self.runner.start();
        Ok(())
    }

    pub async fn stop(&self, deadline: Duration) -> Result<()> {
        self.runner.stop(deadline).await
    }

    pub async fn config(&self) -> FanCfg {
        self.config.fan().await
    }

    /// Validates and persists `cfg`, then restarts the control loop with it.
    ///
    /// A rejected config leaves both the stored config and the running loop
    /// untouched. If the old loop does not stop in time the previous config
    /// is restored and the loop comes back on it once the old one ends.
    pub async fn set_config(&self, cfg: FanCfg) -> Result<()> {
        let previous = self.config.fan().await;
        self.runner
            .reconfigure(
                RESTART_DEADLINE,
                self.config.set_fan(cfg),
                self.config.set_fan(previous),
            )
            .await
    }
}

async fn run_fan(
    config: ConfigManager,
    hardware: Arc<dyn Hardware>,
    sensor: Arc<dyn TemperatureSensor>,
    handoff: Handoff,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let cfg = config.fan().await;
    let opened = take(&handoff);
    let pwm = match opened {
        Some(pwm) if cfg.enabled && pwm.pin == cfg.pin => pwm,
        stale => {
            if let Some(pwm) = stale {
                pwm.release().await.context("release stale fan pwm")?;
            }
            if !cfg.enabled {
                info!("Fan control disabled");
                return Ok(());
            }
            FanPwm::open(hardware, cfg.pin).await?
        }
    };
    info!(
        "Fan control on pin {}: on above {}°C, off below {}°C at {}%",
        cfg.pin, cfg.max_temp, cfg.min_temp, cfg.duty_percent
    );

    let result = control_loop(&cfg, &pwm, sensor.as_ref(), interval, &cancel).await;

    // The fan must never be left spinning when control stops.
    if let Err(e) = pwm.set_duty(0).await {
        warn!("Failed to stop fan: {e:#}");
    }
    pwm.release().await.context("release fan pwm")?;
    result
}

async fn control_loop(
    cfg: &FanCfg,
    pwm: &FanPwm,
    sensor: &dyn TemperatureSensor,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    pwm.set_duty(0).await.context("reset fan duty")?;
    let mut state = FanState::Off;
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let reading = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            reading = sensor.read_temperature() => reading,
        };
        let temp = match reading {
            Ok(temp) => temp,
            Err(e) => {
                debug!("cpu temperature error: {e:#}");
                continue;
            }
        };

        let next = state.next(temp, cfg.min_temp, cfg.max_temp);
        match pwm.set_duty(next.duty(cfg)).await {
            Ok(()) => {
                if next != state {
                    debug!("Fan {:?} at {temp:.1}°C", next);
                }
                state = next;
            }
            Err(e) => warn!("Failed to set fan duty: {e:#}"),
        }
    }
}
