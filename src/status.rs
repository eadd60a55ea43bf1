//! Periodic host status page.
//!
//! Samples host metrics every `status_interval` seconds and renders them as a
//! five-line block. Rendering can be suppressed while another controller owns
//! the screen; sampling carries on regardless.

use std::{
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ConfigManager,
    display::Display,
    graphics::DrawOptions,
    metrics::{CpuTimes, HostMetrics, NetCounters, Usage, format_optional_bytes},
    sensors::TemperatureSensor,
    task_runner::{RESTART_DEADLINE, TaskRunner},
};

/// Network throughput in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetSpeed {
    pub tx: u64,
    pub rx: u64,
}

impl NetSpeed {
    /// Rate between two counter readings, `None` if the counters went
    /// backwards or no time passed.
    pub fn between(earlier: NetCounters, later: NetCounters, elapsed: Duration) -> Option<Self> {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        Some(Self {
            tx: (later.tx.checked_sub(earlier.tx)? as f64 / secs) as u64,
            rx: (later.rx.checked_sub(earlier.rx)? as f64 / secs) as u64,
        })
    }
}

/// One round of measurements. Missing values failed to read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSample {
    pub ip: Option<String>,
    pub cpu_percent: Option<f64>,
    pub cpu_temp: Option<f32>,
    pub memory: Option<Usage>,
    pub disk: Option<Usage>,
    pub net: Option<NetSpeed>,
}

fn or_dash<T>(value: Option<T>, fmt: impl FnOnce(T) -> String) -> String {
    value.map(fmt).unwrap_or_else(|| "--".to_string())
}

impl StatusSample {
    pub fn lines(&self) -> Vec<String> {
        let usage = |u: Option<Usage>| {
            format!(
                "{} {}%",
                format_optional_bytes(u.map(|u| u.used)),
                or_dash(u, |u| format!("{:.1}", u.percent()))
            )
        };
        vec![
            format!("IP {}", self.ip.as_deref().filter(|ip| !ip.is_empty()).unwrap_or("--")),
            format!(
                "CPU {}% {}°C",
                or_dash(self.cpu_percent, |p| format!("{p:.1}")),
                or_dash(self.cpu_temp, |t| format!("{t:.1}"))
            ),
            format!("MEM {}", usage(self.memory)),
            format!("DISK {}", usage(self.disk)),
            format!(
                "↑{}/s ↓{}/s",
                format_optional_bytes(self.net.map(|n| n.tx)),
                format_optional_bytes(self.net.map(|n| n.rx))
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LiveMetrics {
    cpu_percent: Option<f64>,
    cpu_temp: Option<f32>,
    net: Option<NetSpeed>,
}

struct Shared {
    display: Display,
    enabled: AtomicBool,
    /// Last rendered page; the lock also orders renders against `set_enabled`.
    last_lines: Mutex<Option<Vec<String>>>,
    live: StdMutex<LiveMetrics>,
}

impl Shared {
    async fn publish(&self, lines: Vec<String>) {
        let mut last = self.last_lines.lock().await;
        if self.enabled.load(Ordering::SeqCst) {
            self.render(lines.clone()).await;
        }
        *last = Some(lines);
    }

    async fn render(&self, lines: Vec<String>) {
        if let Err(e) = self.display.render_text(lines, DrawOptions::vertical()).await {
            warn!("Failed to render status: {e:#}");
        }
    }

    fn live(&self) -> LiveMetrics {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct StatusReporter {
    shared: Arc<Shared>,
    runner: TaskRunner,
}

impl StatusReporter {
    pub fn new(
        config: ConfigManager,
        display: Display,
        metrics: Arc<dyn HostMetrics>,
        sensor: Arc<dyn TemperatureSensor>,
    ) -> Self {
        Self::build(config, display, metrics, sensor, None)
    }

    /// Samples every `interval` instead of the configured one.
    pub(crate) fn with_interval(
        config: ConfigManager,
        display: Display,
        metrics: Arc<dyn HostMetrics>,
        sensor: Arc<dyn TemperatureSensor>,
        interval: Duration,
    ) -> Self {
        Self::build(config, display, metrics, sensor, Some(interval))
    }

    fn build(
        config: ConfigManager,
        display: Display,
        metrics: Arc<dyn HostMetrics>,
        sensor: Arc<dyn TemperatureSensor>,
        interval: Option<Duration>,
    ) -> Self {
        let shared = Arc::new(Shared {
            display,
            enabled: AtomicBool::new(true),
            last_lines: Mutex::new(None),
            live: StdMutex::new(LiveMetrics::default()),
        });
        let loop_shared = Arc::clone(&shared);
        let runner = TaskRunner::new("status", move |cancel| {
            run_status(
                config.clone(),
                Arc::clone(&loop_shared),
                Arc::clone(&metrics),
                Arc::clone(&sensor),
                interval,
                cancel,
            )
        });
        Self { shared, runner }
    }

    /// Starts sampling if there is a display to render to.
    pub async fn start(&self) {
        if self.shared.display.is_present().await {
            self.runner.start();
        } else {
            info!("No display, status page not started");
        }
    }

    pub async fn stop(&self, deadline: Duration) -> Result<()> {
        self.runner.stop(deadline).await
    }

    /// Restarts sampling so a new interval or display takes effect.
    ///
    /// When the running loop misses the deadline the timeout is returned and
    /// sampling resumes as soon as that loop ends.
    pub async fn restart(&self) -> Result<()> {
        if let Err(e) = self.runner.stop(RESTART_DEADLINE).await {
            self.runner.start_after_current();
            return Err(e);
        }
        self.start().await;
        Ok(())
    }

    /// Enables or suppresses rendering. Enabling redraws the last page.
    pub async fn set_enabled(&self, enabled: bool) {
        let last = self.shared.last_lines.lock().await;
        self.shared.enabled.store(enabled, Ordering::SeqCst);
        if let (true, Some(lines)) = (enabled, last.as_ref()) {
            self.shared.render(lines.clone()).await;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn cpu_percent(&self) -> Option<f64> {
        self.shared.live().cpu_percent
    }

    pub fn cpu_temp(&self) -> Option<f32> {
        self.shared.live().cpu_temp
    }

    pub fn net_speed(&self) -> Option<NetSpeed> {
        self.shared.live().net
    }
}

async fn run_status(
    config: ConfigManager,
    shared: Arc<Shared>,
    metrics: Arc<dyn HostMetrics>,
    sensor: Arc<dyn TemperatureSensor>,
    interval: Option<Duration>,
    cancel: CancellationToken,
) -> Result<()> {
    let interval = match interval {
        Some(interval) => interval,
        None => Duration::from_secs(u64::from(config.display().await.status_interval.max(1))),
    };
    info!("Status page every {interval:?}");

    let mut previous_net: Option<(NetCounters, Instant)> = None;
    loop {
        let cpu_before = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            times = metrics.cpu_times() => times.inspect_err(|e| debug!("cpu times error: {e:#}")).ok(),
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }

        let sample = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            sample = take_sample(metrics.as_ref(), sensor.as_ref(), cpu_before, &mut previous_net) => sample,
        };

        *shared.live.lock().unwrap_or_else(PoisonError::into_inner) = LiveMetrics {
            cpu_percent: sample.cpu_percent,
            cpu_temp: sample.cpu_temp,
            net: sample.net,
        };
        shared.publish(sample.lines()).await;
    }
}

/// Reads every metric once. The network rate is taken against
/// `previous_net`, which is then replaced by this reading.
async fn take_sample(
    metrics: &dyn HostMetrics,
    sensor: &dyn TemperatureSensor,
    cpu_before: Option<CpuTimes>,
    previous_net: &mut Option<(NetCounters, Instant)>,
) -> StatusSample {
    let cpu_percent = match (cpu_before, metrics.cpu_times().await) {
        (Some(before), Ok(after)) => after.usage_since(&before),
        (_, Err(e)) => {
            debug!("cpu times error: {e:#}");
            None
        }
        (None, Ok(_)) => None,
    };

    let net = match metrics.net_counters().await {
        Ok(counters) => {
            let now = Instant::now();
            let speed = previous_net
                .and_then(|(earlier, at)| NetSpeed::between(earlier, counters, now - at));
            *previous_net = Some((counters, now));
            speed
        }
        Err(e) => {
            debug!("net counters error: {e:#}");
            *previous_net = None;
            None
        }
    };

    StatusSample {
        ip: metrics.host_ip().await.inspect_err(|e| warn!("host ip error: {e:#}")).ok(),
        cpu_percent,
        cpu_temp: sensor
            .read_temperature()
            .await
            .inspect_err(|e| debug!("cpu temperature error: {e:#}"))
            .ok(),
        memory: metrics.memory().await.inspect_err(|e| warn!("memory info error: {e:#}")).ok(),
        disk: metrics.root_disk().await.inspect_err(|e| warn!("root disk info error: {e:#}")).ok(),
        net,
    }
}
