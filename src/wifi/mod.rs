//! Push-button access point control.
//!
//! A confirmed short press brings the configured NetworkManager connection
//! up or down. Progress and errors are shown as a short notification that
//! hides the status page until the notification window closes.

pub mod button;
pub mod network;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ConfigManager, WifiCfg},
    display::Display,
    drivers::{Blocking, ButtonInput, Hardware},
    event::{Event, EventBus},
    graphics::DrawOptions,
    status::StatusReporter,
    task_runner::{RESTART_DEADLINE, TaskRunner},
};

use button::{ButtonAction, Debouncer};
use network::{ConnectSettings, NetworkService};

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything one execution of the button loop needs.
#[derive(Clone)]
struct WifiContext {
    config: ConfigManager,
    hardware: Arc<dyn Hardware>,
    network: Arc<dyn NetworkService>,
    display: Display,
    status: Arc<StatusReporter>,
    events: EventBus,
    ap_active: Arc<AtomicBool>,
    poll: Duration,
}

pub struct WifiController {
    config: ConfigManager,
    network: Arc<dyn NetworkService>,
    ap_active: Arc<AtomicBool>,
    runner: TaskRunner,
}

impl WifiController {
    pub fn new(
        config: ConfigManager,
        hardware: Arc<dyn Hardware>,
        network: Arc<dyn NetworkService>,
        display: Display,
        status: Arc<StatusReporter>,
        events: EventBus,
    ) -> Self {
        Self::with_poll(config, hardware, network, display, status, events, POLL_INTERVAL)
    }

    pub(crate) fn with_poll(
        config: ConfigManager,
        hardware: Arc<dyn Hardware>,
        network: Arc<dyn NetworkService>,
        display: Display,
        status: Arc<StatusReporter>,
        events: EventBus,
        poll: Duration,
    ) -> Self {
        let ap_active = Arc::new(AtomicBool::new(false));
        let ctx = WifiContext {
            config: config.clone(),
            hardware,
            network: Arc::clone(&network),
            display,
            status,
            events,
            ap_active: Arc::clone(&ap_active),
            poll,
        };
        let runner = TaskRunner::new("wifi", move |cancel| {
            let ctx = ctx.clone();
            async move { ctx.run(cancel).await }
        });
        Self {
            config,
            network,
            ap_active,
            runner,
        }
    }

    pub fn start(&self) {
        self.runner.start();
    }

    pub async fn stop(&self, deadline: Duration) -> Result<()> {
        self.runner.stop(deadline).await
    }

    pub async fn config(&self) -> WifiCfg {
        self.config.wifi().await
    }

    /// Validates and persists `cfg`, then restarts the button loop with it.
    /// A loop that misses the restart deadline keeps the previous config.
    pub async fn set_config(&self, cfg: WifiCfg) -> Result<()> {
        let previous = self.config.wifi().await;
        self.runner
            .reconfigure(
                RESTART_DEADLINE,
                self.config.set_wifi(cfg),
                self.config.set_wifi(previous),
            )
            .await
    }

    pub fn is_ap_active(&self) -> bool {
        self.ap_active.load(Ordering::SeqCst)
    }

    pub fn network(&self) -> &Arc<dyn NetworkService> {
        &self.network
    }
}

impl WifiContext {
    async fn run(self, cancel: CancellationToken) -> Result<()> {
        let cfg = self.config.wifi().await;

        // Start from a known state whether or not the loop runs.
        self.remove_connection(&cfg).await;
        if !cfg.enabled {
            info!("WiFi access point control disabled");
            return Ok(());
        }

        let hardware = Arc::clone(&self.hardware);
        let pin = cfg.button_pin;
        let button = Blocking::open(move || hardware.open_button(pin))
            .await
            .with_context(|| format!("open ap button on pin {pin}"))?;
        info!(
            "WiFi access point '{}' toggled by button on pin {}",
            cfg.ap_name, cfg.button_pin
        );

        let result = self.button_loop(&cfg, &button, &cancel).await;

        self.remove_connection(&cfg).await;
        self.status.set_enabled(true).await;
        button
            .call(|button| button.release())
            .await
            .context("release ap button")?;
        result
    }

    async fn button_loop(
        &self,
        cfg: &WifiCfg,
        button: &Blocking<dyn ButtonInput>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut debouncer = Debouncer::new();
        let mut ticker = tokio::time::interval(self.poll);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let pressed = match button.call(|button| button.is_pressed()).await {
                Ok(pressed) => pressed,
                Err(e) => {
                    debug!("button read error: {e:#}");
                    continue;
                }
            };

            match debouncer.poll(pressed, Instant::now()) {
                ButtonAction::Idle => {}
                ButtonAction::Suppress => self.status.set_enabled(false).await,
                ButtonAction::Restore => self.status.set_enabled(true).await,
                ButtonAction::Toggle => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        _ = self.toggle(cfg, &mut debouncer) => {}
                    }
                }
            }
        }
    }

    async fn toggle(&self, cfg: &WifiCfg, debouncer: &mut Debouncer) {
        if self.ap_active.load(Ordering::SeqCst) {
            self.stop_ap(cfg, debouncer).await;
        } else {
            self.start_ap(cfg, debouncer).await;
        }
    }

    async fn start_ap(&self, cfg: &WifiCfg, debouncer: &mut Debouncer) {
        self.notify(debouncer, &["Connect..."]).await;
        if let Err(e) = self.network.force_scan().await {
            warn!("WiFi rescan before starting '{}' failed: {e:#}", cfg.ap_name);
            self.notify(debouncer, error_lines(&e).as_slice()).await;
            return;
        }

        let settings = ConnectSettings {
            name: cfg.ap_name.clone(),
            ssid: cfg.ssid.clone(),
            device_name: cfg.device_name.clone(),
            password: cfg.password.clone(),
            ..ConnectSettings::default()
        };
        match self.network.connect(&settings).await {
            Ok(()) => {
                info!("Access point '{}' up", cfg.ap_name);
                self.set_ap_active(true);
                self.notify(debouncer, &["Connect success"]).await;
            }
            Err(e) => {
                warn!("Failed to bring up access point '{}': {e:#}", cfg.ap_name);
                self.remove_connection(cfg).await;
                self.notify(debouncer, error_lines(&e).as_slice()).await;
            }
        }
    }

    async fn stop_ap(&self, cfg: &WifiCfg, debouncer: &mut Debouncer) {
        self.notify(debouncer, &["Stopping..."]).await;
        match self.network.remove_connection_by_name(&cfg.ap_name).await {
            Ok(()) => {
                info!("Access point '{}' down", cfg.ap_name);
                self.set_ap_active(false);
                self.notify(debouncer, &["Stop success"]).await;
            }
            Err(e) => {
                warn!("Failed to stop access point '{}': {e:#}", cfg.ap_name);
                self.notify(debouncer, error_lines(&e).as_slice()).await;
            }
        }
    }

    /// Shows a transient message and keeps the status page hidden until the
    /// notification window closes.
    async fn notify<S: AsRef<str>>(&self, debouncer: &mut Debouncer, lines: &[S]) {
        debouncer.open_window(Instant::now());
        self.status.set_enabled(false).await;
        let lines = lines.iter().map(|l| l.as_ref().to_string()).collect();
        if let Err(e) = self.display.render_text(lines, DrawOptions::centered()).await {
            warn!("Failed to show notification: {e:#}");
        }
    }

    async fn remove_connection(&self, cfg: &WifiCfg) {
        if let Err(e) = self.network.remove_connection_by_name(&cfg.ap_name).await {
            debug!("No connection '{}' to remove: {e:#}", cfg.ap_name);
        }
        self.set_ap_active(false);
    }

    fn set_ap_active(&self, active: bool) {
        if self.ap_active.swap(active, Ordering::SeqCst) != active {
            self.events.notify(Event::ApStateChanged(active));
        }
    }
}

/// Splits an error message into display lines.
fn error_lines(err: &anyhow::Error) -> Vec<String> {
    format!("{err:#}")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}
