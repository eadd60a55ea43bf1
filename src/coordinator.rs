//! System coordinator for managing service lifecycle.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use log::{error, info, warn};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast::{Receiver, error::RecvError},
};

use crate::{
    config::ConfigManager,
    control::ControlSurface,
    display::Display,
    drivers::{Hardware, linux::LinuxHardware},
    event::{Event, EventBus},
    fan::FanController,
    metrics::{HostMetrics, ProcMetrics},
    providers::{
        DBusServiceProvider, FanServiceProvider, ServiceProvider, StatusServiceProvider,
        WifiServiceProvider,
    },
    sensors::{TemperatureSensor, ThermalZoneSensor},
    status::StatusReporter,
    wifi::{
        WifiController,
        network::{NetworkService, Nmcli},
    },
};

/// How long each service gets to wind down at shutdown.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Everything the daemon talks to outside its own process.
#[derive(Clone)]
pub struct Backends {
    pub hardware: Arc<dyn Hardware>,
    pub network: Arc<dyn NetworkService>,
    pub metrics: Arc<dyn HostMetrics>,
    pub sensor: Arc<dyn TemperatureSensor>,
}

impl Backends {
    /// Kernel GPIO/I2C/PWM, `nmcli`, procfs and the SoC thermal zone.
    pub fn linux() -> Self {
        Self {
            hardware: Arc::new(LinuxHardware::new()),
            network: Arc::new(Nmcli::new()),
            metrics: Arc::new(ProcMetrics::new()),
            sensor: Arc::new(ThermalZoneSensor::cpu()),
        }
    }
}

/// Owns the display and the services for the lifetime of the daemon.
///
/// # Features
/// - Service prioritization (critical vs non-critical)
/// - Graceful degradation on service failures
/// - Shutdown on Ctrl-C, SIGTERM or a [`Event::SystemShutdown`] event
pub struct SystemCoordinator {
    event_bus: EventBus,
    event_rx: Receiver<Event>,
    backends: Backends,
    display: Option<Display>,
    surface: Option<ControlSurface>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl SystemCoordinator {
    pub fn new(backends: Backends) -> Self {
        let event_bus = EventBus::new();
        let event_rx = event_bus.subscribe();

        Self {
            event_bus,
            event_rx,
            backends,
            display: None,
            surface: None,
            service_providers: Vec::new(),
        }
    }

    /// Opens the display and builds every controller.
    ///
    /// A display that is enabled but can not be opened aborts startup.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");
        let backends = self.backends.clone();

        let display = Display::open(
            Arc::clone(&backends.hardware),
            &config_manager.display().await,
        )
        .await
        .context("Failed to open display")?;

        let status = Arc::new(StatusReporter::new(
            config_manager.clone(),
            display.clone(),
            Arc::clone(&backends.metrics),
            Arc::clone(&backends.sensor),
        ));
        let fan = Arc::new(FanController::new(
            config_manager.clone(),
            Arc::clone(&backends.hardware),
            Arc::clone(&backends.sensor),
        ));
        let wifi = Arc::new(WifiController::new(
            config_manager.clone(),
            Arc::clone(&backends.hardware),
            Arc::clone(&backends.network),
            display.clone(),
            Arc::clone(&status),
            self.event_bus.clone(),
        ));
        let surface = ControlSurface::new(
            config_manager.clone(),
            display.clone(),
            Arc::clone(&fan),
            Arc::clone(&status),
            Arc::clone(&wifi),
            self.event_bus.clone(),
        );

        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(FanServiceProvider::new(fan)),
            Box::new(StatusServiceProvider::new(status)),
            Box::new(WifiServiceProvider::new(wifi)),
        ];
        let control = config_manager.control().await;
        if control.enable_dbus {
            providers.push(Box::new(DBusServiceProvider::new(
                surface.clone(),
                control.system_bus,
            )));
        } else {
            info!("D-Bus interface disabled");
        }

        providers.sort_by_key(|b| std::cmp::Reverse(b.priority()));
        self.service_providers = providers;
        self.display = Some(display);
        self.surface = Some(surface);

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
        Ok(())
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start().await {
                Ok(()) => {
                    info!(
                        "Service '{}' started successfully (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {:#}",
                        provider.name(),
                        e
                    );
                }
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Waits for a shutdown request, then shuts everything down.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        bail!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    break;
                }

                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    break;
                }

                event = self.event_rx.recv() => {
                    if Self::handle_event(event)? {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Main event loop terminated");
        Ok(())
    }

    /// Returns `true` once shutdown has been requested.
    fn handle_event(event_result: Result<Event, RecvError>) -> Result<bool> {
        match event_result {
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                return Ok(true);
            }
            Ok(Event::ConfigChanged(section)) => {
                info!("{section:?} configuration applied");
            }
            Ok(Event::ApStateChanged(active)) => {
                info!("Access point {}", if active { "up" } else { "down" });
            }
            Err(RecvError::Closed) => {
                bail!("Event bus channel closed unexpectedly");
            }
            Err(RecvError::Lagged(n)) => {
                warn!("Event bus lagged by {n} messages");
            }
        }
        Ok(false)
    }

    /// Stops services in reverse start order, then blanks the display.
    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        for provider in self.service_providers.iter().rev() {
            if let Err(e) = provider.stop(SHUTDOWN_DEADLINE).await {
                error!("Error stopping '{}': {:#}", provider.name(), e);
            }
        }

        if let Some(display) = &self.display {
            if let Err(e) = display.close().await {
                error!("Error closing display: {:#}", e);
            }
        }

        info!("Shutdown complete");
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn control_surface(&self) -> Option<&ControlSurface> {
        self.surface.as_ref()
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}
