//! Application entry point and builder pattern implementation.

use crate::{
    config::ConfigManager,
    coordinator::{Backends, SystemCoordinator},
};
use anyhow::Result;

/// Main application structure that orchestrates all daemon components.
///
/// Manages the complete lifecycle from initialization to shutdown,
/// coordinating all services through the SystemCoordinator.
///
/// # Example
///
/// ```no_run
/// use picpd::application::Application;
/// use picpd::config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = config::ConfigManager::load(None).await?;
/// let mut app = Application::builder()
///     .with_config_manager(config_manager)
///     .build()
///     .await?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    pub coordinator: SystemCoordinator,
    config_manager: ConfigManager,
}

impl Application {
    /// Creates a new ApplicationBuilder for constructing Application instances.
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Runs the complete daemon lifecycle: initialize, start services, and run main loop.
    pub async fn run(&mut self) -> Result<()> {
        self.coordinator
            .initialize(self.config_manager.clone())
            .await?;

        self.coordinator.start_all_services().await?;

        self.coordinator.run_main_loop().await?;

        Ok(())
    }
}

/// Builder pattern for creating Application instances.
pub struct ApplicationBuilder {
    config_manager: Option<ConfigManager>,
    backends: Option<Backends>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config_manager: None,
            backends: None,
        }
    }

    /// Sets the configuration manager for the application.
    pub fn with_config_manager(mut self, config_manager: ConfigManager) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    /// Replaces the Linux hardware, network and metrics backends.
    pub fn with_backends(mut self, backends: Backends) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Builds the Application instance with the provided configuration.
    pub async fn build(self) -> Result<Application> {
        let config_manager = self
            .config_manager
            .ok_or_else(|| anyhow::anyhow!("Configuration manager is required"))?;
        let coordinator = SystemCoordinator::new(self.backends.unwrap_or_else(Backends::linux));

        Ok(Application {
            coordinator,
            config_manager,
        })
    }
}
