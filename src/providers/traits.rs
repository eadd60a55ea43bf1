use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// A long-running part of the daemon started and stopped by the coordinator.
///
/// Providers are started in descending priority and stopped in reverse.
/// A critical provider failing to start aborts startup; others are logged
/// and skipped.
///
/// # Example
///
/// ```no_run
/// use picpd::providers::traits::ServiceProvider;
/// use std::time::Duration;
/// use anyhow::Result;
///
/// struct ExampleService;
///
/// #[async_trait::async_trait]
/// impl ServiceProvider for ExampleService {
///     async fn start(&self) -> Result<()> {
///         Ok(())
///     }
///
///     async fn stop(&self, _deadline: Duration) -> Result<()> {
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str { "ExampleService" }
///     fn priority(&self) -> i32 { 5 }
/// }
/// ```
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    async fn start(&self) -> Result<()>;

    /// Stops the service, waiting at most `deadline` for it to wind down.
    async fn stop(&self, deadline: Duration) -> Result<()>;

    /// Returns service name for logging and management.
    fn name(&self) -> &'static str;

    /// Returns startup priority (higher numbers start first).
    fn priority(&self) -> i32 {
        0
    }

    /// Indicates if service is critical for system operation.
    fn is_critical(&self) -> bool {
        false
    }
}
