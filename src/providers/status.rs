use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;

use crate::{providers::traits::ServiceProvider, status::StatusReporter};

/// Status page on the display. Does nothing without a display.
///
/// # Priority and Criticality
///
/// - **Priority**: 8
/// - **Critical**: No
pub struct StatusServiceProvider {
    status: Arc<StatusReporter>,
}

impl StatusServiceProvider {
    pub fn new(status: Arc<StatusReporter>) -> Self {
        Self { status }
    }
}

#[async_trait]
impl ServiceProvider for StatusServiceProvider {
    async fn start(&self) -> Result<()> {
        self.status.start().await;
        Ok(())
    }

    async fn stop(&self, deadline: Duration) -> Result<()> {
        self.status.stop(deadline).await
    }

    fn name(&self) -> &'static str {
        "StatusService"
    }

    fn priority(&self) -> i32 {
        8
    }
}
