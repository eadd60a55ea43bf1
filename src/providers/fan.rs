use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;

use crate::{fan::FanController, providers::traits::ServiceProvider};

/// Hysteresis fan control.
///
/// # Priority and Criticality
///
/// - **Priority**: 10 (highest)
/// - **Critical**: Yes (an unattended board must not overheat)
pub struct FanServiceProvider {
    fan: Arc<FanController>,
}

impl FanServiceProvider {
    pub fn new(fan: Arc<FanController>) -> Self {
        Self { fan }
    }
}

#[async_trait]
impl ServiceProvider for FanServiceProvider {
    async fn start(&self) -> Result<()> {
        self.fan.start_checked().await
    }

    async fn stop(&self, deadline: Duration) -> Result<()> {
        self.fan.stop(deadline).await
    }

    fn name(&self) -> &'static str {
        "FanService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}
