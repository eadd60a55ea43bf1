use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;

use crate::{providers::traits::ServiceProvider, wifi::WifiController};

/// Access point push button.
///
/// # Priority and Criticality
///
/// - **Priority**: 6
/// - **Critical**: No
pub struct WifiServiceProvider {
    wifi: Arc<WifiController>,
}

impl WifiServiceProvider {
    pub fn new(wifi: Arc<WifiController>) -> Self {
        Self { wifi }
    }
}

#[async_trait]
impl ServiceProvider for WifiServiceProvider {
    async fn start(&self) -> Result<()> {
        self.wifi.start();
        Ok(())
    }

    async fn stop(&self, deadline: Duration) -> Result<()> {
        self.wifi.stop(deadline).await
    }

    fn name(&self) -> &'static str {
        "WifiService"
    }

    fn priority(&self) -> i32 {
        6
    }
}
