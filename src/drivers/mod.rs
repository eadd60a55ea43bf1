//! Hardware seams used by the controllers.
//!
//! Every controller talks to hardware through the small traits below so the
//! control logic can be exercised with in-memory doubles. [`linux`] holds the
//! implementations backed by the kernel I2C, GPIO and PWM interfaces.

pub mod linux;
pub mod sh1106;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::config::I2cBusCfg;

/// Write-only transport to a display controller.
pub trait DisplayBus: Send + 'static {
    /// Sends one framed transaction (control byte followed by payload).
    fn write(&mut self, frame: &[u8]) -> Result<()>;
}

/// One hardware PWM output driving the fan.
pub trait PwmChannel: Send + 'static {
    fn set_duty(&mut self, percent: u8) -> Result<()>;

    /// Returns the pin to the system. The output is left low.
    fn release(&mut self) -> Result<()>;
}

/// A push button read by polling.
pub trait ButtonInput: Send + 'static {
    fn is_pressed(&mut self) -> Result<bool>;

    fn release(&mut self) -> Result<()>;
}

/// Opens hardware resources from configuration.
pub trait Hardware: Send + Sync + 'static {
    fn open_display_bus(&self, bus: &I2cBusCfg) -> Result<Box<dyn DisplayBus>>;

    fn open_pwm(&self, pin: u8) -> Result<Box<dyn PwmChannel>>;

    fn open_button(&self, pin: u8) -> Result<Box<dyn ButtonInput>>;
}

/// Hardware handle whose calls run on the blocking pool, since sysfs and
/// character-device I/O may stall.
pub struct Blocking<T: ?Sized + Send + 'static> {
    inner: Arc<Mutex<Box<T>>>,
}

impl<T: ?Sized + Send + 'static> Clone for Blocking<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized + Send + 'static> Blocking<T> {
    /// Runs `open` on the blocking pool and wraps what it returns.
    pub async fn open<F>(open: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Box<T>> + Send + 'static,
    {
        let device = tokio::task::spawn_blocking(open).await??;
        Ok(Self {
            inner: Arc::new(Mutex::new(device)),
        })
    }

    pub async fn call<R, F>(&self, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut T) -> Result<R> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut device = inner.blocking_lock();
            op(&mut **device)
        })
        .await?
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use mock::{MockPwm, PwmOp};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn blocking_handle_runs_calls_on_the_device() {
        let pwm = MockPwm::default();
        let opened = pwm.clone();
        let handle = Blocking::<dyn PwmChannel>::open(move || Ok(Box::new(opened) as Box<dyn PwmChannel>))
            .await
            .unwrap();

        handle.call(|pwm| pwm.set_duty(30)).await.unwrap();
        handle.clone().call(|pwm| pwm.release()).await.unwrap();

        assert_eq!(*pwm.ops.lock().unwrap(), vec![PwmOp::Duty(30), PwmOp::Release]);
    }

    #[tokio::test]
    async fn blocking_open_propagates_errors() {
        let result = Blocking::<dyn PwmChannel>::open(|| anyhow::bail!("pin 4 has no PWM channel")).await;

        assert!(result.is_err());
    }
}
