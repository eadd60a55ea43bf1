//! Driver for SH1106 page-addressed monochrome OLED controllers.
//!
//! The framebuffer holds one bit per pixel, eight rows per byte, laid out
//! page by page. Pages touched since the last flush are tracked in a bitmask
//! so incremental flushes only retransmit what changed.

pub mod protocol;

use anyhow::{Context, Result, anyhow};
use embedded_hal::delay::DelayNs;
use log::{debug, warn};

use self::protocol::{COLUMN_OFFSET, Command, command_frames, data_frame, init_sequence, panel_timing};
use super::DisplayBus;
use crate::{
    config::{DisplayCfg, VccMode},
    error::ControlError,
    graphics::GrayCanvas,
};

/// Pixels brighter than this are lit.
pub const LUMA_THRESHOLD: u8 = 70;

const SETTLE_MS: u32 = 50;

pub struct Sh1106 {
    bus: Option<Box<dyn DisplayBus>>,
    width: u16,
    height: u16,
    invert: bool,
    buffer: Vec<u8>,
    dirty: u8,
}

impl Sh1106 {
    /// Resets the panel and pushes a blank frame.
    ///
    /// Fails with [`ControlError::UnsupportedPanel`] before touching the bus
    /// if the geometry has no known timing.
    pub fn new(bus: Box<dyn DisplayBus>, cfg: &DisplayCfg, delay: &mut impl DelayNs) -> Result<Self> {
        let timing = panel_timing(cfg.width, cfg.height, cfg.vcc_mode).ok_or(
            ControlError::UnsupportedPanel {
                width: cfg.width,
                height: cfg.height,
            },
        )?;

        let mut device = Self {
            bus: Some(bus),
            width: cfg.width,
            height: cfg.height,
            invert: cfg.invert,
            buffer: vec![0; usize::from(cfg.width) * usize::from(cfg.height) / 8],
            dirty: 0,
        };

        device.reset(cfg.vcc_mode, timing, delay)?;
        Ok(device)
    }

    fn reset(
        &mut self,
        vcc: VccMode,
        timing: protocol::PanelTiming,
        delay: &mut impl DelayNs,
    ) -> Result<()> {
        let sequence = init_sequence(self.height, vcc, timing);
        let bus = self.bus_mut()?;
        for cmd in sequence {
            send(bus, cmd)?;
        }
        delay.delay_ms(SETTLE_MS);
        self.flush(true).context("reset SH1106")
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    fn pages(&self) -> u8 {
        (self.height / 8) as u8
    }

    fn bus_mut(&mut self) -> Result<&mut Box<dyn DisplayBus>> {
        self.bus.as_mut().ok_or_else(|| anyhow!("display is closed"))
    }

    /// Sets one pixel in the framebuffer. Out-of-range coordinates are ignored.
    pub fn set_pixel(&mut self, x: i32, y: i32, on: bool) {
        let Some((index, mask)) = self.locate(x, y) else {
            return;
        };
        let before = self.buffer[index] & mask;
        if on {
            self.buffer[index] |= mask;
        } else {
            self.buffer[index] &= !mask;
        }
        if before != self.buffer[index] & mask {
            self.dirty |= 1 << (y / 8);
        }
    }

    pub fn pixel(&self, x: i32, y: i32) -> bool {
        self.locate(x, y)
            .is_some_and(|(index, mask)| self.buffer[index] & mask != 0)
    }

    fn locate(&self, x: i32, y: i32) -> Option<(usize, u8)> {
        if x < 0 || y < 0 || x >= i32::from(self.width) || y >= i32::from(self.height) {
            return None;
        }
        let index = x as usize + (y as usize / 8) * usize::from(self.width);
        Some((index, 1 << (y % 8)))
    }

    /// Thresholds the overlapping region of `image` into the framebuffer and
    /// flushes the pages that changed.
    pub fn render_image(&mut self, image: &GrayCanvas) -> Result<()> {
        let width = image.width().min(u32::from(self.width));
        let height = image.height().min(u32::from(self.height));
        for x in 0..width {
            for y in 0..height {
                let lit = (image.luma(x, y) > LUMA_THRESHOLD) != self.invert;
                self.set_pixel(x as i32, y as i32, lit);
            }
        }
        self.flush(false)
    }

    /// Sends dirty pages, or every page when `full` is set.
    ///
    /// The dirty mask is only cleared once every page went out.
    pub fn flush(&mut self, full: bool) -> Result<()> {
        let pages = self.pages();
        let width = usize::from(self.width);
        let window = (self.width != 128 || self.height != 64).then(|| {
            [
                Command::ColumnAddress {
                    start: 0,
                    end: (self.width - 1) as u8,
                },
                Command::PageAddress {
                    start: 0,
                    end: pages - 1,
                },
            ]
        });
        let dirty = self.dirty;
        let bus = self.bus.as_mut().ok_or_else(|| anyhow!("display is closed"))?;

        // A 128x64 panel wraps its column counter and garbles the frame if
        // the window is reprogrammed.
        if let (true, Some(window)) = (full, window) {
            for cmd in window {
                send(bus, cmd)?;
            }
        }

        let mut sent = 0;
        for page in 0..pages {
            if !full && dirty & (1 << page) == 0 {
                continue;
            }
            send(bus, Command::PageStart(page))?;
            send(bus, Command::LowColumn(COLUMN_OFFSET))?;
            send(bus, Command::HighColumn(0))?;
            let start = usize::from(page) * width;
            bus.write(&data_frame(&self.buffer[start..start + width]))?;
            sent += 1;
        }

        self.dirty = 0;
        debug!("Flushed {sent} display pages (full: {full})");
        Ok(())
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.fill(0);
    }

    /// Blanks the panel and releases the bus. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<()> {
        if self.bus.is_none() {
            return Ok(());
        }
        self.clear_buffer();
        if let Err(e) = self.flush(true) {
            warn!("Failed to blank display on close: {e:#}");
        }
        self.bus = None;
        Ok(())
    }
}

fn send(bus: &mut Box<dyn DisplayBus>, cmd: Command) -> Result<()> {
    for frame in command_frames(cmd) {
        bus.write(&frame)?;
    }
    Ok(())
}
