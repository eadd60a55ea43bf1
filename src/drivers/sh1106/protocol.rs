//! SH1106 command set and I2C framing.

use crate::config::VccMode;

/// Control byte announcing a single command byte.
pub const CONTROL_COMMAND: u8 = 0x00;
/// Control byte announcing display RAM data.
pub const CONTROL_DATA: u8 = 0x40;

/// The SH1106 RAM is 132 columns wide; panels start at column 2.
pub const COLUMN_OFFSET: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    DisplayOn(bool),
    ClockDivider(u8),
    Multiplex(u8),
    DisplayOffset(u8),
    StartLine(u8),
    ChargePump(VccMode),
    MemoryMode(u8),
    SegmentRemap,
    ComScanDec,
    ComPins(u8),
    Contrast(u8),
    Precharge(u8),
    VcomDetect(u8),
    ResumeFromRam,
    NormalDisplay,
    DeactivateScroll,
    ColumnAddress { start: u8, end: u8 },
    PageAddress { start: u8, end: u8 },
    PageStart(u8),
    LowColumn(u8),
    HighColumn(u8),
}

impl Command {
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Command::DisplayOn(on) => vec![if on { 0xAF } else { 0xAE }],
            Command::ClockDivider(v) => vec![0xD5, v],
            Command::Multiplex(v) => vec![0xA8, v],
            Command::DisplayOffset(v) => vec![0xD3, v],
            Command::StartLine(line) => vec![0x40 | (line & 0x3F)],
            Command::ChargePump(vcc) => vec![
                0x8D,
                match vcc {
                    VccMode::External => 0x10,
                    VccMode::SwitchCap => 0x14,
                },
            ],
            Command::MemoryMode(v) => vec![0x20, v],
            Command::SegmentRemap => vec![0xA1],
            Command::ComScanDec => vec![0xC8],
            Command::ComPins(v) => vec![0xDA, v],
            Command::Contrast(v) => vec![0x81, v],
            Command::Precharge(v) => vec![0xD9, v],
            Command::VcomDetect(v) => vec![0xDB, v],
            Command::ResumeFromRam => vec![0xA4],
            Command::NormalDisplay => vec![0xA6],
            Command::DeactivateScroll => vec![0x2E],
            Command::ColumnAddress { start, end } => vec![0x21, start, end],
            Command::PageAddress { start, end } => vec![0x22, start, end],
            Command::PageStart(page) => vec![0xB0 | (page & 0x07)],
            Command::LowColumn(col) => vec![col & 0x0F],
            Command::HighColumn(col) => vec![0x10 | (col & 0x0F)],
        }
    }
}

/// Panel wiring constants selected by panel geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PanelTiming {
    pub com_pins: u8,
    pub contrast: u8,
}

/// Returns `None` for sizes without a known configuration.
pub fn panel_timing(width: u16, height: u16, vcc: VccMode) -> Option<PanelTiming> {
    let external = vcc == VccMode::External;
    match (width, height) {
        (128, 64) | (64, 48) => Some(PanelTiming {
            com_pins: 0x12,
            contrast: if external { 0x9F } else { 0xCF },
        }),
        (128, 32) => Some(PanelTiming {
            com_pins: 0x02,
            contrast: 0x8F,
        }),
        (96, 16) => Some(PanelTiming {
            com_pins: 0x02,
            contrast: if external { 0x10 } else { 0xAF },
        }),
        _ => None,
    }
}

/// Power-on command sequence for a panel, ending with the display on.
pub fn init_sequence(height: u16, vcc: VccMode, timing: PanelTiming) -> Vec<Command> {
    vec![
        Command::DisplayOn(false),
        Command::ClockDivider(0x80),
        Command::Multiplex((height - 1) as u8),
        Command::DisplayOffset(0),
        Command::StartLine(0),
        Command::ChargePump(vcc),
        Command::MemoryMode(0x00),
        Command::SegmentRemap,
        Command::ComScanDec,
        Command::ComPins(timing.com_pins),
        Command::Contrast(timing.contrast),
        Command::Precharge(match vcc {
            VccMode::External => 0x22,
            VccMode::SwitchCap => 0xF1,
        }),
        Command::VcomDetect(0x40),
        Command::ResumeFromRam,
        Command::NormalDisplay,
        Command::DeactivateScroll,
        Command::DisplayOn(true),
    ]
}

/// Frames a command as one `[0x00, byte]` transaction per byte.
pub fn command_frames(cmd: Command) -> impl Iterator<Item = [u8; 2]> {
    cmd.to_bytes()
        .into_iter()
        .map(|byte| [CONTROL_COMMAND, byte])
}

/// Frames display RAM data as a single transaction.
pub fn data_frame(data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(data.len() + 1);
    frame.push(CONTROL_DATA);
    frame.extend_from_slice(data);
    frame
}
