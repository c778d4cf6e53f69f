//! Board descriptors and converter chip types.
//!
//! The driver talks to one ADC and one DAC on dedicated chip selects. The
//! board table carries the per-direction timing floors the command validator
//! and pacer work from; all values include the measured software overhead of
//! the SPI stack.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum board sample clock in ns per second.
pub const MAX_BOARD_RATE: u32 = 1_000_000_000;

/// SPI bus mode used by the MCP converters.
pub const SPI_MODE_MCP: u8 = 3;
/// SPI bus mode used by the ADS1220.
pub const SPI_MODE_ADS1220: u8 = 1;
/// 8 bit SPI words for every supported chip.
pub const SPI_BITS_PER_WORD: u8 = 8;

/// Acquisition direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Analog input (ADC)
    Input,
    /// Analog output (DAC)
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Supported ADC chips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdcChip {
    /// 10-bit, 2 channels, 2-byte frames
    Mcp3002,
    /// 12-bit, 2 channels, 3-byte frames
    #[default]
    Mcp3202,
    /// 24-bit delta-sigma, command byte + 3 data bytes
    Ads1220,
}

impl AdcChip {
    /// Bytes on the wire per conversion.
    pub fn frame_len(self) -> usize {
        match self {
            Self::Mcp3002 => 2,
            Self::Mcp3202 => 3,
            Self::Ads1220 => 4,
        }
    }

    /// Converter resolution in bits.
    pub fn resolution_bits(self) -> u32 {
        match self {
            Self::Mcp3002 => 10,
            Self::Mcp3202 => 12,
            Self::Ads1220 => 24,
        }
    }

    /// Largest representable sample value.
    pub fn max_data(self) -> u32 {
        (1u32 << self.resolution_bits()) - 1
    }

    /// SPI mode required by the chip.
    pub fn spi_mode(self) -> u8 {
        match self {
            Self::Ads1220 => SPI_MODE_ADS1220,
            _ => SPI_MODE_MCP,
        }
    }

    /// The ADS1220 needs a command/response exchange plus a restart command
    /// per conversion, so it can never ride in a batched transfer.
    pub fn supports_batching(self) -> bool {
        !matches!(self, Self::Ads1220)
    }
}

impl fmt::Display for AdcChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mcp3002 => write!(f, "MCP3002"),
            Self::Mcp3202 => write!(f, "MCP3202"),
            Self::Ads1220 => write!(f, "ADS1220"),
        }
    }
}

/// Supported DAC chips. All take the same 2-byte frame with the data left
/// aligned into 12 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DacChip {
    /// 8-bit output from 12-bit frame data
    Mcp4802,
    /// 10-bit output
    Mcp4812,
    /// 12-bit output
    #[default]
    Mcp4822,
}

impl DacChip {
    /// Bytes on the wire per output value.
    pub fn frame_len(self) -> usize {
        2
    }

    /// Converter resolution in bits.
    pub fn resolution_bits(self) -> u32 {
        match self {
            Self::Mcp4802 => 8,
            Self::Mcp4812 => 10,
            Self::Mcp4822 => 12,
        }
    }

    /// Largest accepted frame value (frames always carry 12 bits).
    pub fn max_data(self) -> u32 {
        0xfff
    }
}

impl fmt::Display for DacChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mcp4802 => write!(f, "MCP4802"),
            Self::Mcp4812 => write!(f, "MCP4812"),
            Self::Mcp4822 => write!(f, "MCP4822"),
        }
    }
}

/// Board selection, normally taken from [`crate::config::DriverConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardVariant {
    /// Stock Gertboard with the onboard MCP converters
    #[default]
    Gertboard,
    /// Expanded 8-channel build
    Fredboard,
}

impl BoardVariant {
    /// The immutable descriptor for this board.
    pub fn info(self) -> &'static BoardInfo {
        match self {
            Self::Gertboard => &GERTBOARD,
            Self::Fredboard => &FREDBOARD,
        }
    }
}

/// Immutable board-derived constants, one set per direction.
#[derive(Debug, Clone)]
pub struct BoardInfo {
    pub name: &'static str,
    pub ai_channels: u32,
    pub ao_channels: u32,
    /// Minimum ns per AI conversion including software overhead
    pub ai_ns_min: u32,
    /// Optimistic AI floor used by the command validator
    pub ai_ns_min_calc: u32,
    pub ao_ns_min: u32,
    pub ao_ns_min_calc: u32,
    /// ADC chip select
    pub ai_cs: u8,
    /// DAC chip select
    pub ao_cs: u8,
    pub ai_max_speed_hz: u32,
    pub ai_max_speed_hz_ads1220: u32,
    pub ao_max_speed_hz: u32,
}

impl BoardInfo {
    /// Channel count for a direction.
    pub fn channels(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Input => self.ai_channels,
            Direction::Output => self.ao_channels,
        }
    }

    /// Conservative minimum conversion interval for a direction.
    pub fn ns_min(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Input => self.ai_ns_min,
            Direction::Output => self.ao_ns_min,
        }
    }

    /// Optimistic minimum used for the scan-interval floor.
    pub fn ns_min_calc(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Input => self.ai_ns_min_calc,
            Direction::Output => self.ao_ns_min_calc,
        }
    }

    /// Maximum SPI clock for the active ADC.
    pub fn ai_speed_hz(&self, chip: AdcChip) -> u32 {
        match chip {
            AdcChip::Ads1220 => self.ai_max_speed_hz_ads1220,
            _ => self.ai_max_speed_hz,
        }
    }
}

static GERTBOARD: BoardInfo = BoardInfo {
    name: "gertboard",
    ai_channels: 2,
    ao_channels: 2,
    ai_ns_min: 50_000,
    ai_ns_min_calc: 35_000,
    ao_ns_min: 5_000,
    ao_ns_min_calc: 4_500,
    ai_cs: 0,
    ao_cs: 1,
    ai_max_speed_hz: 1_000_000,
    ai_max_speed_hz_ads1220: 500_000,
    ao_max_speed_hz: 8_000_000,
};

static FREDBOARD: BoardInfo = BoardInfo {
    name: "fredboard",
    ai_channels: 8,
    ao_channels: 8,
    ai_ns_min: 50_000,
    ai_ns_min_calc: 35_000,
    ao_ns_min: 5_000,
    ao_ns_min_calc: 4_500,
    ai_cs: 0,
    ao_cs: 1,
    ai_max_speed_hz: 1_000_000,
    ai_max_speed_hz_ads1220: 500_000,
    ao_max_speed_hz: 8_000_000,
};
