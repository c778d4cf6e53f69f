//! Frame encode/decode for the converter chips.
//!
//! All framing is byte-exact to the chip datasheets. The MCP parts are
//! stateless single-frame devices; the ADS1220 is command driven and keeps
//! a register file, so its command bytes and register frames live in the
//! [`ads1220`] submodule.

use crate::board::{AdcChip, DacChip};
use crate::error::{GertError, Result};

impl AdcChip {
    /// Build the tx frame that starts one conversion and clocks out the
    /// result. MCP parts carry the channel in the command byte; the ADS1220
    /// reads whatever its input mux is currently routed to.
    pub fn read_frame(self, channel: u32) -> Vec<u8> {
        match self {
            Self::Mcp3002 | Self::Mcp3202 => {
                let mut frame = vec![0u8; self.frame_len()];
                frame[0] = 0xd0 | (((channel & 0x01) as u8) << 5);
                frame
            }
            Self::Ads1220 => {
                let mut frame = vec![0u8; self.frame_len()];
                frame[0] = ads1220::CMD_RDATA;
                frame
            }
        }
    }

    /// Decode one received frame into a sample value.
    pub fn decode(self, frame: &[u8]) -> Result<u32> {
        if frame.len() != self.frame_len() {
            return Err(GertError::FrameLengthMismatch {
                expected: self.frame_len(),
                actual: frame.len(),
            });
        }
        let val = match self {
            Self::Mcp3002 => (((frame[0] as u32) << 7) | ((frame[1] as u32) >> 1)) & 0x3ff,
            Self::Mcp3202 => {
                ((frame[0] as u32 & 0x0f) << 9)
                    | ((frame[1] as u32) << 1)
                    | ((frame[2] as u32 & 0x80) >> 7)
            }
            Self::Ads1220 => {
                let raw = ((frame[1] as u32) << 16) | ((frame[2] as u32) << 8) | frame[3] as u32;
                // bipolar offset binary to two's complement
                (raw & 0x00ff_ffff) ^ 0x0080_0000
            }
        };
        Ok(val)
    }

    /// Synthesize the raw frame a chip would return for `value`. The inverse
    /// of [`AdcChip::decode`], used by the mock session and round-trip tests.
    pub fn encode_sample(self, value: u32) -> Vec<u8> {
        match self {
            Self::Mcp3002 => {
                let v = value & 0x3ff;
                vec![((v >> 7) & 0x07) as u8, ((v << 1) & 0xff) as u8]
            }
            Self::Mcp3202 => {
                let v = value & 0xfff;
                vec![((v >> 9) & 0x0f) as u8, ((v >> 1) & 0xff) as u8, ((v & 0x01) << 7) as u8]
            }
            Self::Ads1220 => {
                let raw = (value ^ 0x0080_0000) & 0x00ff_ffff;
                vec![0, (raw >> 16) as u8, (raw >> 8) as u8, raw as u8]
            }
        }
    }
}

impl DacChip {
    /// Encode one output value for `channel`. Data is masked to 12 bits and
    /// the frame enables the output buffer with unity gain.
    pub fn encode(self, channel: u32, value: u32) -> [u8; 2] {
        let v = value & 0xfff;
        [
            0x30 | (((channel & 0x01) as u8) << 7) | (v >> 8) as u8,
            (v & 0xff) as u8,
        ]
    }

    /// Decode a previously encoded frame back to `(channel, value)`.
    pub fn decode(self, frame: &[u8]) -> Result<(u32, u32)> {
        if frame.len() != self.frame_len() {
            return Err(GertError::FrameLengthMismatch {
                expected: self.frame_len(),
                actual: frame.len(),
            });
        }
        let channel = ((frame[0] >> 7) & 0x01) as u32;
        let value = ((frame[0] as u32 & 0x0f) << 8) | frame[1] as u32;
        Ok((channel, value))
    }
}

/// ADS1220 command bytes, register layout, and frame builders.
pub mod ads1220 {
    pub const CMD_RESET: u8 = 0x06;
    pub const CMD_SYNC: u8 = 0x08;
    pub const CMD_SHUTDOWN: u8 = 0x02;
    pub const CMD_RDATA: u8 = 0x10;
    pub const CMD_RREG: u8 = 0x20;
    pub const CMD_WREG: u8 = 0x40;

    // register 0 input mux selections
    pub const MUX_0_1: u8 = 0x00;
    pub const MUX_2_3: u8 = 0x50;
    pub const MUX_2_G: u8 = 0xa0;
    pub const MUX_3_G: u8 = 0xb0;
    pub const MUX_DIV2: u8 = 0xe0;

    pub const GAIN_1: u8 = 0x00;
    pub const PGA_BYPASS: u8 = 0x01;
    pub const DR_20: u8 = 0x00;
    pub const MODE_TURBO: u8 = 0x10;
    pub const REJECT_OFF: u8 = 0x00;
    pub const IDAC_OFF: u8 = 0x00;
    pub const DRDY_MODE: u8 = 0x02;

    /// Register image written at session construction: mux AIN0/AIN1, gain 1,
    /// PGA bypassed, 20 SPS turbo, 50/60 Hz rejection off, DRDY on both pins.
    pub fn default_registers() -> [u8; 4] {
        [
            MUX_0_1 | GAIN_1 | PGA_BYPASS,
            DR_20 | MODE_TURBO,
            REJECT_OFF,
            IDAC_OFF | DRDY_MODE,
        ]
    }

    /// Input mux code for a driver channel number, keeping gain and PGA
    /// bypass untouched.
    pub fn mux_for_channel(channel: u32) -> u8 {
        let mux = match channel {
            0 => MUX_0_1,
            1 => MUX_2_3,
            2 => MUX_2_G,
            3 => MUX_3_G,
            4 => MUX_DIV2,
            _ => MUX_0_1,
        };
        mux | GAIN_1 | PGA_BYPASS
    }

    /// WREG frame: write `values.len()` registers starting at `start`.
    pub fn wreg_frame(start: u8, values: &[u8]) -> Vec<u8> {
        let count = values.len() as u8;
        let mut frame = Vec::with_capacity(values.len() + 1);
        frame.push(CMD_WREG | ((start << 2) & 0x0c) | ((count - 1) & 0x03));
        frame.extend_from_slice(values);
        frame
    }

    /// RREG frame: read `count` registers starting at `start`. The response
    /// arrives in bytes 1..=count of the rx buffer.
    pub fn rreg_frame(start: u8, count: u8) -> Vec<u8> {
        let mut frame = vec![0u8; count as usize + 1];
        frame[0] = CMD_RREG | ((start << 2) & 0x0c) | ((count - 1) & 0x03);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_frame_channel_bit() {
        assert_eq!(AdcChip::Mcp3202.read_frame(0)[0], 0xd0);
        assert_eq!(AdcChip::Mcp3202.read_frame(1)[0], 0xf0);
        assert_eq!(AdcChip::Ads1220.read_frame(0)[0], ads1220::CMD_RDATA);
    }

    #[test]
    fn test_decode_mcp3002() {
        let chip = AdcChip::Mcp3002;
        assert_eq!(chip.decode(&[0, 0]).unwrap(), 0);
        for v in 0..=chip.max_data() {
            assert_eq!(chip.decode(&chip.encode_sample(v)).unwrap(), v);
        }
    }

    #[test]
    fn test_decode_mcp3202() {
        let chip = AdcChip::Mcp3202;
        for v in 0..=chip.max_data() {
            assert_eq!(chip.decode(&chip.encode_sample(v)).unwrap(), v);
        }
    }

    #[test]
    fn test_decode_ads1220_offset_binary() {
        let chip = AdcChip::Ads1220;
        // zero volts reports mid scale in offset binary
        assert_eq!(chip.decode(&[0, 0x80, 0, 0]).unwrap(), 0);
        for v in [
            0u32,
            1,
            0x7f_ffff,
            0x80_0000,
            0x80_0001,
            0x123456,
            chip.max_data(),
        ] {
            assert_eq!(chip.decode(&chip.encode_sample(v)).unwrap(), v);
        }
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        let err = AdcChip::Mcp3202.decode(&[0, 0]).unwrap_err();
        assert!(matches!(
            err,
            GertError::FrameLengthMismatch { expected: 3, actual: 2 }
        ));
    }

    #[test]
    fn test_dac_round_trip() {
        let chip = DacChip::Mcp4822;
        let frame = chip.encode(1, 0xabc);
        assert_eq!(frame, [0x30 | 0x80 | 0x0a, 0xbc]);
        assert_eq!(chip.decode(&frame).unwrap(), (1, 0xabc));
        // values are stripped to 12 bits
        assert_eq!(chip.decode(&chip.encode(0, 0x1fff)).unwrap(), (0, 0xfff));
    }

    #[test]
    fn test_wreg_frame() {
        let frame = ads1220::wreg_frame(0, &ads1220::default_registers());
        assert_eq!(frame[0], ads1220::CMD_WREG | 0x03);
        assert_eq!(frame.len(), 5);
        assert_eq!(frame[1], 0x01);
        assert_eq!(frame[2], 0x10);
    }

    #[test]
    fn test_mux_table() {
        assert_eq!(ads1220::mux_for_channel(0), 0x01);
        assert_eq!(ads1220::mux_for_channel(1), 0x51);
        assert_eq!(ads1220::mux_for_channel(4), 0xe1);
        assert_eq!(ads1220::mux_for_channel(9), 0x01);
    }
}
