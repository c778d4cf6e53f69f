//! In-memory SPI sessions for tests and demos.
//!
//! [`MockAdc`] answers read frames with a deterministic sample pattern and
//! keeps an ADS1220-style register file; [`MockDac`] records every output
//! frame. Both are cheaply cloneable handles over shared state so a test can
//! hand one clone to the device and keep another for inspection.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::board::{AdcChip, DacChip};
use crate::codec::ads1220;
use crate::error::{GertError, Result};
use crate::spi::{LinkSettings, SpiSession};

#[derive(Debug, Default)]
struct AdcState {
    pattern: Vec<u32>,
    cursor: usize,
    reads: u64,
    sync_count: u64,
    reset_count: u64,
    regs: [u8; 4],
    last_command_channel: u32,
    link: Option<LinkSettings>,
    fail_transfers: bool,
}

/// Mock ADC session. Values come from a repeating pattern, or from a running
/// counter masked to the chip width when no pattern is set.
#[derive(Clone)]
pub struct MockAdc {
    chip: AdcChip,
    state: Arc<Mutex<AdcState>>,
}

impl MockAdc {
    pub fn new(chip: AdcChip) -> Self {
        Self {
            chip,
            state: Arc::new(Mutex::new(AdcState::default())),
        }
    }

    /// Replace the counter ramp with a fixed repeating pattern.
    pub fn with_pattern(self, pattern: Vec<u32>) -> Self {
        self.state.lock().pattern = pattern;
        self
    }

    /// Make every subsequent exchange fail, for fault-path tests.
    pub fn fail_transfers(&self, fail: bool) {
        self.state.lock().fail_transfers = fail;
    }

    /// Total conversion frames answered.
    pub fn reads(&self) -> u64 {
        self.state.lock().reads
    }

    /// SYNC commands observed (ADS1220 restart after each fresh read).
    pub fn sync_count(&self) -> u64 {
        self.state.lock().sync_count
    }

    /// Current register file (ADS1220).
    pub fn registers(&self) -> [u8; 4] {
        self.state.lock().regs
    }

    /// Channel bit of the last MCP command byte seen.
    pub fn last_command_channel(&self) -> u32 {
        self.state.lock().last_command_channel
    }

    /// Link settings from the last `configure` call.
    pub fn link(&self) -> Option<LinkSettings> {
        self.state.lock().link
    }

    fn next_value(state: &mut AdcState, chip: AdcChip) -> u32 {
        let val = if state.pattern.is_empty() {
            state.reads as u32 & chip.max_data()
        } else {
            let v = state.pattern[state.cursor];
            state.cursor = (state.cursor + 1) % state.pattern.len();
            v
        };
        state.reads += 1;
        val
    }

    fn answer(&self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_transfers {
            return Err(GertError::TransferFailed {
                message: "mock transfer failure".into(),
            });
        }
        match self.chip {
            AdcChip::Mcp3002 | AdcChip::Mcp3202 => {
                if tx[0] & 0xd0 == 0xd0 {
                    state.last_command_channel = ((tx[0] >> 5) & 0x01) as u32;
                    let val = Self::next_value(&mut state, self.chip);
                    rx.copy_from_slice(&self.chip.encode_sample(val));
                }
            }
            AdcChip::Ads1220 => match tx[0] {
                ads1220::CMD_SYNC => state.sync_count += 1,
                ads1220::CMD_RESET => state.reset_count += 1,
                cmd if cmd & 0xe0 == ads1220::CMD_WREG => {
                    let start = ((cmd >> 2) & 0x03) as usize;
                    let count = (cmd & 0x03) as usize + 1;
                    for i in 0..count {
                        state.regs[start + i] = tx[1 + i];
                    }
                }
                cmd if cmd & 0xe0 == ads1220::CMD_RREG => {
                    let start = ((cmd >> 2) & 0x03) as usize;
                    let count = (cmd & 0x03) as usize + 1;
                    for i in 0..count {
                        rx[1 + i] = state.regs[start + i];
                    }
                }
                ads1220::CMD_RDATA => {
                    let val = Self::next_value(&mut state, self.chip);
                    rx.copy_from_slice(&self.chip.encode_sample(val));
                }
                _ => {}
            },
        }
        Ok(())
    }
}

impl SpiSession for MockAdc {
    fn configure(&mut self, link: &LinkSettings) -> Result<()> {
        self.state.lock().link = Some(*link);
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        self.answer(tx, rx)
    }
}

#[derive(Debug, Default)]
struct DacState {
    writes: Vec<(u32, u32)>,
    link: Option<LinkSettings>,
}

/// Mock DAC session recording every `(channel, value)` written.
#[derive(Clone, Default)]
pub struct MockDac {
    chip: DacChip,
    state: Arc<Mutex<DacState>>,
}

impl MockDac {
    pub fn new(chip: DacChip) -> Self {
        Self {
            chip,
            state: Arc::new(Mutex::new(DacState::default())),
        }
    }

    /// All frames written so far, decoded.
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.state.lock().writes.clone()
    }

    /// Link settings from the last `configure` call.
    pub fn link(&self) -> Option<LinkSettings> {
        self.state.lock().link
    }
}

impl SpiSession for MockDac {
    fn configure(&mut self, link: &LinkSettings) -> Result<()> {
        self.state.lock().link = Some(*link);
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], _rx: &mut [u8]) -> Result<()> {
        let decoded = self.chip.decode(tx)?;
        self.state.lock().writes.push(decoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_adc_ramp() {
        let mut adc = MockAdc::new(AdcChip::Mcp3202);
        let chip = AdcChip::Mcp3202;
        let mut rx = [0u8; 3];
        for expect in 0..4u32 {
            adc.transfer(&chip.read_frame(0), &mut rx).unwrap();
            assert_eq!(chip.decode(&rx).unwrap(), expect);
        }
        assert_eq!(adc.reads(), 4);
    }

    #[test]
    fn test_mock_adc_pattern_and_channel() {
        let mut adc = MockAdc::new(AdcChip::Mcp3002).with_pattern(vec![7, 8]);
        let chip = AdcChip::Mcp3002;
        let mut rx = [0u8; 2];
        adc.transfer(&chip.read_frame(1), &mut rx).unwrap();
        assert_eq!(chip.decode(&rx).unwrap(), 7);
        assert_eq!(adc.last_command_channel(), 1);
        adc.transfer(&chip.read_frame(0), &mut rx).unwrap();
        assert_eq!(chip.decode(&rx).unwrap(), 8);
        adc.transfer(&chip.read_frame(0), &mut rx).unwrap();
        assert_eq!(chip.decode(&rx).unwrap(), 7);
    }

    #[test]
    fn test_mock_ads1220_registers() {
        let mut adc = MockAdc::new(AdcChip::Ads1220);
        let regs = ads1220::default_registers();
        let wreg = ads1220::wreg_frame(0, &regs);
        let mut rx = vec![0u8; wreg.len()];
        adc.transfer(&wreg, &mut rx).unwrap();
        assert_eq!(adc.registers(), regs);

        let rreg = ads1220::rreg_frame(0, 4);
        let mut rx = vec![0u8; rreg.len()];
        adc.transfer(&rreg, &mut rx).unwrap();
        assert_eq!(&rx[1..5], &regs);

        adc.transfer(&[ads1220::CMD_SYNC], &mut [0u8; 1]).unwrap();
        assert_eq!(adc.sync_count(), 1);
    }

    #[test]
    fn test_mock_dac_records_writes() {
        let mut dac = MockDac::new(DacChip::Mcp4822);
        let frame = DacChip::Mcp4822.encode(0, 0x400);
        dac.transfer(&frame, &mut [0u8; 2]).unwrap();
        let frame = DacChip::Mcp4822.encode(1, 0xfff);
        dac.transfer(&frame, &mut [0u8; 2]).unwrap();
        assert_eq!(dac.writes(), vec![(0, 0x400), (1, 0xfff)]);
    }
}
