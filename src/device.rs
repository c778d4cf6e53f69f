//! Top-level device facade.
//!
//! [`GertDevice`] owns the two SPI converter sessions, the per-direction
//! acquisition engines and their worker threads, and the streaming buffers.
//! It is the only type an application needs: single-shot reads and writes,
//! streaming command submission, triggering, cancellation, and event
//! draining all go through it. Dropping the device cancels both directions
//! and joins the workers.

use std::sync::atomic::AtomicI32;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::acquisition::{Acquisition, AcquisitionEvent, AcquisitionStatus, RunState};
use crate::board::{AdcChip, BoardInfo, Direction, SPI_BITS_PER_WORD, SPI_MODE_MCP};
use crate::buffer::{MemoryBuffer, SharedBuffer};
use crate::codec::ads1220;
use crate::command::{CommandTiming, StreamCommand};
use crate::config::DriverConfig;
use crate::error::{GertError, Result};
use crate::spi::{LinkSettings, SharedSession, SpiSession};
use crate::worker::Worker;

/// Settle time after rewriting the ADS1220 input mux.
const MUX_SETTLE_USECS: u64 = 200;

/// The DAQ device: two converters behind one SPI bus.
pub struct GertDevice {
    config: DriverConfig,
    board: &'static BoardInfo,
    ai_session: SharedSession,
    ao_session: SharedSession,
    ai: Arc<Acquisition>,
    ao: Arc<Acquisition>,
    ai_buffer: SharedBuffer,
    ao_buffer: SharedBuffer,
    workers: Vec<Worker>,
    events: Mutex<mpsc::UnboundedReceiver<AcquisitionEvent>>,
    /// Channel the ADS1220 mux currently selects
    mux_channel: Mutex<u32>,
    /// Last value written to each output channel
    readback: Mutex<Vec<u32>>,
}

impl GertDevice {
    /// Bring up the device on the given converter sessions: configure both
    /// SPI links, initialize the ADC, and start the worker threads.
    pub fn new(
        config: DriverConfig,
        mut ai_session: Box<dyn SpiSession>,
        mut ao_session: Box<dyn SpiSession>,
    ) -> Result<Self> {
        config.validate()?;
        let board = config.board_variant.info();

        ai_session.configure(&LinkSettings {
            chip_select: board.ai_cs,
            max_speed_hz: board.ai_speed_hz(config.adc_chip),
            mode: config.adc_chip.spi_mode(),
            bits_per_word: SPI_BITS_PER_WORD,
        })?;
        ao_session.configure(&LinkSettings {
            chip_select: board.ao_cs,
            max_speed_hz: board.ao_max_speed_hz,
            mode: SPI_MODE_MCP,
            bits_per_word: SPI_BITS_PER_WORD,
        })?;

        if config.adc_chip == AdcChip::Ads1220 {
            init_ads1220(ai_session.as_mut())?;
        }

        let ai_session: SharedSession = Arc::new(Mutex::new(ai_session));
        let ao_session: SharedSession = Arc::new(Mutex::new(ao_session));
        let ai_buffer: SharedBuffer =
            Arc::new(Mutex::new(MemoryBuffer::new(config.buffer_capacity)));
        let ao_buffer: SharedBuffer =
            Arc::new(Mutex::new(MemoryBuffer::new(config.buffer_capacity)));

        let lockout = Arc::new(AtomicI32::new(0));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let ai = Arc::new(Acquisition::new(
            Direction::Input,
            board,
            config.adc_chip,
            config.dac_chip,
            Arc::clone(&ai_session),
            Arc::clone(&ai_buffer),
            Arc::clone(&lockout),
            config.batching,
            config.batch_max_len,
            event_tx.clone(),
        ));
        let ao = Arc::new(Acquisition::new(
            Direction::Output,
            board,
            config.adc_chip,
            config.dac_chip,
            Arc::clone(&ao_session),
            Arc::clone(&ao_buffer),
            Arc::clone(&lockout),
            config.batching,
            config.batch_max_len,
            event_tx,
        ));

        let workers = vec![
            Worker::spawn("gert-ai", Arc::clone(&ai)),
            Worker::spawn("gert-ao", Arc::clone(&ao)),
        ];

        let readback = vec![0; board.ao_channels as usize];
        info!(
            board = board.name,
            adc = %config.adc_chip,
            dac = %config.dac_chip,
            "device ready"
        );

        Ok(Self {
            config,
            board,
            ai_session,
            ao_session,
            ai,
            ao,
            ai_buffer,
            ao_buffer,
            workers,
            events: Mutex::new(event_rx),
            mux_channel: Mutex::new(0),
            readback: Mutex::new(readback),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn board(&self) -> &'static BoardInfo {
        self.board
    }

    fn engine(&self, direction: Direction) -> &Arc<Acquisition> {
        match direction {
            Direction::Input => &self.ai,
            Direction::Output => &self.ao,
        }
    }

    /// Validate a command in place without admitting it.
    pub fn test_command(
        &self,
        direction: Direction,
        cmd: &mut StreamCommand,
    ) -> Result<CommandTiming> {
        self.engine(direction).test_command(cmd)
    }

    /// Admit a streaming command on one direction.
    pub fn submit(&self, direction: Direction, cmd: StreamCommand) -> Result<()> {
        self.engine(direction).submit(cmd)
    }

    /// Fire the start trigger of an armed command.
    pub fn fire_trigger(&self, direction: Direction, trigger: u32) -> Result<()> {
        self.engine(direction).trigger(trigger)
    }

    /// Stop the command on one direction. Safe to call at any time.
    pub fn cancel(&self, direction: Direction) {
        self.engine(direction).cancel();
    }

    /// Bytes ready in the direction's streaming buffer while a batched
    /// command runs.
    pub fn poll(&self, direction: Direction) -> usize {
        self.engine(direction).poll()
    }

    pub fn status(&self, direction: Direction) -> AcquisitionStatus {
        self.engine(direction).status()
    }

    /// Drain one pending acquisition event, if any.
    pub fn try_next_event(&self) -> Option<AcquisitionEvent> {
        self.events.lock().try_recv().ok()
    }

    /// Pull acquired samples out of the input streaming buffer.
    pub fn read_stream(&self, out: &mut [u32]) -> usize {
        self.ai_buffer.lock().read_samples(out)
    }

    /// Queue samples into the output streaming buffer.
    pub fn write_stream(&self, samples: &[u32]) -> usize {
        self.ao_buffer.lock().write_samples(samples)
    }

    /// Single-shot conversions: read `out.len()` samples from `channel`.
    ///
    /// Rejected with [`GertError::Busy`] while a streaming command runs on
    /// the input direction. An armed command has not touched the bus yet,
    /// so single shots stay available until its trigger fires.
    pub fn read_n(&self, channel: u32, out: &mut [u32]) -> Result<()> {
        if streaming_owns_bus(self.ai.status().state) {
            return Err(GertError::Busy {
                direction: Direction::Input,
            });
        }
        self.check_channel(Direction::Input, channel)?;

        let chip = self.config.adc_chip;
        let mut session = self.ai_session.lock();

        if chip == AdcChip::Ads1220 {
            let mut mux = self.mux_channel.lock();
            if *mux != channel {
                let frame = ads1220::wreg_frame(0, &[ads1220::mux_for_channel(channel)]);
                let mut rx = vec![0u8; frame.len()];
                session.transfer(&frame, &mut rx)?;
                thread::sleep(Duration::from_micros(MUX_SETTLE_USECS));
                *mux = channel;
                debug!(channel, "ads1220 mux rewritten");
            }
        }

        for slot in out.iter_mut() {
            let frame = chip.read_frame(channel);
            let mut rx = vec![0u8; frame.len()];
            session.transfer(&frame, &mut rx)?;
            *slot = chip.decode(&rx)?;
            if chip == AdcChip::Ads1220 {
                session.transfer(&[ads1220::CMD_SYNC], &mut [0u8; 1])?;
            }
        }
        Ok(())
    }

    /// Single-shot conversions: write each of `values` to `channel`.
    ///
    /// Rejected with [`GertError::Busy`] while a streaming command runs on
    /// the output direction; an armed command does not block single shots.
    pub fn write_n(&self, channel: u32, values: &[u32]) -> Result<()> {
        if streaming_owns_bus(self.ao.status().state) {
            return Err(GertError::Busy {
                direction: Direction::Output,
            });
        }
        self.check_channel(Direction::Output, channel)?;

        let chip = self.config.dac_chip;
        let mut session = self.ao_session.lock();
        for &value in values {
            let frame = chip.encode(channel, value);
            let mut rx = [0u8; 2];
            session.transfer(&frame, &mut rx)?;
        }
        if let Some(&last) = values.last() {
            self.readback.lock()[channel as usize] = last & chip.max_data();
        }
        Ok(())
    }

    /// Last value written to an output channel.
    pub fn read_back(&self, channel: u32) -> Result<u32> {
        self.check_channel(Direction::Output, channel)?;
        Ok(self.readback.lock()[channel as usize])
    }

    fn check_channel(&self, direction: Direction, channel: u32) -> Result<()> {
        let max = self.board.channels(direction);
        if channel >= max {
            return Err(GertError::InvalidChannel { channel, max });
        }
        Ok(())
    }
}

impl Drop for GertDevice {
    fn drop(&mut self) {
        self.ai.cancel();
        self.ao.cancel();
        for worker in &mut self.workers {
            worker.stop();
        }
        debug!("device shut down");
    }
}

/// A direction's streaming command holds the bus only once running; armed
/// commands wait off the wire until their trigger.
fn streaming_owns_bus(state: RunState) -> bool {
    matches!(state, RunState::Running | RunState::Cancelling)
}

/// Program the ADS1220 configuration registers and verify the part answers.
fn init_ads1220(session: &mut dyn SpiSession) -> Result<()> {
    let regs = ads1220::default_registers();

    let frame = ads1220::wreg_frame(0, &regs);
    let mut rx = vec![0u8; frame.len()];
    session.transfer(&frame, &mut rx)?;
    thread::sleep(Duration::from_micros(MUX_SETTLE_USECS));

    let frame = ads1220::rreg_frame(0, regs.len() as u8);
    let mut rx = vec![0u8; frame.len()];
    session.transfer(&frame, &mut rx)?;
    if rx[1] != regs[0] || rx[2] != regs[1] {
        return Err(GertError::HardwareError {
            message: format!(
                "ads1220 register readback mismatch: got {:#04x} {:#04x}, wrote {:#04x} {:#04x}",
                rx[1], rx[2], regs[0], regs[1]
            ),
        });
    }

    session.transfer(&[ads1220::CMD_SYNC], &mut [0u8; 1])?;
    info!("ads1220 initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAdc, MockDac};

    fn make_device(config: DriverConfig) -> (GertDevice, MockAdc, MockDac) {
        let adc = MockAdc::new(config.adc_chip);
        let dac = MockDac::new(config.dac_chip);
        let device =
            GertDevice::new(config, Box::new(adc.clone()), Box::new(dac.clone())).unwrap();
        (device, adc, dac)
    }

    #[test]
    fn test_configures_both_links() {
        let (_device, adc, dac) = make_device(DriverConfig::default());
        let ai_link = adc.link().unwrap();
        assert_eq!(ai_link.chip_select, 0);
        assert_eq!(ai_link.max_speed_hz, 1_000_000);
        assert_eq!(ai_link.mode, SPI_MODE_MCP);
        let ao_link = dac.link().unwrap();
        assert_eq!(ao_link.chip_select, 1);
        assert_eq!(ao_link.max_speed_hz, 8_000_000);
    }

    #[test]
    fn test_ads1220_bringup_writes_registers() {
        let config = DriverConfig::builder()
            .adc_chip(AdcChip::Ads1220)
            .build()
            .unwrap();
        let (_device, adc, _dac) = make_device(config);
        assert_eq!(adc.registers(), ads1220::default_registers());
        assert!(adc.sync_count() >= 1);
    }

    #[test]
    fn test_read_n_fills_buffer() {
        let (device, _adc, _dac) = make_device(DriverConfig::default());
        let mut out = [0u32; 4];
        device.read_n(0, &mut out).unwrap();
        // the mock feeds an incrementing ramp
        assert_eq!(out, [0, 1, 2, 3]);
    }

    #[test]
    fn test_read_n_rejects_bad_channel() {
        let (device, _adc, _dac) = make_device(DriverConfig::default());
        let mut out = [0u32; 1];
        let err = device.read_n(7, &mut out).unwrap_err();
        assert!(matches!(err, GertError::InvalidChannel { max: 2, .. }));
    }

    #[test]
    fn test_write_n_records_readback() {
        let (device, _adc, dac) = make_device(DriverConfig::default());
        device.write_n(1, &[0x123, 0x456]).unwrap();
        assert_eq!(device.read_back(1).unwrap(), 0x456);
        assert_eq!(dac.writes(), vec![(1, 0x123), (1, 0x456)]);
    }

    #[test]
    fn test_ads1220_mux_follows_channel() {
        let config = DriverConfig::builder()
            .adc_chip(AdcChip::Ads1220)
            .board_variant(crate::board::BoardVariant::Fredboard)
            .build()
            .unwrap();
        let (device, adc, _dac) = make_device(config);
        let mut out = [0u32; 1];
        device.read_n(2, &mut out).unwrap();
        assert_eq!(adc.registers()[0], ads1220::mux_for_channel(2));
    }
}
