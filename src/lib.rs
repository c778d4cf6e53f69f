//! SPI DAQ streaming driver for Gertboard-style converter boards.
//!
//! This crate drives MCP3002/MCP3202/ADS1220 ADCs and MCP48x2 DACs hung off
//! a shared SPI bus, the way the Gertboard and Fredboard wire them up. It
//! provides single-shot conversions plus software-paced streaming with
//! comedi-style command validation, armed start triggers, and batched
//! multi-conversion transfers.
//!
//! # Architecture
//!
//! ## Device Access
//! - [`GertDevice`] - Main device handle; owns both converter sessions
//! - [`DriverConfig`] - Configuration builder with TOML loading
//! - [`BoardVariant`] / [`BoardInfo`] - Board personalities
//!
//! ## Streaming
//! - [`StreamCommand`] - Four-stage validated acquisition command
//! - [`Acquisition`] - Per-direction state machine driven by a worker thread
//! - [`TransferBatcher`] - Multi-conversion SPI message planner
//! - [`AcquisitionEvent`] - End-of-acquisition and fault notifications
//!
//! ## Bus
//! - [`SpiSession`] - Trait the device talks through; implement it for a
//!   real bus, or use [`MockAdc`] / [`MockDac`] in tests
//!
//! # Examples
//!
//! ## Single-Shot Reading
//!
//! ```no_run
//! use daq_driver_gertboard::{DriverConfig, GertDevice, MockAdc, MockDac, AdcChip, DacChip};
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = DriverConfig::default();
//! let device = GertDevice::new(
//!     config,
//!     Box::new(MockAdc::new(AdcChip::Mcp3202)),
//!     Box::new(MockDac::new(DacChip::Mcp4822)),
//! )?;
//!
//! let mut samples = [0u32; 16];
//! device.read_n(0, &mut samples)?;
//! println!("Channel 0: {:?}", samples);
//! # Ok(())
//! # }
//! ```
//!
//! ## Streaming Acquisition
//!
//! ```no_run
//! use daq_driver_gertboard::{
//!     AcquisitionEvent, AdcChip, DacChip, Direction, DriverConfig, GertDevice, MockAdc,
//!     MockDac, StreamCommand,
//! };
//!
//! # fn example() -> anyhow::Result<()> {
//! let device = GertDevice::new(
//!     DriverConfig::default(),
//!     Box::new(MockAdc::new(AdcChip::Mcp3202)),
//!     Box::new(MockDac::new(DacChip::Mcp4822)),
//! )?;
//!
//! // 10 kS/s on channel 0, 1000 samples, then stop
//! let cmd = StreamCommand::input(100_000, &[0]).with_stop_count(1000);
//! device.submit(Direction::Input, cmd)?;
//!
//! let mut out = vec![0u32; 1000];
//! let mut got = 0;
//! while got < out.len() {
//!     got += device.read_stream(&mut out[got..]);
//!     if let Some(AcquisitionEvent::EndOfAcquisition { .. }) = device.try_next_event() {
//!         got += device.read_stream(&mut out[got..]);
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod batch;
pub mod board;
pub mod buffer;
pub mod codec;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod mock;
pub mod pacing;
pub mod spi;
mod worker;

pub use acquisition::{Acquisition, AcquisitionEvent, AcquisitionStatus, RunState};
pub use batch::{BatchPattern, TransferBatcher, HUNK_LEN};
pub use board::{AdcChip, BoardInfo, BoardVariant, DacChip, Direction, MAX_BOARD_RATE};
pub use buffer::{MemoryBuffer, SampleBuffer, SharedBuffer};
pub use command::{
    CmdFlags, CommandTiming, ConvertSource, ScanBeginSource, StartSource, StopCondition,
    StreamCommand,
};
pub use config::{DriverConfig, DriverConfigBuilder, PinSafetyMode};
pub use device::GertDevice;
pub use error::{GertError, Result};
pub use mock::{MockAdc, MockDac};
pub use pacing::{PacerCascade, RoundingMode};
pub use spi::{LinkSettings, SharedSession, SpiMessage, SpiSession, TransferSlot};
