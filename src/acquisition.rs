//! Per-direction acquisition state machine.
//!
//! Each direction owns one [`Acquisition`]: command admission, the armed /
//! running lifecycle, batch or single-sample stepping, and cancellation.
//! The worker thread drives [`Acquisition::step`]; everything else is called
//! from the application side under the per-direction state lock. The two
//! directions share only the bus session locks and the timing-lockout
//! counter that disables batching while commands overlap.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::batch::{BatchPattern, TransferBatcher};
use crate::board::{AdcChip, BoardInfo, DacChip, Direction};
use crate::buffer::SharedBuffer;
use crate::codec::ads1220;
use crate::command::{self, CmdFlags, CommandTiming, StartSource, StreamCommand};
use crate::error::{GertError, Result};
use crate::pacing::PacerCascade;
use crate::spi::SharedSession;

/// Lifecycle state of one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    /// Command admitted, waiting for its start trigger
    Armed,
    Running,
    /// Cancellation requested, waiting for the in-flight transfer
    Cancelling,
}

/// Notifications emitted by the acquisition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionEvent {
    /// The command finished or was stopped. `overflow` is set when the
    /// streaming buffer overflowed (input) or underran (output).
    EndOfAcquisition { direction: Direction, overflow: bool },
    /// The SPI exchange failed; the command was cancelled.
    TransferError { direction: Direction, message: String },
}

/// Snapshot of one direction's progress.
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionStatus {
    pub state: RunState,
    /// Samples moved since the device was created
    pub samples: u64,
    /// Batched transfers completed since the device was created
    pub hunks: u64,
    /// Whether the active command runs batched
    pub batching: bool,
}

/// Runtime of one admitted command.
struct Active {
    cmd: StreamCommand,
    batching: bool,
    /// Next channel-list slot for the single-sample path
    cursor: usize,
    /// Samples still to move for a counted command
    samples_left: Option<u64>,
}

struct Inner {
    state: RunState,
    active: Option<Active>,
    batcher: TransferBatcher,
    cascade: PacerCascade,
    /// Channel currently selected on the converter
    current_channel: u32,
}

/// One direction's command lifecycle and transfer engine.
pub struct Acquisition {
    direction: Direction,
    board: &'static BoardInfo,
    adc: AdcChip,
    dac: DacChip,
    session: SharedSession,
    buffer: SharedBuffer,
    inner: Mutex<Inner>,
    /// Fast path flag the worker polls without taking the state lock
    running: AtomicBool,
    /// A transfer is on the wire right now
    in_flight: AtomicBool,
    samples: AtomicU64,
    hunks: AtomicU64,
    /// Worker sleep between steps, ns
    pacing_nsecs: AtomicU64,
    /// Shared with the other direction; nonzero disables batching
    lockout: Arc<AtomicI32>,
    batching_enabled: bool,
    events: mpsc::UnboundedSender<AcquisitionEvent>,
}

impl Acquisition {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        direction: Direction,
        board: &'static BoardInfo,
        adc: AdcChip,
        dac: DacChip,
        session: SharedSession,
        buffer: SharedBuffer,
        lockout: Arc<AtomicI32>,
        batching_enabled: bool,
        batch_max_len: usize,
        events: mpsc::UnboundedSender<AcquisitionEvent>,
    ) -> Self {
        Self {
            direction,
            board,
            adc,
            dac,
            session,
            buffer,
            inner: Mutex::new(Inner {
                state: RunState::Idle,
                active: None,
                batcher: TransferBatcher::new(adc, batch_max_len),
                cascade: PacerCascade::default(),
                current_channel: 0,
            }),
            running: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            samples: AtomicU64::new(0),
            hunks: AtomicU64::new(0),
            pacing_nsecs: AtomicU64::new(0),
            lockout,
            batching_enabled,
            events,
        }
    }

    /// Run the four-stage validator against `cmd`, fixing arguments in place.
    pub fn test_command(&self, cmd: &mut StreamCommand) -> Result<CommandTiming> {
        let mut inner = self.inner.lock();
        command::test_command(
            cmd,
            self.direction,
            self.board,
            self.adc,
            &mut inner.cascade,
            self.batching_enabled,
        )
    }

    /// Admit a streaming command: validate, derive pacing, decide batching
    /// eligibility, and go to Armed or Running.
    pub fn submit(&self, mut cmd: StreamCommand) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != RunState::Idle {
            debug!(direction = %self.direction, "command rejected, busy");
            return Err(GertError::Busy {
                direction: self.direction,
            });
        }

        let timing = command::test_command(
            &mut cmd,
            self.direction,
            self.board,
            self.adc,
            &mut inner.cascade,
            self.batching_enabled,
        )?;

        if self.direction == Direction::Output && timing.scan_ms < 1 {
            return Err(GertError::InvalidCommand {
                stage: 3,
                message: "output scan interval is below the 1 ms tick".into(),
            });
        }

        let batching = self.direction == Direction::Input && self.batching_eligible(&cmd);
        let mix = cmd.channels.len() == 2 && cmd.channels[0] != cmd.channels[1];
        if batching {
            inner.batcher.set_pattern(BatchPattern {
                channel: cmd.channels[0],
                mix_channel: if mix { cmd.channels[1] } else { cmd.channels[0] },
                mix,
                spacing_usecs: timing.spacing_usecs,
                mix_spacing_usecs: timing.mix_spacing_usecs,
            });
            if mix {
                info!(direction = %self.direction, "mix mode hunk transfers enabled");
            }
        } else if self.direction == Direction::Input {
            info!(direction = %self.direction, "hunk transfers disabled");
        }

        inner.current_channel = cmd.channels[0];
        self.pacing_nsecs.store(
            u64::from(timing.spacing_usecs.max(1)) * 1000,
            Ordering::SeqCst,
        );

        let samples_left = cmd.total_samples();
        let start = cmd.start;
        inner.active = Some(Active {
            cmd,
            batching,
            cursor: 0,
            samples_left,
        });

        self.lockout.fetch_add(1, Ordering::SeqCst);

        match start {
            StartSource::Now => {
                inner.state = RunState::Running;
                self.running.store(true, Ordering::SeqCst);
                info!(direction = %self.direction, batching, "command running");
            }
            StartSource::Deferred { trigger } => {
                inner.state = RunState::Armed;
                info!(direction = %self.direction, trigger, "command armed");
            }
        }
        Ok(())
    }

    fn batching_eligible(&self, cmd: &StreamCommand) -> bool {
        if !self.batching_enabled || !self.adc.supports_batching() {
            return false;
        }
        if cmd.flags.contains(CmdFlags::WAKE_PER_SCAN) {
            debug!(direction = %self.direction, "batching disabled by wake-per-scan");
            return false;
        }
        if self.lockout.load(Ordering::SeqCst) != 0 {
            debug!(direction = %self.direction, "batching disabled by timing lockout");
            return false;
        }
        let uniform = cmd.channels.iter().all(|&c| c == cmd.channels[0]);
        let mix = cmd.channels.len() == 2 && cmd.channels[0] != cmd.channels[1];
        uniform || mix
    }

    /// Fire the start trigger of an armed command.
    pub fn trigger(&self, trigger: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != RunState::Armed {
            return Err(GertError::InvalidTrigger {
                direction: self.direction,
                message: format!("no armed command (state {:?})", inner.state),
            });
        }
        let expected = match inner.active.as_ref().map(|a| a.cmd.start) {
            Some(StartSource::Deferred { trigger }) => trigger,
            _ => 0,
        };
        if trigger != expected {
            return Err(GertError::InvalidTrigger {
                direction: self.direction,
                message: format!("trigger {trigger} does not match armed trigger {expected}"),
            });
        }
        inner.state = RunState::Running;
        self.running.store(true, Ordering::SeqCst);
        info!(direction = %self.direction, trigger, "triggered");
        Ok(())
    }

    /// Stop the running or armed command. Idempotent; waits bounded for an
    /// in-flight transfer to clear so no exchange is left half issued.
    pub fn cancel(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state == RunState::Idle {
                return;
            }
            inner.state = RunState::Cancelling;
        }
        self.running.store(false, Ordering::SeqCst);

        // the worker observes the cleared flag on its next iteration; give
        // the current transfer time to leave the wire
        let mut retries = 500;
        while self.in_flight.load(Ordering::SeqCst) && retries > 0 {
            thread::sleep(Duration::from_micros(750));
            retries -= 1;
        }
        if self.in_flight.load(Ordering::SeqCst) {
            warn!(direction = %self.direction, "transfer still in flight after cancel wait");
        }

        let mut inner = self.inner.lock();
        inner.active = None;
        inner.state = RunState::Idle;
        self.unlock_timing();
        info!(direction = %self.direction, "cancelled");
    }

    /// Bytes ready in the streaming buffer; valid only while a batched
    /// command is active.
    pub fn poll(&self) -> usize {
        let inner = self.inner.lock();
        let batching = inner.active.as_ref().map(|a| a.batching).unwrap_or(false);
        if inner.state == RunState::Running && batching {
            self.buffer.lock().bytes_ready()
        } else {
            0
        }
    }

    pub fn status(&self) -> AcquisitionStatus {
        let inner = self.inner.lock();
        AcquisitionStatus {
            state: inner.state,
            samples: self.samples.load(Ordering::SeqCst),
            hunks: self.hunks.load(Ordering::SeqCst),
            batching: inner.active.as_ref().map(|a| a.batching).unwrap_or(false),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_step(&self) {
        self.in_flight.store(true, Ordering::SeqCst);
    }

    pub(crate) fn end_step(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    pub(crate) fn pacing_nanos(&self) -> u64 {
        self.pacing_nsecs.load(Ordering::SeqCst)
    }

    /// One worker iteration: a batched transfer or a single conversion.
    pub(crate) fn step(&self) {
        let mut inner = self.inner.lock();
        if inner.state != RunState::Running || !self.running.load(Ordering::SeqCst) {
            return;
        }
        let outcome = match self.direction {
            Direction::Input => {
                let batching = inner.active.as_ref().map(|a| a.batching).unwrap_or(false);
                if batching {
                    self.step_input_hunk(&mut inner)
                } else {
                    self.step_input_single(&mut inner)
                }
            }
            Direction::Output => self.step_output(&mut inner),
        };

        match outcome {
            StepOutcome::Continue => {}
            StepOutcome::Finished { overflow } => {
                self.finish_locked(&mut inner);
                self.send_event(AcquisitionEvent::EndOfAcquisition {
                    direction: self.direction,
                    overflow,
                });
            }
            StepOutcome::Failed { message } => {
                error!(direction = %self.direction, message, "transfer failed, cancelling");
                self.finish_locked(&mut inner);
                self.send_event(AcquisitionEvent::TransferError {
                    direction: self.direction,
                    message,
                });
            }
        }
    }

    fn step_input_hunk(&self, inner: &mut Inner) -> StepOutcome {
        let Inner { active, batcher, .. } = inner;
        let Some(active) = active.as_mut() else {
            return StepOutcome::Continue;
        };

        let len = batcher.plan_len(active.samples_left);
        let msg = batcher.build(len);
        if let Err(e) = self.session.lock().transfer_message(msg) {
            return StepOutcome::Failed {
                message: e.to_string(),
            };
        }

        let mut overflow = false;
        let mut left = active.samples_left;
        let emitted = {
            let mut buf = self.buffer.lock();
            let unpacked = batcher.unpack(len, &mut |val| {
                if buf.write_samples(&[val]) == 0 {
                    overflow = true;
                    return false;
                }
                if let Some(n) = left.as_mut() {
                    *n -= 1;
                    if *n == 0 {
                        return false;
                    }
                }
                true
            });
            match unpacked {
                Ok(n) => n,
                Err(e) => {
                    return StepOutcome::Failed {
                        message: e.to_string(),
                    }
                }
            }
        };

        // the overflowing sample was not stored
        let stored = if overflow { emitted - 1 } else { emitted };
        self.samples.fetch_add(stored as u64, Ordering::SeqCst);
        self.hunks.fetch_add(1, Ordering::SeqCst);
        active.samples_left = left;
        trace!(direction = %self.direction, len, stored, "hunk complete");

        if overflow {
            warn!(direction = %self.direction, "streaming buffer overflow");
            StepOutcome::Finished { overflow: true }
        } else if left == Some(0) {
            StepOutcome::Finished { overflow: false }
        } else {
            StepOutcome::Continue
        }
    }

    fn step_input_single(&self, inner: &mut Inner) -> StepOutcome {
        let Some(active) = inner.active.as_mut() else {
            return StepOutcome::Continue;
        };
        let chan = active.cmd.channels[active.cursor];
        inner.current_channel = chan;

        let frame = self.adc.read_frame(chan);
        let mut rx = vec![0u8; frame.len()];
        {
            let mut session = self.session.lock();
            if let Err(e) = session.transfer(&frame, &mut rx) {
                return StepOutcome::Failed {
                    message: e.to_string(),
                };
            }
            // restart the converter after a fresh read
            if self.adc == AdcChip::Ads1220 {
                if let Err(e) = session.transfer(&[ads1220::CMD_SYNC], &mut [0u8; 1]) {
                    return StepOutcome::Failed {
                        message: e.to_string(),
                    };
                }
            }
        }
        let val = match self.adc.decode(&rx) {
            Ok(v) => v,
            Err(e) => {
                return StepOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };

        if self.buffer.lock().write_samples(&[val]) == 0 {
            warn!(direction = %self.direction, "streaming buffer overflow");
            return StepOutcome::Finished { overflow: true };
        }
        self.samples.fetch_add(1, Ordering::SeqCst);
        active.cursor = (active.cursor + 1) % active.cmd.channels.len();

        if let Some(n) = active.samples_left.as_mut() {
            *n -= 1;
            if *n == 0 {
                return StepOutcome::Finished { overflow: false };
            }
        }
        StepOutcome::Continue
    }

    fn step_output(&self, inner: &mut Inner) -> StepOutcome {
        let Some(active) = inner.active.as_mut() else {
            return StepOutcome::Continue;
        };
        let mut out = [0u32; 1];
        if self.buffer.lock().read_samples(&mut out) == 0 {
            // nothing to write: surfaced like a buffer fault, ending the run
            warn!(direction = %self.direction, "streaming buffer underrun");
            return StepOutcome::Finished { overflow: true };
        }

        let chan = active.cmd.channels[active.cursor];
        inner.current_channel = chan;
        let frame = self.dac.encode(chan, out[0]);
        let mut rx = [0u8; 2];
        if let Err(e) = self.session.lock().transfer(&frame, &mut rx) {
            return StepOutcome::Failed {
                message: e.to_string(),
            };
        }
        self.samples.fetch_add(1, Ordering::SeqCst);
        active.cursor = (active.cursor + 1) % active.cmd.channels.len();

        if let Some(n) = active.samples_left.as_mut() {
            *n -= 1;
            if *n == 0 {
                return StepOutcome::Finished { overflow: false };
            }
        }
        StepOutcome::Continue
    }

    /// Terminal transition from inside `step`. The caller is the in-flight
    /// transfer, so there is nothing to wait for.
    fn finish_locked(&self, inner: &mut Inner) {
        self.running.store(false, Ordering::SeqCst);
        inner.active = None;
        inner.state = RunState::Idle;
        self.unlock_timing();
        debug!(direction = %self.direction, "acquisition finished");
    }

    fn unlock_timing(&self) {
        let _ = self
            .lockout
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                if v > 0 {
                    Some(v - 1)
                } else {
                    None
                }
            });
    }

    fn send_event(&self, event: AcquisitionEvent) {
        if self.events.send(event).is_err() {
            trace!(direction = %self.direction, "event receiver dropped");
        }
    }
}

enum StepOutcome {
    Continue,
    Finished { overflow: bool },
    Failed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardVariant;
    use crate::buffer::MemoryBuffer;
    use crate::mock::MockAdc;

    fn make_input(batching: bool, capacity: usize) -> (Arc<Acquisition>, MockAdc, SharedBuffer) {
        let adc = MockAdc::new(AdcChip::Mcp3202);
        let session: SharedSession = Arc::new(Mutex::new(Box::new(adc.clone())));
        let buffer: SharedBuffer = Arc::new(Mutex::new(MemoryBuffer::new(capacity)));
        let (tx, _rx) = mpsc::unbounded_channel();
        let acq = Arc::new(Acquisition::new(
            Direction::Input,
            BoardVariant::Gertboard.info(),
            AdcChip::Mcp3202,
            DacChip::Mcp4822,
            session,
            Arc::clone(&buffer),
            Arc::new(AtomicI32::new(0)),
            batching,
            crate::batch::HUNK_LEN,
            tx,
        ));
        (acq, adc, buffer)
    }

    #[test]
    fn test_busy_rejects_second_command() {
        let (acq, _adc, _buf) = make_input(true, 64);
        acq.submit(StreamCommand::input(100_000, &[0])).unwrap();
        let err = acq.submit(StreamCommand::input(100_000, &[0])).unwrap_err();
        assert!(err.is_busy());
        // the first command is still running
        assert_eq!(acq.status().state, RunState::Running);
        acq.cancel();
    }

    #[test]
    fn test_counted_command_finishes() {
        let (acq, _adc, buf) = make_input(true, 64);
        acq.submit(StreamCommand::input(100_000, &[0]).with_stop_count(5))
            .unwrap();
        acq.step();
        assert_eq!(acq.status().state, RunState::Idle);
        assert_eq!(acq.status().samples, 5);
        assert_eq!(buf.lock().samples_ready(), 5);
    }

    #[test]
    fn test_overflow_ends_acquisition() {
        let (acq, _adc, _buf) = make_input(true, 3);
        acq.submit(StreamCommand::input(100_000, &[0]).with_stop_count(10))
            .unwrap();
        acq.step();
        assert_eq!(acq.status().state, RunState::Idle);
        assert_eq!(acq.status().samples, 3);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (acq, _adc, _buf) = make_input(true, 64);
        acq.submit(StreamCommand::input(100_000, &[0])).unwrap();
        acq.cancel();
        assert_eq!(acq.status().state, RunState::Idle);
        acq.cancel();
        assert_eq!(acq.status().state, RunState::Idle);
    }

    #[test]
    fn test_trigger_lifecycle() {
        let (acq, _adc, _buf) = make_input(true, 64);
        acq.submit(
            StreamCommand::input(100_000, &[0])
                .with_stop_count(2)
                .with_deferred_start(3),
        )
        .unwrap();
        assert_eq!(acq.status().state, RunState::Armed);
        assert!(!acq.is_running());
        // wrong trigger number rejected without state change
        assert!(acq.trigger(1).is_err());
        assert_eq!(acq.status().state, RunState::Armed);
        acq.trigger(3).unwrap();
        assert_eq!(acq.status().state, RunState::Running);
        acq.cancel();
    }

    #[test]
    fn test_trigger_without_armed_command() {
        let (acq, _adc, _buf) = make_input(true, 64);
        let err = acq.trigger(0).unwrap_err();
        assert!(matches!(err, GertError::InvalidTrigger { .. }));
    }

    #[test]
    fn test_lockout_disables_batching() {
        let adc = MockAdc::new(AdcChip::Mcp3202);
        let session: SharedSession = Arc::new(Mutex::new(Box::new(adc.clone())));
        let buffer: SharedBuffer = Arc::new(Mutex::new(MemoryBuffer::new(64)));
        let (tx, _rx) = mpsc::unbounded_channel();
        let lockout = Arc::new(AtomicI32::new(1));
        let acq = Acquisition::new(
            Direction::Input,
            BoardVariant::Gertboard.info(),
            AdcChip::Mcp3202,
            DacChip::Mcp4822,
            session,
            buffer,
            lockout,
            true,
            crate::batch::HUNK_LEN,
            tx,
        );
        acq.submit(StreamCommand::input(100_000, &[0])).unwrap();
        assert!(!acq.status().batching);
        acq.cancel();
    }

    #[test]
    fn test_multi_channel_scan_disables_batching() {
        let (acq, _adc, _buf) = make_input(true, 64);
        // two distinct channels batch as mix mode, three occurrences do not
        acq.submit(StreamCommand::input(100_000, &[0, 1, 0])).unwrap();
        assert!(!acq.status().batching);
        acq.cancel();
    }
}
