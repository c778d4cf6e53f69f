//! Streaming command types and the four-stage validator.
//!
//! A command is tested in the same staged order on both directions: trigger
//! sources, source compatibility, argument bounds, then timing fixups. The
//! validator adjusts arguments in place toward the closest valid value and
//! reports the first failing stage, so a caller can re-test the adjusted
//! command and expect a clean pass.

use bitflags::bitflags;

use crate::board::{AdcChip, BoardInfo, Direction, MAX_BOARD_RATE};
use crate::error::{GertError, Result};
use crate::pacing::{self, PacerCascade, RoundingMode};

bitflags! {
    /// Per-command flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CmdFlags: u32 {
        /// Wake the consumer after every scan; disables batching
        const WAKE_PER_SCAN = 1 << 0;
        /// Round timing fixups up instead of to nearest
        const ROUND_UP = 1 << 1;
        /// Round timing fixups down instead of to nearest
        const ROUND_DOWN = 1 << 2;
    }
}

impl CmdFlags {
    /// Rounding rule for the divisor cascade.
    pub fn rounding(self) -> RoundingMode {
        if self.contains(Self::ROUND_UP) {
            RoundingMode::Up
        } else if self.contains(Self::ROUND_DOWN) {
            RoundingMode::Down
        } else {
            RoundingMode::Nearest
        }
    }
}

/// How a command starts running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartSource {
    /// Start immediately on admission
    #[default]
    Now,
    /// Arm and wait for [`crate::GertDevice::fire_trigger`] with this number
    Deferred { trigger: u32 },
}

/// What paces the start of each scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanBeginSource {
    /// A scan every `ns` nanoseconds
    Timer { ns: u32 },
    /// Scans follow the conversion timer back to back
    FollowConvert,
}

/// What paces the individual conversions inside a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertSource {
    /// A conversion every `ns` nanoseconds
    Timer { ns: u32 },
    /// All conversions fire together with the scan (output direction)
    Immediate,
}

/// When a command completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopCondition {
    /// Run until cancelled
    #[default]
    Continuous,
    /// Stop after this many scans
    Count(u32),
}

/// An asynchronous streaming command for one direction.
#[derive(Debug, Clone)]
pub struct StreamCommand {
    pub start: StartSource,
    pub scan_begin: ScanBeginSource,
    pub convert: ConvertSource,
    pub stop: StopCondition,
    /// One full scan, in acquisition order
    pub channels: Vec<u32>,
    pub flags: CmdFlags,
}

impl StreamCommand {
    /// An input command converting every `convert_ns` nanoseconds with scans
    /// following back to back.
    pub fn input(convert_ns: u32, channels: &[u32]) -> Self {
        Self {
            start: StartSource::Now,
            scan_begin: ScanBeginSource::FollowConvert,
            convert: ConvertSource::Timer { ns: convert_ns },
            stop: StopCondition::Continuous,
            channels: channels.to_vec(),
            flags: CmdFlags::empty(),
        }
    }

    /// An output command writing one scan every `scan_ns` nanoseconds.
    pub fn output(scan_ns: u32, channels: &[u32]) -> Self {
        Self {
            start: StartSource::Now,
            scan_begin: ScanBeginSource::Timer { ns: scan_ns },
            convert: ConvertSource::Immediate,
            stop: StopCondition::Continuous,
            channels: channels.to_vec(),
            flags: CmdFlags::empty(),
        }
    }

    /// Stop after `scans` scans.
    pub fn with_stop_count(mut self, scans: u32) -> Self {
        self.stop = StopCondition::Count(scans);
        self
    }

    /// Arm instead of starting, waiting for trigger number `trigger`.
    pub fn with_deferred_start(mut self, trigger: u32) -> Self {
        self.start = StartSource::Deferred { trigger };
        self
    }

    /// Set command flags.
    pub fn with_flags(mut self, flags: CmdFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Samples covered by one pass over the channel list times the stop
    /// count; `None` when continuous.
    pub fn total_samples(&self) -> Option<u64> {
        match self.stop {
            StopCondition::Count(n) => Some(self.channels.len() as u64 * n as u64),
            StopCondition::Continuous => None,
        }
    }
}

/// Timing derived while validating a command. Immutable once the command
/// is admitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandTiming {
    /// Delay between consecutive conversions, usecs
    pub spacing_usecs: u32,
    /// Doubled delay used on the alternate channel in mix mode, usecs
    pub mix_spacing_usecs: u32,
    /// Conversion interval after the cascade fixup, ns
    pub convert_ns: u32,
    /// Scan interval in ms ticks (output direction)
    pub scan_ms: u32,
}

fn arg_min(arg: &mut u32, min: u32) -> bool {
    if *arg < min {
        *arg = min;
        true
    } else {
        false
    }
}

fn arg_max(arg: &mut u32, max: u32) -> bool {
    if *arg > max {
        *arg = max;
        true
    } else {
        false
    }
}

fn arg_is(arg: &mut u32, val: u32) -> bool {
    if *arg != val {
        *arg = val;
        true
    } else {
        false
    }
}

/// Smallest power of two at or above the channel-list length.
fn chanlist_pow2(len: usize) -> u32 {
    let mut i = 1u32;
    while (i as usize) < len {
        i *= 2;
    }
    i
}

fn stage_err(stage: u32, message: &str) -> GertError {
    GertError::InvalidCommand {
        stage,
        message: message.into(),
    }
}

fn check_channels(channels: &[u32], max: u32) -> Result<()> {
    if channels.is_empty() {
        return Err(stage_err(3, "channel list must not be empty"));
    }
    for &ch in channels {
        if ch >= max {
            return Err(GertError::InvalidChannel { channel: ch, max });
        }
    }
    Ok(())
}

/// Validate and fix up an input streaming command.
///
/// On success the returned [`CommandTiming`] carries the achievable
/// conversion interval and spacing; `cascade` retains the divisor pair that
/// produced it.
pub fn test_input_command(
    cmd: &mut StreamCommand,
    board: &BoardInfo,
    chip: AdcChip,
    cascade: &mut PacerCascade,
    batching: bool,
) -> Result<CommandTiming> {
    let mut timing = CommandTiming::default();

    // Step 1: trigger sources
    if cmd.convert == ConvertSource::Immediate {
        return Err(stage_err(1, "input conversions must run on a timer"));
    }

    // Step 2: sources mutually compatible; nothing further to check, the
    // source enums cannot express a conflicting combination

    // Step 3: argument bounds
    let mut err = false;
    check_channels(&cmd.channels, board.ai_channels)?;

    if let ScanBeginSource::Timer { ref mut ns } = cmd.scan_begin {
        let floor = board.ai_ns_min_calc / 2 * chanlist_pow2(cmd.channels.len());
        err |= arg_min(ns, floor);
        // snap to a whole number of minimum conversion slots
        let snapped = (*ns / board.ai_ns_min) * board.ai_ns_min;
        timing.spacing_usecs =
            pacing::ai_spacing_usecs(snapped, board.ai_ns_min, MAX_BOARD_RATE, batching, chip);
        timing.mix_spacing_usecs = timing.spacing_usecs * 2;
        err |= arg_is(ns, snapped);
    }

    if let ConvertSource::Timer { ref mut ns } = cmd.convert {
        err |= arg_min(ns, board.ai_ns_min);
    }

    if let StopCondition::Count(ref mut n) = cmd.stop {
        if *n < 1 {
            *n = 1;
            err = true;
        }
    }

    if err {
        return Err(stage_err(3, "arguments adjusted to valid bounds"));
    }

    // Step 4: timing fixups through the divisor cascade
    if let ConvertSource::Timer { ref mut ns } = cmd.convert {
        let mut arg = *ns;
        cascade.ns_to_timer(&mut arg, cmd.flags.rounding());
        timing.convert_ns = arg;
        timing.spacing_usecs =
            pacing::ai_spacing_usecs(arg, board.ai_ns_min, MAX_BOARD_RATE, batching, chip);
        timing.mix_spacing_usecs = timing.spacing_usecs * 2;
        if arg_is(ns, arg) {
            return Err(stage_err(4, "conversion interval adjusted to timer grid"));
        }
    }

    Ok(timing)
}

/// Validate and fix up an output streaming command.
pub fn test_output_command(cmd: &mut StreamCommand, board: &BoardInfo) -> Result<CommandTiming> {
    let mut timing = CommandTiming::default();

    // Step 1: trigger sources
    if cmd.convert != ConvertSource::Immediate {
        return Err(stage_err(1, "output conversions fire with the scan"));
    }
    let ScanBeginSource::Timer { .. } = cmd.scan_begin else {
        return Err(stage_err(1, "output scans must run on a timer"));
    };

    // Step 2: nothing further, as above

    // Step 3: argument bounds
    let mut err = false;
    check_channels(&cmd.channels, board.ao_channels)?;

    if let ScanBeginSource::Timer { ref mut ns } = cmd.scan_begin {
        let floor = board.ao_ns_min_calc / 2 * chanlist_pow2(cmd.channels.len());
        err |= arg_min(ns, floor);
        let snapped = (*ns / board.ao_ns_min) * board.ao_ns_min;
        timing.spacing_usecs = pacing::compute_spacing(snapped, board.ao_ns_min, MAX_BOARD_RATE);
        err |= arg_max(ns, MAX_BOARD_RATE);
        timing.scan_ms = *ns / 1_000_000;
    }

    if let StopCondition::Count(ref mut n) = cmd.stop {
        if *n < 1 {
            *n = 1;
            err = true;
        }
    }

    if err {
        return Err(stage_err(3, "arguments adjusted to valid bounds"));
    }

    // Step 4: no fixups for the output direction
    Ok(timing)
}

/// Direction-dispatching wrapper used by the device surface.
pub fn test_command(
    cmd: &mut StreamCommand,
    direction: Direction,
    board: &BoardInfo,
    chip: AdcChip,
    cascade: &mut PacerCascade,
    batching: bool,
) -> Result<CommandTiming> {
    match direction {
        Direction::Input => test_input_command(cmd, board, chip, cascade, batching),
        Direction::Output => test_output_command(cmd, board),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardVariant;

    fn board() -> &'static BoardInfo {
        BoardVariant::Gertboard.info()
    }

    #[test]
    fn test_input_command_passes_clean() {
        let mut cascade = PacerCascade::default();
        let mut cmd = StreamCommand::input(100_000, &[0]).with_stop_count(10);
        let timing =
            test_input_command(&mut cmd, board(), AdcChip::Mcp3202, &mut cascade, true).unwrap();
        assert_eq!(timing.convert_ns, 100_000);
        assert!(timing.spacing_usecs > 0);
        assert_eq!(timing.mix_spacing_usecs, timing.spacing_usecs * 2);
    }

    #[test]
    fn test_stage3_rejects_zero_stop_count() {
        let mut cascade = PacerCascade::default();
        let mut cmd = StreamCommand::input(100_000, &[0]).with_stop_count(0);
        let err =
            test_input_command(&mut cmd, board(), AdcChip::Mcp3202, &mut cascade, true).unwrap_err();
        assert_eq!(err.validation_stage(), Some(3));
        // fixed up toward validity: a re-test passes
        assert_eq!(cmd.stop, StopCondition::Count(1));
        assert!(test_input_command(&mut cmd, board(), AdcChip::Mcp3202, &mut cascade, true).is_ok());
    }

    #[test]
    fn test_continuous_accepts_no_count() {
        let mut cascade = PacerCascade::default();
        let mut cmd = StreamCommand::input(100_000, &[0]);
        assert!(test_input_command(&mut cmd, board(), AdcChip::Mcp3202, &mut cascade, true).is_ok());
    }

    #[test]
    fn test_stage3_raises_convert_floor() {
        let mut cascade = PacerCascade::default();
        let mut cmd = StreamCommand::input(10_000, &[0]);
        let err =
            test_input_command(&mut cmd, board(), AdcChip::Mcp3202, &mut cascade, true).unwrap_err();
        assert_eq!(err.validation_stage(), Some(3));
        assert_eq!(cmd.convert, ConvertSource::Timer { ns: 50_000 });
    }

    #[test]
    fn test_stage4_snaps_to_timer_grid() {
        let mut cascade = PacerCascade::default();
        // 107_500 is above the floor but not a divisor-pair product
        let mut cmd = StreamCommand::input(107_500, &[0]);
        let err =
            test_input_command(&mut cmd, board(), AdcChip::Mcp3202, &mut cascade, true).unwrap_err();
        assert_eq!(err.validation_stage(), Some(4));
        let timing =
            test_input_command(&mut cmd, board(), AdcChip::Mcp3202, &mut cascade, true).unwrap();
        assert_eq!(ConvertSource::Timer { ns: timing.convert_ns }, cmd.convert);
    }

    #[test]
    fn test_scan_interval_snaps_to_conversion_slots() {
        let mut cascade = PacerCascade::default();
        let mut cmd = StreamCommand::input(100_000, &[0, 1]);
        cmd.scan_begin = ScanBeginSource::Timer { ns: 123_456 };
        let err =
            test_input_command(&mut cmd, board(), AdcChip::Mcp3202, &mut cascade, true).unwrap_err();
        assert_eq!(err.validation_stage(), Some(3));
        // snapped down to a whole number of minimum conversion slots
        assert_eq!(cmd.scan_begin, ScanBeginSource::Timer { ns: 100_000 });
        assert!(test_input_command(&mut cmd, board(), AdcChip::Mcp3202, &mut cascade, true).is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_channel() {
        let mut cascade = PacerCascade::default();
        let mut cmd = StreamCommand::input(100_000, &[0, 5]);
        let err =
            test_input_command(&mut cmd, board(), AdcChip::Mcp3202, &mut cascade, true).unwrap_err();
        assert!(matches!(err, GertError::InvalidChannel { channel: 5, max: 2 }));
    }

    #[test]
    fn test_output_command_scan_ms() {
        let mut cmd = StreamCommand::output(2_000_000, &[0]).with_stop_count(5);
        let timing = test_output_command(&mut cmd, board()).unwrap();
        assert_eq!(timing.scan_ms, 2);
    }

    #[test]
    fn test_output_rejects_timed_convert() {
        let mut cmd = StreamCommand::output(2_000_000, &[0]);
        cmd.convert = ConvertSource::Timer { ns: 1000 };
        let err = test_output_command(&mut cmd, board()).unwrap_err();
        assert_eq!(err.validation_stage(), Some(1));
    }

    #[test]
    fn test_total_samples() {
        let cmd = StreamCommand::input(100_000, &[0, 1]).with_stop_count(10);
        assert_eq!(cmd.total_samples(), Some(20));
        assert_eq!(StreamCommand::input(100_000, &[0]).total_samples(), None);
    }
}
