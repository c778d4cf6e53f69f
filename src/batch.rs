//! Batched ("hunk") transfer construction and unpacking.
//!
//! A hunk packs up to [`HUNK_LEN`] conversions into one multi-slot SPI
//! message, which amortizes the per-message setup cost that dominates at
//! high sample rates. Chip select is toggled after every slot but the last
//! one, restarting the converter without the transport's full deassert
//! latency; per-slot delays carry the pacing computed at admission.

use tracing::trace;

use crate::board::AdcChip;
use crate::error::Result;
use crate::spi::SpiMessage;

/// Maximum conversions in one batched transfer.
pub const HUNK_LEN: usize = 1000;

/// Channel/delay pattern for one batch run. Set once per admitted command.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchPattern {
    /// Channel for every slot (even slots in mix mode)
    pub channel: u32,
    /// Channel for odd slots in mix mode
    pub mix_channel: u32,
    /// Alternate between the two channels
    pub mix: bool,
    /// Per-slot delay, usecs
    pub spacing_usecs: u32,
    /// Doubled delay on odd slots in mix mode, usecs
    pub mix_spacing_usecs: u32,
}

/// Builds and unpacks batched conversion messages for one direction.
pub struct TransferBatcher {
    chip: AdcChip,
    max_len: usize,
    pattern: BatchPattern,
    msg: SpiMessage,
}

impl TransferBatcher {
    pub fn new(chip: AdcChip, max_len: usize) -> Self {
        let max_len = max_len.clamp(1, HUNK_LEN);
        Self {
            chip,
            max_len,
            pattern: BatchPattern::default(),
            msg: SpiMessage::with_capacity(chip.frame_len(), max_len),
        }
    }

    /// Install the channel/delay pattern for the admitted command.
    pub fn set_pattern(&mut self, pattern: BatchPattern) {
        self.pattern = pattern;
    }

    /// Batch length for this attempt: the remaining scan count, capped at
    /// the transfer maximum.
    pub fn plan_len(&self, remaining: Option<u64>) -> usize {
        match remaining {
            Some(left) => (left.min(self.max_len as u64)) as usize,
            None => self.max_len,
        }
    }

    /// Fill the message with `len` conversion slots following the pattern.
    pub fn build(&mut self, len: usize) -> &mut SpiMessage {
        let p = self.pattern;
        self.msg.clear();
        for i in 0..len {
            let (chan, delay) = if p.mix {
                if i % 2 == 1 {
                    (p.mix_channel, p.mix_spacing_usecs)
                } else {
                    (p.channel, 0)
                }
            } else {
                (p.channel, p.spacing_usecs)
            };
            let frame = self.chip.read_frame(chan);
            // hold chip select low across slot boundaries; the transport
            // releases it after the final slot on its own
            let cs_change = i + 1 < len;
            self.msg.push_slot(&frame, delay, cs_change);
        }
        trace!(len, mix = p.mix, "hunk built");
        &mut self.msg
    }

    /// Decode up to `len` received slots in order, feeding each sample to
    /// `sink`. The sink returns `false` to stop early (stop count reached or
    /// buffer full); remaining slots are discarded. Returns the number of
    /// samples emitted.
    pub fn unpack(&self, len: usize, sink: &mut dyn FnMut(u32) -> bool) -> Result<usize> {
        let len = len.min(self.msg.len());
        for i in 0..len {
            let val = self.chip.decode(self.msg.rx_slot(i))?;
            if !sink(val) {
                return Ok(i + 1);
            }
        }
        Ok(len)
    }

    /// The message built by the last [`TransferBatcher::build`] call.
    pub fn message(&mut self) -> &mut SpiMessage {
        &mut self.msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_pattern(channel: u32, spacing: u32) -> BatchPattern {
        BatchPattern {
            channel,
            spacing_usecs: spacing,
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_len_caps_at_max() {
        let batcher = TransferBatcher::new(AdcChip::Mcp3202, HUNK_LEN);
        assert_eq!(batcher.plan_len(None), HUNK_LEN);
        assert_eq!(batcher.plan_len(Some(3)), 3);
        assert_eq!(batcher.plan_len(Some(5000)), HUNK_LEN);
    }

    #[test]
    fn test_build_single_channel() {
        let mut batcher = TransferBatcher::new(AdcChip::Mcp3202, 16);
        batcher.set_pattern(single_pattern(1, 7));
        let msg = batcher.build(4);
        assert_eq!(msg.len(), 4);
        for (i, slot) in msg.slots.iter().enumerate() {
            assert_eq!(msg.tx[slot.offset], 0xf0);
            assert_eq!(slot.delay_usecs, 7);
            assert_eq!(slot.cs_change, i != 3);
        }
    }

    #[test]
    fn test_build_mix_alternates() {
        let mut batcher = TransferBatcher::new(AdcChip::Mcp3002, 16);
        batcher.set_pattern(BatchPattern {
            channel: 0,
            mix_channel: 1,
            mix: true,
            spacing_usecs: 25,
            mix_spacing_usecs: 50,
        });
        let msg = batcher.build(10);
        for (i, slot) in msg.slots.iter().enumerate() {
            if i % 2 == 1 {
                assert_eq!(msg.tx[slot.offset], 0xf0);
                assert_eq!(slot.delay_usecs, 50);
            } else {
                assert_eq!(msg.tx[slot.offset], 0xd0);
                assert_eq!(slot.delay_usecs, 0);
            }
        }
    }

    #[test]
    fn test_unpack_in_order() {
        let mut batcher = TransferBatcher::new(AdcChip::Mcp3202, 16);
        batcher.set_pattern(single_pattern(0, 0));
        batcher.build(5);
        for (i, slot) in batcher.msg.slots.iter().enumerate() {
            let frame = AdcChip::Mcp3202.encode_sample(i as u32 + 100);
            batcher.msg.rx[slot.offset..slot.offset + slot.len].copy_from_slice(&frame);
        }
        let mut seen = Vec::new();
        let n = batcher
            .unpack(5, &mut |v| {
                seen.push(v);
                true
            })
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(seen, vec![100, 101, 102, 103, 104]);
    }

    #[test]
    fn test_unpack_stops_early() {
        let mut batcher = TransferBatcher::new(AdcChip::Mcp3202, 16);
        batcher.set_pattern(single_pattern(0, 0));
        batcher.build(10);
        let mut seen = 0usize;
        let n = batcher
            .unpack(10, &mut |_| {
                seen += 1;
                seen < 3
            })
            .unwrap();
        // exactly three samples emitted, the remaining seven slots dropped
        assert_eq!(n, 3);
        assert_eq!(seen, 3);
    }
}
