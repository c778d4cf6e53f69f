//! Sample-rate pacing.
//!
//! Two jobs live here. `compute_spacing` turns a requested conversion
//! interval into the inter-transfer delay the SPI link needs so the
//! converter settles before the next conversion starts; the result leans
//! long on purpose. [`PacerCascade`] is the two-stage programmable divider:
//! it searches divisor pairs for the product closest to a requested
//! nanosecond interval under a rounding rule.

use crate::board::AdcChip;

/// Oscillator base period for the divisor cascade, in tens of ns.
pub const OSC_BASE_10NS: u32 = 5000;
/// Largest value either cascade stage can count to.
pub const TIMER_MAX_COUNT: u32 = 0xffff;
/// Spacing correction when batching, in usecs.
pub const SPACING_FIX_BATCH: u32 = 19;
/// Spacing correction for free-running single transfers, in usecs.
pub const SPACING_FIX_FREERUN: u32 = 1;
/// Extra correction for the MCP3002, which converts faster than the link
/// overhead model assumes.
pub const SPACING_FIX_FAST: u32 = 9;

/// Rounding rule for the cascade search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundingMode {
    #[default]
    Nearest,
    Up,
    Down,
}

/// Inter-transfer spacing in usecs for a conversion interval of `rate` ns.
///
/// The rate is clamped to `[ns_min, rate_max]`; the leftover time in one
/// second after all conversions is spread evenly between them. Returns zero
/// when the requested rate leaves no slack.
pub fn compute_spacing(rate: u32, ns_min: u32, rate_max: u32) -> u32 {
    let rate = rate.clamp(ns_min, rate_max) as i64;
    let rate_max = rate_max as i64;
    let sample_freq = rate_max / rate;
    let total_sample_time = ns_min as i64 * sample_freq;
    let delay_time = rate_max - total_sample_time;
    if sample_freq > 0 && delay_time >= sample_freq {
        ((delay_time / sample_freq) / 1000).max(0) as u32
    } else {
        0
    }
}

/// AI spacing: base spacing plus the per-mode settle corrections.
pub fn ai_spacing_usecs(
    rate: u32,
    ns_min: u32,
    rate_max: u32,
    batching: bool,
    chip: AdcChip,
) -> u32 {
    let mut spacing = compute_spacing(rate, ns_min, rate_max);
    spacing += if batching {
        SPACING_FIX_BATCH
    } else {
        SPACING_FIX_FREERUN
    };
    if chip == AdcChip::Mcp3002 {
        spacing += SPACING_FIX_FAST;
    }
    spacing
}

/// Two-stage cascaded divider state. `div1`/`div2` persist between searches
/// so a repeated request for the same interval short-circuits.
#[derive(Debug, Clone)]
pub struct PacerCascade {
    pub osc_base: u32,
    pub div1: u32,
    pub div2: u32,
}

impl Default for PacerCascade {
    fn default() -> Self {
        Self::new(OSC_BASE_10NS)
    }
}

impl PacerCascade {
    /// `osc_base` is the divider's base period; it is floored at 1 since the
    /// search divides by it.
    pub fn new(osc_base: u32) -> Self {
        Self {
            osc_base: osc_base.max(1),
            div1: 0,
            div2: 0,
        }
    }

    /// Interval currently programmed, in base-period units.
    pub fn interval(&self) -> u64 {
        self.osc_base as u64 * self.div1 as u64 * self.div2 as u64
    }

    /// Replace `nanosec` with the closest achievable interval and remember
    /// the divisor pair producing it.
    ///
    /// Searches every factorization with both stages in `(1, TIMER_MAX_COUNT]`,
    /// tracking the greatest product at or under the target and the least at
    /// or over it, then picks per `rounding`. Out-of-range targets clamp to
    /// the nearest achievable pair.
    pub fn ns_to_timer(&mut self, nanosec: &mut u32, rounding: RoundingMode) {
        let base = self.osc_base as u64;
        let d1 = if self.div1 != 0 { self.div1 } else { TIMER_MAX_COUNT } as u64;
        let d2 = if self.div2 != 0 { self.div2 } else { TIMER_MAX_COUNT } as u64;

        // exit early if the current divisors already reproduce the target
        if d1 * d2 * base == *nanosec as u64
            && d1 > 1
            && d1 <= TIMER_MAX_COUNT as u64
            && d2 > 1
            && d2 <= TIMER_MAX_COUNT as u64
        {
            return;
        }

        let div = *nanosec as u64 / base;
        let target = *nanosec as u64;
        let mut ns_glb = 0u64;
        let mut ns_lub = u64::MAX;
        let (mut d1_glb, mut d2_glb) = (0u64, 0u64);
        let (mut d1_lub, mut d2_lub) = (0u64, 0u64);

        let start = (div / TIMER_MAX_COUNT as u64).max(2);
        let mut d1 = start;
        while d1 <= div / d1 + 1 && d1 <= TIMER_MAX_COUNT as u64 {
            let mut d2 = (div / d1).max(2);
            while d1 * d2 <= div + d1 + 1 && d2 <= TIMER_MAX_COUNT as u64 {
                let ns = base * d1 * d2;
                if ns <= target && ns > ns_glb {
                    ns_glb = ns;
                    d1_glb = d1;
                    d2_glb = d2;
                }
                if ns >= target && ns < ns_lub {
                    ns_lub = ns;
                    d1_lub = d1;
                    d2_lub = d2;
                }
                d2 += 1;
            }
            d1 += 1;
        }

        // nothing achievable at or around an out-of-range target: clamp to
        // the smallest valid pair
        if d1_glb == 0 && d1_lub == 0 {
            d1_lub = 2;
            d2_lub = 2;
        }

        let (d1, d2) = match rounding {
            RoundingMode::Nearest => {
                let ns_high = d1_lub * d2_lub * base;
                let ns_low = d1_glb * d2_glb * base;
                if d1_glb == 0 || (d1_lub != 0 && ns_high - target < target - ns_low) {
                    (d1_lub, d2_lub)
                } else {
                    (d1_glb, d2_glb)
                }
            }
            RoundingMode::Up => {
                if d1_lub != 0 {
                    (d1_lub, d2_lub)
                } else {
                    (d1_glb, d2_glb)
                }
            }
            RoundingMode::Down => {
                if d1_glb != 0 {
                    (d1_glb, d2_glb)
                } else {
                    (d1_lub, d2_lub)
                }
            }
        };

        *nanosec = (d1 * d2 * base).min(u32::MAX as u64) as u32;
        self.div1 = d1 as u32;
        self.div2 = d2 as u32;
    }
}
