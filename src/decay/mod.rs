//! Usage history and the decay function that turns it into a probability.
//!
//! Decaying dictionaries store a [`HistoricalInfo`] instead of a static
//! probability. The store never interprets it; callers go through a
//! [`DecayFunction`].

use crate::header::DecayParams;
use crate::MAX_PROBABILITY;

/// Usage history of one unigram or bigram.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HistoricalInfo {
    /// Time (seconds) the level was last brought up to date
    pub timestamp: u32,
    pub level: u8,
    /// Occurrences counted toward the next level
    pub count: u8,
}

/// Maps usage history to probabilities and decides what survives compaction.
pub trait DecayFunction: Send + Sync {
    /// Effective probability (0..=255) of `info` at `now`.
    fn decode_probability(&self, info: &HistoricalInfo, params: &DecayParams, now: u32) -> i32;

    /// `info` with the decay elapsed up to `now` applied, as written by compaction.
    fn info_to_save(&self, info: &HistoricalInfo, params: &DecayParams, now: u32) -> HistoricalInfo;

    fn needs_to_keep(&self, info: &HistoricalInfo, params: &DecayParams) -> bool;

    /// History after one more occurrence at `now`. `probability` seeds the
    /// level of a new entry and is `NOT_A_PROBABILITY` when unknown.
    fn updated_info(
        &self,
        original: Option<&HistoricalInfo>,
        probability: i32,
        params: &DecayParams,
        now: u32,
    ) -> HistoricalInfo;
}

/// Level-based forgetting curve.
///
/// Every level owns an equal slice of the probability range. Each elapsed
/// time step costs one level; an entry at level 0 that sees no use within a
/// step is forgotten, as is anything untouched for `max_elapsed_steps`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForgettingCurve;

impl ForgettingCurve {
    fn elapsed_steps(info: &HistoricalInfo, params: &DecayParams, now: u32) -> u32 {
        now.saturating_sub(info.timestamp) / params.time_step_secs.max(1)
    }

    fn level_span(params: &DecayParams) -> i32 {
        (MAX_PROBABILITY + 1) / (i32::from(params.max_level) + 1)
    }

    fn base_probability(level: u8, params: &DecayParams) -> i32 {
        (Self::level_span(params) * (i32::from(level) + 1) - 1).min(MAX_PROBABILITY)
    }

    fn level_for_probability(probability: i32, params: &DecayParams) -> u8 {
        if probability <= 0 {
            return 0;
        }
        let level = probability.min(MAX_PROBABILITY) / Self::level_span(params);
        level.min(i32::from(params.max_level)) as u8
    }
}

impl DecayFunction for ForgettingCurve {
    /// Probability of the level left after the elapsed steps, so reading an
    /// entry gives the same value before and after compaction saves it.
    fn decode_probability(&self, info: &HistoricalInfo, params: &DecayParams, now: u32) -> i32 {
        let decayed = self.info_to_save(info, params, now);
        if !self.needs_to_keep(&decayed, params) {
            return 0;
        }
        Self::base_probability(decayed.level, params)
    }

    fn info_to_save(&self, info: &HistoricalInfo, params: &DecayParams, now: u32) -> HistoricalInfo {
        let steps = Self::elapsed_steps(info, params, now);
        if steps == 0 {
            return *info;
        }
        let forgotten = steps >= u32::from(params.max_elapsed_steps.max(1)) || u32::from(info.level) < steps;
        let (level, count) = if forgotten {
            (0, 0)
        } else {
            (info.level - steps as u8, info.count)
        };
        HistoricalInfo {
            timestamp: info
                .timestamp
                .saturating_add(steps.saturating_mul(params.time_step_secs)),
            level,
            count,
        }
    }

    fn needs_to_keep(&self, info: &HistoricalInfo, _params: &DecayParams) -> bool {
        info.level > 0 || info.count > 0
    }

    fn updated_info(
        &self,
        original: Option<&HistoricalInfo>,
        probability: i32,
        params: &DecayParams,
        now: u32,
    ) -> HistoricalInfo {
        let mut info = match original {
            Some(original) => self.info_to_save(original, params, now),
            None => HistoricalInfo {
                timestamp: now,
                level: Self::level_for_probability(probability, params),
                count: 0,
            },
        };
        info.count = info.count.saturating_add(1);
        if info.count >= params.occurrences_to_level_up {
            if info.level < params.max_level {
                info.level += 1;
                info.count = 0;
            } else {
                info.count = params.occurrences_to_level_up.saturating_sub(1).max(1);
            }
        }
        info.timestamp = now;
        info
    }
}
