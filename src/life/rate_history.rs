//! Fixed-window history of population size and death rates for the rate graph.

use std::collections::VecDeque;

use serde::Serialize;

use crate::core::timebase::Millis;

pub const HISTORY_LEN: usize = 60;
pub const SAMPLE_INTERVAL_MS: Millis = 50.0;

/// Three parallel ring buffers, always the same length.
/// Death columns hold deltas since the previous sample, not running totals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RateHistory {
    active: VecDeque<u32>,
    converged: VecDeque<u32>,
    expired: VecDeque<u32>,
    #[serde(skip)]
    last_converged: u64,
    #[serde(skip)]
    last_expired: u64,
    #[serde(skip)]
    last_sample_ms: Millis,
}

impl RateHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_due(&self, now_ms: Millis) -> bool {
        now_ms - self.last_sample_ms >= SAMPLE_INTERVAL_MS
    }

    /// Push one sample, evicting the oldest once the window is full.
    pub fn sample(
        &mut self,
        now_ms: Millis,
        active_count: usize,
        cumulative_converged: u64,
        cumulative_expired: u64,
    ) {
        let converged = cumulative_converged.saturating_sub(self.last_converged);
        let expired = cumulative_expired.saturating_sub(self.last_expired);

        self.active
            .push_back(u32::try_from(active_count).unwrap_or(u32::MAX));
        self.converged
            .push_back(u32::try_from(converged).unwrap_or(u32::MAX));
        self.expired
            .push_back(u32::try_from(expired).unwrap_or(u32::MAX));
        if self.active.len() > HISTORY_LEN {
            self.active.pop_front();
            self.converged.pop_front();
            self.expired.pop_front();
        }

        self.last_converged = cumulative_converged;
        self.last_expired = cumulative_expired;
        self.last_sample_ms = now_ms;
    }

    /// Sample only if the interval has elapsed. Returns whether it sampled.
    pub fn sample_if_due(
        &mut self,
        now_ms: Millis,
        active_count: usize,
        cumulative_converged: u64,
        cumulative_expired: u64,
    ) -> bool {
        if !self.is_due(now_ms) {
            return false;
        }
        self.sample(now_ms, active_count, cumulative_converged, cumulative_expired);
        true
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn active(&self) -> &VecDeque<u32> {
        &self.active
    }

    pub fn converged(&self) -> &VecDeque<u32> {
        &self.converged
    }

    pub fn expired(&self) -> &VecDeque<u32> {
        &self.expired
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
