//! Pump-state inference from the recent level trend.
//!
//! The sensor node does not report whether the fill pump runs, so it is
//! inferred from the direction of the last few level samples with a small
//! hysteresis band. Flat trends are resolved by the current level: a tank
//! above the upper band is assumed idle, anything lower is assumed filling.

use std::collections::VecDeque;

use tank_core::models::{PumpState, Reading};
use tracing::debug;

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendConfig {
    /// Samples retained; older ones are discarded.
    pub window_size: usize,
    /// Below this many samples the pump is reported OFF.
    pub min_samples: usize,
    /// How many of the newest samples feed the average delta.
    pub recent_samples: usize,
    /// Average rise per sample, in percentage points, that means ON.
    pub rising_threshold: f64,
    /// Average fall per sample that means OFF (negative).
    pub falling_threshold: f64,
    /// On a flat trend, levels above this are OFF.
    pub flat_level_threshold: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            min_samples: 3,
            recent_samples: 5,
            rising_threshold: 0.5,
            falling_threshold: -0.2,
            flat_level_threshold: 60.0,
        }
    }
}

// ── TrendAnalyzer ─────────────────────────────────────────────────────────────

/// Hysteresis state machine over a bounded window of level samples.
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    config: TrendConfig,
    window: VecDeque<f64>,
    state: PumpState,
}

impl TrendAnalyzer {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_size),
            config,
            state: PumpState::Off,
        }
    }

    /// Record `level` and re-evaluate with it as the current level.
    pub fn observe(&mut self, level: f64) -> PumpState {
        if self.window.len() >= self.config.window_size {
            self.window.pop_front();
        }
        self.window.push_back(level);

        let next = self.evaluate(level);
        if next != self.state {
            debug!(
                from = %self.state,
                to = %next,
                avg_delta = ?self.average_delta(),
                level,
                "inferred pump state changed"
            );
        }
        self.state = next;
        next
    }

    /// Infer the pump state from the current window without modifying it.
    pub fn evaluate(&self, current_level: f64) -> PumpState {
        if self.window.len() < self.config.min_samples {
            return PumpState::Off;
        }
        let Some(avg) = self.average_delta() else {
            return PumpState::Off;
        };

        if avg > self.config.rising_threshold {
            PumpState::On
        } else if avg < self.config.falling_threshold {
            PumpState::Off
        } else if current_level > self.config.flat_level_threshold {
            PumpState::Off
        } else {
            PumpState::On
        }
    }

    /// Observe the reading's level and return it carrying the inferred state.
    pub fn annotate(&mut self, reading: Reading) -> Reading {
        let state = self.observe(reading.level_percent);
        reading.with_pump_state(state)
    }

    /// Mean successive difference over the newest `recent_samples` samples.
    pub fn average_delta(&self) -> Option<f64> {
        let take = self.config.recent_samples.min(self.window.len());
        if take < 2 {
            return None;
        }
        let recent: Vec<f64> = self.window.iter().skip(self.window.len() - take).copied().collect();
        let total: f64 = recent.windows(2).map(|w| w[1] - w[0]).sum();
        Some(total / (take - 1) as f64)
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.state = PumpState::Off;
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Most recently inferred state.
    pub fn state(&self) -> PumpState {
        self.state
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(TrendConfig::default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
