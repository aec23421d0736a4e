//! Alert rules evaluated against a channel's window.
//!
//! Both rules compare the newest reading with the oldest reading still in the
//! window, so the baseline slides forward as the window fills and evicts.
//! They differ in how the delta is rounded before the threshold check: the
//! drop rule keeps one decimal place, the stall rule rounds to a whole degree.
//! The two precisions are kept separate on purpose, since changing either
//! moves where alerts fire at the threshold boundary.

use serde::{Deserialize, Serialize};
use smokewatch_types::{round_half_even, AlertEvent, Reading};

use super::window::Window;
use crate::error::WindowError;

/// Decimal places the drop rule rounds its delta to.
pub const DROP_DELTA_DECIMALS: u32 = 1;

/// Decimal places the stall rule rounds its delta to.
pub const STALL_DELTA_DECIMALS: u32 = 0;

/// How a rule compares the window's delta with its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    /// Alert when the temperature fell by at least the threshold.
    Drop,
    /// Alert when the temperature moved by no more than the threshold, either way.
    Stall,
}

impl RuleKind {
    pub fn label(&self) -> &'static str {
        match self {
            RuleKind::Drop => "drop",
            RuleKind::Stall => "stall",
        }
    }
}

/// A threshold predicate over the oldest and newest readings of a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertRule {
    kind: RuleKind,
    threshold: f64,
}

impl AlertRule {
    pub fn new(kind: RuleKind, threshold: f64) -> Self {
        Self { kind, threshold }
    }

    /// Fires when `oldest - newest >= threshold` (one decimal place).
    pub fn drop_at_least(threshold: f64) -> Self {
        Self::new(RuleKind::Drop, threshold)
    }

    /// Fires when `|oldest - newest| <= threshold` (whole degrees).
    pub fn abs_change_at_most(threshold: f64) -> Self {
        Self::new(RuleKind::Stall, threshold)
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Signed, rounded change from `oldest` to `newest`. Positive means the
    /// temperature fell.
    pub fn delta(&self, oldest: &Reading, newest: &Reading) -> f64 {
        let raw = oldest.temperature() - newest.temperature();
        match self.kind {
            RuleKind::Drop => round_half_even(raw, DROP_DELTA_DECIMALS),
            RuleKind::Stall => round_half_even(raw, STALL_DELTA_DECIMALS),
        }
    }

    fn matches(&self, delta: f64) -> bool {
        match self.kind {
            RuleKind::Drop => delta >= self.threshold,
            RuleKind::Stall => delta.abs() <= self.threshold,
        }
    }

    /// Whether the rule fires for this pair of readings.
    pub fn fires(&self, oldest: &Reading, newest: &Reading) -> bool {
        self.matches(self.delta(oldest, newest))
    }

    /// Evaluate the rule against a window that has just been pushed to.
    ///
    /// Fails if the window is empty; callers check the window size first.
    pub fn evaluate(&self, channel: &str, window: &Window) -> Result<Option<AlertEvent>, WindowError> {
        let oldest = window.oldest()?;
        let newest = window.newest()?;
        let delta = self.delta(oldest, newest);

        if !self.matches(delta) {
            return Ok(None);
        }

        let message = match self.kind {
            RuleKind::Drop => format!(
                "Smoker alert! temperature dropped {:.1} degrees since {}",
                delta,
                oldest.timestamp()
            ),
            RuleKind::Stall => format!(
                "Food stall alert! temperature moved {:.0} degrees since {}",
                delta.abs(),
                oldest.timestamp()
            ),
        };

        Ok(Some(AlertEvent {
            channel: channel.to_string(),
            timestamp: newest.timestamp().to_string(),
            delta,
            message,
        }))
    }
}
