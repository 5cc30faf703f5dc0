// =============================================================================
// Signal Aggregator — weighted ensemble over external strategies
// =============================================================================
//
// Each configured strategy produces {direction, strength, reason}; the
// aggregator folds them into one decision:
//
//   score      = sum(direction * strength * weight) / sum(weight)   in [-1, 1]
//   direction  = sign(score)
//   confidence = |score|
//
// The aggregate is dropped when confidence is below the floor or when fewer
// than `min_agreement` strategies point the same way.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::portfolio::Position;
use crate::types::{Paise, Quote};

// ---------------------------------------------------------------------------
// The strategy seam
// ---------------------------------------------------------------------------

/// A single strategy's view of one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct StrategySignal {
    /// +1 bullish, -1 bearish, 0 neutral.
    pub direction: i8,
    /// Conviction in [0, 1].
    pub strength: f64,
    pub reason: String,
}

impl StrategySignal {
    pub fn neutral(reason: impl Into<String>) -> Self {
        Self { direction: 0, strength: 0.0, reason: reason.into() }
    }
}

/// Market context handed to strategies. Deliberately small: strategies that
/// need candles or order flow maintain their own state from their own feeds.
#[derive(Debug, Clone)]
pub struct SignalContext {
    pub quote: Quote,
    pub equity: Paise,
    pub has_position: bool,
}

/// Implemented by external strategy crates/modules.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Relative weight in the ensemble.
    fn weight(&self) -> f64 {
        1.0
    }

    fn evaluate(&self, symbol: &str, ctx: &SignalContext) -> StrategySignal;

    /// Ask the strategy whether it wants an open position closed. Returns the
    /// exit reason, or None to hold.
    fn wants_exit(&self, _position: &Position, _ctx: &SignalContext) -> Option<String> {
        None
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// One strategy's contribution to the final score.
#[derive(Debug, Clone, Serialize)]
pub struct SignalContribution {
    pub name: String,
    pub weight: f64,
    pub direction: i8,
    pub strength: f64,
    pub contribution: f64,
    pub reason: String,
}

/// The combined decision for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedSignal {
    /// +1 or -1 (a zero-direction aggregate is dropped).
    pub direction: i8,
    /// |score| in [0, 1].
    pub confidence: f64,
    pub contributions: Vec<SignalContribution>,
}

pub struct SignalAggregator {
    strategies: Vec<Arc<dyn Strategy>>,
    min_confidence: f64,
    min_agreement: usize,
}

impl SignalAggregator {
    pub fn new(strategies: Vec<Arc<dyn Strategy>>, min_confidence: f64, min_agreement: usize) -> Self {
        Self {
            strategies,
            min_confidence,
            min_agreement: min_agreement.max(1),
        }
    }

    pub fn strategies(&self) -> &[Arc<dyn Strategy>] {
        &self.strategies
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run every strategy and combine. Returns None when the ensemble is
    /// empty, the confidence floor is not met, or too few strategies agree.
    pub fn aggregate(&self, symbol: &str, ctx: &SignalContext) -> Option<AggregatedSignal> {
        if self.strategies.is_empty() {
            return None;
        }

        let mut contributions = Vec::with_capacity(self.strategies.len());
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for strategy in &self.strategies {
            let signal = strategy.evaluate(symbol, ctx);
            let weight = strategy.weight().max(0.0);
            let strength = signal.strength.clamp(0.0, 1.0);
            let contribution = signal.direction as f64 * strength * weight;

            contributions.push(SignalContribution {
                name: strategy.name().to_string(),
                weight,
                direction: signal.direction,
                strength,
                contribution,
                reason: signal.reason,
            });

            weighted_sum += contribution;
            weight_total += weight;
        }

        if weight_total <= 0.0 {
            return None;
        }

        let score = weighted_sum / weight_total;
        let direction: i8 = if score > 0.0 { 1 } else { -1 };
        let confidence = score.abs();

        if confidence < self.min_confidence {
            debug!(symbol, score, confidence, "aggregate dropped — below confidence floor");
            return None;
        }

        let agreeing = contributions
            .iter()
            .filter(|c| c.direction == direction)
            .count();
        if agreeing < self.min_agreement {
            debug!(
                symbol,
                agreeing,
                required = self.min_agreement,
                "aggregate dropped — insufficient agreement"
            );
            return None;
        }

        Some(AggregatedSignal { direction, confidence, contributions })
    }

    /// Poll every strategy for an exit request on an open position; the first
    /// non-None answer wins.
    pub fn wants_exit(&self, position: &Position, ctx: &SignalContext) -> Option<String> {
        self.strategies
            .iter()
            .find_map(|s| s.wants_exit(position, ctx).map(|r| format!("{}: {r}", s.name())))
    }
}

impl std::fmt::Debug for SignalAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalAggregator")
            .field("strategies", &self.strategies.len())
            .field("min_confidence", &self.min_confidence)
            .field("min_agreement", &self.min_agreement)
            .finish()
    }
}
