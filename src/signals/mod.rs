// =============================================================================
// Signals Module
// =============================================================================
//
// The strategy seam and the aggregation pipeline. Strategy implementations
// live outside the engine; they only need to implement [`Strategy`].

pub mod aggregator;

pub use aggregator::{
    AggregatedSignal, SignalAggregator, SignalContext, SignalContribution, Strategy,
    StrategySignal,
};
