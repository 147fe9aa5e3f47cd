//! Aggregation and persistence rate limiting

mod aggregation;
mod gate;

pub use aggregation::{
    format_local, AggregationEvent, AggregationState, ChannelValues, CycleValues, Direction,
    ExtremeKind, ExtremeTracker, Quantity, ThresholdCounter, Watch,
};
pub use gate::PersistenceGate;
