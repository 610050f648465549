mod sinks;
mod trainer;

pub use sinks::{
    FsOutlierSink, MemoryMetrics, MemoryOutliers, MetricSink, OutlierRecord, OutlierSink,
    TracingMetrics,
};
pub use trainer::SelfTrainer;
