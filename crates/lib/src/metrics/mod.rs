//! Admin metrics: a concurrent fan-out of datastore reads for fixed look-back windows,
//! plus latency percentiles and returning-user rate computed locally.

mod aggregator;
mod percentile;
mod snapshot;
mod window;

pub use aggregator::{collect_snapshot, MetricsOptions, LATENCY_SAMPLE_LIMIT, RECENT_LIMIT};
pub use percentile::{latency_percentiles, latency_samples, returning_rate, LatencyPercentiles};
pub use snapshot::{MetricsSnapshot, WindowMetrics};
pub use window::MetricsWindow;
