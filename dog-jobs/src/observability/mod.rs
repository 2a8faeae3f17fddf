pub mod events;
pub mod metrics;

#[cfg(feature = "tracing-basic")]
pub mod subscriber;

pub use events::{EventBus, EventBusBuilder, EventCallback};
pub use metrics::{GlobalMetrics, JobNameMetrics, LiveMetrics, MetricsSnapshot};

#[cfg(feature = "tracing-basic")]
pub use subscriber::{init_tracing, LogFormat};
