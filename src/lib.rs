pub mod actors;
pub mod config;
pub mod error;
pub mod monitor;
pub mod probe;
pub mod registry;
pub mod results;
pub mod scheduler;
pub mod storage;
pub mod target;
pub mod util;

pub use actors::messages::SchedulerEvent;
pub use actors::tester::ScheduleState;
pub use error::{ConfigError, MonitorError};
pub use monitor::Monitor;
pub use probe::{IntervalSample, Measurement, Probe, ProbeError, ProbeErrorKind, ProbeRequest};
pub use storage::{ResultRecord, SeriesSummary, StorageError, Upsert};
pub use target::{Target, TargetId};
