//! Structured metric events and asynchronous recording for the opal cache.

pub mod event;
pub mod exporters;
pub mod macros;
pub mod recorder;

pub use event::{MetricEvent, TransferDirection};
pub use exporters::{ChannelExporter, ConsoleExporter, JsonlExporter, MetricExporter};
pub use macros::{install_sink, sink_installed, with_sink};
pub use recorder::{AsyncMetricRecorder, MetricQueue};
