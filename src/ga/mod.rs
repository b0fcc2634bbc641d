pub mod assembly;
pub mod client;
pub mod persist;
pub mod rows;
pub mod tables;
pub mod transform;

pub use assembly::{resolve_window, DashboardSource, GaMetricsResponse, GaMetricsService};
pub use client::MetricsServiceClient;
pub use persist::{import_llm_dashboard, reset_property};
pub use rows::{DateRange, GaRowCounts};
pub use tables::GaTable;
pub use transform::transform_llm_dashboard;
