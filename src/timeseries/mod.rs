//! Time-series query façade (C6).

pub mod provider;
pub mod types;

pub use provider::{MockProvider, RemoteProvider, TimeSeriesProvider};
pub use types::TimeSeriesSample;
