//! Thread-safe, in-process metrics (C3): counters, histograms, percentile
//! queries and a JSON snapshot read API.

pub mod sink;

pub use sink::{ Labels, MetricsSink };
