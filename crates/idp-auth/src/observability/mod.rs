//! Observability: Prometheus metrics definitions and recorder setup.

pub mod metrics;
