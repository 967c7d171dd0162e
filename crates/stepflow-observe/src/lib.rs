//! Observability setup for stepflow: structured logging with optional
//! OpenTelemetry span export.

pub mod tracing_setup;
