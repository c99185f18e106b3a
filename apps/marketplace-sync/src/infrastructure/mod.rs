//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loaded from the environment.
pub mod config;

/// Event source adapters (hosted backend, in-memory).
pub mod event_source;

/// Health check and HTTP surface.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
