//! HTTP observability surface
//!
//! Read-only: health, Prometheus metrics, and the alert feed.

pub mod alerts;
pub mod health;
pub mod metrics;

pub use alerts::alert_routes;
pub use health::health_routes;
pub use self::metrics::metrics_routes;
