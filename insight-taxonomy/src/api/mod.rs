//! HTTP API handlers for insight-taxonomy

pub mod configs;
pub mod health;
pub mod phases;
pub mod pipeline;
pub mod sse;

pub use configs::config_routes;
pub use health::health_routes;
pub use phases::phase_routes;
pub use pipeline::pipeline_routes;
pub use sse::event_stream;
