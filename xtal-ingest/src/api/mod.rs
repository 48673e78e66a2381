//! HTTP front end
//!
//! A thin request/response layer over the execution context. Every scan and
//! lookup is forwarded to the collector's tick loop; nothing here touches the
//! scanner directly.

pub mod health;
pub mod scan;

pub use health::{health_routes, HealthResponse};
pub use scan::scan_routes;
