//! Visitor analytics
//!
//! Clicks are recorded off the redirect path by a bounded worker pool that
//! geolocates the visitor through an HTTP lookup service.

pub mod geo;
pub mod ip_extractor;
pub mod models;
pub mod recorder;

pub use geo::{GeoLookup, GeoResolver, IpApiLookup};
pub use ip_extractor::extract_client_ip;
pub use models::{ClickJob, GeoLocation};
pub use recorder::{process_click, ClickRecorder};
