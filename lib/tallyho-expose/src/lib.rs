//! Prometheus exposition: text rendering and the HTTP scrape endpoint.
#![deny(warnings)]
#![deny(missing_docs)]

mod render;
mod server;

pub use self::render::{render_registry, CONTENT_TYPE};
pub use self::server::{ErrorHandle, ScrapeServer, ShutdownHandle};
