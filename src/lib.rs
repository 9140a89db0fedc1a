//! rest2res: bridges HTTP+JSON endpoints onto a RES message bus.
//!
//! For each configured endpoint the service fetches a JSON document,
//! decomposes it into a forest of named models and collections according to
//! a declarative path/pattern schema, publishes those resources under
//! stable resource ids, and keeps them synchronized by periodically
//! re-fetching the origin and emitting fine-grained change events. Bus
//! subscribers obtain live views of REST data without polling the origin
//! themselves.
//!
//! - **value**: raw-preserving typed JSON tree.
//! - **url**: `${name}` URL templates.
//! - **schema**: the path/pattern compiler and schema trie.
//! - **diff**: model change-maps and LCS-based collection diffs.
//! - **bus**: the minimal bus surface plus the RES-over-NATS adapter.
//! - **service** / **config**: registration of declarative resource trees.

pub mod bus;
pub mod config;
pub mod diff;
mod endpoint;
pub mod error;
pub mod resource;
pub mod schema;
pub mod service;
mod traverse;
pub mod url;
pub mod value;

pub use config::Config;
pub use error::{Error, ResError, Result};
pub use service::Service;
