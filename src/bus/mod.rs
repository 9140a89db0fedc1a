//! Minimal message-bus surface required by the core.
//!
//! The refresh engine never talks to a concrete bus client; it registers
//! handlers, emits events, and issues resets through [`BusService`]. The
//! RES-over-NATS adapter lives in [`nats`]; tests substitute a recording
//! implementation.

pub mod group;
pub mod nats;

use crate::diff::ChangeValue;
use crate::error::{ResError, Result};
use crate::resource::ResourceValue;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How access requests for an endpoint's resources are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    /// Answer every access request with full access.
    Granted,
    /// Leave access requests to an external authorization service.
    #[default]
    Delegated,
}

/// Registration options for an endpoint handler.
#[derive(Debug, Clone, Copy)]
pub struct HandlerOpts {
    pub access: AccessPolicy,
}

/// A get request routed to an endpoint handler.
pub struct GetRequest {
    rid: String,
    params: HashMap<String, String>,
    timeout_ext: Option<Box<dyn Fn(Duration) + Send + Sync>>,
}

impl GetRequest {
    #[must_use]
    pub fn new(rid: impl Into<String>, params: HashMap<String, String>) -> Self {
        GetRequest {
            rid: rid.into(),
            params,
            timeout_ext: None,
        }
    }

    /// Attach a callback used to ask the bus for more time on cold reads.
    #[must_use]
    pub fn with_timeout_ext(mut self, f: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.timeout_ext = Some(Box::new(f));
        self
    }

    /// The requested resource id.
    #[must_use]
    pub fn rid(&self) -> &str {
        &self.rid
    }

    /// Parameters bound by the handler's pattern match.
    #[must_use]
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    #[must_use]
    pub fn path_param(&self, name: &str) -> &str {
        self.params.get(name).map(String::as_str).unwrap_or_default()
    }

    /// Hint that answering may take up to `d`; ignored when the transport
    /// has no such facility.
    pub fn extend_timeout(&self, d: Duration) {
        if let Some(f) = &self.timeout_ext {
            f(d);
        }
    }
}

impl std::fmt::Debug for GetRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetRequest")
            .field("rid", &self.rid)
            .field("params", &self.params)
            .finish()
    }
}

/// Answer to a get request.
#[derive(Debug, Clone, PartialEq)]
pub enum GetResult {
    Model(HashMap<String, ResourceValue>),
    Collection(Vec<ResourceValue>),
    Error(ResError),
}

/// An endpoint's get handler, registered once per resource pattern.
#[async_trait]
pub trait GetHandler: Send + Sync {
    async fn get(&self, req: GetRequest) -> GetResult;
}

/// An event emitted by a refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    Change {
        rid: String,
        values: HashMap<String, ChangeValue>,
    },
    Add {
        rid: String,
        value: ResourceValue,
        idx: usize,
    },
    Remove {
        rid: String,
        idx: usize,
    },
}

impl ResourceEvent {
    #[must_use]
    pub fn rid(&self) -> &str {
        match self {
            ResourceEvent::Change { rid, .. }
            | ResourceEvent::Add { rid, .. }
            | ResourceEvent::Remove { rid, .. } => rid,
        }
    }
}

/// The bus operations the core requires.
#[async_trait]
pub trait BusService: Send + Sync {
    /// Register a handler under a full resource-id pattern. Registration
    /// happens before serving starts; duplicate patterns are an error.
    fn register(&self, pattern: &str, handler: Arc<dyn GetHandler>, opts: HandlerOpts)
        -> Result<()>;

    /// Publish a resource event. Callers serialize emissions per URL, so
    /// call order is delivery order.
    async fn emit(&self, event: ResourceEvent) -> Result<()>;

    /// Issue a bus-level reset for the given resource-id patterns.
    async fn reset(&self, resources: Vec<String>) -> Result<()>;
}
