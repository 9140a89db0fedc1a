//! Service assembly: compiles each endpoint's declarative resource tree and
//! registers its handler on the bus.
//!
//! For every endpoint the resource tree is walked depth-first. Each node's
//! absolute pattern and path are composed from its parent's, the node is
//! compiled into the endpoint's schema trie, its reset pattern is collected,
//! and the endpoint's single handler is registered under the resulting
//! resource-id pattern. Any failure here is fatal; the service never starts
//! half-registered.

use crate::bus::{BusService, GetHandler, HandlerOpts};
use crate::config::{EndpointConfig, ResourceConfig, ServiceConfig};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::schema::{reset_pattern, Node};
use crate::url::UrlTemplate;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The rest2res service: one compiled endpoint per configuration entry.
pub struct Service {
    endpoints: Vec<Arc<Endpoint>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}

impl Service {
    /// Compile every configured endpoint and register its resources on the
    /// bus.
    pub fn new(cfg: &ServiceConfig, bus: Arc<dyn BusService>) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        let shutdown = CancellationToken::new();

        let mut endpoints = Vec::new();
        for (i, ep_cfg) in cfg.endpoints.iter().enumerate() {
            let ep = build_endpoint(
                &cfg.service_name,
                ep_cfg,
                bus.clone(),
                http.clone(),
                shutdown.child_token(),
            )
            .map_err(|e| Error::Config(format!("endpoint #{} is invalid: {}", i + 1, e)))?;
            endpoints.push(ep);
        }

        Ok(Service {
            endpoints,
            shutdown,
        })
    }

    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Stop all refresh timers. In-flight fetches race to completion.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn build_endpoint(
    service_name: &str,
    cfg: &EndpointConfig,
    bus: Arc<dyn BusService>,
    http: reqwest::Client,
    shutdown: CancellationToken,
) -> Result<Arc<Endpoint>> {
    if cfg.url.is_empty() {
        return Err(Error::Config("missing url".to_string()));
    }
    if cfg.resource.pattern.is_empty() {
        return Err(Error::Config("missing pattern".to_string()));
    }

    let url = UrlTemplate::parse(&cfg.url)?;

    let mut root = Node::new();
    let mut reset_patterns = Vec::new();
    let mut patterns = Vec::new();
    add_resource(
        &mut root,
        &mut reset_patterns,
        &mut patterns,
        service_name,
        url.params(),
        &cfg.resource,
        "",
        "",
    )?;

    let ep = Endpoint::new(
        url,
        Duration::from_millis(cfg.refresh_time),
        cfg.refresh_count,
        (cfg.timeout > 0).then(|| Duration::from_millis(cfg.timeout)),
        root,
        reset_patterns,
        patterns.clone(),
        bus.clone(),
        http,
        shutdown,
    )?;

    let opts = HandlerOpts { access: cfg.access };
    for pattern in &patterns {
        bus.register(pattern, ep.clone() as Arc<dyn GetHandler>, opts)?;
    }

    Ok(ep)
}

/// Recursively compile one resource-tree node and its children.
#[allow(clippy::too_many_arguments)]
fn add_resource(
    root: &mut Node,
    reset_patterns: &mut Vec<String>,
    patterns: &mut Vec<String>,
    service_name: &str,
    url_params: &[String],
    r: &ResourceConfig,
    parent_pattern: &str,
    parent_path: &str,
) -> Result<()> {
    // An absolute pattern overrides; otherwise the path segment extends the
    // parent's pattern.
    let pattern = if !r.pattern.is_empty() {
        r.pattern.clone()
    } else if !r.path.is_empty() {
        format!("{}.{}", parent_pattern, r.path)
    } else {
        parent_pattern.to_string()
    };

    let path = if r.path.is_empty() {
        parent_path.to_string()
    } else if parent_path.is_empty() {
        r.path.clone()
    } else {
        format!("{}.{}", parent_path, r.path)
    };

    let rid = if pattern.is_empty() {
        service_name.to_string()
    } else {
        format!("{}.{}", service_name, pattern)
    };

    root.add_path(&path, &rid, url_params, &r.kind, &r.id_prop)?;
    reset_patterns.push(reset_pattern(&rid, url_params));
    patterns.push(rid);

    for child in &r.resources {
        add_resource(
            root,
            reset_patterns,
            patterns,
            service_name,
            url_params,
            child,
            &pattern,
            &path,
        )?;
    }

    Ok(())
}
