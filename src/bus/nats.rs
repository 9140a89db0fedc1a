//! RES-over-NATS bus adapter.
//!
//! Thin wire layer between the core and a NATS server speaking the RES
//! service protocol: get and access requests arrive on
//! `get.<rid>` / `access.<rid>` subjects, responses are JSON
//! `{"result": …}` / `{"error": …}` payloads on the reply subject, events
//! are published to `event.<rid>.<name>`, and cache invalidation goes out
//! as a `system.reset`. Request routing reuses the same literal-first
//! pattern matching as the schema trie.

use super::{AccessPolicy, BusService, GetHandler, GetRequest, GetResult, HandlerOpts, ResourceEvent};
use crate::error::{Error, ResError, Result};
use crate::schema::PatternIndex;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::RwLock;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

struct Registration {
    handler: Arc<dyn GetHandler>,
    access: AccessPolicy,
}

/// A [`BusService`] backed by a NATS connection.
///
/// Handlers are registered before [`NatsBus::serve`] connects; afterwards
/// the serve loop dispatches each incoming request on its own task.
pub struct NatsBus {
    router: RwLock<PatternIndex<Registration>>,
    client: OnceLock<async_nats::Client>,
}

impl NatsBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(NatsBus {
            router: RwLock::new(PatternIndex::new()),
            client: OnceLock::new(),
        })
    }

    fn client(&self) -> Result<&async_nats::Client> {
        self.client
            .get()
            .ok_or_else(|| Error::Bus("not connected".to_string()))
    }

    /// Connect and serve requests until `shutdown` is cancelled or the
    /// connection closes.
    pub async fn serve(
        self: Arc<Self>,
        nats_url: String,
        service_name: String,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let client = async_nats::connect(nats_url.as_str())
            .await
            .map_err(|e| Error::Bus(e.to_string()))?;
        self.client
            .set(client.clone())
            .map_err(|_| Error::Bus("already serving".to_string()))?;

        // `get.<name>` catches the bare service resource; `get.<name>.>`
        // everything below it.
        let mut subs = Vec::new();
        for prefix in ["get", "access"] {
            for subject in [
                format!("{}.{}", prefix, service_name),
                format!("{}.{}.>", prefix, service_name),
            ] {
                subs.push(
                    client
                        .subscribe(subject)
                        .await
                        .map_err(|e| Error::Bus(e.to_string()))?,
                );
            }
        }
        let mut requests = futures::stream::select_all(subs);
        debug!("serving {} on {}", service_name, nats_url);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                msg = requests.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    let bus = self.clone();
                    tokio::spawn(async move { bus.dispatch(msg).await });
                }
            }
        }
    }

    /// Flush outstanding publishes before the connection is dropped.
    pub async fn shutdown(&self) {
        if let Some(client) = self.client.get() {
            if let Err(e) = client.flush().await {
                warn!("flush on shutdown failed: {}", e);
            }
        }
    }

    async fn dispatch(&self, msg: async_nats::Message) {
        let subject: &str = msg.subject.as_ref();
        if let Some(rid) = subject.strip_prefix("get.") {
            self.handle_get(rid, msg.reply).await;
        } else if let Some(rid) = subject.strip_prefix("access.") {
            self.handle_access(rid, msg.reply).await;
        }
    }

    async fn handle_get(&self, rid: &str, reply: Option<async_nats::Subject>) {
        let Some(reply) = reply else { return };

        let routed = {
            let router = self.router.read();
            router
                .lookup(rid)
                .map(|(reg, params)| (reg.handler.clone(), params))
        };
        let Some((handler, params)) = routed else {
            self.respond(reply, json!({"error": ResError::not_found()}))
                .await;
            return;
        };

        let req = {
            let client = self.client().ok().cloned();
            let timeout_reply = reply.clone();
            GetRequest::new(rid, params).with_timeout_ext(move |d| {
                // RES pre-response asking the gateway for more time.
                let Some(client) = client.clone() else { return };
                let reply = timeout_reply.clone();
                let payload = Bytes::from(format!("timeout:\"{}\"", d.as_millis()));
                tokio::spawn(async move {
                    let _ = client.publish(reply, payload).await;
                });
            })
        };

        let payload = match handler.get(req).await {
            GetResult::Model(model) => json!({"result": {"model": model}}),
            GetResult::Collection(collection) => {
                json!({"result": {"collection": collection}})
            }
            GetResult::Error(err) => json!({"error": err}),
        };
        self.respond(reply, payload).await;
    }

    async fn handle_access(&self, rid: &str, reply: Option<async_nats::Subject>) {
        let Some(reply) = reply else { return };

        let access = {
            let router = self.router.read();
            router.lookup(rid).map(|(reg, _)| reg.access)
        };
        // Delegated access stays unanswered for an external service.
        if access == Some(AccessPolicy::Granted) {
            self.respond(reply, json!({"result": {"get": true}})).await;
        }
    }

    async fn respond(&self, reply: async_nats::Subject, payload: serde_json::Value) {
        let Ok(client) = self.client() else { return };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                error!("failed to encode response: {}", e);
                return;
            }
        };
        if let Err(e) = client.publish(reply, Bytes::from(body)).await {
            warn!("failed to publish response: {}", e);
        }
    }
}

#[async_trait]
impl BusService for NatsBus {
    fn register(
        &self,
        pattern: &str,
        handler: Arc<dyn GetHandler>,
        opts: HandlerOpts,
    ) -> Result<()> {
        self.router.write().add(
            pattern,
            Registration {
                handler,
                access: opts.access,
            },
        )
    }

    async fn emit(&self, event: ResourceEvent) -> Result<()> {
        let client = self.client()?;
        let (subject, payload) = match event {
            ResourceEvent::Change { rid, values } => {
                (format!("event.{}.change", rid), json!({"values": values}))
            }
            ResourceEvent::Add { rid, value, idx } => (
                format!("event.{}.add", rid),
                json!({"value": value, "idx": idx}),
            ),
            ResourceEvent::Remove { rid, idx } => {
                (format!("event.{}.remove", rid), json!({"idx": idx}))
            }
        };
        let body = serde_json::to_vec(&payload)?;
        client
            .publish(subject, Bytes::from(body))
            .await
            .map_err(|e| Error::Bus(e.to_string()))
    }

    async fn reset(&self, resources: Vec<String>) -> Result<()> {
        let client = self.client()?;
        let body = serde_json::to_vec(&json!({"resources": resources}))?;
        client
            .publish("system.reset".to_string(), Bytes::from(body))
            .await
            .map_err(|e| Error::Bus(e.to_string()))
    }
}
