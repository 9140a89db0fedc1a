//! Endpoint cache and refresher.
//!
//! Each configured endpoint owns a concurrent map from expanded origin URL
//! to its cached, decomposed response. A get-request miss fetches and
//! decomposes the origin document, caches it, and arms the refresh timer;
//! every refresh cycle re-fetches, diffs against the cached resources and
//! emits the resulting events. After `refresh_count` cycles, or as soon as
//! a cycle observes a sticky error, the URL entry is evicted and a
//! bus-level reset invalidates every resource id the URL could have
//! produced.
//!
//! All work on one URL's cached response runs inside that URL's group lock;
//! the URL map itself uses a readers-writer lock with fetches kept outside.

use crate::bus::group::GroupLocks;
use crate::bus::{BusService, GetHandler, GetRequest, GetResult, ResourceEvent};
use crate::diff::{diff_collection, diff_model, CollectionEvent};
use crate::error::{ResError, Result};
use crate::resource::CachedResource;
use crate::schema::{Node, PatternIndex};
use crate::traverse::traverse;
use crate::url::UrlTemplate;
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Cached state for one expanded URL.
///
/// Mutated only inside the URL's group lock. `reloads` increments once per
/// refresh cycle between insertion and eviction; `err` is sticky until the
/// next cycle evicts the entry.
pub(crate) struct CachedResponse {
    pub(crate) req_params: HashMap<String, String>,
    pub(crate) reloads: u32,
    pub(crate) resources: HashMap<String, CachedResource>,
    pub(crate) err: Option<ResError>,
}

pub(crate) struct Endpoint {
    url: UrlTemplate,
    refresh_time: Duration,
    refresh_count: u32,
    timeout: Option<Duration>,
    /// Schema trie root; read-only after registration.
    root: Node,
    reset_patterns: Vec<String>,
    /// Index of the endpoint's registered patterns, for the emit-time
    /// ownership check.
    owned: PatternIndex<()>,
    cached_urls: RwLock<HashMap<String, Arc<Mutex<CachedResponse>>>>,
    groups: GroupLocks,
    bus: Arc<dyn BusService>,
    http: reqwest::Client,
    shutdown: CancellationToken,
    weak: Weak<Endpoint>,
}

impl Endpoint {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        url: UrlTemplate,
        refresh_time: Duration,
        refresh_count: u32,
        timeout: Option<Duration>,
        root: Node,
        reset_patterns: Vec<String>,
        patterns: Vec<String>,
        bus: Arc<dyn BusService>,
        http: reqwest::Client,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>> {
        let mut owned = PatternIndex::new();
        for pattern in &patterns {
            owned.add(pattern, ())?;
        }
        Ok(Arc::new_cyclic(|weak| Endpoint {
            url,
            refresh_time,
            refresh_count,
            timeout,
            root,
            reset_patterns,
            owned,
            cached_urls: RwLock::new(HashMap::new()),
            groups: GroupLocks::new(),
            bus,
            http,
            shutdown,
            weak: weak.clone(),
        }))
    }

    /// Fetch, decompose and insert a URL, then arm its refresh timer.
    ///
    /// The group lock acts as a single-flight barrier: concurrent misses on
    /// the same URL line up behind the first fetch and find the entry on
    /// their re-check.
    async fn cache_url(
        &self,
        url: &str,
        req_params: HashMap<String, String>,
    ) -> Arc<Mutex<CachedResponse>> {
        let _guard = self.groups.lock(url).await;
        if let Some(entry) = self.cached_urls.read().get(url) {
            return entry.clone();
        }

        let cresp = Arc::new(Mutex::new(self.get_url(url, req_params).await));
        self.cached_urls.write().insert(url.to_string(), cresp.clone());
        self.arm(url);
        cresp
    }

    /// One HTTP fetch plus decomposition. Any failure is recorded as the
    /// entry's sticky error.
    async fn get_url(&self, url: &str, req_params: HashMap<String, String>) -> CachedResponse {
        let mut cresp = CachedResponse {
            req_params,
            reloads: 0,
            resources: HashMap::new(),
            err: None,
        };

        let resp = match self.http.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("error fetching endpoint {}: {}", url, e);
                cresp.err = Some(ResError::internal(e.to_string()));
                return cresp;
            }
        };

        let status = resp.status();
        if status.as_u16() == 404 {
            cresp.err = Some(ResError::not_found());
            return cresp;
        }
        if !status.is_success() {
            cresp.err = Some(ResError::internal(format!(
                "unexpected response code: {}",
                status.as_u16()
            )));
            return cresp;
        }

        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => {
                cresp.err = Some(ResError::internal(e.to_string()));
                return cresp;
            }
        };
        let v: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                cresp.err = Some(ResError::internal(e.to_string()));
                return cresp;
            }
        };

        match traverse(&self.root, &v, &cresp.req_params) {
            Ok(resources) => cresp.resources = resources,
            Err(e) => {
                cresp.err = Some(ResError::internal(format!(
                    "invalid data structure for {}: {}",
                    url, e
                )));
            }
        }
        cresp
    }

    /// Schedule the next refresh cycle for a URL.
    fn arm(&self, url: &str) {
        let Some(ep) = self.weak.upgrade() else { return };
        let url = url.to_string();
        let delay = self.refresh_time;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => ep.handle_refresh(&url).await,
            }
        });
    }

    /// One refresh cycle for a URL: evict-and-reset when the entry has a
    /// sticky error or has exhausted its refresh budget, otherwise
    /// re-fetch, diff and emit.
    pub(crate) async fn handle_refresh(&self, url: &str) {
        debug!("refreshing {}", url);

        let entry = { self.cached_urls.read().get(url).cloned() };
        let Some(entry) = entry else {
            warn!("url {} not found in cache on refresh", url);
            return;
        };

        let guard = self.groups.lock(url).await;

        let (req_params, evict) = {
            let mut cresp = entry.lock();
            cresp.reloads += 1;
            let evict = cresp.err.is_some() || cresp.reloads > self.refresh_count;
            (cresp.req_params.clone(), evict)
        };

        if evict {
            self.cached_urls.write().remove(url);

            let resources: Vec<String> = self
                .reset_patterns
                .iter()
                .map(|rp| {
                    let mut rp = rp.clone();
                    for param in self.url.params() {
                        if let Some(v) = req_params.get(param) {
                            rp = rp.replacen(&format!("${{{}}}", param), v, 1);
                        }
                    }
                    rp
                })
                .collect();
            if let Err(e) = self.bus.reset(resources).await {
                error!("reset after evicting {} failed: {}", url, e);
            }

            drop(guard);
            self.groups.remove_idle(url);
            return;
        }

        let ncresp = self.get_url(url, req_params).await;
        if let Some(err) = &ncresp.err {
            warn!("error refreshing url {}: {}", url, err.message);
            self.arm(url);
            return;
        }

        // Diff every id present in both decompositions. Ids only in the old
        // set are dropped without delete events; subscribers learn of them
        // at the eventual reset.
        let mut events = Vec::new();
        {
            let mut cresp = entry.lock();
            for (rid, nv) in &ncresp.resources {
                let Some(ov) = cresp.resources.remove(rid) else {
                    continue;
                };
                if self.owned.lookup(rid).is_none() {
                    panic!("no registered pattern matches resource {}", rid);
                }
                match (&ov, nv) {
                    (CachedResource::Model(a), CachedResource::Model(b)) => {
                        let ch = diff_model(a, b);
                        if !ch.is_empty() {
                            events.push(ResourceEvent::Change {
                                rid: rid.clone(),
                                values: ch,
                            });
                        }
                    }
                    (CachedResource::Collection(a), CachedResource::Collection(b)) => {
                        for ev in diff_collection(a, b) {
                            events.push(match ev {
                                CollectionEvent::Remove { idx } => ResourceEvent::Remove {
                                    rid: rid.clone(),
                                    idx,
                                },
                                CollectionEvent::Add { value, idx } => ResourceEvent::Add {
                                    rid: rid.clone(),
                                    value,
                                    idx,
                                },
                            });
                        }
                    }
                    // A node's kind never changes between refreshes.
                    _ => {}
                }
            }
            cresp.resources = ncresp.resources;
        }

        for event in events {
            if let Err(e) = self.bus.emit(event).await {
                error!("event emit for {} failed: {}", url, e);
            }
        }

        self.arm(url);
    }

    #[cfg(test)]
    pub(crate) fn cached(&self, url: &str) -> Option<Arc<Mutex<CachedResponse>>> {
        self.cached_urls.read().get(url).cloned()
    }
}

#[async_trait]
impl GetHandler for Endpoint {
    async fn get(&self, req: GetRequest) -> GetResult {
        let url = self.url.expand(req.params());

        let entry = { self.cached_urls.read().get(&url).cloned() };
        let entry = match entry {
            Some(entry) => entry,
            None => {
                if let Some(t) = self.timeout {
                    req.extend_timeout(t);
                }
                self.cache_url(&url, req.params().clone()).await
            }
        };

        let cresp = entry.lock();
        if let Some(err) = &cresp.err {
            return GetResult::Error(err.clone());
        }
        match cresp.resources.get(req.rid()) {
            Some(CachedResource::Model(m)) => GetResult::Model(m.clone()),
            Some(CachedResource::Collection(c)) => GetResult::Collection(c.clone()),
            None => GetResult::Error(ResError::not_found()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::diff::ChangeValue;
    use crate::resource::ResourceValue;
    use crate::schema::reset_pattern;
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn serve_origin(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn prim(s: &str) -> ResourceValue {
        ResourceValue::Primitive(serde_json::from_str(s).unwrap())
    }

    /// Single-model endpoint at `/stations/${stationId}`, with refresh
    /// timers effectively disabled so tests drive cycles manually.
    fn station_endpoint(
        bus: Arc<dyn BusService>,
        origin: &SocketAddr,
        refresh_count: u32,
        timeout: Option<Duration>,
    ) -> Arc<Endpoint> {
        let url =
            UrlTemplate::parse(&format!("http://{}/stations/${{stationId}}", origin)).unwrap();
        let up = vec!["stationId".to_string()];
        let mut root = Node::new();
        root.add_path("", "svc.stations.$stationId", &up, "model", "")
            .unwrap();
        Endpoint::new(
            url,
            Duration::from_secs(3600),
            refresh_count,
            timeout,
            root,
            vec![reset_pattern("svc.stations.$stationId", &up)],
            vec!["svc.stations.$stationId".to_string()],
            bus,
            reqwest::Client::new(),
            CancellationToken::new(),
        )
        .unwrap()
    }

    /// Origin answering `{"v": <hit count>}`, so every fetch differs.
    fn counting_origin(hits: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            "/stations/:id",
            get(move || {
                let hits = hits.clone();
                async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    format!(r#"{{"v":{}}}"#, n)
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_get_miss_fetches_then_hits_cache() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = serve_origin(counting_origin(hits.clone())).await;
        let bus = MockBus::new();
        let ep = station_endpoint(bus.clone(), &addr, 2, None);

        let res = ep
            .get(GetRequest::new(
                "svc.stations.77",
                params(&[("stationId", "77")]),
            ))
            .await;
        assert_eq!(
            res,
            GetResult::Model(HashMap::from([("v".to_string(), prim("1"))]))
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Second request answers from the cache.
        let res = ep
            .get(GetRequest::new(
                "svc.stations.77",
                params(&[("stationId", "77")]),
            ))
            .await;
        assert_eq!(
            res,
            GetResult::Model(HashMap::from([("v".to_string(), prim("1"))]))
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_rid_in_cached_url() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = serve_origin(counting_origin(hits)).await;
        let bus = MockBus::new();
        let ep = station_endpoint(bus.clone(), &addr, 2, None);

        let res = ep
            .get(GetRequest::new(
                "svc.stations.77.unknown",
                params(&[("stationId", "77")]),
            ))
            .await;
        assert_eq!(res, GetResult::Error(ResError::not_found()));
        // The URL entry itself is retained.
        let url = format!("http://{}/stations/77", addr);
        assert!(ep.cached(&url).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let app = Router::new().route(
            "/stations/:id",
            get(move || {
                let hits = h.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    r#"{"v":1}"#.to_string()
                }
            }),
        );
        let addr = serve_origin(app).await;
        let bus = MockBus::new();
        let ep = station_endpoint(bus.clone(), &addr, 2, None);

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let ep = ep.clone();
            tasks.push(tokio::spawn(async move {
                ep.get(GetRequest::new(
                    "svc.stations.77",
                    params(&[("stationId", "77")]),
                ))
                .await
            }));
        }
        for t in tasks {
            assert!(matches!(t.await.unwrap(), GetResult::Model(_)));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_emits_changes_then_evicts() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = serve_origin(counting_origin(hits.clone())).await;
        let bus = MockBus::new();
        let ep = station_endpoint(bus.clone(), &addr, 2, None);
        let url = format!("http://{}/stations/77", addr);

        ep.get(GetRequest::new(
            "svc.stations.77",
            params(&[("stationId", "77")]),
        ))
        .await;

        // Two refresh cycles within the budget emit change events.
        ep.handle_refresh(&url).await;
        ep.handle_refresh(&url).await;
        assert_eq!(ep.cached(&url).unwrap().lock().reloads, 2);
        {
            let events = bus.events.lock();
            assert_eq!(events.len(), 2);
            for (i, ev) in events.iter().enumerate() {
                let ResourceEvent::Change { rid, values } = ev else {
                    panic!("expected change event, got {:?}", ev);
                };
                assert_eq!(rid, "svc.stations.77");
                let expected = (i + 2).to_string();
                assert_eq!(values["v"], ChangeValue::Value(prim(&expected)));
            }
        }

        // The third cycle exhausts the budget: evict and reset.
        ep.handle_refresh(&url).await;
        assert!(ep.cached(&url).is_none());
        assert_eq!(
            *bus.resets.lock(),
            vec![vec!["svc.stations.77".to_string()]]
        );
        assert_eq!(bus.events.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_origin_404_is_sticky_then_resets() {
        // No route registered: every fetch is a 404.
        let addr = serve_origin(Router::new()).await;
        let bus = MockBus::new();
        let ep = station_endpoint(bus.clone(), &addr, 2, None);
        let url = format!("http://{}/stations/77", addr);

        let res = ep
            .get(GetRequest::new(
                "svc.stations.77",
                params(&[("stationId", "77")]),
            ))
            .await;
        assert_eq!(res, GetResult::Error(ResError::not_found()));

        // The errored entry is cached; the next cycle evicts and resets.
        assert!(ep.cached(&url).is_some());
        ep.handle_refresh(&url).await;
        assert!(ep.cached(&url).is_none());
        assert_eq!(
            *bus.resets.lock(),
            vec![vec!["svc.stations.77".to_string()]]
        );
        assert!(bus.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_non_2xx_is_internal_error() {
        let app = Router::new().route(
            "/stations/:id",
            get(|| async { (axum::http::StatusCode::BAD_GATEWAY, "boom") }),
        );
        let addr = serve_origin(app).await;
        let bus = MockBus::new();
        let ep = station_endpoint(bus.clone(), &addr, 2, None);

        let res = ep
            .get(GetRequest::new(
                "svc.stations.77",
                params(&[("stationId", "77")]),
            ))
            .await;
        let GetResult::Error(err) = res else { panic!() };
        assert_eq!(err.code, ResError::INTERNAL_ERROR);
        assert!(err.message.contains("502"));
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_internal_error() {
        let app = Router::new().route("/stations/:id", get(|| async { "[1,2]" }));
        let addr = serve_origin(app).await;
        let bus = MockBus::new();
        let ep = station_endpoint(bus.clone(), &addr, 2, None);

        let res = ep
            .get(GetRequest::new(
                "svc.stations.77",
                params(&[("stationId", "77")]),
            ))
            .await;
        let GetResult::Error(err) = res else { panic!() };
        assert_eq!(err.code, ResError::INTERNAL_ERROR);
        assert!(err.message.contains("invalid data structure"));
    }

    #[tokio::test]
    async fn test_cold_read_extends_timeout() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = serve_origin(counting_origin(hits)).await;
        let bus = MockBus::new();
        let ep = station_endpoint(bus.clone(), &addr, 2, Some(Duration::from_millis(2500)));

        let extensions = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let ext = extensions.clone();
        let req = GetRequest::new("svc.stations.77", params(&[("stationId", "77")]))
            .with_timeout_ext(move |d| ext.lock().push(d));
        ep.get(req).await;
        assert_eq!(*extensions.lock(), vec![Duration::from_millis(2500)]);

        // Warm reads answer directly and ask for no extension.
        let ext = extensions.clone();
        let req = GetRequest::new("svc.stations.77", params(&[("stationId", "77")]))
            .with_timeout_ext(move |d| ext.lock().push(d));
        ep.get(req).await;
        assert_eq!(extensions.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_fetch_error_keeps_entry() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        // First response is valid, later ones are 500s.
        let app = Router::new().route(
            "/stations/:id",
            get(move || {
                let hits = h.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (axum::http::StatusCode::OK, r#"{"v":1}"#.to_string())
                    } else {
                        (axum::http::StatusCode::INTERNAL_SERVER_ERROR, String::new())
                    }
                }
            }),
        );
        let addr = serve_origin(app).await;
        let bus = MockBus::new();
        let ep = station_endpoint(bus.clone(), &addr, 5, None);
        let url = format!("http://{}/stations/77", addr);

        ep.get(GetRequest::new(
            "svc.stations.77",
            params(&[("stationId", "77")]),
        ))
        .await;

        // The failed fetch leaves the prior decomposition intact.
        ep.handle_refresh(&url).await;
        assert!(ep.cached(&url).is_some());
        assert!(bus.events.lock().is_empty());
        assert!(bus.resets.lock().is_empty());

        let res = ep
            .get(GetRequest::new(
                "svc.stations.77",
                params(&[("stationId", "77")]),
            ))
            .await;
        assert_eq!(
            res,
            GetResult::Model(HashMap::from([("v".to_string(), prim("1"))]))
        );
    }
}
