//! # CastKit SW
//!
//! Offline-first caching agent for a web application's static assets.
//!
//! The agent intercepts network requests from controlled pages and resolves
//! them cache-first, falling back to the network and opportunistically
//! backfilling the cache. The application's entry page is the one
//! exception: it is resolved network-first so users see a fresh copy
//! whenever connectivity exists.
//!
//! ## Lifecycle
//!
//! - **Install**: provision a versioned cache store with the asset manifest
//! - **Activate**: claim all clients and delete stale cache versions
//! - **Fetch**: resolve each intercepted request against cache-or-network
//!
//! ## Architecture
//!
//! ```text
//! Registration
//!     └── OfflineAgent (AgentHooks: on_install / on_activate / on_fetch)
//!             ├── AgentConfig (prefix, version, manifest, entry pattern)
//!             ├── Arc<dyn NetworkFetcher>
//!             ├── Arc<RwLock<CacheStorage>>
//!             └── Arc<RwLock<Clients>>
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use castkit_cache::{now_millis, CacheEntry, CacheStorage};
use castkit_common::{CastError, Result};
use futures_util::future::try_join_all;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};
use url::Url;

// ==================== Identity ====================

/// Unique identifier for an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentId(u64);

impl AgentId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Initial state, configuration parsed.
    Parsed,
    /// Install event running (cache provisioning).
    Installing,
    /// Installed, cache fully provisioned.
    Installed,
    /// Activate event running (stale cache reclamation).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced or install failed; must not serve requests.
    Redundant,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::Parsed
    }
}

// ==================== URL Patterns ====================

/// URL pattern for selecting the entry page (or any URL class).
#[derive(Debug, Clone)]
pub struct UrlPattern {
    pattern_type: PatternType,
    pattern: String,
}

/// Type of URL pattern.
#[derive(Debug, Clone, Copy)]
pub enum PatternType {
    /// Exact URL match.
    Exact,
    /// Prefix match.
    Prefix,
    /// Suffix match (e.g., a landing path like "/cast/").
    Suffix,
    /// Contains substring.
    Contains,
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(url: &str) -> Self {
        Self {
            pattern_type: PatternType::Exact,
            pattern: url.to_string(),
        }
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            pattern_type: PatternType::Prefix,
            pattern: prefix.to_string(),
        }
    }

    /// Create a suffix match pattern.
    pub fn suffix(suffix: &str) -> Self {
        Self {
            pattern_type: PatternType::Suffix,
            pattern: suffix.to_string(),
        }
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self {
            pattern_type: PatternType::Contains,
            pattern: substring.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let url_str = url.as_str();
        match self.pattern_type {
            PatternType::Exact => url_str == self.pattern,
            PatternType::Prefix => url_str.starts_with(&self.pattern),
            PatternType::Suffix => url_str.ends_with(&self.pattern),
            PatternType::Contains => url_str.contains(&self.pattern),
        }
    }
}

// ==================== Configuration ====================

/// Immutable agent configuration, fixed at construction.
///
/// Changing the asset manifest requires bumping `cache_version` in the same
/// deployment; the version suffix is the only mechanism that forces
/// re-provisioning.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Cache name prefix, unique within the storage partition.
    pub cache_prefix: String,

    /// Version suffix appended to the prefix (e.g. "-v1").
    pub cache_version: String,

    /// Absolute paths of every static asset to pre-populate.
    pub asset_manifest: Vec<String>,

    /// Pattern selecting the entry page for network-first behavior.
    pub entry_page: UrlPattern,

    /// Origin the manifest paths resolve against.
    pub scope: Url,
}

impl AgentConfig {
    /// The current cache identity: prefix plus version suffix.
    pub fn cache_name(&self) -> String {
        format!("{}{}", self.cache_prefix, self.cache_version)
    }

    /// Resolve every manifest path against the scope origin.
    fn manifest_urls(&self) -> Result<Vec<Url>> {
        self.asset_manifest
            .iter()
            .map(|path| {
                self.scope.join(path).map_err(|e| {
                    CastError::InvalidArgument(format!("manifest path {path}: {e}"))
                })
            })
            .collect()
    }
}

// ==================== Requests & Responses ====================

/// How a fetch interacts with intermediate HTTP caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Normal HTTP caching semantics.
    #[default]
    Default,
    /// Bypass any intermediate HTTP cache entirely. Used when provisioning,
    /// so the stored copy always comes from the origin server.
    NoStore,
}

/// An intercepted (or synthesized) request.
///
/// A request is a stream: fetching consumes it. There is deliberately no
/// `Clone` impl; reuse requires an explicit [`Request::duplicate`] before
/// the original is handed to a fetcher.
#[derive(Debug, PartialEq, Eq)]
pub struct Request {
    /// Request URL.
    pub url: Url,

    /// Request method (effectively always GET).
    pub method: String,

    /// Request headers.
    pub headers: HashMap<String, String>,

    /// HTTP cache interaction mode.
    pub cache_mode: CacheMode,
}

impl Request {
    /// Create a GET request for a URL.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            headers: HashMap::new(),
            cache_mode: CacheMode::Default,
        }
    }

    /// Set the cache interaction mode.
    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    /// Create an independent copy of this request.
    pub fn duplicate(&self) -> Request {
        Request {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            cache_mode: self.cache_mode,
        }
    }
}

/// A response, from the network or the cache.
///
/// The body is a stream readable exactly once: [`Response::into_body`]
/// consumes the response. An independent copy for storing alongside the one
/// handed back to the page comes from [`Response::duplicate`].
#[derive(Debug)]
pub struct Response {
    /// URL the response was resolved for.
    pub url: String,

    /// HTTP status code.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Whether this response was served from the cache.
    pub from_cache: bool,

    body: Vec<u8>,
}

impl Response {
    /// Create a network response.
    pub fn new(url: &str, status: u16, body: Vec<u8>) -> Self {
        Self {
            url: url.to_string(),
            status,
            headers: HashMap::new(),
            from_cache: false,
            body,
        }
    }

    /// Rehydrate a response from a stored cache entry.
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            url: entry.url.clone(),
            status: entry.status,
            headers: entry.headers.clone(),
            from_cache: true,
            body: entry.body.clone(),
        }
    }

    /// Check if the status is a success (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Create an independent copy of this response.
    pub fn duplicate(&self) -> Response {
        Response {
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            from_cache: self.from_cache,
            body: self.body.clone(),
        }
    }

    /// Consume the response, yielding its body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Build the cache entry for a request/response pair, consuming the
/// response copy that goes into the store.
fn cache_entry(request: &Request, response: Response) -> CacheEntry {
    CacheEntry {
        url: request.url.as_str().to_string(),
        method: request.method.clone(),
        status: response.status,
        headers: response.headers.clone(),
        body: response.into_body(),
        cached_at: now_millis(),
    }
}

// ==================== Fetch Event ====================

/// One intercepted network access from a controlled page.
#[derive(Debug)]
pub struct FetchEvent {
    /// The intercepted request.
    pub request: Request,

    /// Id of the client that issued the request, if known.
    pub client_id: Option<String>,
}

impl FetchEvent {
    /// Create a fetch event for a request.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }

    /// Attach the issuing client id.
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

// ==================== Network Fetcher ====================

/// Network transport the agent replays requests through.
///
/// A fetch consumes its request; callers keep a [`Request::duplicate`] if
/// they need the request again afterwards. An `Err` means the fetch
/// rejected outright (offline, DNS failure) — a non-2xx status is still an
/// `Ok` response.
#[async_trait]
pub trait NetworkFetcher: Send + Sync {
    /// Perform a single network fetch. No retry, no agent-level timeout.
    async fn fetch(&self, request: Request) -> Result<Response>;
}

// ==================== Clients ====================

/// A controlled page.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client id.
    pub id: String,

    /// Page URL.
    pub url: Url,

    /// Agent currently controlling this page, if any.
    pub controller: Option<AgentId>,
}

impl Client {
    /// Create an uncontrolled client.
    pub fn new(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            controller: None,
        }
    }
}

/// The set of pages within the agent's scope.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create an empty client set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by id.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Number of known clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether there are no known clients.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Claim every current client for the given agent, including pages
    /// opened under a previous agent version.
    pub fn claim(&mut self, controller: AgentId) {
        for client in self.clients.values_mut() {
            client.controller = Some(controller);
        }
    }
}

// ==================== Agent Hooks ====================

/// The three lifecycle events the host runtime dispatches into the agent.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Install: provision the versioned cache with the asset manifest.
    async fn on_install(&self) -> Result<()>;

    /// Activate: claim clients and reclaim stale cache versions.
    async fn on_activate(&self) -> Result<()>;

    /// Fetch: resolve one intercepted request. `None` means nothing was
    /// retrievable; the host surfaces that as a failed resource load.
    async fn on_fetch(&self, event: FetchEvent) -> Option<Response>;
}

// ==================== Offline Agent ====================

/// The offline caching agent: one instance per installed version, holding
/// immutable configuration and shared handles to the platform's cache
/// storage and client set.
pub struct OfflineAgent {
    id: AgentId,
    config: AgentConfig,
    fetcher: Arc<dyn NetworkFetcher>,
    caches: Arc<RwLock<CacheStorage>>,
    clients: Arc<RwLock<Clients>>,
    state: std::sync::RwLock<AgentState>,
    skip_waiting: AtomicBool,
}

impl OfflineAgent {
    /// Create a new agent over shared cache storage and clients.
    pub fn new(
        config: AgentConfig,
        fetcher: Arc<dyn NetworkFetcher>,
        caches: Arc<RwLock<CacheStorage>>,
        clients: Arc<RwLock<Clients>>,
    ) -> Self {
        Self {
            id: AgentId::new(),
            config,
            fetcher,
            caches,
            clients,
            state: std::sync::RwLock::new(AgentState::Parsed),
            skip_waiting: AtomicBool::new(false),
        }
    }

    /// This agent's id.
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// The agent configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AgentState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_state(&self, state: AgentState) {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        debug!(agent = ?self.id, from = ?*guard, to = ?state, "state change");
        *guard = state;
    }

    /// Ask the host to skip the waiting phase so this version activates as
    /// soon as installation finishes.
    pub fn request_skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::Relaxed);
    }

    /// Whether skip-waiting has been requested.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Relaxed)
    }

    /// Fetch one manifest asset from the origin (bypassing intermediate
    /// HTTP caches) and insert it into the current cache store.
    async fn provision_asset(&self, url: Url) -> Result<()> {
        let request = Request::get(url).with_cache_mode(CacheMode::NoStore);
        let url_str = request.url.as_str().to_string();

        let response = self
            .fetcher
            .fetch(request.duplicate())
            .await
            .map_err(|e| CastError::install(format!("{url_str}: {e}")))?;

        if !response.is_success() {
            return Err(CastError::install(format!(
                "{url_str} returned {}",
                response.status
            )));
        }

        let entry = cache_entry(&request, response);
        let mut caches = self.caches.write().await;
        caches.open(&self.config.cache_name()).put(&url_str, entry);
        Ok(())
    }

    /// Cache lookup with network fallback and best-effort backfill.
    ///
    /// A stored entry is returned as-is, with no freshness check: the cache
    /// store ignores cache-control directives and this deliberately does
    /// not emulate them. On a miss, a single network attempt is made with a
    /// duplicate of the original request; only an exactly-200 response is
    /// stored back (self-healing for assets missing from the manifest).
    async fn cache_match(&self, request: Request) -> Option<Response> {
        let cache_name = self.config.cache_name();

        // Lookups take the read lock so resolutions of different keys stay
        // independent; only a backfill needs the write path.
        {
            let caches = self.caches.read().await;
            if let Some(cache) = caches.get(&cache_name) {
                if let Some(entry) = cache.match_url(request.url.as_str()) {
                    trace!(url = %request.url, "cache hit");
                    return Some(Response::from_entry(entry));
                }
            }
        }

        match self.fetcher.fetch(request.duplicate()).await {
            Ok(response) => {
                if response.status == 200 {
                    debug!(url = %request.url, "cache miss, backfilling from network");
                    let entry = cache_entry(&request, response.duplicate());
                    let mut caches = self.caches.write().await;
                    caches.open(&cache_name).put(request.url.as_str(), entry);
                } else {
                    debug!(url = %request.url, status = response.status, "cache miss, relaying uncached");
                }
                Some(response)
            }
            Err(err) => {
                // Not in the cache and not reachable over the network.
                warn!(url = %request.url, error = %err, "resource unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl AgentHooks for OfflineAgent {
    async fn on_install(&self) -> Result<()> {
        self.request_skip_waiting();

        let urls = self.config.manifest_urls()?;
        info!(
            cache = %self.config.cache_name(),
            assets = urls.len(),
            "provisioning cache"
        );

        // The store must exist even before the first insertion lands.
        self.caches.write().await.open(&self.config.cache_name());

        // All insertions run together; any failure fails the whole install
        // so a half-populated cache never goes live silently.
        try_join_all(urls.into_iter().map(|url| self.provision_asset(url))).await?;
        Ok(())
    }

    async fn on_activate(&self) -> Result<()> {
        self.clients.write().await.claim(self.id);

        let current = self.config.cache_name();
        let mut caches = self.caches.write().await;
        let stale: Vec<String> = caches
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(&self.config.cache_prefix) && *key != current)
            .collect();

        for key in stale {
            if !caches.delete(&key) {
                return Err(CastError::activate(format!("could not delete {key}")));
            }
            info!(cache = %key, "reclaimed stale cache store");
        }
        Ok(())
    }

    async fn on_fetch(&self, event: FetchEvent) -> Option<Response> {
        let FetchEvent { request, client_id } = event;
        let client = client_id.as_deref().unwrap_or("-");
        trace!(url = %request.url, client, "intercepted fetch");

        // The entry page is served network-first: any response, success or
        // not, beats a cached copy. The cache is only for offline.
        if self.config.entry_page.matches(&request.url) {
            debug!(url = %request.url, client, "entry page, trying network first");
            return match self.fetcher.fetch(request.duplicate()).await {
                Ok(response) => Some(response),
                Err(err) => {
                    debug!(url = %request.url, error = %err, "network rejected, using cache");
                    self.cache_match(request).await
                }
            };
        }

        self.cache_match(request).await
    }
}

// ==================== Registration ====================

/// Drives one agent version through its lifecycle, mirroring the host
/// runtime's install/activate transitions.
pub struct Registration {
    agent: Arc<OfflineAgent>,
}

impl Registration {
    /// Create a registration for an agent.
    pub fn new(agent: Arc<OfflineAgent>) -> Self {
        Self { agent }
    }

    /// The registered agent.
    pub fn agent(&self) -> &Arc<OfflineAgent> {
        &self.agent
    }

    /// Run the install phase. Installation is complete only once every
    /// manifest insertion has finished; on failure the version is marked
    /// redundant and never promoted. Because the agent requests
    /// skip-waiting, a successful install proceeds straight to activation.
    pub async fn install(&self) -> Result<()> {
        self.agent.set_state(AgentState::Installing);
        match self.agent.on_install().await {
            Ok(()) => {
                self.agent.set_state(AgentState::Installed);
                if self.agent.skip_waiting_requested() {
                    self.activate().await?;
                }
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "install failed, marking agent redundant");
                self.agent.set_state(AgentState::Redundant);
                Err(err)
            }
        }
    }

    /// Run the activate phase. Activation completes only after the stale
    /// cache sweep finishes; on failure the agent drops back to Installed
    /// so the host may retry.
    pub async fn activate(&self) -> Result<()> {
        self.agent.set_state(AgentState::Activating);
        match self.agent.on_activate().await {
            Ok(()) => {
                self.agent.set_state(AgentState::Activated);
                info!(agent = ?self.agent.id(), "agent activated");
                Ok(())
            }
            Err(err) => {
                self.agent.set_state(AgentState::Installed);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AgentConfig {
        AgentConfig {
            cache_prefix: "smooh-cast-static-cache".to_string(),
            cache_version: "-v1".to_string(),
            asset_manifest: vec!["/cast/".to_string(), "/favicon.ico".to_string()],
            entry_page: UrlPattern::suffix("/cast/"),
            scope: Url::parse("https://smooh.example").unwrap(),
        }
    }

    #[test]
    fn test_cache_name() {
        assert_eq!(test_config().cache_name(), "smooh-cast-static-cache-v1");
    }

    #[test]
    fn test_manifest_urls_resolve_against_scope() {
        let urls = test_config().manifest_urls().unwrap();
        assert_eq!(urls[0].as_str(), "https://smooh.example/cast/");
        assert_eq!(urls[1].as_str(), "https://smooh.example/favicon.ico");
    }

    #[test]
    fn test_url_pattern_matching() {
        let entry = Url::parse("https://smooh.example/cast/").unwrap();
        let asset = Url::parse("https://smooh.example/Scripts/main.js").unwrap();

        assert!(UrlPattern::suffix("/cast/").matches(&entry));
        assert!(!UrlPattern::suffix("/cast/").matches(&asset));

        assert!(UrlPattern::exact("https://smooh.example/cast/").matches(&entry));
        assert!(UrlPattern::prefix("https://smooh.example/").matches(&asset));
        assert!(UrlPattern::contains("/Scripts/").matches(&asset));
    }

    #[test]
    fn test_request_duplicate_is_independent() {
        let url = Url::parse("https://smooh.example/favicon.ico").unwrap();
        let original = Request::get(url).with_cache_mode(CacheMode::NoStore);

        let mut copy = original.duplicate();
        copy.headers.insert("x-test".to_string(), "1".to_string());

        assert_eq!(original.cache_mode, CacheMode::NoStore);
        assert!(original.headers.is_empty());
        assert_eq!(copy.headers.len(), 1);
    }

    #[test]
    fn test_response_duplicate_and_into_body() {
        let response = Response::new("https://smooh.example/a.js", 200, b"body".to_vec());
        let copy = response.duplicate();

        assert_eq!(response.into_body(), b"body");
        assert_eq!(copy.into_body(), b"body");
    }

    #[test]
    fn test_response_from_entry_marks_cache_origin() {
        let request = Request::get(Url::parse("https://smooh.example/a.js").unwrap());
        let entry = cache_entry(&request, Response::new("https://smooh.example/a.js", 200, b"x".to_vec()));

        let response = Response::from_entry(&entry);
        assert!(response.from_cache);
        assert_eq!(response.status, 200);
        assert_eq!(response.url, "https://smooh.example/a.js");
    }

    #[test]
    fn test_non_success_statuses() {
        assert!(Response::new("u", 204, vec![]).is_success());
        assert!(!Response::new("u", 301, vec![]).is_success());
        assert!(!Response::new("u", 404, vec![]).is_success());
    }

    #[test]
    fn test_fetch_event_carries_client_id() {
        let url = Url::parse("https://smooh.example/favicon.ico").unwrap();
        let event = FetchEvent::new(Request::get(url)).with_client("page-1");
        assert_eq!(event.client_id.as_deref(), Some("page-1"));
    }

    #[test]
    fn test_clients_claim() {
        let mut clients = Clients::new();
        let url = Url::parse("https://smooh.example/cast/").unwrap();
        clients.add(Client::new("page-1", url.clone()));
        clients.add(Client::new("page-2", url));

        assert!(clients.get("page-1").unwrap().controller.is_none());

        let id = AgentId::new();
        clients.claim(id);

        assert_eq!(clients.get("page-1").unwrap().controller, Some(id));
        assert_eq!(clients.get("page-2").unwrap().controller, Some(id));
        assert_eq!(clients.len(), 2);
    }

    #[test]
    fn test_agent_ids_unique() {
        assert_ne!(AgentId::new(), AgentId::new());
    }

    #[test]
    fn test_default_state_is_parsed() {
        assert_eq!(AgentState::default(), AgentState::Parsed);
    }
}
