// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Context registry: session ids handed to web clients, each owning one
//! bound [`MetricSource`].
//!
//! # Lifecycle
//!
//! - [`ContextRegistry::create_context`] binds a source and allocates a
//!   random id with a sliding expiry.
//! - [`ContextRegistry::bind_permanent`] registers a source that never expires.
//! - [`ContextRegistry::resolve`] hands out the session and pushes its expiry.
//! - [`ContextRegistry::gc`] drops sessions whose expiry passed.
//!
//! The table lock is held only for insert, refresh and erase. Sessions are
//! handed out as `Arc<Mutex<Session>>`, so a sweep that erases an entry never
//! pulls the source out from under a request already holding it: the source
//! is released when the last handle goes away.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result, SessionId};
use crate::source::{
    Connector, Descriptor, InDomId, InstanceId, MetricId, MetricSource, SourceSpec, TextKind,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Realm prefix reported in authentication challenges.
pub const DEFAULT_REALM_PREFIX: &str = "/pmapi";

/// User/password pair.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-session lookup caches, keyed by backend-assigned ids.
#[derive(Debug, Default)]
struct SessionCache {
    names: HashMap<String, MetricId>,
    ids: HashMap<MetricId, String>,
    descriptors: HashMap<MetricId, Descriptor>,
    texts: HashMap<(MetricId, TextKind), String>,
    indoms: HashMap<InDomId, BTreeMap<InstanceId, String>>,
}

/// Instance labels of a singular metric.
static NO_INSTANCES: BTreeMap<InstanceId, String> = BTreeMap::new();

/// One client session.
pub struct Session {
    id: SessionId,
    spec: Option<SourceSpec>,
    source: Box<dyn MetricSource>,
    credentials: Option<Credentials>,
    cache: SessionCache,
}

impl Session {
    fn new(
        id: SessionId,
        spec: Option<SourceSpec>,
        source: Box<dyn MetricSource>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            id,
            spec,
            source,
            credentials,
            cache: SessionCache::default(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source(&self) -> &dyn MetricSource {
        self.source.as_ref()
    }

    /// Spec the source was bound from; `None` for sources handed in directly.
    pub fn spec(&self) -> Option<&SourceSpec> {
        self.spec.as_ref()
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Metric id for `name`, cached.
    pub fn lookup_name(&mut self, name: &str) -> Result<MetricId> {
        if let Some(id) = self.cache.names.get(name) {
            return Ok(*id);
        }
        let id = self.source.lookup_name(name)?;
        self.cache.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Name of `metric`, cached.
    pub fn name_of(&mut self, metric: MetricId) -> Result<String> {
        if let Some(name) = self.cache.ids.get(&metric) {
            return Ok(name.clone());
        }
        let name = self.source.name_of(metric)?;
        self.cache.ids.insert(metric, name.clone());
        Ok(name)
    }

    /// Descriptor for `metric`, cached.
    pub fn descriptor(&mut self, metric: MetricId) -> Result<Descriptor> {
        if let Some(desc) = self.cache.descriptors.get(&metric) {
            return Ok(*desc);
        }
        let desc = self.source.lookup_descriptor(metric)?;
        self.cache.descriptors.insert(metric, desc);
        Ok(desc)
    }

    /// Help text for `metric`, cached. Missing text is not cached.
    pub fn text(&mut self, metric: MetricId, kind: TextKind) -> Result<String> {
        if let Some(text) = self.cache.texts.get(&(metric, kind)) {
            return Ok(text.clone());
        }
        let text = self.source.lookup_text(metric, kind)?;
        self.cache.texts.insert((metric, kind), text.clone());
        Ok(text)
    }

    /// Labels of instance domain `indom`, cached.
    pub fn instance_domain(&mut self, indom: InDomId) -> Result<&BTreeMap<InstanceId, String>> {
        if !self.cache.indoms.contains_key(&indom) {
            let labels = self.source.instance_domain(indom)?.into_iter().collect();
            self.cache.indoms.insert(indom, labels);
        }
        self.cache
            .indoms
            .get(&indom)
            .ok_or_else(|| BridgeError::not_found("instance domain", indom.to_string()))
    }

    /// Instance labels of `metric`, cached per instance domain. Empty for
    /// singular metrics.
    pub fn instances(&mut self, metric: MetricId) -> Result<&BTreeMap<InstanceId, String>> {
        match self.descriptor(metric)?.indom {
            Some(indom) => self.instance_domain(indom),
            None => Ok(&NO_INSTANCES),
        }
    }

    /// Number of cached entries across all caches.
    pub fn cached_entries(&self) -> usize {
        self.cache.names.len()
            + self.cache.ids.len()
            + self.cache.descriptors.len()
            + self.cache.texts.len()
            + self.cache.indoms.len()
    }

    /// Replace the binding with a fresh one from the original spec and drop
    /// every cache. Used after the backend went away.
    pub fn rebind(&mut self, connector: &dyn Connector) -> Result<()> {
        let spec = self.spec.as_ref().ok_or(BridgeError::Unsupported("rebind"))?;
        let source = connector.connect(spec)?;
        info!(session = self.id, source = %source.describe(), "session rebound");
        self.source = source;
        self.cache = SessionCache::default();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        info!(session = self.id, source = %self.source.describe(), "context released");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("source", &self.source.describe())
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Shared handle to a live session.
pub type SessionHandle = Arc<Mutex<Session>>;

struct Entry {
    session: SessionHandle,
    poll_timeout: Duration,
    /// `None` for permanent sessions.
    expires: Option<Instant>,
}

/// Session table.
pub struct ContextRegistry {
    config: BridgeConfig,
    connector: Arc<dyn Connector>,
    table: Mutex<HashMap<SessionId, Entry>>,
    rng: Mutex<fastrand::Rng>,
    realm_prefix: String,
}

impl ContextRegistry {
    pub fn new(config: BridgeConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            table: Mutex::new(HashMap::new()),
            rng: Mutex::new(fastrand::Rng::new()),
            realm_prefix: DEFAULT_REALM_PREFIX.to_string(),
        }
    }

    /// Use a caller-supplied generator for session ids.
    pub fn with_rng(mut self, rng: fastrand::Rng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn with_realm_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.realm_prefix = prefix.into();
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    fn clamp_timeout(&self, requested: Option<Duration>) -> Duration {
        let max = self.config.max_poll_timeout();
        match requested {
            Some(t) if !t.is_zero() && t <= max => t,
            _ => max,
        }
    }

    /// Bind `spec` and register it under a fresh random id.
    ///
    /// Credentials come from `credentials` or, failing that, from
    /// `username`/`password` attributes of a host spec.
    pub fn create_context(
        &self,
        spec: SourceSpec,
        credentials: Option<Credentials>,
        poll_timeout: Option<Duration>,
    ) -> Result<SessionId> {
        if !self.config.allow_new_contexts {
            return Err(BridgeError::ContextsDisabled);
        }
        if spec == SourceSpec::Local && !self.config.allow_local {
            return Err(BridgeError::LocalDisabled);
        }
        let credentials = credentials
            .or_else(|| spec.embedded_credentials())
            .filter(|c| !c.is_empty());
        if self.config.require_credentials && credentials.is_none() {
            return Err(BridgeError::AuthRequired {
                realm: self.realm_prefix.clone(),
            });
        }

        // Bind before touching the table so a failed bind leaves nothing behind.
        let source = self.connector.connect(&spec)?;
        let poll_timeout = self.clamp_timeout(poll_timeout);

        let mut table = self.table.lock();
        let id = self.allocate_id(&table)?;
        let description = source.describe();
        let session = Session::new(id, Some(spec), source, credentials);
        table.insert(
            id,
            Entry {
                session: Arc::new(Mutex::new(session)),
                poll_timeout,
                expires: Some(Instant::now() + poll_timeout),
            },
        );
        drop(table);

        info!(
            session = id,
            source = %description,
            timeout_secs = poll_timeout.as_secs(),
            "context created"
        );
        Ok(id)
    }

    fn allocate_id(&self, table: &HashMap<SessionId, Entry>) -> Result<SessionId> {
        let attempts = self.config.id_allocation_attempts;
        let mut rng = self.rng.lock();
        for _ in 0..attempts {
            let candidate = rng.i32(1..=i32::MAX);
            if !table.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(BridgeError::AllocationExhausted { attempts })
    }

    /// Register a never-expiring session under a chosen id.
    pub fn bind_permanent(&self, id: SessionId, source: Box<dyn MetricSource>) -> Result<()> {
        self.insert_permanent(id, None, source)
    }

    fn insert_permanent(
        &self,
        id: SessionId,
        spec: Option<SourceSpec>,
        source: Box<dyn MetricSource>,
    ) -> Result<()> {
        if id <= 0 {
            return Err(BridgeError::InvalidSpec(format!(
                "session id {} is not positive",
                id
            )));
        }
        let mut table = self.table.lock();
        if table.contains_key(&id) {
            return Err(BridgeError::AlreadyBound(id));
        }
        let description = source.describe();
        table.insert(
            id,
            Entry {
                session: Arc::new(Mutex::new(Session::new(id, spec, source, None))),
                poll_timeout: Duration::ZERO,
                expires: None,
            },
        );
        drop(table);

        info!(session = id, source = %description, "permanent context bound");
        Ok(())
    }

    /// Bind every configured permanent context, numbering from
    /// `first_permanent_id`. Stops at the first failure.
    pub fn bind_configured(&self) -> Result<Vec<SessionId>> {
        let mut bound = Vec::with_capacity(self.config.permanent_contexts.len());
        let mut id = self.config.first_permanent_id;
        for spec in &self.config.permanent_contexts {
            let source = self.connector.connect(spec)?;
            self.insert_permanent(id, Some(spec.clone()), source)?;
            bound.push(id);
            id = id.checked_add(1).ok_or_else(|| {
                BridgeError::InvalidSpec("permanent context ids overflow".into())
            })?;
        }
        Ok(bound)
    }

    /// Look up a live session and refresh its expiry.
    pub fn resolve(&self, id: SessionId) -> Result<SessionHandle> {
        self.resolve_at(id, Instant::now())
    }

    /// [`resolve`](Self::resolve) against an explicit clock reading.
    pub fn resolve_at(&self, id: SessionId, now: Instant) -> Result<SessionHandle> {
        let mut table = self.table.lock();
        let expired = match table.get_mut(&id) {
            None => return Err(BridgeError::not_found("session", id.to_string())),
            Some(entry) => match entry.expires {
                Some(expires) if now > expires => true,
                Some(_) => {
                    entry.expires = Some(now + entry.poll_timeout);
                    false
                }
                None => false,
            },
        };
        if expired {
            let stale = table.remove(&id);
            drop(table);
            drop(stale);
            debug!(session = id, "resolve of expired context");
            return Err(BridgeError::not_found("session", id.to_string()));
        }
        table
            .get(&id)
            .map(|entry| Arc::clone(&entry.session))
            .ok_or_else(|| BridgeError::not_found("session", id.to_string()))
    }

    /// Check `supplied` against the session's credentials.
    ///
    /// Returns `AuthRequired` (with a realm naming the session) when
    /// credentials are needed but absent, `AuthFailed` when they do not match.
    pub fn authorize(&self, session: &Session, supplied: Option<&Credentials>) -> Result<()> {
        let required = session.has_credentials() || self.config.require_credentials;
        if !required {
            return Ok(());
        }
        let Some(supplied) = supplied.filter(|c| !c.is_empty()) else {
            return Err(BridgeError::AuthRequired {
                realm: format!("{}/{}", self.realm_prefix, session.id),
            });
        };
        if let Some(expected) = session.credentials.as_ref().filter(|c| !c.is_empty()) {
            if supplied.user != expected.user {
                return Err(BridgeError::AuthFailed);
            }
            if !expected.password.is_empty() && supplied.password != expected.password {
                return Err(BridgeError::AuthFailed);
            }
        }
        Ok(())
    }

    /// Drop expired sessions. Returns the seconds until the next sweep is due.
    pub fn gc(&self) -> u64 {
        self.gc_at(Instant::now())
    }

    /// [`gc`](Self::gc) against an explicit clock reading.
    pub fn gc_at(&self, now: Instant) -> u64 {
        let mut next = self.config.max_poll_timeout_secs;
        let mut expired = Vec::new();
        {
            let mut table = self.table.lock();
            table.retain(|id, entry| match entry.expires {
                Some(expires) if expires <= now => {
                    expired.push((*id, Arc::clone(&entry.session)));
                    false
                }
                Some(expires) => {
                    let remaining = (expires - now).as_secs_f64().ceil() as u64;
                    if remaining > 0 {
                        next = next.min(remaining);
                    }
                    true
                }
                None => true,
            });
        }
        for (id, _) in &expired {
            info!(session = *id, "context expired");
        }
        drop(expired);
        next
    }

    /// Tear down every session. Returns how many were registered.
    pub fn deallocate_all(&self) -> usize {
        let drained: Vec<(SessionId, Entry)> = self.table.lock().drain().collect();
        let count = drained.len();
        drop(drained);
        info!(count, "all contexts released");
        count
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live session ids, ascending.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.table.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Drop for ContextRegistry {
    fn drop(&mut self) {
        if !self.table.get_mut().is_empty() {
            self.deallocate_all();
        }
    }
}
