// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Turning a source specification into a bound [`MetricSource`].

use super::{ArchiveSource, MetricSource};
use crate::error::{BridgeError, Result};
use crate::paths;
use crate::registry::Credentials;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// What a session binds to.
///
/// Textual form (config files, CLI): `host:NAME[?username=U&password=P]`,
/// `archive:PATH`, `local:`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceSpec {
    /// Host name, possibly with `?attr=value&...` attributes.
    Host(String),
    /// Archive path, absolute or relative to the archive root.
    Archive(PathBuf),
    Local,
}

/// A host spec split into its name and attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub name: String,
    pub attributes: Vec<(String, String)>,
}

impl HostSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let (name, attrs) = match raw.split_once('?') {
            Some((name, attrs)) => (name, attrs),
            None => (raw, ""),
        };
        if name.is_empty() {
            return Err(BridgeError::InvalidSpec(format!("empty host name in {:?}", raw)));
        }
        let mut attributes = Vec::new();
        for pair in attrs.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            attributes.push((key.to_string(), value.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            attributes,
        })
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Credentials carried as `username` / `password` attributes.
    pub fn credentials(&self) -> Option<Credentials> {
        let user = self.attribute("username")?;
        Some(Credentials::new(user, self.attribute("password").unwrap_or("")))
    }
}

impl SourceSpec {
    /// Credentials embedded in the spec itself (host attributes only).
    pub fn embedded_credentials(&self) -> Option<Credentials> {
        match self {
            Self::Host(raw) => HostSpec::parse(raw).ok()?.credentials(),
            _ => None,
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(h) => write!(f, "host:{}", h),
            Self::Archive(p) => write!(f, "archive:{}", p.display()),
            Self::Local => f.write_str("local:"),
        }
    }
}

impl FromStr for SourceSpec {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some(("host", rest)) if !rest.is_empty() => Ok(Self::Host(rest.to_string())),
            Some(("archive", rest)) if !rest.is_empty() => Ok(Self::Archive(PathBuf::from(rest))),
            Some(("local", "")) => Ok(Self::Local),
            _ => Err(BridgeError::InvalidSpec(format!(
                "expected host:NAME, archive:PATH or local:, got {:?}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for SourceSpec {
    type Error = BridgeError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<SourceSpec> for String {
    fn from(spec: SourceSpec) -> String {
        spec.to_string()
    }
}

/// Binds specs to sources.
pub trait Connector: Send + Sync {
    fn connect(&self, spec: &SourceSpec) -> Result<Box<dyn MetricSource>>;

    /// Root under which archive specs must resolve.
    fn archive_root(&self) -> &Path;
}

/// Builds a source for a parsed host spec. Local mode is passed `localhost`.
pub type SourceFactory = Arc<dyn Fn(&HostSpec) -> Result<Box<dyn MetricSource>> + Send + Sync>;

/// Default connector: archives from disk, hosts and local mode from
/// registered factories.
#[derive(Clone)]
pub struct StandardConnector {
    archive_root: PathBuf,
    hosts: HashMap<String, SourceFactory>,
    local: Option<SourceFactory>,
}

impl StandardConnector {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
            hosts: HashMap::new(),
            local: None,
        }
    }

    pub fn with_host(mut self, name: impl Into<String>, factory: SourceFactory) -> Self {
        self.hosts.insert(name.into(), factory);
        self
    }

    pub fn with_local(mut self, factory: SourceFactory) -> Self {
        self.local = Some(factory);
        self
    }
}

impl Connector for StandardConnector {
    fn connect(&self, spec: &SourceSpec) -> Result<Box<dyn MetricSource>> {
        match spec {
            SourceSpec::Archive(path) => {
                let resolved = paths::contain(&self.archive_root, path)?;
                debug!(archive = %resolved.display(), "binding archive");
                Ok(Box::new(ArchiveSource::open(resolved)?))
            }
            SourceSpec::Host(raw) => {
                let host = HostSpec::parse(raw)?;
                let factory = self.hosts.get(&host.name).ok_or_else(|| {
                    BridgeError::BindFailure(format!("unknown host {}", host.name))
                })?;
                debug!(host = %host.name, "binding host");
                factory(&host)
            }
            SourceSpec::Local => {
                let factory = self.local.as_ref().ok_or_else(|| {
                    BridgeError::BindFailure("no local metric agents available".into())
                })?;
                factory(&HostSpec {
                    name: "localhost".into(),
                    attributes: Vec::new(),
                })
            }
        }
    }

    fn archive_root(&self) -> &Path {
        &self.archive_root
    }
}
