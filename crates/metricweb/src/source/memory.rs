// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory metric source.
//!
//! Stands in for a live host: a fixed namespace plus a sample store that
//! [`MetricSource::store`] writes into. Fetches without a timestamp return
//! each instance's latest value.

use super::index::SampleIndex;
use super::{
    AtomValue, Descriptor, FetchResult, InDomId, InstanceId, MetricId, MetricSource, TextKind,
    Timestamp, ValueSet,
};
use crate::error::{BridgeError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
struct MetricInfo {
    id: MetricId,
    desc: Descriptor,
    oneline: String,
    help: String,
}

/// In-memory source.
pub struct MemorySource {
    label: String,
    metrics: BTreeMap<String, MetricInfo>,
    names: HashMap<MetricId, String>,
    indoms: HashMap<InDomId, Vec<(InstanceId, String)>>,
    samples: RwLock<SampleIndex>,
    unavailable: AtomicBool,
}

impl MemorySource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            metrics: BTreeMap::new(),
            names: HashMap::new(),
            indoms: HashMap::new(),
            samples: RwLock::new(SampleIndex::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Add a metric to the namespace.
    pub fn with_metric(mut self, name: impl Into<String>, id: MetricId, desc: Descriptor) -> Self {
        let name = name.into();
        self.names.insert(id, name.clone());
        self.metrics.insert(
            name,
            MetricInfo {
                id,
                desc,
                oneline: String::new(),
                help: String::new(),
            },
        );
        self
    }

    /// Attach help text to an already-added metric.
    pub fn with_text(mut self, id: MetricId, kind: TextKind, text: impl Into<String>) -> Self {
        if let Some(info) = self
            .names
            .get(&id)
            .and_then(|name| self.metrics.get_mut(name))
        {
            match kind {
                TextKind::OneLine => info.oneline = text.into(),
                TextKind::Help => info.help = text.into(),
            }
        }
        self
    }

    pub fn with_instance_domain<S: Into<String>>(
        mut self,
        indom: InDomId,
        instances: impl IntoIterator<Item = (InstanceId, S)>,
    ) -> Self {
        let instances = instances
            .into_iter()
            .map(|(id, name)| (id, name.into()))
            .collect();
        self.indoms.insert(indom, instances);
        self
    }

    /// Record a sample at an explicit time.
    pub fn record(&self, metric: MetricId, inst: InstanceId, at: Timestamp, value: f64) {
        self.samples.write().insert(metric, inst, at, value);
    }

    /// Make every subsequent fetch fail as if the backend went away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn info(&self, metric: MetricId) -> Result<&MetricInfo> {
        self.names
            .get(&metric)
            .and_then(|name| self.metrics.get(name))
            .ok_or_else(|| BridgeError::not_found("metric id", metric.to_string()))
    }
}

impl MetricSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory {}", self.label)
    }

    fn traverse(&self, prefix: &str, visit: &mut dyn FnMut(&str)) -> Result<()> {
        let mut names: Vec<&String> = self
            .metrics
            .keys()
            .filter(|name| {
                prefix.is_empty()
                    || name.as_str() == prefix
                    || name
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('.'))
            })
            .collect();
        names.sort_by(|a, b| a.split('.').cmp(b.split('.')));
        for name in names {
            visit(name);
        }
        Ok(())
    }

    fn lookup_name(&self, name: &str) -> Result<MetricId> {
        self.metrics
            .get(name)
            .map(|info| info.id)
            .ok_or_else(|| BridgeError::not_found("metric", name))
    }

    fn name_of(&self, metric: MetricId) -> Result<String> {
        self.names
            .get(&metric)
            .cloned()
            .ok_or_else(|| BridgeError::not_found("metric id", metric.to_string()))
    }

    fn lookup_descriptor(&self, metric: MetricId) -> Result<Descriptor> {
        self.info(metric).map(|info| info.desc)
    }

    fn lookup_text(&self, metric: MetricId, kind: TextKind) -> Result<String> {
        let info = self.info(metric)?;
        let text = match kind {
            TextKind::OneLine => &info.oneline,
            TextKind::Help => &info.help,
        };
        if text.is_empty() {
            return Err(BridgeError::not_found("help text", metric.to_string()));
        }
        Ok(text.clone())
    }

    fn instance_domain(&self, indom: InDomId) -> Result<Vec<(InstanceId, String)>> {
        self.indoms
            .get(&indom)
            .cloned()
            .ok_or_else(|| BridgeError::not_found("instance domain", indom.to_string()))
    }

    fn fetch(&self, metrics: &[MetricId], at: Option<Timestamp>) -> Result<FetchResult> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BridgeError::BackendUnavailable(self.describe()));
        }
        let samples = self.samples.read();
        let sets = metrics
            .iter()
            .map(|&metric| {
                let values = match self.info(metric) {
                    Ok(info) => {
                        let raw = match at {
                            Some(t) => samples.values_at(metric, info.desc.semantics, t),
                            None => samples.latest(metric),
                        };
                        raw.into_iter()
                            .filter_map(|(inst, v)| {
                                AtomValue::from_f64(info.desc.metric_type, v).map(|a| (inst, a))
                            })
                            .collect()
                    }
                    Err(_) => Vec::new(),
                };
                ValueSet { metric, values }
            })
            .collect();
        Ok(FetchResult {
            timestamp: at.unwrap_or_else(Timestamp::now),
            sets,
        })
    }

    fn store(&self, metric: MetricId, inst: InstanceId, value: f64) -> Result<()> {
        let info = self.info(metric)?;
        if !info.desc.metric_type.is_numeric() {
            return Err(BridgeError::TypeIneligible {
                metric: self.name_of(metric)?,
                metric_type: info.desc.metric_type.to_string(),
            });
        }
        if let Some(indom) = info.desc.indom {
            self.instance_name(indom, inst)?;
        }
        self.record(metric, inst, Timestamp::now(), value);
        Ok(())
    }
}
