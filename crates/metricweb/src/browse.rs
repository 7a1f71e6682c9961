// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-session browsing: metric listing, instance listing, current values
//! and the store passthrough. Every lookup goes through the session caches.

use crate::error::{BridgeError, Result};
use crate::registry::Session;
use crate::source::{AtomValue, Connector, InDomId, InstanceId, MetricId, TextKind, Timestamp};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

/// One entry of a metric listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricInfo {
    pub name: String,
    pub pmid: MetricId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indom: Option<InDomId>,
    pub sem: &'static str,
    pub units: String,
    #[serde(rename = "type")]
    pub metric_type: String,
    #[serde(rename = "text-oneline", skip_serializing_if = "Option::is_none")]
    pub text_oneline: Option<String>,
    #[serde(rename = "text-help", skip_serializing_if = "Option::is_none")]
    pub text_help: Option<String>,
}

/// Every metric below `prefix` ("" = all), in namespace order.
/// Names that do not resolve are skipped.
pub fn list_metrics(session: &mut Session, prefix: &str) -> Result<Vec<MetricInfo>> {
    let mut names = Vec::new();
    session
        .source()
        .traverse(prefix, &mut |name| names.push(name.to_string()))?;

    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let Ok(pmid) = session.lookup_name(&name) else {
            continue;
        };
        let Ok(desc) = session.descriptor(pmid) else {
            continue;
        };
        out.push(MetricInfo {
            pmid,
            indom: desc.indom,
            sem: desc.semantics.as_str(),
            units: desc.units.to_string(),
            metric_type: desc.metric_type.to_string(),
            text_oneline: session.text(pmid, TextKind::OneLine).ok(),
            text_help: session.text(pmid, TextKind::Help).ok(),
            name,
        });
    }
    debug!(session = session.id(), prefix, count = out.len(), "listed metrics");
    Ok(out)
}

/// Which instances to list.
#[derive(Debug, Clone, Default)]
pub struct InstanceQuery {
    /// Instance domain to list; takes precedence over `metric`.
    pub indom: Option<InDomId>,
    /// Metric whose instance domain to list.
    pub metric: Option<String>,
    /// Only these instance ids (empty = no id filter).
    pub ids: Vec<InstanceId>,
    /// Only these instance names (empty = no name filter).
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceEntry {
    pub instance: InstanceId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceList {
    pub indom: InDomId,
    pub instances: Vec<InstanceEntry>,
}

/// Instances of an instance domain, chosen by id or by metric name.
pub fn list_instances(session: &mut Session, query: &InstanceQuery) -> Result<InstanceList> {
    let indom = match (query.indom, query.metric.as_deref()) {
        (Some(indom), _) => indom,
        (None, Some(metric)) => {
            let pmid = session.lookup_name(metric)?;
            session.descriptor(pmid)?.indom.ok_or_else(|| {
                BridgeError::InvalidSpec(format!("metric {} has no instance domain", metric))
            })?
        }
        (None, None) => {
            return Err(BridgeError::InvalidSpec(
                "instance query needs an instance domain or a metric name".into(),
            ))
        }
    };

    let instances = session
        .instance_domain(indom)?
        .iter()
        .filter(|(id, _)| query.ids.is_empty() || query.ids.contains(id))
        .filter(|(_, name)| query.names.is_empty() || query.names.contains(name))
        .map(|(instance, name)| InstanceEntry {
            instance: *instance,
            name: name.clone(),
        })
        .collect();
    Ok(InstanceList { indom, instances })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceValue {
    pub instance: InstanceId,
    pub value: AtomValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValues {
    pub name: String,
    pub pmid: MetricId,
    pub instances: Vec<InstanceValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueReport {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: Timestamp,
    pub values: Vec<MetricValues>,
}

/// Current values of the metrics named in `names` plus those in `ids`.
/// Unknown names and metrics without values are left out.
pub fn fetch_values(session: &mut Session, names: &[String], ids: &[MetricId]) -> Result<ValueReport> {
    let mut pmids: Vec<MetricId> = names
        .iter()
        .filter_map(|name| session.lookup_name(name).ok())
        .chain(ids.iter().copied())
        .collect();
    let mut seen = HashSet::new();
    pmids.retain(|id| seen.insert(*id));

    let result = session.source().fetch(&pmids, None)?;
    let mut values = Vec::with_capacity(result.sets.len());
    for set in result.sets {
        if set.values.is_empty() {
            continue;
        }
        let Ok(name) = session.name_of(set.metric) else {
            continue;
        };
        values.push(MetricValues {
            name,
            pmid: set.metric,
            instances: set
                .values
                .into_iter()
                .map(|(instance, value)| InstanceValue { instance, value })
                .collect(),
        });
    }
    Ok(ValueReport {
        timestamp: result.timestamp,
        values,
    })
}

/// [`fetch_values`], rebinding the session once if the backend went away.
pub fn fetch_values_or_rebind(
    session: &mut Session,
    connector: &dyn Connector,
    names: &[String],
    ids: &[MetricId],
) -> Result<ValueReport> {
    match fetch_values(session, names, ids) {
        Err(BridgeError::BackendUnavailable(reason)) => {
            warn!(session = session.id(), %reason, "backend unavailable, rebinding");
            session.rebind(connector)?;
            fetch_values(session, names, ids)
        }
        other => other,
    }
}

/// Write `value` to `name` (and `instance`, for metrics with an instance
/// domain) through the bound source.
pub fn store_value(
    session: &mut Session,
    name: &str,
    instance: Option<&str>,
    value: f64,
) -> Result<()> {
    let pmid = session.lookup_name(name)?;
    let desc = session.descriptor(pmid)?;
    let inst = match (desc.indom, instance) {
        (None, _) => InstanceId::NULL,
        (Some(indom), Some(label)) => session.source().lookup_instance(indom, label)?,
        (Some(_), None) => {
            return Err(BridgeError::InvalidSpec(format!(
                "metric {} needs an instance",
                name
            )))
        }
    };
    session.source().store(pmid, inst, value)?;
    debug!(session = session.id(), metric = name, "stored value");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::registry::ContextRegistry;
    use crate::source::{
        Descriptor, MemorySource, MetricType, Semantics, SpaceScale, StandardConnector, Units,
    };
    use std::sync::Arc;

    fn registry_with(source: MemorySource) -> (ContextRegistry, i32) {
        let connector = StandardConnector::new(".");
        let registry = ContextRegistry::new(BridgeConfig::default(), Arc::new(connector));
        registry.bind_permanent(1, Box::new(source)).unwrap();
        (registry, 1)
    }

    fn source() -> MemorySource {
        let src = MemorySource::new("m")
            .with_metric(
                "mem.util.used",
                MetricId(1),
                Descriptor::new(MetricType::U64, Semantics::Instant)
                    .with_units(Units::bytes(SpaceScale::Kbyte)),
            )
            .with_metric(
                "network.interface.in.bytes",
                MetricId(2),
                Descriptor::new(MetricType::U64, Semantics::Counter).with_indom(InDomId(4)),
            )
            .with_text(MetricId(1), TextKind::OneLine, "used memory")
            .with_instance_domain(
                InDomId(4),
                [(InstanceId(0), "eth0"), (InstanceId(1), "eth1"), (InstanceId(2), "lo")],
            );
        src.record(MetricId(1), InstanceId::NULL, Timestamp::from_secs(1), 2048.0);
        src
    }

    #[test]
    fn test_list_metrics() {
        let (registry, id) = registry_with(source());
        let handle = registry.resolve(id).unwrap();
        let mut session = handle.lock();

        let all = list_metrics(&mut session, "").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "mem.util.used");
        assert_eq!(all[0].units, "Kbyte");
        assert_eq!(all[0].sem, "instant");
        assert_eq!(all[0].text_oneline.as_deref(), Some("used memory"));
        assert!(all[0].text_help.is_none());
        assert_eq!(all[1].indom, Some(InDomId(4)));

        let json = serde_json::to_value(&all[0]).unwrap();
        assert_eq!(json["type"], "u64");
        assert_eq!(json["text-oneline"], "used memory");

        assert_eq!(list_metrics(&mut session, "network").unwrap().len(), 1);
    }

    #[test]
    fn test_list_instances() {
        let (registry, id) = registry_with(source());
        let handle = registry.resolve(id).unwrap();
        let mut session = handle.lock();

        let by_metric = InstanceQuery {
            metric: Some("network.interface.in.bytes".into()),
            ..Default::default()
        };
        assert_eq!(list_instances(&mut session, &by_metric).unwrap().instances.len(), 3);

        let filtered = InstanceQuery {
            indom: Some(InDomId(4)),
            names: vec!["lo".into()],
            ..Default::default()
        };
        let list = list_instances(&mut session, &filtered).unwrap();
        assert_eq!(
            list.instances,
            vec![InstanceEntry {
                instance: InstanceId(2),
                name: "lo".into()
            }]
        );

        let singular = InstanceQuery {
            metric: Some("mem.util.used".into()),
            ..Default::default()
        };
        assert!(list_instances(&mut session, &singular).is_err());
        assert!(list_instances(&mut session, &InstanceQuery::default()).is_err());
    }

    #[test]
    fn test_fetch_values_skips_unknown_and_empty() {
        let (registry, id) = registry_with(source());
        let handle = registry.resolve(id).unwrap();
        let mut session = handle.lock();

        let report = fetch_values(
            &mut session,
            &["mem.util.used".into(), "no.such".into(), "network.interface.in.bytes".into()],
            &[],
        )
        .unwrap();
        assert_eq!(report.values.len(), 1);
        assert_eq!(report.values[0].name, "mem.util.used");
        assert_eq!(report.values[0].instances[0].value, AtomValue::U64(2048));
    }

    #[test]
    fn test_list_instances_fills_session_cache() {
        let (registry, id) = registry_with(source());
        let handle = registry.resolve(id).unwrap();
        let mut session = handle.lock();
        assert_eq!(session.cached_entries(), 0);

        let by_indom = InstanceQuery {
            indom: Some(InDomId(4)),
            ..Default::default()
        };
        assert_eq!(list_instances(&mut session, &by_indom).unwrap().instances.len(), 3);
        assert_eq!(session.cached_entries(), 1);

        // Same domain through its metric: name and descriptor join the cache,
        // the labels are reused.
        let by_metric = InstanceQuery {
            metric: Some("network.interface.in.bytes".into()),
            ids: vec![InstanceId(0)],
            ..Default::default()
        };
        let list = list_instances(&mut session, &by_metric).unwrap();
        assert_eq!(list.instances[0].name, "eth0");
        assert_eq!(session.cached_entries(), 3);

        let pmid = session.lookup_name("network.interface.in.bytes").unwrap();
        assert_eq!(session.instances(pmid).unwrap().len(), 3);
        assert_eq!(session.cached_entries(), 3);
    }

    #[test]
    fn test_fetch_values_reports_each_metric_once() {
        let (registry, id) = registry_with(source());
        let handle = registry.resolve(id).unwrap();
        let mut session = handle.lock();

        let report = fetch_values(
            &mut session,
            &[
                "mem.util.used".into(),
                "network.interface.in.bytes".into(),
                "mem.util.used".into(),
            ],
            &[MetricId(1)],
        )
        .unwrap();
        assert_eq!(report.values.len(), 1);
        assert_eq!(report.values[0].pmid, MetricId(1));
        assert_eq!(report.values[0].instances.len(), 1);

        // Names of reported metrics are cached too.
        let before = session.cached_entries();
        fetch_values(&mut session, &[], &[MetricId(1)]).unwrap();
        assert_eq!(session.cached_entries(), before);
        assert_eq!(session.name_of(MetricId(1)).unwrap(), "mem.util.used");
    }

    #[test]
    fn test_store_value() {
        let (registry, id) = registry_with(source());
        let handle = registry.resolve(id).unwrap();
        let mut session = handle.lock();

        store_value(&mut session, "network.interface.in.bytes", Some("eth1"), 10.0).unwrap();
        let report = fetch_values(&mut session, &[], &[MetricId(2)]).unwrap();
        assert_eq!(report.values[0].instances[0].instance, InstanceId(1));

        assert!(store_value(&mut session, "network.interface.in.bytes", None, 1.0).is_err());
        assert!(store_value(&mut session, "no.such", None, 1.0)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_rebind_needs_spec() {
        let (registry, id) = registry_with(source());
        let handle = registry.resolve(id).unwrap();
        let mut session = handle.lock();
        assert!(matches!(
            fetch_values_or_rebind(&mut session, registry.connector(), &[], &[MetricId(1)]),
            Ok(_)
        ));
        // A directly bound source has no spec to rebind from.
        assert!(matches!(
            session.rebind(registry.connector()),
            Err(BridgeError::Unsupported(_))
        ));
    }
}
