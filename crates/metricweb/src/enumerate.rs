// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Namespace enumeration across the archive root.
//!
//! A pattern like `*.kernel.all.load.*` is split on `.`. Component 0 is
//! matched against each archive's encoded root-relative `.meta` path, the
//! next components against metric-name pieces one by one, and the component
//! after the metric name against encoded instance labels. Filtering happens
//! component by component so non-matching archives are never opened and
//! non-matching metrics never have their instances expanded.

use crate::codec;
use crate::error::{BridgeError, Result};
use crate::paths;
use crate::shutdown::ShutdownFlag;
use crate::source::archive::{archive_base, with_suffix, META_SUFFIX, VOLUME_SUFFIX};
use crate::source::{Connector, InDomId, MetricSource, SourceSpec};
use glob::Pattern;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One glob component, compiled once.
#[derive(Debug, Clone)]
pub struct ComponentMatcher {
    raw: String,
    pattern: Option<Pattern>,
}

impl ComponentMatcher {
    pub fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            // An invalid glob only ever matches itself literally.
            pattern: Pattern::new(raw).ok(),
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match &self.pattern {
            Some(p) => p.matches(candidate),
            None => self.raw == candidate,
        }
    }

    /// Exact comparison first, glob second.
    pub fn matches_or_equals(&self, candidate: &str) -> bool {
        self.raw == candidate || self.matches(candidate)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// An archive found under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path of the `.meta` file.
    pub path: PathBuf,
    /// Encoded root-relative path: component 0 of every name it yields.
    pub id: String,
}

/// Encoded identifier of an archive's `.meta` file.
pub fn archive_id(canonical_root: &Path, meta_path: &Path) -> String {
    let relative = meta_path.strip_prefix(canonical_root).unwrap_or(meta_path);
    codec::encode(&relative.to_string_lossy())
}

/// Path named by an archive identifier, relative to the root unless absolute.
/// `None` if the identifier does not decode.
pub fn archive_path(id: &str) -> Option<PathBuf> {
    let decoded = codec::decode(id);
    if decoded.is_empty() {
        None
    } else {
        Some(PathBuf::from(decoded))
    }
}

/// Expands wildcard patterns into fully-qualified metric names.
pub struct Enumerator<'a> {
    connector: &'a dyn Connector,
    shutdown: ShutdownFlag,
}

impl<'a> Enumerator<'a> {
    pub fn new(connector: &'a dyn Connector, shutdown: ShutdownFlag) -> Self {
        Self {
            connector,
            shutdown,
        }
    }

    /// Every readable archive beneath the root, in walk order.
    ///
    /// Archives without an uncompressed first volume are skipped.
    pub fn archives(&self) -> Result<Vec<ArchiveEntry>> {
        let root = paths::canonical_root(self.connector.archive_root())?;
        let walk = format!(
            "{}/**/*{}",
            Pattern::escape(&root.to_string_lossy()),
            META_SUFFIX
        );
        let entries = glob::glob(&walk).map_err(|e| {
            BridgeError::InvalidSpec(format!("archive walk {}: {}", walk, e))
        })?;

        let mut found = Vec::new();
        for entry in entries {
            if self.shutdown.is_requested() {
                break;
            }
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable path");
                    continue;
                }
            };
            if paths::is_cursed(&root, &path) {
                debug!(path = %path.display(), "skipping path outside archive root");
                continue;
            }
            if !with_suffix(&archive_base(&path), VOLUME_SUFFIX).is_file() {
                debug!(path = %path.display(), "skipping archive without uncompressed volume");
                continue;
            }
            found.push(ArchiveEntry {
                id: archive_id(&root, &path),
                path,
            });
        }
        Ok(found)
    }

    /// Split `pattern` on `.` and enumerate.
    pub fn enumerate(&self, pattern: &str) -> Result<Vec<String>> {
        let components: Vec<&str> = pattern.split('.').collect();
        self.enumerate_components(&components)
    }

    /// Enumerate names matching pre-split pattern components. Sorted.
    pub fn enumerate_components(&self, components: &[&str]) -> Result<Vec<String>> {
        let matchers: Vec<ComponentMatcher> =
            components.iter().map(|c| ComponentMatcher::new(c)).collect();
        let mut output = Vec::new();

        for archive in self.archives()? {
            if self.shutdown.is_requested() {
                break;
            }
            if let Some(first) = matchers.first() {
                if !first.matches_or_equals(&archive.id) {
                    continue;
                }
            }
            let source = match self
                .connector
                .connect(&SourceSpec::Archive(archive.path.clone()))
            {
                Ok(source) => source,
                Err(e) => {
                    warn!(archive = %archive.path.display(), error = %e, "cannot open archive");
                    continue;
                }
            };
            self.enumerate_archive(source.as_ref(), &archive.id, &matchers, &mut output);
        }

        debug!(count = output.len(), "enumerated metrics");
        output.sort();
        Ok(output)
    }

    fn enumerate_archive(
        &self,
        source: &dyn MetricSource,
        archive_part: &str,
        matchers: &[ComponentMatcher],
        output: &mut Vec<String>,
    ) {
        // Encoded labels per instance domain, shared by metrics in this archive.
        let mut labels: HashMap<InDomId, Vec<String>> = HashMap::new();

        let walked = source.traverse("", &mut |name| {
            if self.shutdown.is_requested() {
                return;
            }
            let parts: Vec<&str> = name.split('.').collect();
            let metric_matches = parts
                .iter()
                .enumerate()
                .all(|(i, part)| matchers.get(i + 1).map_or(true, |m| m.matches(part)));
            if !metric_matches {
                return;
            }

            let Ok(desc) = source
                .lookup_name(name)
                .and_then(|id| source.lookup_descriptor(id))
            else {
                return;
            };
            if !desc.metric_type.is_numeric() {
                return;
            }

            let qualified = format!("{}.{}", archive_part, name);
            let Some(indom) = desc.indom else {
                output.push(qualified);
                return;
            };

            if !labels.contains_key(&indom) {
                let encoded = match source.instance_domain(indom) {
                    Ok(instances) => instances
                        .iter()
                        .map(|(_, label)| codec::encode(label))
                        .collect(),
                    Err(_) => Vec::new(),
                };
                labels.insert(indom, encoded);
            }
            let instance_matcher = matchers.get(parts.len() + 1);
            for label in labels.get(&indom).into_iter().flatten() {
                if instance_matcher.map_or(true, |m| m.matches(label)) {
                    output.push(format!("{}.{}", qualified, label));
                }
            }
        });
        if let Err(e) = walked {
            warn!(archive = archive_part, error = %e, "namespace walk failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{
        ArchiveWriter, Descriptor, InstanceId, MetricId, MetricType, Semantics, StandardConnector,
        Timestamp,
    };
    use tempfile::TempDir;

    fn write_archive(root: &Path, rel: &str) {
        let base = root.join(rel);
        std::fs::create_dir_all(base.parent().unwrap()).unwrap();
        let mut w = ArchiveWriter::create(&base, "h").unwrap();
        w.add_metric(
            "kernel.all.load",
            MetricId(1),
            Descriptor::new(MetricType::Float, Semantics::Instant).with_indom(InDomId(1)),
            "",
            "",
        )
        .add_metric(
            "kernel.all.cpu.user",
            MetricId(2),
            Descriptor::new(MetricType::U64, Semantics::Counter),
            "",
            "",
        )
        .add_metric(
            "kernel.uname.release",
            MetricId(3),
            Descriptor::new(MetricType::String, Semantics::Discrete),
            "",
            "",
        )
        .add_instance_domain(
            InDomId(1),
            vec![
                (InstanceId(1), "1 minute".to_string()),
                (InstanceId(5), "5 minute".to_string()),
            ],
        );
        w.write_record(Timestamp::from_secs(1), &[(MetricId(2), InstanceId::NULL, 1.0)])
            .unwrap();
        w.finish().unwrap();
    }

    #[test]
    fn test_component_matcher() {
        assert!(ComponentMatcher::new("k*").matches("kernel"));
        assert!(ComponentMatcher::new("*").matches("a b"));
        assert!(!ComponentMatcher::new("k?").matches("kernel"));
        // invalid glob: literal comparison
        assert!(ComponentMatcher::new("[").matches("["));
        assert!(ComponentMatcher::new("x[").matches_or_equals("x["));
    }

    #[test]
    fn test_archive_id_roundtrip() {
        let id = archive_id(Path::new("/srv"), Path::new("/srv/host1/day.meta"));
        assert_eq!(id, "host1-2F-day-2E-meta");
        assert_eq!(archive_path(&id), Some(PathBuf::from("host1/day.meta")));
        assert_eq!(archive_path("bad-"), None);
    }

    #[test]
    fn test_enumerate_expands_instances_and_skips_strings() {
        let dir = TempDir::new().unwrap();
        write_archive(dir.path(), "host1/day");
        let connector = StandardConnector::new(dir.path());
        let e = Enumerator::new(&connector, ShutdownFlag::new());

        let names = e.enumerate("*").unwrap();
        assert_eq!(
            names,
            vec![
                "host1-2F-day-2E-meta.kernel.all.cpu.user",
                "host1-2F-day-2E-meta.kernel.all.load.1 minute",
                "host1-2F-day-2E-meta.kernel.all.load.5 minute",
            ]
        );
    }

    #[test]
    fn test_enumerate_component_filters() {
        let dir = TempDir::new().unwrap();
        write_archive(dir.path(), "host1/day");
        write_archive(dir.path(), "host2/day");
        let connector = StandardConnector::new(dir.path());
        let e = Enumerator::new(&connector, ShutdownFlag::new());

        let names = e.enumerate("host2*.kernel.all.load.5*").unwrap();
        assert_eq!(names, vec!["host2-2F-day-2E-meta.kernel.all.load.5 minute"]);

        // exact archive id, wildcard metric tail
        let names = e.enumerate("host1-2F-day-2E-meta.kernel.all.c*").unwrap();
        assert_eq!(names, vec!["host1-2F-day-2E-meta.kernel.all.cpu.user"]);

        assert!(e.enumerate("nohost*").unwrap().is_empty());
    }

    #[test]
    fn test_skips_archive_without_volume() {
        let dir = TempDir::new().unwrap();
        write_archive(dir.path(), "a");
        write_archive(dir.path(), "b");
        std::fs::rename(dir.path().join("b.0"), dir.path().join("b.0.xz")).unwrap();
        let connector = StandardConnector::new(dir.path());
        let e = Enumerator::new(&connector, ShutdownFlag::new());

        let archives = e.archives().unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].id, "a-2E-meta");
    }

    #[test]
    fn test_shutdown_returns_early() {
        let dir = TempDir::new().unwrap();
        write_archive(dir.path(), "a");
        let connector = StandardConnector::new(dir.path());
        let flag = ShutdownFlag::new();
        flag.request();
        let e = Enumerator::new(&connector, flag);
        assert!(e.enumerate("*").unwrap().is_empty());
    }
}
