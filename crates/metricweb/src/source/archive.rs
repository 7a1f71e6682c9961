// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On-disk metric archives.
//!
//! # Layout
//!
//! An archive with base path `B` is two files:
//!
//! ```text
//! B.meta   JSON ArchiveMeta: host, recorded bounds, metric table, instance domains
//! B.0      volume: header, then a sequence of records
//! ```
//!
//! # Volume Format
//!
//! ```text
//! +---------------------------------------------------------+
//! |  Magic (8) | Version (4)                                 |
//! +---------------------------------------------------------+
//! |  timestamp_ns (8) | count (4)                            |
//! |  count x [ metric (4) | instance (4) | value f64 (8) ]   |
//! |  CRC32 over the record body (4)                          |
//! +---------------------------------------------------------+
//! |  ...                                                     |
//! +---------------------------------------------------------+
//! ```
//!
//! All integers are little-endian.

use super::index::SampleIndex;
use super::{
    AtomValue, Descriptor, FetchResult, InDomId, InstanceId, MetricId, MetricSource, TextKind,
    Timestamp, ValueSet,
};
use crate::error::{BridgeError, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Magic bytes: "MWARCV0\0"
pub const MAGIC: [u8; 8] = [0x4D, 0x57, 0x41, 0x52, 0x43, 0x56, 0x30, 0x00];

/// Current volume format version.
pub const FORMAT_VERSION: u32 = 1;

/// Metadata file suffix.
pub const META_SUFFIX: &str = ".meta";

/// Suffix of the first (uncompressed) volume.
pub const VOLUME_SUFFIX: &str = ".0";

/// Archive format errors.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid volume magic")]
    BadMagic,

    #[error("Version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("CRC mismatch in record {record}")]
    CrcMismatch { record: u64 },

    #[error("Truncated record {record}")]
    Truncated { record: u64 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One metric in the archive's metric table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    pub name: String,
    pub id: MetricId,
    pub desc: Descriptor,
    #[serde(default)]
    pub oneline: String,
    #[serde(default)]
    pub help: String,
}

/// One named instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub id: InstanceId,
    pub name: String,
}

/// One instance domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InDomEntry {
    pub id: InDomId,
    pub instances: Vec<InstanceEntry>,
}

/// Contents of the `.meta` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub hostname: String,
    pub start: Timestamp,
    pub end: Timestamp,
    #[serde(default)]
    pub metrics: Vec<MetricEntry>,
    #[serde(default)]
    pub indoms: Vec<InDomEntry>,
}

/// Append `suffix` to a path without treating it as an extension.
pub fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = base.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Strip a trailing `.meta` or `.0` so any archive file names its base.
pub fn archive_base(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    for suffix in [META_SUFFIX, VOLUME_SUFFIX] {
        if let Some(stripped) = raw.strip_suffix(suffix) {
            if !stripped.is_empty() {
                return PathBuf::from(stripped);
            }
        }
    }
    path.to_path_buf()
}

// ============================================================================
// Reader
// ============================================================================

/// A read-only archive binding.
pub struct ArchiveSource {
    base: PathBuf,
    meta: ArchiveMeta,
    /// Names in namespace-tree order.
    names: Vec<String>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<MetricId, usize>,
    indoms: HashMap<InDomId, Vec<(InstanceId, String)>>,
    volume: OnceLock<std::result::Result<SampleIndex, String>>,
}

impl ArchiveSource {
    /// Open an archive by base path, `.meta` path or `.0` path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let base = archive_base(path.as_ref());
        let meta_path = with_suffix(&base, META_SUFFIX);
        let volume_path = with_suffix(&base, VOLUME_SUFFIX);

        let content = std::fs::read_to_string(&meta_path).map_err(|e| {
            BridgeError::BindFailure(format!("cannot open archive {}: {}", base.display(), e))
        })?;
        let meta: ArchiveMeta = serde_json::from_str(&content).map_err(|e| {
            BridgeError::BindFailure(format!("corrupt archive metadata {}: {}", meta_path.display(), e))
        })?;
        if !volume_path.is_file() {
            return Err(BridgeError::BindFailure(format!(
                "archive {} has no readable volume",
                base.display()
            )));
        }

        let mut names: Vec<String> = meta.metrics.iter().map(|m| m.name.clone()).collect();
        names.sort_by(|a, b| a.split('.').cmp(b.split('.')));
        names.dedup();

        let by_name = meta
            .metrics
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), i))
            .collect();
        let by_id = meta
            .metrics
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id, i))
            .collect();
        let indoms = meta
            .indoms
            .iter()
            .map(|d| {
                let instances = d
                    .instances
                    .iter()
                    .map(|inst| (inst.id, inst.name.clone()))
                    .collect();
                (d.id, instances)
            })
            .collect();

        debug!(archive = %base.display(), metrics = meta.metrics.len(), "opened archive");

        Ok(Self {
            base,
            meta,
            names,
            by_name,
            by_id,
            indoms,
            volume: OnceLock::new(),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn meta(&self) -> &ArchiveMeta {
        &self.meta
    }

    fn entry(&self, metric: MetricId) -> Result<&MetricEntry> {
        self.by_id
            .get(&metric)
            .map(|&i| &self.meta.metrics[i])
            .ok_or_else(|| BridgeError::not_found("metric id", metric.to_string()))
    }

    fn samples(&self) -> Result<&SampleIndex> {
        self.volume
            .get_or_init(|| {
                let path = with_suffix(&self.base, VOLUME_SUFFIX);
                read_volume(&path).map_err(|e| format!("{}: {}", path.display(), e))
            })
            .as_ref()
            .map_err(|e| BridgeError::BackendUnavailable(e.clone()))
    }
}

impl MetricSource for ArchiveSource {
    fn describe(&self) -> String {
        format!("archive {}", self.base.display())
    }

    fn traverse(&self, prefix: &str, visit: &mut dyn FnMut(&str)) -> Result<()> {
        for name in &self.names {
            if prefix.is_empty()
                || name == prefix
                || name
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.'))
            {
                visit(name);
            }
        }
        Ok(())
    }

    fn lookup_name(&self, name: &str) -> Result<MetricId> {
        self.by_name
            .get(name)
            .map(|&i| self.meta.metrics[i].id)
            .ok_or_else(|| BridgeError::not_found("metric", name))
    }

    fn name_of(&self, metric: MetricId) -> Result<String> {
        self.entry(metric).map(|e| e.name.clone())
    }

    fn lookup_descriptor(&self, metric: MetricId) -> Result<Descriptor> {
        self.entry(metric).map(|e| e.desc)
    }

    fn lookup_text(&self, metric: MetricId, kind: TextKind) -> Result<String> {
        let entry = self.entry(metric)?;
        let text = match kind {
            TextKind::OneLine => &entry.oneline,
            TextKind::Help => &entry.help,
        };
        if text.is_empty() {
            return Err(BridgeError::not_found("help text", entry.name.clone()));
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
        let samples = self.samples()?;
        let at = at.unwrap_or(self.meta.end);
        let sets = metrics
            .iter()
            .map(|&metric| {
                let values = match self.entry(metric) {
                    Ok(entry) => samples
                        .values_at(metric, entry.desc.semantics, at)
                        .into_iter()
                        .filter_map(|(inst, v)| {
                            AtomValue::from_f64(entry.desc.metric_type, v).map(|a| (inst, a))
                        })
                        .collect(),
                    Err(_) => Vec::new(),
                };
                ValueSet { metric, values }
            })
            .collect();
        Ok(FetchResult {
            timestamp: at,
            sets,
        })
    }

    fn time_bounds(&self) -> Option<(Timestamp, Timestamp)> {
        Some((self.meta.start, self.meta.end))
    }
}

fn read_volume(path: &Path) -> std::result::Result<SampleIndex, FormatError> {
    let file = File::open(path)?;
    let total = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(FormatError::BadMagic);
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(FormatError::VersionMismatch {
            expected: FORMAT_VERSION,
            got: version,
        });
    }

    let mut index = SampleIndex::new();
    let mut record: u64 = 0;
    // Bytes consumed so far: magic + version.
    let mut offset: u64 = 12;
    loop {
        let mut head = [0u8; 12];
        match read_full(&mut reader, &mut head)? {
            0 => break,
            12 => {}
            _ => return Err(FormatError::Truncated { record }),
        }
        let ts = LittleEndian::read_i64(&head[0..8]);
        let count = LittleEndian::read_u32(&head[8..12]);

        offset += 12;

        // Body and CRC must fit in what is left of the file before anything
        // is allocated for them.
        let body_len = u64::from(count) * 16;
        if body_len + 4 > total.saturating_sub(offset) {
            return Err(FormatError::Truncated { record });
        }
        offset += body_len + 4;
        let body_len = body_len as usize;
        let mut body = vec![0u8; body_len];
        if read_full(&mut reader, &mut body)? != body_len {
            return Err(FormatError::Truncated { record });
        }
        let crc = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| FormatError::Truncated { record })?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&head);
        hasher.update(&body);
        if hasher.finalize() != crc {
            return Err(FormatError::CrcMismatch { record });
        }

        let mut cursor = io::Cursor::new(body);
        for _ in 0..count {
            let metric = MetricId(cursor.read_u32::<LittleEndian>()?);
            let inst = InstanceId(cursor.read_i32::<LittleEndian>()?);
            let value = cursor.read_f64::<LittleEndian>()?;
            index.insert(metric, inst, Timestamp(ts), value);
        }
        record += 1;
    }
    Ok(index)
}

/// Like `read_exact`, but reports how many bytes arrived before EOF.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ============================================================================
// Writer
// ============================================================================

/// Archive writer.
pub struct ArchiveWriter {
    base: PathBuf,
    volume: BufWriter<File>,
    hostname: String,
    metrics: BTreeMap<MetricId, MetricEntry>,
    indoms: BTreeMap<InDomId, InDomEntry>,
    first: Option<Timestamp>,
    last: Timestamp,
    records: u64,
}

impl ArchiveWriter {
    /// Create `base.0` and prepare `base.meta`.
    pub fn create(base: impl AsRef<Path>, hostname: impl Into<String>) -> std::result::Result<Self, FormatError> {
        let base = archive_base(base.as_ref());
        let mut volume = BufWriter::new(File::create(with_suffix(&base, VOLUME_SUFFIX))?);
        volume.write_all(&MAGIC)?;
        volume.write_u32::<LittleEndian>(FORMAT_VERSION)?;

        Ok(Self {
            base,
            volume,
            hostname: hostname.into(),
            metrics: BTreeMap::new(),
            indoms: BTreeMap::new(),
            first: None,
            last: Timestamp(0),
            records: 0,
        })
    }

    /// Declare a metric.
    pub fn add_metric(
        &mut self,
        name: impl Into<String>,
        id: MetricId,
        desc: Descriptor,
        oneline: impl Into<String>,
        help: impl Into<String>,
    ) -> &mut Self {
        self.metrics.insert(
            id,
            MetricEntry {
                name: name.into(),
                id,
                desc,
                oneline: oneline.into(),
                help: help.into(),
            },
        );
        self
    }

    /// Declare an instance domain.
    pub fn add_instance_domain(
        &mut self,
        id: InDomId,
        instances: impl IntoIterator<Item = (InstanceId, String)>,
    ) -> &mut Self {
        let instances = instances
            .into_iter()
            .map(|(id, name)| InstanceEntry { id, name })
            .collect();
        self.indoms.insert(id, InDomEntry { id, instances });
        self
    }

    /// Append one record.
    pub fn write_record(
        &mut self,
        at: Timestamp,
        samples: &[(MetricId, InstanceId, f64)],
    ) -> std::result::Result<(), FormatError> {
        let mut buf = Vec::with_capacity(12 + samples.len() * 16);
        buf.write_i64::<LittleEndian>(at.0)?;
        buf.write_u32::<LittleEndian>(samples.len() as u32)?;
        for (metric, inst, value) in samples {
            buf.write_u32::<LittleEndian>(metric.0)?;
            buf.write_i32::<LittleEndian>(inst.0)?;
            buf.write_f64::<LittleEndian>(*value)?;
        }
        let crc = crc32fast::hash(&buf);
        self.volume.write_all(&buf)?;
        self.volume.write_u32::<LittleEndian>(crc)?;

        if self.first.is_none() {
            self.first = Some(at);
        }
        self.last = self.last.max(at);
        self.records += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flush the volume and write the metadata. Returns the base path.
    pub fn finish(mut self) -> std::result::Result<PathBuf, FormatError> {
        self.volume.flush()?;
        let start = self.first.unwrap_or(Timestamp(0));
        let meta = ArchiveMeta {
            hostname: self.hostname,
            start,
            end: self.last.max(start),
            metrics: self.metrics.into_values().collect(),
            indoms: self.indoms.into_values().collect(),
        };
        let json = serde_json::to_string_pretty(&meta)?;
        std::fs::write(with_suffix(&self.base, META_SUFFIX), json)?;
        Ok(self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MetricType, Semantics};
    use tempfile::TempDir;

    fn build(dir: &Path) -> PathBuf {
        let mut w = ArchiveWriter::create(dir.join("host1"), "host1").unwrap();
        w.add_metric(
            "kernel.all.load",
            MetricId(1),
            Descriptor::new(MetricType::Float, Semantics::Instant).with_indom(InDomId(7)),
            "load average",
            "",
        )
        .add_metric(
            "hinv.ncpu",
            MetricId(2),
            Descriptor::new(MetricType::U32, Semantics::Discrete),
            "",
            "number of CPUs",
        )
        .add_instance_domain(
            InDomId(7),
            vec![(InstanceId(1), "1 minute".to_string()), (InstanceId(5), "5 minute".to_string())],
        );
        w.write_record(
            Timestamp::from_secs(100),
            &[
                (MetricId(1), InstanceId(1), 1.0),
                (MetricId(1), InstanceId(5), 0.5),
                (MetricId(2), InstanceId::NULL, 4.0),
            ],
        )
        .unwrap();
        w.write_record(
            Timestamp::from_secs(110),
            &[(MetricId(1), InstanceId(1), 3.0), (MetricId(1), InstanceId(5), 1.5)],
        )
        .unwrap();
        w.finish().unwrap()
    }

    #[test]
    fn test_archive_base() {
        assert_eq!(archive_base(Path::new("/a/b.meta")), PathBuf::from("/a/b"));
        assert_eq!(archive_base(Path::new("/a/b.0")), PathBuf::from("/a/b"));
        assert_eq!(archive_base(Path::new("/a/b")), PathBuf::from("/a/b"));
        assert_eq!(with_suffix(Path::new("/a/b.x"), ".meta"), PathBuf::from("/a/b.x.meta"));
    }

    #[test]
    fn test_write_then_open() {
        let dir = TempDir::new().unwrap();
        let base = build(dir.path());
        let src = ArchiveSource::open(with_suffix(&base, META_SUFFIX)).unwrap();

        assert_eq!(
            src.time_bounds(),
            Some((Timestamp::from_secs(100), Timestamp::from_secs(110)))
        );
        assert_eq!(src.lookup_name("hinv.ncpu").unwrap(), MetricId(2));
        assert_eq!(src.name_of(MetricId(1)).unwrap(), "kernel.all.load");
        assert!(src.lookup_name("nope").unwrap_err().is_not_found());
        assert_eq!(
            src.lookup_text(MetricId(2), TextKind::Help).unwrap(),
            "number of CPUs"
        );
        assert!(src.lookup_text(MetricId(2), TextKind::OneLine).is_err());
        assert_eq!(
            src.lookup_instance(InDomId(7), "5 minute").unwrap(),
            InstanceId(5)
        );
        assert_eq!(
            src.instance_name(InDomId(7), InstanceId(1)).unwrap(),
            "1 minute"
        );
    }

    #[test]
    fn test_traverse_order_and_prefix() {
        let dir = TempDir::new().unwrap();
        let src = ArchiveSource::open(build(dir.path())).unwrap();

        let mut all = Vec::new();
        src.traverse("", &mut |n| all.push(n.to_string())).unwrap();
        assert_eq!(all, vec!["hinv.ncpu", "kernel.all.load"]);

        let mut kernel = Vec::new();
        src.traverse("kernel", &mut |n| kernel.push(n.to_string()))
            .unwrap();
        assert_eq!(kernel, vec!["kernel.all.load"]);

        let mut partial = Vec::new();
        src.traverse("kern", &mut |n| partial.push(n.to_string()))
            .unwrap();
        assert!(partial.is_empty());
    }

    #[test]
    fn test_interpolated_fetch() {
        let dir = TempDir::new().unwrap();
        let src = ArchiveSource::open(build(dir.path())).unwrap();

        let result = src
            .fetch(&[MetricId(1), MetricId(2)], Some(Timestamp::from_secs(105)))
            .unwrap();
        assert_eq!(result.timestamp, Timestamp::from_secs(105));
        assert_eq!(
            result.find(MetricId(1), InstanceId(1)),
            Some(&AtomValue::Float(2.0))
        );
        assert_eq!(
            result.find(MetricId(1), InstanceId(5)),
            Some(&AtomValue::Float(1.0))
        );
        // discrete: held from t=100
        assert_eq!(
            result.find(MetricId(2), InstanceId::NULL),
            Some(&AtomValue::U32(4))
        );
    }

    #[test]
    fn test_missing_volume_is_bind_failure() {
        let dir = TempDir::new().unwrap();
        let base = build(dir.path());
        std::fs::remove_file(with_suffix(&base, VOLUME_SUFFIX)).unwrap();
        assert!(matches!(
            ArchiveSource::open(&base),
            Err(BridgeError::BindFailure(_))
        ));
    }

    #[test]
    fn test_corrupt_volume_is_backend_unavailable() {
        let dir = TempDir::new().unwrap();
        let base = build(dir.path());
        let volume = with_suffix(&base, VOLUME_SUFFIX);
        let mut bytes = std::fs::read(&volume).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&volume, bytes).unwrap();

        let src = ArchiveSource::open(&base).unwrap();
        assert!(matches!(
            src.fetch(&[MetricId(1)], None),
            Err(BridgeError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_oversized_record_count_is_truncation() {
        let dir = TempDir::new().unwrap();
        let base = build(dir.path());
        let volume = with_suffix(&base, VOLUME_SUFFIX);
        let mut bytes = std::fs::read(&volume).unwrap();
        // header (12) + timestamp (8): the first record's count field
        bytes[20..24].copy_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&volume, &bytes).unwrap();

        assert!(matches!(
            read_volume(&volume),
            Err(FormatError::Truncated { record: 0 })
        ));
        let src = ArchiveSource::open(&base).unwrap();
        assert!(matches!(
            src.fetch(&[MetricId(1)], None),
            Err(BridgeError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_count_past_end_of_file_is_truncation() {
        let dir = TempDir::new().unwrap();
        let base = build(dir.path());
        let volume = with_suffix(&base, VOLUME_SUFFIX);
        let mut bytes = std::fs::read(&volume).unwrap();
        // One sample more than the record holds.
        let count = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        bytes[20..24].copy_from_slice(&(count + 100).to_le_bytes());
        std::fs::write(&volume, &bytes).unwrap();

        assert!(matches!(
            read_volume(&volume),
            Err(FormatError::Truncated { record: 0 })
        ));
    }
}
