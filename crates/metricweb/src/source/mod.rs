// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metric source binding.
//!
//! A [`MetricSource`] is one bound connection to a metric backend: a live
//! host, a recorded archive, or the local machine. Everything above this
//! module talks to backends only through this trait.
//!
//! # Implementations
//!
//! - [`ArchiveSource`] -- on-disk archive (metadata + volume file)
//! - [`MemorySource`] -- in-memory namespace and samples (tests, live stand-in)

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod archive;
pub mod connector;
pub mod index;
pub mod memory;

pub use archive::{ArchiveSource, ArchiveWriter};
pub use connector::{Connector, HostSpec, SourceFactory, SourceSpec, StandardConnector};
pub use index::SampleIndex;
pub use memory::MemorySource;

/// Backend-assigned metric identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricId(pub u32);

/// Backend-assigned instance-domain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InDomId(pub u32);

/// Instance identifier within an instance domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub i32);

impl InstanceId {
    /// Instance of a metric without an instance domain.
    pub const NULL: InstanceId = InstanceId(-1);
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InDomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    const NANOS_PER_SEC: i64 = 1_000_000_000;

    pub fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(Self::NANOS_PER_SEC))
    }

    /// Whole seconds, truncated toward negative infinity.
    pub fn secs(self) -> i64 {
        self.0.div_euclid(Self::NANOS_PER_SEC)
    }

    pub fn now() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(nanos)
    }
}

/// Storage type of a metric's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    I32,
    U32,
    I64,
    U64,
    Float,
    Double,
    String,
    Aggregate,
    Event,
}

impl MetricType {
    /// Scalar numeric kinds, the only ones eligible for series fetch.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::I32 | Self::U32 | Self::I64 | Self::U64 | Self::Float | Self::Double
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::I32 => "32",
            Self::U32 => "u32",
            Self::I64 => "64",
            Self::U64 => "u64",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Aggregate => "aggregate",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Semantics {
    /// Monotonically non-decreasing between resets.
    Counter,
    Instant,
    Discrete,
}

impl Semantics {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Instant => "instant",
            Self::Discrete => "discrete",
        }
    }
}

/// Scale of the space dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceScale {
    #[default]
    Byte,
    Kbyte,
    Mbyte,
    Gbyte,
    Tbyte,
}

/// Scale of the time dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeScale {
    Nsec,
    Usec,
    Msec,
    #[default]
    Sec,
    Min,
    Hour,
}

/// Dimension and scale per domain (space, time, count).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Units {
    #[serde(default)]
    pub dim_space: i8,
    #[serde(default)]
    pub dim_time: i8,
    #[serde(default)]
    pub dim_count: i8,
    #[serde(default)]
    pub scale_space: SpaceScale,
    #[serde(default)]
    pub scale_time: TimeScale,
    /// Power-of-ten scale of the count dimension.
    #[serde(default)]
    pub scale_count: i8,
}

impl Units {
    /// Dimensionless.
    pub const NONE: Units = Units {
        dim_space: 0,
        dim_time: 0,
        dim_count: 0,
        scale_space: SpaceScale::Byte,
        scale_time: TimeScale::Sec,
        scale_count: 0,
    };

    pub fn count() -> Self {
        Self {
            dim_count: 1,
            ..Self::NONE
        }
    }

    pub fn bytes(scale: SpaceScale) -> Self {
        Self {
            dim_space: 1,
            scale_space: scale,
            ..Self::NONE
        }
    }

    pub fn time(scale: TimeScale) -> Self {
        Self {
            dim_time: 1,
            scale_time: scale,
            ..Self::NONE
        }
    }

    fn space_label(&self) -> &'static str {
        match self.scale_space {
            SpaceScale::Byte => "byte",
            SpaceScale::Kbyte => "Kbyte",
            SpaceScale::Mbyte => "Mbyte",
            SpaceScale::Gbyte => "Gbyte",
            SpaceScale::Tbyte => "Tbyte",
        }
    }

    fn time_label(&self) -> &'static str {
        match self.scale_time {
            TimeScale::Nsec => "nanosec",
            TimeScale::Usec => "microsec",
            TimeScale::Msec => "millisec",
            TimeScale::Sec => "sec",
            TimeScale::Min => "min",
            TimeScale::Hour => "hour",
        }
    }

    fn count_label(&self) -> String {
        if self.scale_count == 0 {
            "count".to_string()
        } else {
            format!("count x 10^{}", self.scale_count)
        }
    }
}

fn push_term(out: &mut Vec<String>, label: String, power: i8) {
    match power.unsigned_abs() {
        0 => {}
        1 => out.push(label),
        p => out.push(format!("{}^{}", label, p)),
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut num = Vec::new();
        let mut den = Vec::new();
        for (label, power) in [
            (self.space_label().to_string(), self.dim_space),
            (self.time_label().to_string(), self.dim_time),
            (self.count_label(), self.dim_count),
        ] {
            if power > 0 {
                push_term(&mut num, label, power);
            } else if power < 0 {
                push_term(&mut den, label, power);
            }
        }
        match (num.is_empty(), den.is_empty()) {
            (true, true) => Ok(()),
            (false, true) => f.write_str(&num.join(" ")),
            (true, false) => write!(f, "/ {}", den.join(" ")),
            (false, false) => write!(f, "{} / {}", num.join(" "), den.join(" ")),
        }
    }
}

/// Metric descriptor. Immutable once fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub metric_type: MetricType,
    pub semantics: Semantics,
    #[serde(default)]
    pub units: Units,
    #[serde(default)]
    pub indom: Option<InDomId>,
}

impl Descriptor {
    pub fn new(metric_type: MetricType, semantics: Semantics) -> Self {
        Self {
            metric_type,
            semantics,
            units: Units::NONE,
            indom: None,
        }
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.units = units;
        self
    }

    pub fn with_indom(mut self, indom: InDomId) -> Self {
        self.indom = Some(indom);
        self
    }
}

/// Help text flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextKind {
    OneLine,
    Help,
}

/// A single decoded value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AtomValue {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Aggregate(Vec<u8>),
}

impl AtomValue {
    /// Build a value of the given type from a stored double.
    pub fn from_f64(metric_type: MetricType, v: f64) -> Option<Self> {
        // Float-to-int `as` casts saturate, which is what archived values want.
        Some(match metric_type {
            MetricType::I32 => Self::I32(v as i32),
            MetricType::U32 => Self::U32(v as u32),
            MetricType::I64 => Self::I64(v as i64),
            MetricType::U64 => Self::U64(v as u64),
            MetricType::Float => Self::Float(v as f32),
            MetricType::Double => Self::Double(v),
            MetricType::String | MetricType::Aggregate | MetricType::Event => return None,
        })
    }

    /// Numeric view; `None` for strings and blobs.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::I32(v) => Some(f64::from(*v)),
            Self::U32(v) => Some(f64::from(*v)),
            Self::I64(v) => Some(*v as f64),
            Self::U64(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::String(_) | Self::Aggregate(_) => None,
        }
    }
}

/// Values of one metric at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSet {
    pub metric: MetricId,
    pub values: Vec<(InstanceId, AtomValue)>,
}

/// Result of one fetch call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub timestamp: Timestamp,
    /// One set per requested metric, in request order.
    pub sets: Vec<ValueSet>,
}

impl FetchResult {
    /// First value recorded for `(metric, inst)`.
    pub fn find(&self, metric: MetricId, inst: InstanceId) -> Option<&AtomValue> {
        self.sets
            .iter()
            .filter(|set| set.metric == metric)
            .flat_map(|set| set.values.iter())
            .find(|(i, _)| *i == inst)
            .map(|(_, v)| v)
    }
}

/// One bound connection to a metric backend.
///
/// Dropping the value disconnects it.
pub trait MetricSource: Send + Sync {
    /// Human-readable description for logs ("archive /x/y", "host foo").
    fn describe(&self) -> String;

    /// Visit every leaf metric name below `prefix` ("" = all), depth-first.
    fn traverse(&self, prefix: &str, visit: &mut dyn FnMut(&str)) -> Result<()>;

    fn lookup_name(&self, name: &str) -> Result<MetricId>;

    /// Reverse lookup of a metric id to one of its names.
    fn name_of(&self, metric: MetricId) -> Result<String>;

    fn lookup_descriptor(&self, metric: MetricId) -> Result<Descriptor>;

    fn lookup_text(&self, metric: MetricId, kind: TextKind) -> Result<String>;

    /// Every `(instance, name)` pair of an instance domain.
    fn instance_domain(&self, indom: InDomId) -> Result<Vec<(InstanceId, String)>>;

    fn instance_name(&self, indom: InDomId, inst: InstanceId) -> Result<String> {
        self.instance_domain(indom)?
            .into_iter()
            .find(|(i, _)| *i == inst)
            .map(|(_, name)| name)
            .ok_or_else(|| BridgeError::not_found("instance", format!("{}[{}]", indom, inst.0)))
    }

    fn lookup_instance(&self, indom: InDomId, name: &str) -> Result<InstanceId> {
        self.instance_domain(indom)?
            .into_iter()
            .find(|(_, n)| n == name)
            .map(|(i, _)| i)
            .ok_or_else(|| BridgeError::not_found("instance", name))
    }

    /// Fetch values. `at = None` asks for the current values; archives
    /// interpret `Some(t)` as an interpolated sample at `t`.
    fn fetch(&self, metrics: &[MetricId], at: Option<Timestamp>) -> Result<FetchResult>;

    /// Recorded time bounds; `None` for live sources.
    fn time_bounds(&self) -> Option<(Timestamp, Timestamp)> {
        None
    }

    /// Best-effort write passthrough.
    fn store(&self, _metric: MetricId, _inst: InstanceId, _value: f64) -> Result<()> {
        Err(BridgeError::Unsupported("store"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_display() {
        let rate = Units {
            dim_space: 1,
            dim_time: -1,
            scale_space: SpaceScale::Kbyte,
            ..Units::NONE
        };
        assert_eq!(rate.to_string(), "Kbyte / sec");
        assert_eq!(Units::count().to_string(), "count");
        assert_eq!(Units::NONE.to_string(), "");
        let per_sec = Units {
            dim_time: -1,
            ..Units::NONE
        };
        assert_eq!(per_sec.to_string(), "/ sec");
    }

    #[test]
    fn test_numeric_types() {
        assert!(MetricType::U64.is_numeric());
        assert!(MetricType::Float.is_numeric());
        assert!(!MetricType::String.is_numeric());
        assert!(!MetricType::Event.is_numeric());
    }

    #[test]
    fn test_timestamp_secs() {
        assert_eq!(Timestamp::from_secs(12).secs(), 12);
        assert_eq!(Timestamp(1_999_999_999).secs(), 1);
        assert_eq!(Timestamp(-1).secs(), -1);
    }

    #[test]
    fn test_find_first_match_wins() {
        let result = FetchResult {
            timestamp: Timestamp::from_secs(1),
            sets: vec![
                ValueSet {
                    metric: MetricId(1),
                    values: vec![
                        (InstanceId(0), AtomValue::Double(1.0)),
                        (InstanceId(0), AtomValue::Double(2.0)),
                    ],
                },
                ValueSet {
                    metric: MetricId(2),
                    values: vec![(InstanceId::NULL, AtomValue::U32(7))],
                },
            ],
        };
        assert_eq!(
            result.find(MetricId(1), InstanceId(0)),
            Some(&AtomValue::Double(1.0))
        );
        assert_eq!(
            result.find(MetricId(2), InstanceId::NULL).and_then(AtomValue::as_f64),
            Some(7.0)
        );
        assert!(result.find(MetricId(3), InstanceId::NULL).is_none());
    }
}
