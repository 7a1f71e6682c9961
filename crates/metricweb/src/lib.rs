// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metric web bridge core
//!
//! Exposes performance-metric backends (live hosts, recorded archives, the
//! local machine) to stateless web clients.
//!
//! # Features
//!
//! - **Context registry** -- numbered sessions with sliding poll timeouts,
//!   optional credentials and permanent (never expiring) contexts
//! - **Browsing** -- metric/instance listing and current values per session,
//!   backed by per-session lookup caches
//! - **Archive enumeration** -- glob-style dotted patterns over every archive
//!   below a containment root
//! - **Series fetch** -- parallel, per-archive time-series extraction with
//!   counter-to-rate conversion and per-target diagnostics
//!
//! # Architecture
//!
//! ```text
//! ContextRegistry
//! +-- Session        (bound MetricSource + lookup caches)
//! +-- Connector      (SourceSpec -> MetricSource, containment root)
//!
//! Enumerator   (archives below the root -> dotted names)
//! FetchEngine  (dotted names + TimeWindow -> ValueSeries)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use metricweb::{BridgeConfig, Enumerator, FetchEngine, ShutdownFlag, StandardConnector};
//! use metricweb::query::{gather, RenderRequest};
//!
//! let config = BridgeConfig::builder().archive_root("/var/log/metrics").build();
//! let connector = StandardConnector::new(&config.archive_root);
//! let shutdown = ShutdownFlag::new();
//!
//! let enumerator = Enumerator::new(&connector, shutdown.clone());
//! let request = RenderRequest { targets: vec!["*.kernel.all.load.*".into()], ..Default::default() };
//! let plan = gather(&enumerator, &config, &request, now)?;
//!
//! let engine = FetchEngine::new(&connector, config.fetch_workers, shutdown);
//! let outcome = engine.fetch_all_series(&plan.targets, plan.window)?;
//! ```

pub mod browse;
pub mod codec;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod fetch;
pub mod paths;
pub mod query;
pub mod registry;
pub mod shutdown;
pub mod source;
pub mod timespec;

pub use config::{BridgeConfig, ConfigBuilder, ConfigError};
pub use enumerate::{ComponentMatcher, Enumerator};
pub use error::{BridgeError, Result, SessionId};
pub use fetch::{Diagnostic, FetchEngine, FetchOutcome, TimeWindow, ValueSeries};
pub use registry::{ContextRegistry, Credentials, Session, SessionHandle};
pub use shutdown::ShutdownFlag;
pub use source::{
    ArchiveSource, ArchiveWriter, Connector, Descriptor, MemorySource, MetricSource, SourceSpec,
    StandardConnector,
};
