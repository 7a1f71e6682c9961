// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request planning on top of the enumerator: render-style target expansion
//! with window/step selection, and one-level tree browsing.

use crate::config::BridgeConfig;
use crate::enumerate::Enumerator;
use crate::error::{BridgeError, Result};
use crate::fetch::TimeWindow;
use crate::timespec::parse_timespec;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Default start of a render window.
pub const DEFAULT_FROM: &str = "-24hour";
/// Default end of a render window.
pub const DEFAULT_UNTIL: &str = "-0hour";

/// Parameters of a render request.
#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
    /// Target patterns; wildcards allowed.
    pub targets: Vec<String>,
    pub from: Option<String>,
    pub until: Option<String>,
    /// Upper bound on points per series; `None` or 0 uses the configured limit.
    pub max_data_points: Option<u64>,
}

/// Expanded targets plus the window to fetch them over.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    pub targets: Vec<String>,
    pub window: TimeWindow,
}

fn dots(s: &str) -> usize {
    s.bytes().filter(|&b| b == b'.').count()
}

/// Expand every target pattern and choose the window.
///
/// Expanded names wider than their pattern (e.g. `*.*` reaching instance
/// names) are dropped. The step is `default_step_secs`, enlarged so the
/// window holds at most `max_data_points` steps.
pub fn gather(
    enumerator: &Enumerator<'_>,
    config: &BridgeConfig,
    request: &RenderRequest,
    now: i64,
) -> Result<RenderPlan> {
    let mut targets = Vec::new();
    for pattern in &request.targets {
        let width = dots(pattern);
        targets.extend(
            enumerator
                .enumerate(pattern)?
                .into_iter()
                .filter(|name| dots(name) == width),
        );
    }

    let start = parse_timespec(request.from.as_deref().unwrap_or(DEFAULT_FROM), now)?;
    let end = parse_timespec(request.until.as_deref().unwrap_or(DEFAULT_UNTIL), now)?;

    let max_points = request
        .max_data_points
        .filter(|&n| n > 0)
        .unwrap_or(config.max_data_points)
        .max(1) as i64;
    let mut step = config.default_step_secs.max(1) as i64;
    let span = end.checked_sub(start).ok_or_else(|| {
        BridgeError::InvalidWindow(format!("window {}..{} is too wide", start, end))
    })?;
    if span / step > max_points {
        step = span / max_points + 1;
    }

    let window = TimeWindow::new(start, end, step)?;
    debug!(
        targets = targets.len(),
        start,
        end,
        step,
        "planned render request"
    );
    Ok(RenderPlan { targets, window })
}

/// One child in a tree-browse response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub text: String,
    /// Full dotted path of the node.
    pub id: String,
    pub leaf: bool,
    pub expandable: bool,
    pub allow_children: bool,
}

/// Classify the names one level below `query` into leaves and subtrees.
///
/// A piece can be both (a metric `a.b` next to `a.b.c`).
pub fn find_nodes(enumerator: &Enumerator<'_>, query: &str) -> Result<Vec<TreeNode>> {
    if query.is_empty() {
        return Err(BridgeError::InvalidSpec("empty query".into()));
    }
    let depth = dots(query);
    let names = enumerator.enumerate(query)?;

    let mut nodes = BTreeSet::new();
    let mut leaves = BTreeSet::new();
    let mut subtrees = BTreeSet::new();
    let mut common_prefix = String::new();

    for name in &names {
        let pieces: Vec<&str> = name.split('.').collect();
        if pieces.len() <= depth {
            continue;
        }
        if depth > 0 && common_prefix.is_empty() {
            for piece in &pieces[..depth] {
                common_prefix.push_str(piece);
                common_prefix.push('.');
            }
        }
        let piece = pieces[depth];
        if pieces.len() > depth + 1 {
            subtrees.insert(piece);
        } else {
            leaves.insert(piece);
        }
        nodes.insert(piece);
    }

    Ok(nodes
        .into_iter()
        .map(|piece| {
            let expandable = subtrees.contains(piece);
            TreeNode {
                text: piece.to_string(),
                id: format!("{}{}", common_prefix, piece),
                leaf: leaves.contains(piece),
                expandable,
                allow_children: expandable,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownFlag;
    use crate::source::{
        ArchiveWriter, Descriptor, InDomId, InstanceId, MetricId, MetricType, Semantics,
        StandardConnector, Timestamp,
    };
    use std::path::Path;
    use tempfile::TempDir;

    fn write_archive(root: &Path) {
        let mut w = ArchiveWriter::create(root.join("web"), "web").unwrap();
        w.add_metric(
            "net.in.bytes",
            MetricId(1),
            Descriptor::new(MetricType::U64, Semantics::Counter).with_indom(InDomId(1)),
            "",
            "",
        )
        .add_metric(
            "net.up",
            MetricId(2),
            Descriptor::new(MetricType::U32, Semantics::Instant),
            "",
            "",
        )
        .add_instance_domain(
            InDomId(1),
            vec![(InstanceId(0), "eth0".to_string()), (InstanceId(1), "lo".to_string())],
        );
        w.write_record(Timestamp::from_secs(0), &[(MetricId(2), InstanceId::NULL, 1.0)])
            .unwrap();
        w.finish().unwrap();
    }

    #[test]
    fn test_gather_filters_width_and_plans_step() {
        let dir = TempDir::new().unwrap();
        write_archive(dir.path());
        let connector = StandardConnector::new(dir.path());
        let enumerator = Enumerator::new(&connector, ShutdownFlag::new());
        let config = BridgeConfig::default();

        let request = RenderRequest {
            targets: vec!["*.net.*".into()],
            from: Some("-7d".into()),
            until: None,
            max_data_points: None,
        };
        let now = 1_000_000;
        let plan = gather(&enumerator, &config, &request, now).unwrap();
        assert_eq!(plan.targets, vec!["web-2E-meta.net.up"]);
        assert_eq!(plan.window.end, now);
        assert_eq!(plan.window.start, now - 7 * 86_400);
        // 604800 / 60 > 1024: step enlarged
        assert_eq!(plan.window.step, 604_800 / 1024 + 1);
        assert!(plan.window.len() <= 1025);
    }

    #[test]
    fn test_gather_default_step() {
        let dir = TempDir::new().unwrap();
        write_archive(dir.path());
        let connector = StandardConnector::new(dir.path());
        let enumerator = Enumerator::new(&connector, ShutdownFlag::new());
        let request = RenderRequest {
            targets: vec!["*.net.in.bytes.*".into()],
            from: Some("-1hour".into()),
            ..Default::default()
        };
        let plan = gather(&enumerator, &BridgeConfig::default(), &request, 10_000).unwrap();
        assert_eq!(plan.window.step, 60);
        assert_eq!(plan.window.len(), 61);
        assert_eq!(plan.targets.len(), 2);
    }

    #[test]
    fn test_gather_rejects_inverted_window() {
        let dir = TempDir::new().unwrap();
        let connector = StandardConnector::new(dir.path());
        let enumerator = Enumerator::new(&connector, ShutdownFlag::new());
        let request = RenderRequest {
            from: Some("-1hour".into()),
            until: Some("-2hour".into()),
            ..Default::default()
        };
        assert!(matches!(
            gather(&enumerator, &BridgeConfig::default(), &request, 10_000),
            Err(BridgeError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_gather_rejects_overflowing_window() {
        let dir = TempDir::new().unwrap();
        let connector = StandardConnector::new(dir.path());
        let enumerator = Enumerator::new(&connector, ShutdownFlag::new());
        let request = RenderRequest {
            // now - i64::MAX up to i64::MAX
            from: Some(format!("-{}", i64::MAX)),
            until: Some(i64::MAX.to_string()),
            ..Default::default()
        };
        assert!(matches!(
            gather(&enumerator, &BridgeConfig::default(), &request, 10_000),
            Err(BridgeError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_find_nodes() {
        let dir = TempDir::new().unwrap();
        write_archive(dir.path());
        let connector = StandardConnector::new(dir.path());
        let enumerator = Enumerator::new(&connector, ShutdownFlag::new());

        let top = find_nodes(&enumerator, "*").unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].text, "web-2E-meta");
        assert!(top[0].expandable && !top[0].leaf);

        let net = find_nodes(&enumerator, "web-2E-meta.net.*").unwrap();
        let texts: Vec<&str> = net.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["in", "up"]);
        assert_eq!(net[0].id, "web-2E-meta.net.in");
        assert!(net[0].expandable);
        assert!(net[1].leaf && !net[1].expandable);

        assert!(find_nodes(&enumerator, "").is_err());
    }
}
