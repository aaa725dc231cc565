//! Pressure distribution statistics and tier partitions

use serde::{Deserialize, Serialize};

use crate::config::PressureConfig;

use super::node::{FileNode, Tier};

/// Aggregate view of the active files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PressureStats {
    pub total_pressure: f64,
    pub avg_pressure: f64,
    pub max_pressure: f64,
    pub min_pressure: f64,
    pub hot_count: usize,
    pub warm_count: usize,
    pub cold_count: usize,
    pub file_count: usize,
    pub archived_count: usize,
}

/// File ids per tier, each ordered by descending pressure then id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierPartition {
    pub hot: Vec<String>,
    pub warm: Vec<String>,
    pub cold: Vec<String>,
}

/// Order nodes by descending pressure, ties broken by ascending id
pub fn rank_nodes<'a>(nodes: impl Iterator<Item = &'a FileNode>) -> Vec<&'a FileNode> {
    let mut ranked: Vec<&FileNode> = nodes.collect();
    ranked.sort_by(|a, b| {
        b.raw_pressure
            .total_cmp(&a.raw_pressure)
            .then_with(|| a.path.cmp(&b.path))
    });
    ranked
}

pub fn compute_stats<'a>(
    nodes: impl Iterator<Item = &'a FileNode>,
    config: &PressureConfig,
) -> PressureStats {
    let mut stats = PressureStats::default();
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for node in nodes {
        if node.archived {
            stats.archived_count += 1;
            continue;
        }
        stats.file_count += 1;
        stats.total_pressure += node.raw_pressure;
        min = min.min(node.raw_pressure);
        max = max.max(node.raw_pressure);
        match node.tier(config) {
            Tier::Hot => stats.hot_count += 1,
            Tier::Warm => stats.warm_count += 1,
            Tier::Cold => stats.cold_count += 1,
        }
    }

    if stats.file_count > 0 {
        stats.avg_pressure = stats.total_pressure / stats.file_count as f64;
        stats.min_pressure = min;
        stats.max_pressure = max;
    }

    stats
}

pub fn partition<'a>(
    nodes: impl Iterator<Item = &'a FileNode>,
    config: &PressureConfig,
) -> TierPartition {
    let mut parts = TierPartition::default();
    for node in rank_nodes(nodes.filter(|n| !n.archived)) {
        let bucket = match node.tier(config) {
            Tier::Hot => &mut parts.hot,
            Tier::Warm => &mut parts.warm,
            Tier::Cold => &mut parts.cold,
        };
        bucket.push(node.path.clone());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<FileNode> {
        vec![
            FileNode::with_pressure("b.md", 0.9),
            FileNode::with_pressure("a.md", 0.9),
            FileNode::with_pressure("c.md", 0.5),
            FileNode::with_pressure("d.md", 0.1),
        ]
    }

    #[test]
    fn test_stats() {
        let nodes = sample();
        let stats = compute_stats(nodes.iter(), &PressureConfig::default());

        assert!((stats.total_pressure - 2.4).abs() < 1e-12);
        assert!((stats.avg_pressure - 0.6).abs() < 1e-12);
        assert_eq!(stats.max_pressure, 0.9);
        assert_eq!(stats.min_pressure, 0.1);
        assert_eq!((stats.hot_count, stats.warm_count, stats.cold_count), (2, 1, 1));
    }

    #[test]
    fn test_stats_empty() {
        let stats = compute_stats(std::iter::empty(), &PressureConfig::default());
        assert_eq!(stats, PressureStats::default());
    }

    #[test]
    fn test_partition_orders_by_pressure_then_id() {
        let nodes = sample();
        let parts = partition(nodes.iter(), &PressureConfig::default());

        assert_eq!(parts.hot, vec!["a.md", "b.md"]);
        assert_eq!(parts.warm, vec!["c.md"]);
        assert_eq!(parts.cold, vec!["d.md"]);
    }

    #[test]
    fn test_archived_files_are_left_out() {
        let mut nodes = sample();
        nodes[0].archived = true;
        let config = PressureConfig::default();

        let parts = partition(nodes.iter(), &config);
        assert_eq!(parts.hot, vec!["a.md"]);

        let stats = compute_stats(nodes.iter(), &config);
        assert_eq!(stats.file_count, 3);
        assert_eq!(stats.archived_count, 1);
    }
}
