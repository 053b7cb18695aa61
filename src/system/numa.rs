//! NUMA topology and huge-page control files
//!
//! Huge pages are reserved per NUMA node through
//! `/sys/devices/system/node/node<N>/hugepages/hugepages-<size>kB/nr_hugepages`.
//! This module knows where those files live, how to read them, and how to
//! summarize the host's NUMA layout for the `status` report.

use crate::error::{HostPrepError, Result};
use std::path::{Path, PathBuf};

/// Root of the per-node sysfs tree
pub const NODE_SYSFS_ROOT: &str = "/sys/devices/system/node";

/// Default huge-page size (2 MiB)
pub const DEFAULT_HUGEPAGE_SIZE_KB: u64 = 2048;

/// Control file holding the huge-page reservation for one node
pub fn hugepage_control_path(node: u32, page_size_kb: u64) -> PathBuf {
    Path::new(NODE_SYSFS_ROOT)
        .join(format!("node{}", node))
        .join("hugepages")
        .join(format!("hugepages-{}kB", page_size_kb))
        .join("nr_hugepages")
}

/// Parse the content of an `nr_hugepages` file
pub fn parse_nr_hugepages(text: &str) -> Result<u64> {
    let value = text.trim();
    value.parse::<u64>().map_err(|_| {
        HostPrepError::parse("nr_hugepages", 1, format!("expected a page count, got '{}'", value))
    })
}

/// NUMA node information
#[derive(Debug, Clone)]
pub struct NumaNode {
    /// Node ID
    pub id: u32,
    /// CPUs belonging to this node
    pub cpus: Vec<usize>,
    /// Reserved huge pages of the default size, if readable
    pub hugepages: Option<u64>,
}

/// NUMA topology information
#[derive(Debug, Clone, Default)]
pub struct NumaTopology {
    /// NUMA nodes, sorted by ID
    pub nodes: Vec<NumaNode>,
}

impl NumaTopology {
    /// Detect NUMA topology from sysfs
    #[cfg(target_os = "linux")]
    pub fn detect(page_size_kb: u64) -> Self {
        let mut nodes = Vec::new();

        if let Ok(entries) = std::fs::read_dir(NODE_SYSFS_ROOT) {
            for entry in entries.filter_map(|e| e.ok()) {
                let name = entry.file_name();
                let name_str = name.to_string_lossy();

                if let Some(id) = name_str.strip_prefix("node").and_then(|n| n.parse::<u32>().ok()) {
                    let cpus = std::fs::read_to_string(entry.path().join("cpulist"))
                        .map(|content| parse_cpu_list(content.trim()))
                        .unwrap_or_default();
                    let hugepages = std::fs::read_to_string(hugepage_control_path(id, page_size_kb))
                        .ok()
                        .and_then(|content| parse_nr_hugepages(&content).ok());

                    nodes.push(NumaNode { id, cpus, hugepages });
                }
            }
        }

        nodes.sort_by_key(|n| n.id);
        Self { nodes }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn detect(_page_size_kb: u64) -> Self {
        Self::default()
    }

    /// Print NUMA topology summary
    pub fn print_summary(&self, page_size_kb: u64) {
        println!("NUMA Topology:");
        println!("  Nodes: {}", self.nodes.len());

        for node in &self.nodes {
            let pages = match node.hugepages {
                Some(pages) => format!(
                    "{} x {}kB ({})",
                    pages,
                    page_size_kb,
                    humansize::format_size(pages * page_size_kb * 1024, humansize::BINARY)
                ),
                None => "unavailable".to_string(),
            };
            println!("  Node {}:", node.id);
            println!("    CPUs: {:?}", node.cpus);
            println!("    Hugepages: {}", pages);
        }
    }
}

/// Parse CPU list format (e.g., "0-3,8-11" -> [0,1,2,3,8,9,10,11])
fn parse_cpu_list(s: &str) -> Vec<usize> {
    let mut cpus = Vec::new();

    for part in s.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                cpus.extend(start..=end);
            }
        } else if let Ok(cpu) = part.parse::<usize>() {
            cpus.push(cpu);
        }
    }

    cpus
}

/// System-wide huge-page counters from `/proc/meminfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct HugepageSummary {
    /// Pages reserved across all nodes
    pub total: u64,
    /// Pages not yet handed out
    pub free: u64,
    /// Default page size in bytes
    pub page_size: u64,
}

impl HugepageSummary {
    /// Read the system counters
    #[cfg(target_os = "linux")]
    pub fn collect() -> Option<Self> {
        use procfs::Current;

        let meminfo = procfs::Meminfo::current().ok()?;
        Some(Self {
            total: meminfo.hugepages_total?,
            free: meminfo.hugepages_free?,
            page_size: meminfo.hugepagesize?,
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn collect() -> Option<Self> {
        None
    }

    /// Print the counters
    pub fn print_summary(&self) {
        println!("Hugepages (system):");
        println!("  Total: {}", self.total);
        println!("  Free:  {}", self.free);
        println!(
            "  Size:  {}",
            humansize::format_size(self.page_size, humansize::BINARY)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_path() {
        assert_eq!(
            hugepage_control_path(1, 2048),
            PathBuf::from("/sys/devices/system/node/node1/hugepages/hugepages-2048kB/nr_hugepages")
        );
        assert_eq!(
            hugepage_control_path(0, 1048576),
            PathBuf::from("/sys/devices/system/node/node0/hugepages/hugepages-1048576kB/nr_hugepages")
        );
    }

    #[test]
    fn test_parse_nr_hugepages() {
        assert_eq!(parse_nr_hugepages("1024\n").unwrap(), 1024);
        assert_eq!(parse_nr_hugepages("  0 ").unwrap(), 0);
        assert!(parse_nr_hugepages("").is_err());
        assert!(parse_nr_hugepages("-1").is_err());
    }

    #[test]
    fn test_cpu_list_parsing() {
        assert_eq!(parse_cpu_list("0-3"), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpu_list("0,2,4"), vec![0, 2, 4]);
        assert_eq!(parse_cpu_list("0-2,4-6"), vec![0, 1, 2, 4, 5, 6]);
        assert!(parse_cpu_list("").is_empty());
    }

    #[test]
    fn test_topology_nodes_sorted() {
        let topology = NumaTopology::detect(DEFAULT_HUGEPAGE_SIZE_KB);
        assert!(topology.nodes.windows(2).all(|w| w[0].id < w[1].id));
    }
}
