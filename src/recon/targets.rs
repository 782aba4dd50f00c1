//! Chain root: the upstream port mapping.
//!
//! Port discovery happens outside this crate. Its result is a JSON mapping
//! of address to protocol to ports, e.g.
//! `{"10.10.10.5": {"tcp": ["22", "80"]}}`. The root task registers every
//! address as a target and materialises the mapping under
//! `<results_dir>/targets-results/ports.json` for the scan to read.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::core::params::TargetListParams;
use crate::core::task::{ReconTask, TaskContext, TaskError};
use crate::core::types::{ResultTable, TaskKind};

/// File name of the materialised mapping.
pub const PORTS_FILE: &str = "ports.json";

/// Transport protocol of a port set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Scan-type flag: connect scan for TCP, UDP scan otherwise.
    pub fn scan_flag(&self) -> &'static str {
        match self {
            Protocol::Tcp => "-sT",
            Protocol::Udp => "-sU",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u16),
    Text(String),
}

fn deserialize_ports<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeSet<u16>, D::Error> {
    let raw: Vec<RawPort> = Vec::deserialize(deserializer)?;
    raw.into_iter()
        .map(|port| match port {
            RawPort::Number(n) => Ok(n),
            RawPort::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", s))),
        })
        .collect()
}

struct ProtocolPorts(BTreeSet<u16>);

impl<'de> Deserialize<'de> for ProtocolPorts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_ports(deserializer).map(ProtocolPorts)
    }
}

/// Address → protocol → ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortMap(BTreeMap<String, BTreeMap<Protocol, BTreeSet<u16>>>);

impl<'de> Deserialize<'de> for PortMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: BTreeMap<String, BTreeMap<Protocol, ProtocolPorts>> =
            BTreeMap::deserialize(deserializer)?;
        Ok(PortMap(
            raw.into_iter()
                .map(|(address, protocols)| {
                    (
                        address,
                        protocols.into_iter().map(|(p, ports)| (p, ports.0)).collect(),
                    )
                })
                .collect(),
        ))
    }
}

impl PortMap {
    /// Add `port` for `address` and `protocol`.
    pub fn insert(&mut self, address: impl Into<String>, protocol: Protocol, port: u16) {
        self.0
            .entry(address.into())
            .or_default()
            .entry(protocol)
            .or_default()
            .insert(port);
    }

    /// Every non-empty (address, protocol, ports) triple.
    pub fn scans(&self) -> impl Iterator<Item = (&str, Protocol, &BTreeSet<u16>)> {
        self.0.iter().flat_map(|(address, protocols)| {
            protocols
                .iter()
                .filter(|(_, ports)| !ports.is_empty())
                .map(move |(protocol, ports)| (address.as_str(), *protocol, ports))
        })
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read a mapping from a JSON file.
    pub fn load(path: &Path) -> Result<Self, TaskError> {
        let content = std::fs::read_to_string(path).map_err(|e| TaskError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| TaskError::invalid_input(path, e.to_string()))
    }

    /// Write the mapping as JSON.
    pub fn save(&self, path: &Path) -> Result<(), TaskError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TaskError::invalid_input(path, e.to_string()))?;
        std::fs::write(path, json).map_err(|e| TaskError::io(path, e))
    }
}

/// The chain root.
pub struct TargetList {
    params: TargetListParams,
}

impl TargetList {
    pub fn new(params: TargetListParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TargetListParams {
        &self.params
    }
}

#[async_trait]
impl ReconTask for TargetList {
    fn kind(&self) -> TaskKind {
        TaskKind::Targets
    }

    fn params(&self) -> BTreeMap<&'static str, String> {
        self.params.describe()
    }

    fn requires(&self) -> Option<Arc<dyn ReconTask>> {
        None
    }

    fn output_dir(&self) -> PathBuf {
        self.params.output_dir(TaskKind::Targets)
    }

    fn result_table(&self) -> ResultTable {
        ResultTable::Targets
    }

    async fn run(&self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        let source = &self.params.target_file;
        let ports = PortMap::load(source)?;

        // Parse every address before touching the store.
        let mut addresses = Vec::with_capacity(ports.len());
        for address in ports.addresses() {
            let ip: IpAddr = address.parse().map_err(|_| {
                TaskError::invalid_input(source, format!("'{}' is not an IP address", address))
            })?;
            addresses.push(ip);
        }
        for ip in addresses {
            ctx.store.add_target(ip, None).await?;
        }

        let dir = self.output_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TaskError::io(&dir, e))?;
        ports.save(&dir.join(PORTS_FILE))?;

        info!(targets = ports.len(), file = %source.display(), "registered targets");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_map_accepts_strings_and_numbers() {
        let map: PortMap =
            serde_json::from_str(r#"{"10.10.10.5": {"tcp": ["22", 80], "UDP": ["161"]}}"#).unwrap();

        let scans: Vec<_> = map.scans().collect();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].1, Protocol::Tcp);
        assert_eq!(scans[0].2.iter().copied().collect::<Vec<_>>(), vec![22, 80]);
        assert_eq!(scans[1].1, Protocol::Udp);
    }

    #[test]
    fn test_port_map_rejects_bad_ports_and_protocols() {
        assert!(serde_json::from_str::<PortMap>(r#"{"a": {"tcp": ["http"]}}"#).is_err());
        assert!(serde_json::from_str::<PortMap>(r#"{"a": {"tcp": [70000]}}"#).is_err());
        assert!(serde_json::from_str::<PortMap>(r#"{"a": {"sctp": [22]}}"#).is_err());
    }

    #[test]
    fn test_empty_port_sets_are_not_scanned() {
        let map: PortMap = serde_json::from_str(r#"{"10.10.10.5": {"tcp": []}}"#).unwrap();
        assert_eq!(map.scans().count(), 0);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_scan_flags() {
        assert_eq!(Protocol::Tcp.scan_flag(), "-sT");
        assert_eq!(Protocol::Udp.scan_flag(), "-sU");
    }

    #[test]
    fn test_save_then_load_preserves_mapping() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join(PORTS_FILE);
        let mut map = PortMap::default();
        map.insert("10.10.10.5", Protocol::Tcp, 443);
        map.insert("fe80::1", Protocol::Udp, 53);

        map.save(&path).unwrap();

        assert_eq!(PortMap::load(&path).unwrap(), map);
    }
}
