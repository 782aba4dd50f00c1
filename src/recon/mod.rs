//! The reconnaissance chain: target list, service scan, exploit lookup.

pub mod nmap;
pub mod searchsploit;
pub mod targets;

pub use nmap::{ServiceScan, ServiceScanCommand};
pub use searchsploit::ExploitLookup;
pub use targets::{PortMap, Protocol, TargetList};

use std::sync::Arc;

use crate::core::chain::ChainError;
use crate::core::params::PipelineParams;
use crate::core::task::ReconTask;
use crate::core::types::TaskKind;

/// Build the instance of `kind` for `params`.
pub fn resolve(kind: TaskKind, params: &PipelineParams) -> Arc<dyn ReconTask> {
    match kind {
        TaskKind::Targets => Arc::new(TargetList::new(params.target_list())),
        TaskKind::Nmap => Arc::new(ServiceScan::new(params.service_scan())),
        TaskKind::Searchsploit => Arc::new(ExploitLookup::new(params.exploit_lookup())),
    }
}

/// Build the instance named `name` (a kind or one of its aliases).
pub fn resolve_named(name: &str, params: &PipelineParams) -> Result<Arc<dyn ReconTask>, ChainError> {
    let kind: TaskKind = name.parse()?;
    Ok(resolve(kind, params))
}
