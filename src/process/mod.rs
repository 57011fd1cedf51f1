use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::prelude::*;

mod host;
mod interfaces;
mod ps;

pub use host::HostProvider;
pub use interfaces::{HostInfo, ProcessSnapshot, ProcessStatus};
pub use ps::PsProvider;

pub const PS_TYPE: &str = "ps";
pub const PSUTIL_TYPE: &str = "psutil";

/// Produces the process snapshots for "right now".
///
/// Implementations skip processes that cannot be read (a process exiting mid-enumeration is
/// common) instead of failing the whole batch.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    fn collection_type(&self) -> ProcessCollectionType;

    async fn collect(&self) -> Result<Vec<ProcessSnapshot>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessCollectionType {
    /// Parses the output of the `ps` command line tool
    Ps,
    /// Reads the process table through the host API
    Psutil,
}

impl FromStr for ProcessCollectionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            PS_TYPE => Ok(ProcessCollectionType::Ps),
            PSUTIL_TYPE => Ok(ProcessCollectionType::Psutil),
            _ => bail!("Process collection type not supported: {s:?}"),
        }
    }
}

impl Display for ProcessCollectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessCollectionType::Ps => write!(f, "{PS_TYPE}"),
            ProcessCollectionType::Psutil => write!(f, "{PSUTIL_TYPE}"),
        }
    }
}

/// Resolve a configured collection type to a provider, unknown types fail here rather than
/// on every collection.
pub fn create_provider(collection_type: &str) -> Result<Arc<dyn SnapshotProvider>> {
    let provider: Arc<dyn SnapshotProvider> = match collection_type.parse()? {
        ProcessCollectionType::Ps => Arc::new(PsProvider::new()),
        ProcessCollectionType::Psutil => Arc::new(HostProvider::new()),
    };
    debug!("Using the {} process collector", provider.collection_type());
    Ok(provider)
}
