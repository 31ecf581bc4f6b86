//! The seam to the external content-addressed sync substrate.
//!
//! The engine never talks to a network face directly; everything it needs
//! from the state-vector sync layer is captured by [`SyncTransport`]:
//! reading and advancing the local sequence state, single-attempt fetches,
//! injecting published units, a stream of missing-range notifications and
//! an interest filter for serving hinted recovery fetches.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::broadcast;

use mnemosyne_types::{DataUnit, Name};

/// A contiguous run of sequence numbers some peer holds and we do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRange {
    /// Producer whose records are missing.
    pub node: Name,
    /// First missing sequence (inclusive).
    pub low: u64,
    /// Last missing sequence (inclusive).
    pub high: u64,
}

/// One fetch request.
#[derive(Debug, Clone)]
pub struct Interest {
    /// Requested name.
    pub name: Name,
    /// Whether stored names extending `name` beyond a digest also match.
    pub can_be_prefix: bool,
    /// Forwarding hint; `Some` routes the request through holders that
    /// registered a filter under the hint prefix.
    pub hint: Option<Name>,
}

/// Transport-level fetch failures. Neither is fatal: the missing item
/// reappears with the next sync update.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No data arrived within the attempt's lifetime.
    #[error("fetch timed out for {0}")]
    FetchTimeout(Name),

    /// The network refused the request.
    #[error("fetch rejected for {0}: {1}")]
    Nack(Name, String),
}

/// Handler serving hinted interests out of local state.
pub type InterestHandler =
    Arc<dyn Fn(Interest) -> BoxFuture<'static, Option<DataUnit>> + Send + Sync>;

/// Capabilities the DAG engine consumes from the sync substrate.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// The local state-vector entry for `node`.
    async fn node_seq(&self, node: &Name) -> u64;

    /// Advance the state vector for `node` to `seq` and notify peers.
    async fn announce(&self, node: &Name, seq: u64);

    /// One fetch attempt. Implementations bound the attempt internally or
    /// rely on the caller's timeout.
    async fn fetch(&self, interest: Interest) -> Result<DataUnit, TransportError>;

    /// Inject a published data unit into the substrate.
    async fn put(&self, unit: DataUnit);

    /// Subscribe to missing-range notifications.
    fn subscribe_missing(&self) -> broadcast::Receiver<Vec<MissingRange>>;

    /// Register a handler for interests carrying `prefix` as their hint.
    async fn set_interest_filter(&self, prefix: Name, handler: InterestHandler);
}
