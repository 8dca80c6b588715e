//! HTTP gossip transport.
//!
//! [`HttpGossip`] reaches other coordinators through their cluster API:
//! a push is `POST /cluster/merge` and a pull is `GET /cluster/status`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use vigil_cluster::{ClusterError, GossipTransport};
use vigil_types::{Node, NodeId};

/// Default request timeout for gossip exchanges.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
struct MergeReply {
    adopted: usize,
}

/// Gossip transport over the peers' HTTP API.
#[derive(Debug, Clone)]
pub struct HttpGossip {
    client: reqwest::Client,
}

impl HttpGossip {
    /// Create a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ClusterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClusterError::InvalidConfiguration(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    fn url(peer: &str, path: &str) -> String {
        if peer.starts_with("http://") {
            format!("{}{path}", peer.trim_end_matches('/'))
        } else {
            format!("http://{peer}{path}")
        }
    }
}

fn unreachable(peer: &str, e: impl std::fmt::Display) -> ClusterError {
    ClusterError::PeerUnreachable {
        peer: peer.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait::async_trait]
impl GossipTransport for HttpGossip {
    async fn push(&self, peer: &str, nodes: Vec<Node>) -> Result<usize, ClusterError> {
        let body: BTreeMap<NodeId, Node> = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        let reply: MergeReply = self
            .client
            .post(Self::url(peer, "/cluster/merge"))
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| unreachable(peer, e))?
            .json()
            .await
            .map_err(|e| unreachable(peer, e))?;
        Ok(reply.adopted)
    }

    async fn pull(&self, peer: &str) -> Result<Vec<Node>, ClusterError> {
        let status: BTreeMap<NodeId, Node> = self
            .client
            .get(Self::url(peer, "/cluster/status"))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| unreachable(peer, e))?
            .json()
            .await
            .map_err(|e| unreachable(peer, e))?;
        Ok(status.into_values().collect())
    }
}
