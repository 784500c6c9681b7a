use super::cluster::{client_url, Instance, LOOPBACK_ADDRESS};
use std::{collections::HashSet, fmt};

/// Tells etcd whether it should form a new cluster or join one that's already running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterState {
    New,
    Existing,
}

impl ClusterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Existing => "existing",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The etcd environment for the local node.
pub struct EtcdFlags<'a> {
    pub state: ClusterState,
    /// Peer URLs that may appear in the initial cluster.
    pub available_peer_urls: &'a HashSet<String>,
    pub instances: &'a [Instance],
    pub local: &'a Instance,
}

impl<'a> EtcdFlags<'a> {
    /// Lists `id=peer_url` for every instance whose peer URL is available, in inventory order.
    pub fn initial_cluster(&self) -> String {
        self.instances
            .iter()
            .filter_map(|instance| {
                let peer_url = instance.peer_url();
                if self.available_peer_urls.contains(&peer_url) {
                    Some(format!("{}={}", instance.id, peer_url))
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Renders the flags as newline separated `KEY=VALUE` pairs, suitable for sourcing as an
    /// environment file.
    pub fn render(&self) -> String {
        let local_peer_url = self.local.peer_url();
        let local_client_url = self.local.client_url();

        let envs = vec![
            format!("ETCD_INITIAL_CLUSTER_STATE={}", self.state),
            format!("ETCD_INITIAL_CLUSTER={}", self.initial_cluster()),
            format!("ETCD_NAME={}", self.local.id),
            format!("ETCD_INITIAL_ADVERTISE_PEER_URLS={}", local_peer_url),
            format!("ETCD_LISTEN_PEER_URLS={}", local_peer_url),
            format!(
                "ETCD_LISTEN_CLIENT_URLS={},{}",
                local_client_url,
                client_url(LOOPBACK_ADDRESS)
            ),
            format!("ETCD_ADVERTISE_CLIENT_URLS={}", local_client_url),
        ];

        envs.join("\n") + "\n"
    }
}
