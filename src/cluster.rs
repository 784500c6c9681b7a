use serde::Deserialize;

pub const PEER_PORT: u16 = 2380;
pub const CLIENT_PORT: u16 = 2379;
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// A cloud-managed machine that is expected to run a cluster member.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Instance {
    pub id: String,
    pub private_address: String,
}

impl Instance {
    pub fn new<I: Into<String>, A: Into<String>>(id: I, private_address: A) -> Self {
        Self {
            id: id.into(),
            private_address: private_address.into(),
        }
    }

    pub fn peer_url(&self) -> String {
        peer_url(&self.private_address)
    }

    pub fn client_url(&self) -> String {
        client_url(&self.private_address)
    }
}

/// A node that the cluster currently knows about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    /// Empty until the member has started and completed its join.
    pub name: String,
    pub peer_url: String,
}

impl Member {
    pub fn new<N: Into<String>, U: Into<String>>(name: N, peer_url: U) -> Self {
        Self {
            name: name.into(),
            peer_url: peer_url.into(),
        }
    }

    /// Returns true if the member has finished joining. Members that have only been registered
    /// via an add call don't have a name yet.
    pub fn is_started(&self) -> bool {
        !self.name.is_empty()
    }
}

pub fn peer_url(address: &str) -> String {
    format!("http://{}:{}", address, PEER_PORT)
}

pub fn client_url(address: &str) -> String {
    format!("http://{}:{}", address, CLIENT_PORT)
}
