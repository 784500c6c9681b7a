use super::cluster::Member;
use thiserror::Error;

/// Observes and changes the membership of the running cluster.
pub trait ClusterMembership {
    fn members(&self) -> Result<Vec<Member>, MembershipError>;

    /// Registers a new member by its peer URL. The member won't have a name until it starts.
    fn add_member(&self, peer_url: &str) -> Result<(), MembershipError>;

    fn remove_member(&self, peer_url: &str) -> Result<(), MembershipError>;
}

#[derive(Error, Debug)]
pub enum MembershipError {
    #[error("request to {endpoint} failed")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} responded with {status}: {body}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("unable to decode response from {endpoint}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no member has peer url {0}")]
    UnknownMember(String),
    #[error("no etcd endpoints are configured")]
    NoEndpoints,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
