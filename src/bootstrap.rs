use super::{
    cluster::Instance,
    flags::{ClusterState, EtcdFlags},
    inventory::CloudInventory,
    membership::{ClusterMembership, MembershipError},
};
use std::{
    collections::HashSet,
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const FLAGS_FILE_HEADER: &str = "# created by etcd-bootstrap\n";

#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to list etcd members")]
    MembershipQuery(#[source] MembershipError),
    #[error("unable to add local instance {peer_url} to the etcd member list")]
    MembershipMutation {
        peer_url: String,
        #[source]
        source: MembershipError,
    },
    #[error("unable to write {}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Generates the etcd configuration for the local instance, adjusting the cluster's membership to
/// match the inventory when joining a running cluster.
///
/// Nothing is kept between runs. The inventory is read once per run and the cluster is asked for
/// its members whenever a decision depends on them.
pub struct Bootstrapper<'a> {
    logger: slog::Logger,
    inventory: &'a dyn CloudInventory,
    cluster: &'a dyn ClusterMembership,
}

impl<'a> Bootstrapper<'a> {
    pub fn new(
        logger: slog::Logger,
        inventory: &'a dyn CloudInventory,
        cluster: &'a dyn ClusterMembership,
    ) -> Self {
        Self {
            logger,
            inventory,
            cluster,
        }
    }

    /// Decides how the local instance should start and returns the rendered etcd environment.
    pub fn generate_flags(&self) -> Result<String, Error> {
        info!(self.logger, "generating etcd cluster flags");

        let instances = self.inventory.instances();
        let local = self.inventory.local_instance();

        let state = self.decide_state(&local)?;
        let available_peer_urls = match state {
            ClusterState::New => instances.iter().map(Instance::peer_url).collect(),
            ClusterState::Existing => {
                self.reconcile_members(&instances, &local)?;
                self.member_peer_urls()?
            }
        };

        Ok(EtcdFlags {
            state,
            available_peer_urls: &available_peer_urls,
            instances: &instances,
            local: &local,
        }
        .render())
    }

    /// Classifies the cluster from the point of view of the local instance.
    pub fn decide_state(&self, local: &Instance) -> Result<ClusterState, Error> {
        let members = self.cluster.members().map_err(Error::MembershipQuery)?;
        if members.is_empty() {
            info!(
                self.logger,
                "no cluster found - treating as an initial node in a new cluster"
            );
            return Ok(ClusterState::New);
        }

        let local_peer_url = local.peer_url();
        if members
            .iter()
            .any(|m| m.peer_url == local_peer_url && m.is_started())
        {
            // The cluster may not have fully bootstrapped yet. etcd ignores the initial cluster
            // flags once it has, so this can't hurt a running cluster.
            info!(
                self.logger,
                "node peer url already exists - treating as an existing node in a new cluster";
                "peer_url" => &local_peer_url
            );
            return Ok(ClusterState::New);
        }

        info!(self.logger, "node does not exist yet in cluster - joining as a new node"; "peer_url" => &local_peer_url);
        Ok(ClusterState::Existing)
    }

    /// Removes members that aren't in the inventory, then adds the local instance if the cluster
    /// doesn't know about it. Removals must happen first so the cluster never grows beyond what its
    /// quorum can tolerate.
    pub fn reconcile_members(&self, instances: &[Instance], local: &Instance) -> Result<(), Error> {
        self.remove_old_members(instances)?;
        self.add_local_instance(local)
    }

    fn remove_old_members(&self, instances: &[Instance]) -> Result<(), Error> {
        let instance_peer_urls: HashSet<_> = instances.iter().map(Instance::peer_url).collect();

        for member in self.cluster.members().map_err(Error::MembershipQuery)? {
            if instance_peer_urls.contains(&member.peer_url) {
                continue;
            }
            info!(
                self.logger,
                "removing {} from etcd member list, not found in inventory", member.peer_url
            );
            if let Err(e) = self.cluster.remove_member(&member.peer_url) {
                // Every stale member gets an attempt even if an earlier one failed.
                warn!(
                    self.logger,
                    "unable to remove old member, this may be due to a temporary lack of quorum; ignoring: {}",
                    e;
                    "peer_url" => &member.peer_url
                );
            }
        }

        Ok(())
    }

    fn add_local_instance(&self, local: &Instance) -> Result<(), Error> {
        let local_peer_url = local.peer_url();
        if self.member_peer_urls()?.contains(&local_peer_url) {
            debug!(self.logger, "local instance is already registered"; "peer_url" => &local_peer_url);
            return Ok(());
        }

        info!(
            self.logger,
            "adding local instance {} to the etcd member list", local_peer_url
        );
        self.cluster
            .add_member(&local_peer_url)
            .map_err(|source| Error::MembershipMutation {
                peer_url: local_peer_url,
                source,
            })
    }

    fn member_peer_urls(&self) -> Result<HashSet<String>, Error> {
        Ok(self
            .cluster
            .members()
            .map_err(Error::MembershipQuery)?
            .into_iter()
            .map(|m| m.peer_url)
            .collect())
    }
}

/// Writes the flags to the given path so they can be sourced by startup scripts. The file is
/// replaced atomically, so readers never see a partially written file.
pub fn write_flags_file<P: AsRef<Path>>(path: P, flags: &str) -> Result<(), Error> {
    let path = path.as_ref();

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let result = write_and_rename(&tmp_path, path, flags);
    if result.is_err() {
        // the temporary file may not exist if creating it is what failed
        let _ = std::fs::remove_file(&tmp_path);
    }
    result.map_err(|source| Error::Output {
        path: path.to_path_buf(),
        source,
    })
}

fn write_and_rename(tmp_path: &Path, path: &Path, flags: &str) -> io::Result<()> {
    {
        let mut f = std::fs::File::create(tmp_path)?;
        f.write_all(FLAGS_FILE_HEADER.as_bytes())?;
        f.write_all(flags.as_bytes())?;
        f.sync_all()?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp_path, std::fs::Permissions::from_mode(0o644))?;
    }

    std::fs::rename(tmp_path, path)
}
