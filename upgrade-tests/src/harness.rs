// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Everything a test body needs to exercise one upgrade path

use crate::cluster::ClusterControl;
use crate::config::SessionConfig;
use crate::digest::DigestChecker;
use crate::driver::QuerySession;
use crate::errors::UpgradeTestError;
use crate::rolling::check_node_family;
use crate::rolling::wait_for_node_ready;
use crate::rolling::OrchestrationFailure;
use crate::rolling::RollingUpgrade;
use slog::{info, o, Logger};
use upgrade_manifest::UpgradePath;

/// Handed to [`crate::UpgradeTest::run()`] for one test case
///
/// The harness holds the only mutable reference to the case's cluster for as
/// long as the test body runs.
pub struct UpgradeHarness<'a> {
    log: Logger,
    path: &'a UpgradePath,
    cluster: &'a mut dyn ClusterControl,
    session: SessionConfig,
}

impl<'a> UpgradeHarness<'a> {
    pub fn new(
        log: &Logger,
        path: &'a UpgradePath,
        cluster: &'a mut dyn ClusterControl,
        session: SessionConfig,
    ) -> UpgradeHarness<'a> {
        UpgradeHarness {
            log: log.new(o!("path" => path.name().to_owned())),
            path,
            cluster,
            session,
        }
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn path(&self) -> &UpgradePath {
        self.path
    }

    /// Bring up the cluster on the path's starting release and connect to it
    ///
    /// Returns once every node is ready and runs the starting family.  The
    /// session's coordinator is the first node.
    pub async fn prepare(
        &mut self,
    ) -> Result<Box<dyn QuerySession>, UpgradeTestError> {
        self.prepare_cluster().await.map_err(|failure| {
            UpgradeTestError::Orchestration {
                path: self.path.name().to_owned(),
                failure,
                earlier: Vec::new(),
            }
        })
    }

    async fn prepare_cluster(
        &mut self,
    ) -> Result<Box<dyn QuerySession>, OrchestrationFailure> {
        let starting = self.path.starting();
        info!(self.log, "provisioning cluster"; "version" => %starting);
        self.cluster.provision(starting).await.map_err(|err| {
            OrchestrationFailure::Provision {
                version: starting.to_string(),
                err,
            }
        })?;

        let nodes = self.cluster.nodes();
        let Some(first) = nodes.first() else {
            return Err(OrchestrationFailure::EmptyCluster);
        };
        for node in &nodes {
            wait_for_node_ready(&*self.cluster, node, 0, &self.session.rolling)
                .await?;
            check_node_family(&*self.cluster, node, 0, starting.family).await?;
        }
        info!(self.log, "cluster ready"; "nodes" => nodes.len());

        self.cluster.connect(first).await.map_err(|err| {
            OrchestrationFailure::Connect { step: 0, node: first.clone(), err }
        })
    }

    /// Start a rolling upgrade of this case's cluster to the target release
    pub fn rolling_upgrade(&mut self) -> RollingUpgrade<'_> {
        RollingUpgrade::new(
            &self.log,
            &mut *self.cluster,
            self.path,
            self.session.rolling.clone(),
        )
    }

    pub fn digest_checker(&self) -> DigestChecker {
        DigestChecker::new(&self.log, self.session.trace.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{SimCluster, SimConfig, SimFault};
    use assert_matches::assert_matches;
    use upgrade_manifest::{
        generate, Environment, Family, GenerateOptions, Manifest,
    };
    use upgrade_test_utils::dev::test_setup_log;

    fn first_path(log: &Logger) -> UpgradePath {
        let manifest = Manifest::builtin().unwrap();
        let env = Environment::new(Family::new(3, 11));
        generate(log, &manifest, &env, &GenerateOptions::new(Family::new(3, 0)))
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_waits_for_every_node() {
        let logctx = test_setup_log("test_prepare_waits_for_every_node");
        let path = first_path(&logctx.log);
        let mut cluster =
            SimCluster::new(&logctx.log, SimConfig::new(3).with_ready_after(4));
        let observer = cluster.observer();

        let mut harness = UpgradeHarness::new(
            &logctx.log,
            &path,
            &mut cluster,
            SessionConfig::default(),
        );
        let session = harness.prepare().await.unwrap();
        assert_eq!(session.node().as_str(), "node1");
        assert_eq!(observer.nodes_on(path.starting().family), 3);
        assert_eq!(observer.nodes_ready(), 3);
        logctx.cleanup_successful();
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_reports_provision_failure() {
        let logctx = test_setup_log("test_prepare_reports_provision_failure");
        let path = first_path(&logctx.log);
        let mut cluster = SimCluster::new(
            &logctx.log,
            SimConfig::new(3).with_fault(SimFault::ProvisionFails),
        );
        let mut harness = UpgradeHarness::new(
            &logctx.log,
            &path,
            &mut cluster,
            SessionConfig::default(),
        );
        let error = harness.prepare().await.err().expect("prepare should fail");
        assert_matches!(
            error,
            UpgradeTestError::Orchestration {
                ref path,
                failure: OrchestrationFailure::Provision { .. },
                ref earlier,
            } => {
                assert!(earlier.is_empty());
                assert_eq!(path, harness.path().name());
            }
        );
        logctx.cleanup_successful();
    }
}
