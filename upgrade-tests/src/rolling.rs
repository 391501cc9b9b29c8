// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drive a cluster through a node-by-node rolling upgrade
//!
//! [`RollingUpgrade`] moves a cluster from "every node runs the starting
//! release" to "every node runs the target release", one node at a time.
//! After each step it hands the caller an [`Observation`]: a live session
//! plus a description of where the cluster is in the upgrade.  The next node
//! is not touched until the caller asks for the next observation, so every
//! observation sees a cluster in a well-defined mixed-version state.

use crate::cluster::ClusterControl;
use crate::cluster::ClusterError;
use crate::cluster::NodeId;
use crate::config::ObservationMode;
use crate::config::RollingUpgradeConfig;
use crate::driver::QuerySession;
use slog::{debug, info, o, warn, Logger};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use upgrade_manifest::Family;
use upgrade_manifest::UpgradePath;
use upgrade_test_utils::dev::poll;
use upgrade_test_utils::dev::poll::CondCheckError;

/// How far through the upgrade a cluster is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Composition {
    /// every node runs the starting release
    AllStarting,
    /// this many nodes (at least one, but not all) run the target release
    PartiallyUpgraded(usize),
    /// every node runs the target release
    AllTarget,
}

impl Composition {
    fn new(nupgraded: usize, nnodes: usize) -> Composition {
        if nupgraded == 0 {
            Composition::AllStarting
        } else if nupgraded < nnodes {
            Composition::PartiallyUpgraded(nupgraded)
        } else {
            Composition::AllTarget
        }
    }
}

impl fmt::Display for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Composition::AllStarting => f.write_str("all nodes on starting"),
            Composition::PartiallyUpgraded(n) => {
                write!(f, "{n} node(s) upgraded")
            }
            Composition::AllTarget => f.write_str("all nodes on target"),
        }
    }
}

/// A point in a rolling upgrade at which the caller may query the cluster
pub struct Observation {
    /// number of nodes upgraded so far
    pub step: usize,
    pub composition: Composition,
    /// coordinator of `session`
    pub node: NodeId,
    /// whether `node` runs the target release
    pub is_upgraded: bool,
    pub session: Box<dyn QuerySession>,
}

impl fmt::Debug for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observation")
            .field("step", &self.step)
            .field("composition", &self.composition)
            .field("node", &self.node)
            .field("is_upgraded", &self.is_upgraded)
            .finish_non_exhaustive()
    }
}

/// A rolling upgrade could not be carried out
///
/// Nothing observed after one of these is trustworthy, so the upgrade stops.
#[derive(Debug, Error)]
pub enum OrchestrationFailure {
    #[error("cluster has no nodes")]
    EmptyCluster,

    #[error("failed to provision cluster with {version}")]
    Provision {
        version: String,
        #[source]
        err: ClusterError,
    },

    #[error("step {step}: failed to upgrade node {node} to {version}")]
    Upgrade {
        step: usize,
        node: NodeId,
        version: String,
        #[source]
        err: ClusterError,
    },

    #[error("step {step}: node {node} was not ready after {elapsed:?}")]
    NotReady { step: usize, node: NodeId, elapsed: Duration },

    #[error("step {step}: failed to check whether node {node} is ready")]
    ReadinessCheck {
        step: usize,
        node: NodeId,
        #[source]
        err: ClusterError,
    },

    #[error(
        "step {step}: node {node} runs family {found}, expected {expected}"
    )]
    UnexpectedFamily {
        step: usize,
        node: NodeId,
        expected: Family,
        found: Family,
    },

    #[error("step {step}: failed to query the release running on node {node}")]
    FamilyCheck {
        step: usize,
        node: NodeId,
        #[source]
        err: ClusterError,
    },

    #[error("step {step}: failed to connect to node {node}")]
    Connect {
        step: usize,
        node: NodeId,
        #[source]
        err: ClusterError,
    },
}

/// Wait (bounded by `config`) for `node` to report that it is ready
pub(crate) async fn wait_for_node_ready(
    cluster: &dyn ClusterControl,
    node: &NodeId,
    step: usize,
    config: &RollingUpgradeConfig,
) -> Result<(), OrchestrationFailure> {
    poll::wait_for_condition(
        move || async move {
            match cluster.is_ready(node).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(CondCheckError::NotYet),
                Err(err) => Err(CondCheckError::Failed(err)),
            }
        },
        &config.node_ready_poll_interval_ms,
        &config.node_ready_timeout_secs,
    )
    .await
    .map_err(|error| match error {
        poll::Error::TimedOut(elapsed) => OrchestrationFailure::NotReady {
            step,
            node: node.clone(),
            elapsed,
        },
        poll::Error::PermanentError(err) => {
            OrchestrationFailure::ReadinessCheck {
                step,
                node: node.clone(),
                err,
            }
        }
    })
}

/// Verify that `node` reports running `expected`
pub(crate) async fn check_node_family(
    cluster: &dyn ClusterControl,
    node: &NodeId,
    step: usize,
    expected: Family,
) -> Result<(), OrchestrationFailure> {
    let found = cluster.node_family(node).await.map_err(|err| {
        OrchestrationFailure::FamilyCheck { step, node: node.clone(), err }
    })?;
    if found != expected {
        return Err(OrchestrationFailure::UnexpectedFamily {
            step,
            node: node.clone(),
            expected,
            found,
        });
    }
    Ok(())
}

enum State {
    NotStarted,
    Observing,
    Finished,
    Failed,
}

/// Drives one cluster through a rolling upgrade along one [`UpgradePath`]
///
/// The cluster must already be running the path's starting release on every
/// node (see [`crate::UpgradeHarness::prepare()`]).  Call
/// [`RollingUpgrade::next_step()`] until it returns `Ok(None)`:
///
/// * the first observation is taken before any node is upgraded
/// * each later step upgrades exactly one node, waits for it to become ready,
///   and checks that it runs the target family before anything is observed
/// * the last observation has every node on the target release
///
/// Nodes are upgraded in the order [`ClusterControl::nodes()`] returns them
/// and are never rolled back.  Failures are not retried: the first error is
/// returned and every later call returns `Ok(None)`.
pub struct RollingUpgrade<'a> {
    log: Logger,
    cluster: &'a mut dyn ClusterControl,
    path: &'a UpgradePath,
    config: RollingUpgradeConfig,
    nodes: Vec<NodeId>,
    upgraded: Vec<NodeId>,
    pending: VecDeque<NodeId>,
    state: State,
}

impl<'a> RollingUpgrade<'a> {
    pub fn new(
        log: &Logger,
        cluster: &'a mut dyn ClusterControl,
        path: &'a UpgradePath,
        config: RollingUpgradeConfig,
    ) -> RollingUpgrade<'a> {
        let nodes = cluster.nodes();
        RollingUpgrade {
            log: log.new(o!(
                "component" => "RollingUpgrade",
                "path" => path.name().to_owned(),
            )),
            cluster,
            path,
            config,
            nodes,
            upgraded: Vec::new(),
            pending: VecDeque::new(),
            state: State::NotStarted,
        }
    }

    /// Nodes moved to the target release so far, in upgrade order
    pub fn nodes_upgraded(&self) -> &[NodeId] {
        &self.upgraded
    }

    pub fn composition(&self) -> Composition {
        Composition::new(self.upgraded.len(), self.nodes.len())
    }

    /// Advance to the next observation point, upgrading a node if needed
    ///
    /// Returns `Ok(None)` once every observation has been handed out, and
    /// after any failure.
    pub async fn next_step(
        &mut self,
    ) -> Result<Option<Observation>, OrchestrationFailure> {
        let result = self.advance().await;
        if let Err(error) = &result {
            warn!(self.log, "rolling upgrade failed"; "error" => %error);
            self.state = State::Failed;
        }
        result
    }

    async fn advance(
        &mut self,
    ) -> Result<Option<Observation>, OrchestrationFailure> {
        loop {
            match self.state {
                State::Finished | State::Failed => return Ok(None),
                State::NotStarted => {
                    self.start().await?;
                    self.state = State::Observing;
                }
                State::Observing => {
                    if let Some(node) = self.pending.pop_front() {
                        return self.observe(node).await.map(Some);
                    }
                    if self.upgraded.len() == self.nodes.len() {
                        info!(self.log, "rolling upgrade complete");
                        self.state = State::Finished;
                        return Ok(None);
                    }
                    self.upgrade_next().await?;
                }
            }
        }
    }

    async fn start(&mut self) -> Result<(), OrchestrationFailure> {
        if self.nodes.is_empty() {
            return Err(OrchestrationFailure::EmptyCluster);
        }
        let starting = self.path.starting().family;
        for node in &self.nodes {
            check_node_family(&*self.cluster, node, 0, starting).await?;
        }
        info!(self.log, "starting rolling upgrade";
            "nodes" => self.nodes.len(),
            "from" => %self.path.starting().install,
            "to" => %self.path.target().install,
        );
        self.queue_observations();
        Ok(())
    }

    async fn upgrade_next(&mut self) -> Result<(), OrchestrationFailure> {
        let node = self.nodes[self.upgraded.len()].clone();
        let step = self.upgraded.len() + 1;
        let target = self.path.target();
        let log = self.log.new(o!(
            "step" => step,
            "node" => node.to_string(),
        ));

        info!(log, "upgrading node"; "version" => %target.install);
        self.cluster.upgrade_node(&node, target).await.map_err(|err| {
            OrchestrationFailure::Upgrade {
                step,
                node: node.clone(),
                version: target.to_string(),
                err,
            }
        })?;

        debug!(log, "waiting for node to become ready");
        wait_for_node_ready(&*self.cluster, &node, step, &self.config).await?;
        check_node_family(&*self.cluster, &node, step, target.family).await?;
        info!(log, "node upgraded");

        self.upgraded.push(node);
        self.queue_observations();
        Ok(())
    }

    fn queue_observations(&mut self) {
        self.pending = match self.config.observe {
            ObservationMode::UpgradedNode => {
                let node = self.upgraded.last().unwrap_or(&self.nodes[0]);
                VecDeque::from([node.clone()])
            }
            ObservationMode::EveryNode => self.nodes.iter().cloned().collect(),
        };
    }

    async fn observe(
        &mut self,
        node: NodeId,
    ) -> Result<Observation, OrchestrationFailure> {
        let step = self.upgraded.len();
        let session = self.cluster.connect(&node).await.map_err(|err| {
            OrchestrationFailure::Connect { step, node: node.clone(), err }
        })?;
        let is_upgraded = self.upgraded.contains(&node);
        debug!(self.log, "observing cluster";
            "step" => step,
            "node" => node.to_string(),
            "is_upgraded" => is_upgraded,
        );
        Ok(Observation {
            step,
            composition: self.composition(),
            node,
            is_upgraded,
            session,
        })
    }
}
