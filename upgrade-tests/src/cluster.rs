// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces to the cluster under test
//!
//! Starting, stopping and installing database binaries on nodes is not done
//! here.  The harness consumes those capabilities through [`ClusterControl`]
//! and obtains one cluster per test case from a [`ClusterProvisioner`].

use crate::driver::DriverError;
use crate::driver::QuerySession;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::fmt;
use thiserror::Error;
use upgrade_manifest::Family;
use upgrade_manifest::VersionMetadata;

/// Identifies one node of a cluster
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> NodeId {
        NodeId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("node {0} is not part of this cluster")]
    UnknownNode(NodeId),

    #[error("failed to install {version} on node {node}: {message}")]
    Install { node: NodeId, version: String, message: String },

    #[error("node {node}: {message}")]
    Node { node: NodeId, message: String },

    #[error("failed to connect to node {node}")]
    Connect {
        node: NodeId,
        #[source]
        err: DriverError,
    },

    #[error("failed to create cluster for {case}: {message}")]
    Create { case: String, message: String },
}

/// Control over the nodes of an already-provisioned cluster
///
/// Whoever holds `&mut` on an implementation is the only writer of the
/// cluster's topology and versions.
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Returns the cluster's nodes, in the order they will be upgraded
    fn nodes(&self) -> Vec<NodeId>;

    /// Install `version` on every node and start them
    ///
    /// This returns once the nodes have been started.  It does not wait for
    /// them to be ready; see [`ClusterControl::is_ready()`].
    async fn provision(
        &mut self,
        version: &VersionMetadata,
    ) -> Result<(), ClusterError>;

    /// Stop `node`, install `target` on it, and start it again
    ///
    /// Like [`ClusterControl::provision()`], this does not wait for the node
    /// to rejoin the cluster.
    async fn upgrade_node(
        &mut self,
        node: &NodeId,
        target: &VersionMetadata,
    ) -> Result<(), ClusterError>;

    /// Returns true if `node` has joined the cluster and accepts queries
    async fn is_ready(&self, node: &NodeId) -> Result<bool, ClusterError>;

    /// Returns the release family `node` reports it is running
    async fn node_family(&self, node: &NodeId) -> Result<Family, ClusterError>;

    /// Open a query session whose coordinator is `node`
    async fn connect(
        &self,
        node: &NodeId,
    ) -> Result<Box<dyn QuerySession>, ClusterError>;
}

/// Source of fresh clusters, one per test case
///
/// Clusters handed out by a provisioner must not share state with each other
/// so that test cases can run in parallel.
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    async fn cluster_for(
        &self,
        log: &Logger,
        case_name: &str,
    ) -> Result<Box<dyn ClusterControl>, ClusterError>;
}
