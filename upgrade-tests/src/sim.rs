// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated database cluster
//!
//! [`SimCluster`] implements [`ClusterControl`] entirely in memory.  Nodes
//! "install" a release by recording it, take a configurable number of
//! readiness polls to come back after a restart, and answer traced queries
//! with traces shaped like the ones a real coordinator writes.  Faults and
//! extra trace events can be injected to exercise the harness's failure
//! paths.

use crate::cluster::ClusterControl;
use crate::cluster::ClusterError;
use crate::cluster::ClusterProvisioner;
use crate::cluster::NodeId;
use crate::driver::ConsistencyLevel;
use crate::driver::DriverError;
use crate::driver::QuerySession;
use crate::driver::QueryTrace;
use crate::driver::Row;
use crate::driver::Statement;
use crate::driver::TraceEvent;
use crate::driver::TraceId;
use crate::driver::TracedResult;
use async_trait::async_trait;
use slog::{debug, info, o, Logger};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use upgrade_manifest::Family;
use upgrade_manifest::VersionMetadata;
use uuid::Uuid;

/// Something that goes wrong in a simulated cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimFault {
    /// provisioning the cluster fails
    ProvisionFails,
    /// installing a new release on the node at this index fails
    UpgradeFails(usize),
    /// the node at this index never becomes ready after an upgrade
    NeverReady(usize),
    /// the node at this index keeps reporting its old family after an upgrade
    StaysOnOldFamily(usize),
    /// no query trace is ever completely written
    TraceNeverCompletes,
}

/// An extra event written into the traces of matching queries
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InjectedEvent {
    /// number of upgraded nodes at which to inject; every step if `None`
    step: Option<usize>,
    /// only inject into statements containing this text
    statement: Option<String>,
    description: String,
}

impl InjectedEvent {
    pub fn at_every_step(description: impl Into<String>) -> InjectedEvent {
        InjectedEvent {
            step: None,
            statement: None,
            description: description.into(),
        }
    }

    pub fn at_step(
        step: usize,
        description: impl Into<String>,
    ) -> InjectedEvent {
        InjectedEvent { step: Some(step), ..Self::at_every_step(description) }
    }

    pub fn for_statement(mut self, contains: impl Into<String>) -> Self {
        self.statement = Some(contains.into());
        self
    }

    fn applies(&self, step: usize, statement: &Statement) -> bool {
        self.step.map_or(true, |s| s == step)
            && self
                .statement
                .as_ref()
                .map_or(true, |text| statement.text().contains(text.as_str()))
    }
}

/// Shape and behavior of a simulated cluster
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub nodes: usize,
    /// readiness polls a node answers "not ready" after each (re)start
    pub ready_after_polls: usize,
    /// trace fetches that see a partially written trace
    pub trace_lag_polls: usize,
    pub faults: Vec<SimFault>,
    pub injected_events: Vec<InjectedEvent>,
}

impl SimConfig {
    pub fn new(nodes: usize) -> SimConfig {
        SimConfig {
            nodes,
            ready_after_polls: 0,
            trace_lag_polls: 0,
            faults: Vec::new(),
            injected_events: Vec::new(),
        }
    }

    pub fn with_ready_after(mut self, polls: usize) -> Self {
        self.ready_after_polls = polls;
        self
    }

    pub fn with_trace_lag(mut self, polls: usize) -> Self {
        self.trace_lag_polls = polls;
        self
    }

    pub fn with_fault(mut self, fault: SimFault) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn with_injected_event(mut self, event: InjectedEvent) -> Self {
        self.injected_events.push(event);
        self
    }

    fn has_fault(&self, fault: &SimFault) -> bool {
        self.faults.contains(fault)
    }
}

/// A statement as the simulated cluster received it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutedStatement {
    pub text: String,
    pub consistency: ConsistencyLevel,
    pub traced: bool,
    pub coordinator: NodeId,
    /// number of upgraded nodes when the statement ran
    pub step: usize,
}

struct SimNode {
    id: NodeId,
    installed: Option<Arc<VersionMetadata>>,
    reported_family: Option<Family>,
    /// `None` if the node will never be ready
    polls_until_ready: Option<usize>,
}

struct SimTrace {
    trace_id: TraceId,
    coordinator: NodeId,
    events: Vec<TraceEvent>,
    /// `None` if the trace will never be complete
    fetches_until_complete: Option<usize>,
}

struct SimState {
    config: SimConfig,
    nodes: Vec<SimNode>,
    provisioned: Option<String>,
    upgrade_attempts: usize,
    executed: Vec<ExecutedStatement>,
    traces: BTreeMap<TraceId, SimTrace>,
}

impl SimState {
    fn node_index(&self, node: &NodeId) -> Result<usize, ClusterError> {
        self.nodes
            .iter()
            .position(|n| &n.id == node)
            .ok_or_else(|| ClusterError::UnknownNode(node.clone()))
    }

    fn step(&self) -> usize {
        let Some(provisioned) = &self.provisioned else {
            return 0;
        };
        self.nodes
            .iter()
            .filter(|n| {
                n.installed.as_ref().is_some_and(|v| &v.name != provisioned)
            })
            .count()
    }

    fn all_ready(&self) -> bool {
        self.nodes.iter().all(|n| n.polls_until_ready == Some(0))
    }

    fn record(&mut self, statement: &Statement, node: &NodeId, traced: bool) {
        let step = self.step();
        self.executed.push(ExecutedStatement {
            text: statement.text().to_owned(),
            consistency: statement.consistency(),
            traced,
            coordinator: node.clone(),
            step,
        });
    }

    fn trace_events(
        &self,
        coordinator: &NodeId,
        statement: &Statement,
    ) -> Vec<TraceEvent> {
        let event = |description: String, source: &NodeId| TraceEvent {
            description,
            source: Some(source.clone()),
            elapsed: None,
        };
        let replicas: Vec<&NodeId> = self
            .nodes
            .iter()
            .map(|n| &n.id)
            .filter(|id| *id != coordinator)
            .collect();

        let mut events = vec![
            event(format!("Parsing {}", statement.text()), coordinator),
            event("Preparing statement".to_string(), coordinator),
        ];
        for replica in &replicas {
            events.push(event(
                format!("reading digest from /{replica}"),
                coordinator,
            ));
        }
        events.push(event(
            "Executing single-partition query on tab".to_string(),
            coordinator,
        ));
        for replica in &replicas {
            events.push(event(
                format!("READ message received from /{coordinator}"),
                *replica,
            ));
            events.push(event(
                "Acquiring sstable references".to_string(),
                *replica,
            ));
            events.push(event(
                format!("Enqueuing response to /{coordinator}"),
                *replica,
            ));
        }
        let step = self.step();
        for injected in &self.config.injected_events {
            if injected.applies(step, statement) {
                events.push(event(injected.description.clone(), coordinator));
            }
        }
        events.push(event(
            "Read 3 live rows and 0 tombstone cells".to_string(),
            coordinator,
        ));
        events.push(event("Request complete".to_string(), coordinator));

        for (i, event) in events.iter_mut().enumerate() {
            event.elapsed = Some(Duration::from_micros(150 * (i as u64 + 1)));
        }
        events
    }
}

fn locked(state: &Mutex<SimState>) -> std::sync::MutexGuard<'_, SimState> {
    state.lock().unwrap()
}

/// An in-memory cluster
pub struct SimCluster {
    log: Logger,
    state: Arc<Mutex<SimState>>,
}

impl SimCluster {
    pub fn new(log: &Logger, config: SimConfig) -> SimCluster {
        let nodes = (1..=config.nodes)
            .map(|i| SimNode {
                id: NodeId::new(format!("node{i}")),
                installed: None,
                reported_family: None,
                polls_until_ready: Some(0),
            })
            .collect();
        let state = SimState {
            config,
            nodes,
            provisioned: None,
            upgrade_attempts: 0,
            executed: Vec::new(),
            traces: BTreeMap::new(),
        };
        SimCluster {
            log: log.new(o!("component" => "SimCluster")),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Returns a handle for inspecting this cluster from outside
    pub fn observer(&self) -> SimObserver {
        SimObserver { state: Arc::clone(&self.state) }
    }
}

#[async_trait]
impl ClusterControl for SimCluster {
    fn nodes(&self) -> Vec<NodeId> {
        locked(&self.state).nodes.iter().map(|n| n.id.clone()).collect()
    }

    async fn provision(
        &mut self,
        version: &VersionMetadata,
    ) -> Result<(), ClusterError> {
        let mut state = locked(&self.state);
        if state.config.has_fault(&SimFault::ProvisionFails) {
            return Err(ClusterError::Install {
                node: NodeId::new("node1"),
                version: version.to_string(),
                message: "simulated install failure".to_string(),
            });
        }

        let installed = Arc::new(version.clone());
        let ready_after = state.config.ready_after_polls;
        for node in &mut state.nodes {
            node.installed = Some(Arc::clone(&installed));
            node.reported_family = Some(version.family);
            node.polls_until_ready = Some(ready_after);
        }
        state.provisioned = Some(version.name.clone());
        info!(self.log, "provisioned cluster";
            "version" => %version,
            "nodes" => state.nodes.len(),
        );
        Ok(())
    }

    async fn upgrade_node(
        &mut self,
        node: &NodeId,
        target: &VersionMetadata,
    ) -> Result<(), ClusterError> {
        let mut state = locked(&self.state);
        state.upgrade_attempts += 1;
        let index = state.node_index(node)?;
        if state.config.has_fault(&SimFault::UpgradeFails(index)) {
            return Err(ClusterError::Install {
                node: node.clone(),
                version: target.to_string(),
                message: "simulated install failure".to_string(),
            });
        }

        let stays_old =
            state.config.has_fault(&SimFault::StaysOnOldFamily(index));
        let polls_until_ready =
            if state.config.has_fault(&SimFault::NeverReady(index)) {
                None
            } else {
                Some(state.config.ready_after_polls)
            };
        let sim_node = &mut state.nodes[index];
        sim_node.installed = Some(Arc::new(target.clone()));
        if !stays_old {
            sim_node.reported_family = Some(target.family);
        }
        sim_node.polls_until_ready = polls_until_ready;
        info!(self.log, "upgraded node";
            "node" => node.to_string(),
            "version" => %target,
        );
        Ok(())
    }

    async fn is_ready(&self, node: &NodeId) -> Result<bool, ClusterError> {
        let mut state = locked(&self.state);
        let index = state.node_index(node)?;
        let sim_node = &mut state.nodes[index];
        if sim_node.installed.is_none() {
            return Err(ClusterError::Node {
                node: node.clone(),
                message: "node has not been provisioned".to_string(),
            });
        }
        Ok(match &mut sim_node.polls_until_ready {
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        })
    }

    async fn node_family(&self, node: &NodeId) -> Result<Family, ClusterError> {
        let state = locked(&self.state);
        let index = state.node_index(node)?;
        state.nodes[index].reported_family.ok_or_else(|| ClusterError::Node {
            node: node.clone(),
            message: "node has not been provisioned".to_string(),
        })
    }

    async fn connect(
        &self,
        node: &NodeId,
    ) -> Result<Box<dyn QuerySession>, ClusterError> {
        let state = locked(&self.state);
        let index = state.node_index(node)?;
        if state.nodes[index].installed.is_none() {
            return Err(ClusterError::Connect {
                node: node.clone(),
                err: DriverError::ConnectionLost(node.clone()),
            });
        }
        Ok(Box::new(SimSession {
            log: self.log.new(o!("coordinator" => node.to_string())),
            node: node.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

/// A query session against a [`SimCluster`]
pub struct SimSession {
    log: Logger,
    node: NodeId,
    state: Arc<Mutex<SimState>>,
}

impl SimSession {
    fn check_available(
        &self,
        state: &SimState,
        statement: &Statement,
    ) -> Result<(), DriverError> {
        if statement.consistency() == ConsistencyLevel::All
            && !state.all_ready()
        {
            return Err(DriverError::Unavailable(ConsistencyLevel::All));
        }
        Ok(())
    }
}

#[async_trait]
impl QuerySession for SimSession {
    fn node(&self) -> &NodeId {
        &self.node
    }

    async fn execute(
        &self,
        statement: &Statement,
    ) -> Result<Vec<Row>, DriverError> {
        let mut state = locked(&self.state);
        self.check_available(&state, statement)?;
        state.record(statement, &self.node, false);
        debug!(self.log, "executed statement";
            "statement" => statement.text(),
            "consistency" => %statement.consistency(),
        );
        Ok(Vec::new())
    }

    async fn execute_traced(
        &self,
        statement: &Statement,
    ) -> Result<TracedResult, DriverError> {
        let mut state = locked(&self.state);
        self.check_available(&state, statement)?;
        state.record(statement, &self.node, true);

        let trace_id = TraceId(Uuid::new_v4());
        let events = state.trace_events(&self.node, statement);
        let fetches_until_complete =
            if state.config.has_fault(&SimFault::TraceNeverCompletes) {
                None
            } else {
                Some(state.config.trace_lag_polls)
            };
        state.traces.insert(
            trace_id,
            SimTrace {
                trace_id,
                coordinator: self.node.clone(),
                events,
                fetches_until_complete,
            },
        );
        debug!(self.log, "executed traced statement";
            "statement" => statement.text(),
            "trace_id" => %trace_id,
        );
        Ok(TracedResult { rows: Vec::new(), trace_id })
    }

    async fn fetch_trace(
        &self,
        trace_id: TraceId,
    ) -> Result<Option<QueryTrace>, DriverError> {
        let mut state = locked(&self.state);
        let Some(trace) = state.traces.get_mut(&trace_id) else {
            return Ok(None);
        };

        let complete = match &mut trace.fetches_until_complete {
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        };
        let (events, duration) = if complete {
            let duration = trace.events.last().and_then(|e| e.elapsed);
            (trace.events.clone(), duration)
        } else {
            (trace.events[..trace.events.len() / 2].to_vec(), None)
        };
        Ok(Some(QueryTrace {
            trace_id: trace.trace_id,
            coordinator: Some(trace.coordinator.clone()),
            duration,
            events,
        }))
    }
}

/// Read-only view of a [`SimCluster`], usable while the cluster is borrowed
#[derive(Clone)]
pub struct SimObserver {
    state: Arc<Mutex<SimState>>,
}

impl SimObserver {
    /// Number of nodes reporting `family`
    pub fn nodes_on(&self, family: Family) -> usize {
        locked(&self.state)
            .nodes
            .iter()
            .filter(|n| n.reported_family == Some(family))
            .count()
    }

    pub fn nodes_ready(&self) -> usize {
        locked(&self.state)
            .nodes
            .iter()
            .filter(|n| n.polls_until_ready == Some(0))
            .count()
    }

    pub fn upgrade_attempts(&self) -> usize {
        locked(&self.state).upgrade_attempts
    }

    pub fn executed(&self) -> Vec<ExecutedStatement> {
        locked(&self.state).executed.clone()
    }
}

/// Hands out a fresh [`SimCluster`] for each test case
pub struct SimProvisioner {
    config: SimConfig,
    observers: Mutex<BTreeMap<String, SimObserver>>,
}

impl SimProvisioner {
    pub fn new(config: SimConfig) -> SimProvisioner {
        SimProvisioner { config, observers: Mutex::new(BTreeMap::new()) }
    }

    /// Returns the observer for the cluster created for `case_name`, if any
    pub fn observer(&self, case_name: &str) -> Option<SimObserver> {
        self.observers.lock().unwrap().get(case_name).cloned()
    }
}

#[async_trait]
impl ClusterProvisioner for SimProvisioner {
    async fn cluster_for(
        &self,
        log: &Logger,
        case_name: &str,
    ) -> Result<Box<dyn ClusterControl>, ClusterError> {
        let cluster = SimCluster::new(log, self.config.clone());
        self.observers
            .lock()
            .unwrap()
            .insert(case_name.to_owned(), cluster.observer());
        Ok(Box::new(cluster))
    }
}
