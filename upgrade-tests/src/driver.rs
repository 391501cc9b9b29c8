// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces to the database's query driver

use crate::cluster::NodeId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// How many replicas must answer a statement
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    #[default]
    One,
    Quorum,
    /// every replica of the data must answer, so the coordinator compares
    /// all of their digests
    All,
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyLevel::One => f.write_str("ONE"),
            ConsistencyLevel::Quorum => f.write_str("QUORUM"),
            ConsistencyLevel::All => f.write_str("ALL"),
        }
    }
}

/// A value bound to a statement or returned in a row
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum CqlValue {
    Int(i32),
    Text(String),
    Null,
}

impl From<i32> for CqlValue {
    fn from(value: i32) -> Self {
        CqlValue::Int(value)
    }
}

impl From<&str> for CqlValue {
    fn from(value: &str) -> Self {
        CqlValue::Text(value.to_owned())
    }
}

pub type Row = Vec<CqlValue>;

/// A statement along with its consistency level and bound values
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    text: String,
    consistency: ConsistencyLevel,
    values: Vec<CqlValue>,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Statement {
        Statement {
            text: text.into(),
            consistency: ConsistencyLevel::default(),
            values: Vec::new(),
        }
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_values(mut self, values: Vec<CqlValue>) -> Self {
        self.values = values;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }

    pub fn values(&self) -> &[CqlValue] {
        &self.values
    }
}

/// Identifies the trace recorded for one traced statement
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize,
    Serialize,
)]
#[serde(transparent)]
pub struct TraceId(pub Uuid);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One step recorded in a query trace
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TraceEvent {
    /// free-text description of the step
    pub description: String,
    /// node that recorded the event
    pub source: Option<NodeId>,
    /// time since the coordinator received the request
    pub elapsed: Option<Duration>,
}

impl TraceEvent {
    pub fn new(description: impl Into<String>) -> TraceEvent {
        TraceEvent {
            description: description.into(),
            source: None,
            elapsed: None,
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "[{source}] {}", self.description),
            None => f.write_str(&self.description),
        }
    }
}

/// The trace of one query, as retrieved from the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryTrace {
    pub trace_id: TraceId,
    pub coordinator: Option<NodeId>,
    /// total request duration; absent until the trace is fully written
    pub duration: Option<Duration>,
    /// events in the order the cluster recorded them
    pub events: Vec<TraceEvent>,
}

impl QueryTrace {
    /// Returns true once the cluster has finished writing this trace
    pub fn is_complete(&self) -> bool {
        self.duration.is_some()
    }
}

/// Result of a traced statement
#[derive(Clone, Debug)]
pub struct TracedResult {
    pub rows: Vec<Row>,
    pub trace_id: TraceId,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("not enough replicas available for query at consistency {0}")]
    Unavailable(ConsistencyLevel),
    #[error("timed out waiting for replicas")]
    Timeout,
    #[error("statement rejected: {0}")]
    Rejected(String),
    #[error("connection to node {0} lost")]
    ConnectionLost(NodeId),
}

/// A session whose coordinator is one node of the cluster
#[async_trait]
pub trait QuerySession: Send + Sync {
    /// The coordinator node for statements run in this session
    fn node(&self) -> &NodeId;

    async fn execute(&self, statement: &Statement)
    -> Result<Vec<Row>, DriverError>;

    /// Run `statement` with tracing enabled
    ///
    /// The trace may not be readable as soon as this returns; see
    /// [`QuerySession::fetch_trace()`].
    async fn execute_traced(
        &self,
        statement: &Statement,
    ) -> Result<TracedResult, DriverError>;

    /// Fetch the trace for an earlier traced statement
    ///
    /// Returns `None` if the cluster has not written any of it yet.  A trace
    /// that is still being written is returned with
    /// [`QueryTrace::is_complete()`] false.
    async fn fetch_trace(
        &self,
        trace_id: TraceId,
    ) -> Result<Option<QueryTrace>, DriverError>;
}
