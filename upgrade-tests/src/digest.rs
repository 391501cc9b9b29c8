// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Detect digest mismatches between replicas
//!
//! A read at consistency `ALL` makes the coordinator ask every replica for
//! the data (or a digest of it) and compare the answers.  When replicas
//! disagree, the coordinator records that in the query's trace.  The cluster
//! offers no structured signal for this, so [`DigestChecker`] looks for the
//! two phrases the coordinator is known to write, in any case.

use crate::config::TraceConfig;
use crate::driver::ConsistencyLevel;
use crate::driver::DriverError;
use crate::driver::QuerySession;
use crate::driver::QueryTrace;
use crate::driver::Statement;
use crate::driver::TraceEvent;
use crate::driver::TraceId;
use slog::{debug, o, warn, Logger};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use upgrade_test_utils::dev::poll;
use upgrade_test_utils::dev::poll::CondCheckError;

/// Written when replica digests disagree for a read
pub const DIGEST_MISMATCH: &str = "digest mismatch";

/// Written when replica responses disagree for a specific partition key
pub const KEY_MISMATCH: &str = "mismatch for key";

/// Every read at `ALL` consults replica digests, so a complete trace without
/// this word suggests the trace text has changed under us.
const DIGEST_WORD: &str = "digest";

/// Returns the events in `events` that report a mismatch between replicas
pub fn find_mismatches(events: &[TraceEvent]) -> Vec<&TraceEvent> {
    events
        .iter()
        .filter(|event| {
            let description = event.description.to_lowercase();
            description.contains(DIGEST_MISMATCH)
                || description.contains(KEY_MISMATCH)
        })
        .collect()
}

/// Replicas disagreed while serving a statement
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsistencyViolation {
    pub statement: String,
    /// every trace event that reported the mismatch
    pub mismatches: Vec<TraceEvent>,
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "digest mismatch found in trace for query {:?}: ",
            self.statement
        )?;
        for (i, event) in self.mismatches.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{event}")?;
        }
        Ok(())
    }
}

/// Outcome of one consistency check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceVerdict {
    Consistent,
    Mismatch(ConsistencyViolation),
}

/// The check itself could not be carried out
///
/// This is not a verdict about the data: a check that fails this way has
/// neither passed nor found a mismatch.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("failed to execute query {statement:?}")]
    Query {
        statement: String,
        #[source]
        err: DriverError,
    },

    #[error("failed to fetch trace {trace_id} for query {statement:?}")]
    FetchTrace {
        statement: String,
        trace_id: TraceId,
        #[source]
        err: DriverError,
    },

    #[error(
        "trace {trace_id} for query {statement:?} was not complete after \
         {elapsed:?}"
    )]
    TraceTimeout { statement: String, trace_id: TraceId, elapsed: Duration },
}

/// Runs statements at consistency `ALL` with tracing and inspects the traces
/// for mismatches between replicas
#[derive(Clone, Debug)]
pub struct DigestChecker {
    log: Logger,
    config: TraceConfig,
}

impl DigestChecker {
    pub fn new(log: &Logger, config: TraceConfig) -> DigestChecker {
        DigestChecker {
            log: log.new(o!("component" => "DigestChecker")),
            config,
        }
    }

    /// Execute `statement` through `session` and check its trace
    ///
    /// This waits (within the configured bound) for the whole trace to be
    /// written before looking at it; a trace that never completes is an
    /// error, never a pass.
    pub async fn check(
        &self,
        session: &dyn QuerySession,
        statement: &str,
    ) -> Result<TraceVerdict, CheckError> {
        let query =
            Statement::new(statement).with_consistency(ConsistencyLevel::All);
        let result = session.execute_traced(&query).await.map_err(|err| {
            CheckError::Query { statement: statement.to_owned(), err }
        })?;

        let trace =
            self.wait_for_trace(session, result.trace_id, statement).await?;
        debug!(self.log, "fetched trace";
            "statement" => statement,
            "coordinator" => session.node().to_string(),
            "trace_id" => %trace.trace_id,
            "nevents" => trace.events.len(),
            "nrows" => result.rows.len(),
        );
        self.warn_if_unfamiliar(&trace, statement);

        let mismatches: Vec<TraceEvent> =
            find_mismatches(&trace.events).into_iter().cloned().collect();
        if mismatches.is_empty() {
            return Ok(TraceVerdict::Consistent);
        }

        for event in &mismatches {
            warn!(self.log, "mismatch reported in trace";
                "statement" => statement,
                "event" => %event,
            );
        }
        Ok(TraceVerdict::Mismatch(ConsistencyViolation {
            statement: statement.to_owned(),
            mismatches,
        }))
    }

    async fn wait_for_trace(
        &self,
        session: &dyn QuerySession,
        trace_id: TraceId,
        statement: &str,
    ) -> Result<QueryTrace, CheckError> {
        poll::wait_for_condition(
            move || async move {
                match session.fetch_trace(trace_id).await {
                    Ok(Some(trace)) if trace.is_complete() => Ok(trace),
                    Ok(_) => Err(CondCheckError::NotYet),
                    Err(err) => Err(CondCheckError::Failed(err)),
                }
            },
            &self.config.poll_interval_ms,
            &self.config.timeout_secs,
        )
        .await
        .map_err(|error| match error {
            poll::Error::TimedOut(elapsed) => CheckError::TraceTimeout {
                statement: statement.to_owned(),
                trace_id,
                elapsed,
            },
            poll::Error::PermanentError(err) => CheckError::FetchTrace {
                statement: statement.to_owned(),
                trace_id,
                err,
            },
        })
    }

    // A silent change in how the coordinator words its trace would turn this
    // check into one that always passes.  We can't detect that reliably, but a
    // trace that doesn't mention digests at all is suspicious.
    fn warn_if_unfamiliar(&self, trace: &QueryTrace, statement: &str) {
        if let Some(problem) = unfamiliar_trace(&trace.events) {
            warn!(self.log,
                "{}; trace format may have changed", problem;
                "statement" => statement,
                "trace_id" => %trace.trace_id,
            );
        }
    }
}

/// Describes what is odd about a complete trace whose events don't look like
/// a read at `ALL`, if anything
fn unfamiliar_trace(events: &[TraceEvent]) -> Option<&'static str> {
    if events.is_empty() {
        Some("trace has no events")
    } else if !events
        .iter()
        .any(|event| event.description.to_lowercase().contains(DIGEST_WORD))
    {
        Some("trace never mentions replica digests")
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cluster::ClusterControl;
    use crate::cluster::NodeId;
    use crate::sim::{InjectedEvent, SimCluster, SimConfig, SimFault};
    use assert_matches::assert_matches;
    use upgrade_manifest::{Family, InstallSpec, Variant, VersionMetadata};
    use upgrade_test_utils::dev::test_setup_log;

    const QUERY: &str = "SELECT key, c1 FROM ks123.tab WHERE key = 1";

    fn events(descriptions: &[&str]) -> Vec<TraceEvent> {
        descriptions.iter().map(|d| TraceEvent::new(*d)).collect()
    }

    #[test]
    fn test_find_mismatches() {
        let clean = events(&[
            "Parsing SELECT key, c1 FROM ks123.tab WHERE key = 1",
            "reading digest from /127.0.0.2",
            "Read 3 live rows and 0 tombstone cells",
            "Request complete",
        ]);
        assert!(find_mismatches(&clean).is_empty());

        let dirty = events(&[
            "reading digest from /127.0.0.2",
            "Digest mismatch for key DecoratedKey(1, 00000001)",
            "DIGEST MISMATCH",
            "Mismatch For Key DecoratedKey(1, 00000001)",
            "Request complete",
        ]);
        let found: Vec<&str> = find_mismatches(&dirty)
            .into_iter()
            .map(|e| e.description.as_str())
            .collect();
        assert_eq!(
            found,
            [
                "Digest mismatch for key DecoratedKey(1, 00000001)",
                "DIGEST MISMATCH",
                "Mismatch For Key DecoratedKey(1, 00000001)",
            ]
        );

        let near = events(&["digest mis-match", "mismatch in key cache"]);
        assert!(find_mismatches(&near).is_empty());
        assert!(find_mismatches(&[]).is_empty());
    }

    #[test]
    fn test_unfamiliar_trace() {
        assert_eq!(unfamiliar_trace(&[]), Some("trace has no events"));
        assert_eq!(
            unfamiliar_trace(&events(&[
                "Parsing SELECT key, c1 FROM ks123.tab WHERE key = 1",
                "Read 3 live rows and 0 tombstone cells",
                "Request complete",
            ])),
            Some("trace never mentions replica digests")
        );
        assert_eq!(
            unfamiliar_trace(&events(&[
                "Reading Digest from /127.0.0.2",
                "Request complete",
            ])),
            None
        );
        // A mismatch report counts as a familiar mention of digests.
        assert_eq!(
            unfamiliar_trace(&events(&["Digest mismatch for key [...]"])),
            None
        );
    }

    #[test]
    fn test_violation_display() {
        let violation = ConsistencyViolation {
            statement: QUERY.to_string(),
            mismatches: vec![TraceEvent {
                description: "Digest mismatch for key [...]".to_string(),
                source: Some(NodeId::new("node2")),
                elapsed: None,
            }],
        };
        let message = violation.to_string();
        assert!(message.contains(QUERY), "{message}");
        assert!(message.contains("[node2] Digest mismatch for key [...]"));
    }

    fn release() -> VersionMetadata {
        VersionMetadata {
            name: "current_3_0_x".to_string(),
            family: Family::new(3, 0),
            variant: Variant::Current,
            install: InstallSpec::Branch("cassandra-3.0".to_string()),
            min_protocol: 3,
            max_protocol: 4,
        }
    }

    async fn session_for(
        log: &Logger,
        config: SimConfig,
    ) -> Box<dyn QuerySession> {
        let mut cluster = SimCluster::new(log, config);
        cluster.provision(&release()).await.unwrap();
        cluster.connect(&NodeId::new("node1")).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_waits_for_complete_trace() {
        let logctx = test_setup_log("test_check_waits_for_complete_trace");
        // The mismatch is only in the part of the trace written last.
        let config = SimConfig::new(3)
            .with_trace_lag(3)
            .with_injected_event(InjectedEvent::at_every_step(
                "Digest mismatch for key DecoratedKey(1, 00000001) \
                 (d41d8cd98f00b204e9800998ecf8427e vs \
                 9e107d9d372bb6826bd81d3542a419d6)",
            ));
        let session = session_for(&logctx.log, config).await;

        let checker = DigestChecker::new(&logctx.log, TraceConfig::default());
        let verdict = checker.check(&*session, QUERY).await.unwrap();
        assert_matches!(verdict, TraceVerdict::Mismatch(violation) => {
            assert_eq!(violation.statement, QUERY);
            assert_eq!(violation.mismatches.len(), 1);
            assert!(violation.mismatches[0]
                .description
                .starts_with("Digest mismatch for key"));
        });
        logctx.cleanup_successful();
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_consistent() {
        let logctx = test_setup_log("test_check_consistent");
        let session =
            session_for(&logctx.log, SimConfig::new(3).with_trace_lag(1)).await;
        let checker = DigestChecker::new(&logctx.log, TraceConfig::default());
        assert_eq!(
            checker.check(&*session, QUERY).await.unwrap(),
            TraceVerdict::Consistent
        );
        logctx.cleanup_successful();
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_trace_is_not_a_pass() {
        let logctx = test_setup_log("test_incomplete_trace_is_not_a_pass");
        let config =
            SimConfig::new(3).with_fault(SimFault::TraceNeverCompletes);
        let session = session_for(&logctx.log, config).await;

        let trace_config = TraceConfig {
            timeout_secs: Duration::from_secs(2),
            ..TraceConfig::default()
        };
        let checker = DigestChecker::new(&logctx.log, trace_config);
        let error = checker.check(&*session, QUERY).await.unwrap_err();
        assert_matches!(
            error,
            CheckError::TraceTimeout { ref statement, elapsed, .. } => {
                assert_eq!(statement, QUERY);
                assert!(elapsed >= Duration::from_secs(2));
            }
        );
        logctx.cleanup_successful();
    }

    #[tokio::test(start_paused = true)]
    async fn test_checks_run_at_all() {
        let logctx = test_setup_log("test_checks_run_at_all");
        let mut cluster = SimCluster::new(&logctx.log, SimConfig::new(2));
        cluster.provision(&release()).await.unwrap();
        let observer = cluster.observer();
        let session = cluster.connect(&NodeId::new("node2")).await.unwrap();

        let checker = DigestChecker::new(&logctx.log, TraceConfig::default());
        checker.check(&*session, QUERY).await.unwrap();

        let executed = observer.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].text, QUERY);
        assert_eq!(executed[0].consistency, ConsistencyLevel::All);
        assert!(executed[0].traced);
        assert_eq!(executed[0].coordinator.as_str(), "node2");
        logctx.cleanup_successful();
    }
}
