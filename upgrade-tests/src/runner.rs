// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Run every case of a [`TestMatrix`]

use crate::cluster::ClusterError;
use crate::cluster::ClusterProvisioner;
use crate::config::SessionConfig;
use crate::errors::UpgradeTestError;
use crate::matrix::SkipReason;
use crate::matrix::TestCase;
use crate::matrix::TestMatrix;
use futures::StreamExt;
use slog::{error, info, o, Logger};
use std::fmt;
use std::num::NonZeroUsize;
use thiserror::Error;

/// A test case could not be run, or ran and failed
#[derive(Debug, Error)]
pub enum CaseFailure {
    #[error("failed to obtain a cluster")]
    Cluster(#[source] ClusterError),
    #[error(transparent)]
    Test(#[from] UpgradeTestError),
}

#[derive(Debug)]
pub enum CaseOutcome {
    Passed,
    Skipped(SkipReason),
    Failed(CaseFailure),
}

impl fmt::Display for CaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseOutcome::Passed => f.write_str("passed"),
            CaseOutcome::Skipped(reason) => write!(f, "skipped ({reason})"),
            CaseOutcome::Failed(_) => f.write_str("FAILED"),
        }
    }
}

#[derive(Debug)]
pub struct CaseReport {
    pub name: String,
    pub outcome: CaseOutcome,
}

/// Outcome of every case in a matrix, in matrix order
#[derive(Debug)]
pub struct MatrixReport {
    pub cases: Vec<CaseReport>,
}

impl MatrixReport {
    pub fn passed(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases
            .iter()
            .filter(|c| matches!(c.outcome, CaseOutcome::Passed))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases
            .iter()
            .filter(|c| matches!(c.outcome, CaseOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &CaseFailure)> {
        self.cases.iter().filter_map(|c| match &c.outcome {
            CaseOutcome::Failed(failure) => Some((c.name.as_str(), failure)),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Run every case in `matrix`, each against its own cluster
///
/// At most `parallelism` cases run at once.  Skipped cases are reported
/// without obtaining a cluster.  A failing case does not stop the others.
pub async fn run_matrix(
    log: &Logger,
    matrix: &TestMatrix,
    provisioner: &dyn ClusterProvisioner,
    session: &SessionConfig,
    parallelism: NonZeroUsize,
) -> MatrixReport {
    info!(log, "running test matrix";
        "ncases" => matrix.len(),
        "nskipped" => matrix.skipped().count(),
        "parallelism" => parallelism.get(),
    );
    let cases = futures::stream::iter(matrix.cases())
        .map(|case| run_case(log, case, provisioner, session))
        .buffered(parallelism.get())
        .collect::<Vec<_>>()
        .await;
    MatrixReport { cases }
}

async fn run_case(
    log: &Logger,
    case: &TestCase,
    provisioner: &dyn ClusterProvisioner,
    session: &SessionConfig,
) -> CaseReport {
    let name = case.name().to_owned();
    let log = log.new(o!("test_case" => name.clone()));
    let outcome = match case.skip_reason() {
        Some(reason) => {
            info!(log, "skipping test case"; "reason" => %reason);
            CaseOutcome::Skipped(reason)
        }
        None => match try_run_case(&log, case, provisioner, session).await {
            Ok(()) => {
                info!(log, "test case passed");
                CaseOutcome::Passed
            }
            Err(failure) => {
                error!(log, "test case failed"; "error" => %failure);
                CaseOutcome::Failed(failure)
            }
        },
    };
    CaseReport { name, outcome }
}

async fn try_run_case(
    log: &Logger,
    case: &TestCase,
    provisioner: &dyn ClusterProvisioner,
    session: &SessionConfig,
) -> Result<(), CaseFailure> {
    let mut cluster = provisioner
        .cluster_for(log, case.name())
        .await
        .map_err(CaseFailure::Cluster)?;
    case.run(log, &mut *cluster, session).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cluster::ClusterControl;
    use crate::sim::{InjectedEvent, SimConfig, SimProvisioner};
    use crate::suites::DigestConsistency;
    use async_trait::async_trait;
    use std::sync::Arc;
    use upgrade_manifest::{Environment, Family, Manifest};
    use upgrade_test_utils::dev::test_setup_log;

    struct NoClusters;

    #[async_trait]
    impl ClusterProvisioner for NoClusters {
        async fn cluster_for(
            &self,
            _log: &Logger,
            case_name: &str,
        ) -> Result<Box<dyn ClusterControl>, ClusterError> {
            Err(ClusterError::Create {
                case: case_name.to_owned(),
                message: "no capacity".to_string(),
            })
        }
    }

    fn matrix(log: &Logger, env: &Environment) -> TestMatrix {
        TestMatrix::generate(
            log,
            Arc::new(DigestConsistency),
            &Manifest::builtin().unwrap(),
            env,
            &Default::default(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_matrix_reports_every_case() {
        let logctx = test_setup_log("test_run_matrix_reports_every_case");
        let env = Environment::new(Family::new(3, 11));
        let matrix = matrix(&logctx.log, &env);
        let provisioner = SimProvisioner::new(SimConfig::new(3));

        let report = run_matrix(
            &logctx.log,
            &matrix,
            &provisioner,
            &SessionConfig::default(),
            NonZeroUsize::new(4).unwrap(),
        )
        .await;

        assert!(report.is_success());
        let names: Vec<_> =
            report.cases.iter().map(|c| c.name.as_str()).collect();
        let expected: Vec<_> = matrix.cases().map(|c| c.name()).collect();
        assert_eq!(names, expected);
        assert_eq!(report.passed().count(), matrix.runnable().count());
        assert_eq!(report.skipped().count(), matrix.skipped().count());

        // Skipped cases never got a cluster.
        for case in matrix.skipped() {
            assert!(provisioner.observer(case.name()).is_none());
        }
        logctx.cleanup_successful();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_other_cases() {
        let logctx = test_setup_log("test_failures_do_not_stop_other_cases");
        let env = Environment::new(Family::new(3, 11));
        let matrix = matrix(&logctx.log, &env);
        let config = SimConfig::new(3)
            .with_injected_event(InjectedEvent::at_step(2, "Digest mismatch"));
        let provisioner = SimProvisioner::new(config);

        let report = run_matrix(
            &logctx.log,
            &matrix,
            &provisioner,
            &SessionConfig::default(),
            NonZeroUsize::MIN,
        )
        .await;
        assert!(!report.is_success());
        assert_eq!(report.failed().count(), matrix.runnable().count());
        for (_, failure) in report.failed() {
            assert!(matches!(
                failure,
                CaseFailure::Test(UpgradeTestError::ConsistencyViolations {
                    ..
                })
            ));
        }

        let report = run_matrix(
            &logctx.log,
            &matrix,
            &NoClusters,
            &SessionConfig::default(),
            NonZeroUsize::MIN,
        )
        .await;
        assert_eq!(report.failed().count(), matrix.runnable().count());
        assert!(report
            .failed()
            .all(|(_, failure)| matches!(failure, CaseFailure::Cluster(_))));
        logctx.cleanup_successful();
    }
}
