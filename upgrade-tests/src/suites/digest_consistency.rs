// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Check that replicas agree on data written before a rolling upgrade
//!
//! Rows with a static column are written at `ALL` while every node runs the
//! starting release.  At every step of the rolling upgrade the rows are read
//! back at `ALL`, and the coordinator's trace must not report any disagreement
//! between replicas, such as an older and a newer release computing different
//! digests for the same data.

use crate::digest::TraceVerdict;
use crate::driver::ConsistencyLevel;
use crate::driver::CqlValue;
use crate::driver::QuerySession;
use crate::driver::Statement;
use crate::errors::StepViolation;
use crate::errors::UpgradeTestError;
use crate::harness::UpgradeHarness;
use crate::matrix::UpgradeTest;
use async_trait::async_trait;
use slog::{debug, info};
use upgrade_manifest::Family;

const CREATE_KEYSPACE: &str = "CREATE KEYSPACE ks123 WITH replication = \
     {'class': 'SimpleStrategy', 'replication_factor': 2}";

const CREATE_TABLE: &str = "CREATE TABLE ks123.tab (key int, s1 text static, \
     c1 text, c2 text, c3 text, PRIMARY KEY (key, c1))";

const INSERT: &str = "INSERT INTO ks123.tab (key, s1, c1, c2, c3) \
     VALUES (1, 'static', ?, ?, 'baz')";

const ROWS: [(&str, &str); 3] = [("foo", "bar"), ("fi", "biz"), ("fo", "boz")];

/// Reads checked at every step of the upgrade
pub const CHECKED_QUERIES: [&str; 3] = [
    "SELECT key, c1 FROM ks123.tab WHERE key = 1",
    "SELECT key, c1, s1 FROM ks123.tab WHERE key = 1 and c1 = 'foo'",
    "SELECT key, c1, s1 FROM ks123.tab WHERE key = 1 and c1 = 'fi'",
];

/// Replicas must agree on static-column rows throughout a rolling upgrade
#[derive(Clone, Copy, Debug, Default)]
pub struct DigestConsistency;

impl DigestConsistency {
    async fn populate(
        &self,
        harness: &UpgradeHarness<'_>,
        session: &dyn QuerySession,
    ) -> Result<(), UpgradeTestError> {
        let setup = |text: &str, err| UpgradeTestError::Setup {
            path: harness.path().name().to_owned(),
            statement: text.to_owned(),
            err,
        };

        for text in [CREATE_KEYSPACE, CREATE_TABLE] {
            let statement = Statement::new(text);
            session.execute(&statement).await.map_err(|e| setup(text, e))?;
        }
        for (c1, c2) in ROWS {
            let statement = Statement::new(INSERT)
                .with_consistency(ConsistencyLevel::All)
                .with_values(vec![CqlValue::from(c1), CqlValue::from(c2)]);
            session.execute(&statement).await.map_err(|e| setup(INSERT, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl UpgradeTest for DigestConsistency {
    fn suite_name(&self) -> &str {
        "digest_consistency"
    }

    fn minimum_family(&self) -> Family {
        Family::new(3, 0)
    }

    async fn run(
        &self,
        harness: &mut UpgradeHarness<'_>,
    ) -> Result<(), UpgradeTestError> {
        let session = harness.prepare().await?;
        self.populate(harness, &*session).await?;
        drop(session);

        let log = harness.log().clone();
        let path = harness.path().name().to_owned();
        let checker = harness.digest_checker();
        let mut violations = Vec::new();

        let mut upgrade = harness.rolling_upgrade();
        loop {
            let observation = match upgrade.next_step().await {
                Ok(Some(observation)) => observation,
                Ok(None) => break,
                Err(failure) => {
                    return Err(UpgradeTestError::Orchestration {
                        path,
                        failure,
                        earlier: violations,
                    });
                }
            };

            let which =
                if observation.is_upgraded { "upgraded" } else { "old" };
            debug!(log, "querying {} node", which;
                "step" => observation.step,
                "node" => observation.node.to_string(),
            );
            for query in CHECKED_QUERIES {
                let verdict =
                    match checker.check(&*observation.session, query).await {
                        Ok(verdict) => verdict,
                        Err(err) => {
                            return Err(UpgradeTestError::Check {
                                path,
                                step: observation.step,
                                node: observation.node.clone(),
                                err,
                                earlier: violations,
                            });
                        }
                    };
                if let TraceVerdict::Mismatch(violation) = verdict {
                    violations.push(StepViolation {
                        step: observation.step,
                        node: observation.node.clone(),
                        is_upgraded: observation.is_upgraded,
                        violation,
                    });
                }
            }
        }

        if !violations.is_empty() {
            return Err(UpgradeTestError::ConsistencyViolations {
                path,
                violations,
            });
        }
        info!(log, "replicas agreed at every step");
        Ok(())
    }
}
