// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turn upgrade paths into a registry of named, runnable test cases

use crate::cluster::ClusterControl;
use crate::config::MatrixConfig;
use crate::config::SessionConfig;
use crate::errors::UpgradeTestError;
use crate::harness::UpgradeHarness;
use async_trait::async_trait;
use indexmap::map::Entry;
use indexmap::IndexMap;
use slog::{debug, info, o, Logger};
use std::fmt;
use std::sync::Arc;
use upgrade_manifest::generate;
use upgrade_manifest::ConfigurationError;
use upgrade_manifest::Environment;
use upgrade_manifest::Family;
use upgrade_manifest::GenerateOptions;
use upgrade_manifest::Manifest;
use upgrade_manifest::UpgradePath;

/// A test body that is run once for every upgrade path in a matrix
#[async_trait]
pub trait UpgradeTest: Send + Sync {
    /// Prefix for the names of this test's cases (`<suite>::<path name>`)
    fn suite_name(&self) -> &str;

    /// Oldest starting family this test is meaningful for
    fn minimum_family(&self) -> Family;

    async fn run(
        &self,
        harness: &mut UpgradeHarness<'_>,
    ) -> Result<(), UpgradeTestError>;
}

/// Why a case in the matrix is not run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// the path does not upgrade to the build under test and the full
    /// matrix was not requested
    NotApplicableToEnv,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotApplicableToEnv => {
                f.write_str("not applicable to env")
            }
        }
    }
}

/// One upgrade path bound to a test body
#[derive(Clone)]
pub struct TestCase {
    name: String,
    path: UpgradePath,
    skip: Option<SkipReason>,
    test: Arc<dyn UpgradeTest>,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("path", &self.path.name())
            .field("skip", &self.skip)
            .finish_non_exhaustive()
    }
}

impl TestCase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &UpgradePath {
        &self.path
    }

    pub fn is_skipped(&self) -> bool {
        self.skip.is_some()
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        self.skip
    }

    /// Run the test body against `cluster`
    ///
    /// This runs even if the case is marked skipped; deciding whether to run
    /// it is up to the caller.
    pub async fn run(
        &self,
        log: &Logger,
        cluster: &mut dyn ClusterControl,
        session: &SessionConfig,
    ) -> Result<(), UpgradeTestError> {
        let log = log.new(o!("test_case" => self.name.clone()));
        let mut harness =
            UpgradeHarness::new(&log, &self.path, cluster, session.clone());
        self.test.run(&mut harness).await
    }
}

/// Registry of test cases, in the order their paths were generated
#[derive(Clone, Debug)]
pub struct TestMatrix {
    cases: IndexMap<String, TestCase>,
}

impl TestMatrix {
    /// Generate paths from `manifest` and build the matrix for `test`
    ///
    /// The minimum family comes from `config` if it sets one, and from the
    /// test otherwise.
    pub fn generate(
        log: &Logger,
        test: Arc<dyn UpgradeTest>,
        manifest: &Manifest,
        env: &Environment,
        config: &MatrixConfig,
    ) -> Result<TestMatrix, ConfigurationError> {
        let minimum_family =
            config.minimum_family.unwrap_or_else(|| test.minimum_family());
        let options = GenerateOptions {
            minimum_family,
            version_selection: config.version_selection,
            target_version_only: config.target_version_only,
        };
        let paths = generate(log, manifest, env, &options)?;
        TestMatrixBuilder::new(log, test, env.clone(), minimum_family)
            .build(paths)
    }

    pub fn cases(&self) -> impl Iterator<Item = &TestCase> {
        self.cases.values()
    }

    pub fn get(&self, name: &str) -> Option<&TestCase> {
        self.cases.get(name)
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn runnable(&self) -> impl Iterator<Item = &TestCase> {
        self.cases().filter(|case| !case.is_skipped())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &TestCase> {
        self.cases().filter(|case| case.is_skipped())
    }
}

/// Builds a [`TestMatrix`] for one test body
pub struct TestMatrixBuilder {
    log: Logger,
    test: Arc<dyn UpgradeTest>,
    env: Environment,
    minimum_family: Family,
}

impl TestMatrixBuilder {
    /// `minimum_family` is only used to describe an empty matrix.
    pub fn new(
        log: &Logger,
        test: Arc<dyn UpgradeTest>,
        env: Environment,
        minimum_family: Family,
    ) -> TestMatrixBuilder {
        let log = log.new(o!(
            "component" => "TestMatrixBuilder",
            "suite" => test.suite_name().to_owned(),
        ));
        TestMatrixBuilder { log, test, env, minimum_family }
    }

    /// Create one case per path
    ///
    /// Fails without building anything if two paths would produce the same
    /// case name or if there are no paths at all.
    pub fn build(
        self,
        paths: Vec<UpgradePath>,
    ) -> Result<TestMatrix, ConfigurationError> {
        if paths.is_empty() {
            return Err(ConfigurationError::EmptyMatrix {
                minimum_family: self.minimum_family,
            });
        }

        let mut cases = IndexMap::with_capacity(paths.len());
        for path in paths {
            let name = format!("{}::{}", self.test.suite_name(), path.name());
            let skip = if self.env.run_static_matrix
                || path.applies_to_current_environment(&self.env)
            {
                None
            } else {
                Some(SkipReason::NotApplicableToEnv)
            };
            debug!(self.log, "adding test case";
                "name" => &name,
                "skip" => skip.map(|reason| reason.to_string()),
            );

            match cases.entry(name) {
                Entry::Occupied(entry) => {
                    return Err(ConfigurationError::DuplicateTestName {
                        name: entry.key().clone(),
                        path: path.name().to_owned(),
                    });
                }
                Entry::Vacant(entry) => {
                    let name = entry.key().clone();
                    entry.insert(TestCase {
                        name,
                        path,
                        skip,
                        test: Arc::clone(&self.test),
                    });
                }
            }
        }

        let matrix = TestMatrix { cases };
        info!(self.log, "built test matrix";
            "ncases" => matrix.len(),
            "nrunnable" => matrix.runnable().count(),
        );
        Ok(matrix)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use upgrade_manifest::{
        InstallSpec, ManifestSource, Variant, VersionMetadata,
    };
    use upgrade_test_utils::dev::test_setup_log;

    struct NoopTest;

    #[async_trait]
    impl UpgradeTest for NoopTest {
        fn suite_name(&self) -> &str {
            "noop"
        }

        fn minimum_family(&self) -> Family {
            Family::new(3, 0)
        }

        async fn run(
            &self,
            _harness: &mut UpgradeHarness<'_>,
        ) -> Result<(), UpgradeTestError> {
            Ok(())
        }
    }

    fn version(name: &str, family: Family) -> VersionMetadata {
        VersionMetadata {
            name: name.to_string(),
            family,
            variant: Variant::Current,
            install: InstallSpec::Branch(format!("cassandra-{family}")),
            min_protocol: 3,
            max_protocol: 4,
        }
    }

    fn two_path_manifest() -> Manifest {
        Manifest::new(
            ManifestSource::Override,
            vec![
                version("v3_0", Family::new(3, 0)),
                version("v3_11", Family::new(3, 11)),
                version("v4_0", Family::new(4, 0)),
            ],
            vec![("v3_0", vec!["v3_11"]), ("v3_11", vec!["v4_0"])],
        )
        .unwrap()
    }

    fn matrix_config(minimum_family: Family) -> MatrixConfig {
        MatrixConfig {
            minimum_family: Some(minimum_family),
            ..MatrixConfig::default()
        }
    }

    #[test]
    fn test_two_paths_make_two_cases() {
        let logctx = test_setup_log("test_two_paths_make_two_cases");
        let env = Environment::new(Family::new(4, 0));
        let matrix = TestMatrix::generate(
            &logctx.log,
            Arc::new(NoopTest),
            &two_path_manifest(),
            &env,
            &matrix_config(Family::new(3, 0)),
        )
        .unwrap();

        let names: Vec<_> = matrix.cases().map(|case| case.name()).collect();
        assert_eq!(
            names,
            ["noop::upgrade_v3_0_to_v3_11", "noop::upgrade_v3_11_to_v4_0"]
        );

        // Only the path to the family under test runs.
        let skipped: Vec<_> = matrix.skipped().map(|c| c.name()).collect();
        assert_eq!(skipped, ["noop::upgrade_v3_0_to_v3_11"]);
        assert_eq!(
            matrix
                .get("noop::upgrade_v3_0_to_v3_11")
                .unwrap()
                .skip_reason()
                .unwrap()
                .to_string(),
            "not applicable to env"
        );
        let runnable: Vec<_> = matrix.runnable().map(|c| c.name()).collect();
        assert_eq!(runnable, ["noop::upgrade_v3_11_to_v4_0"]);
        logctx.cleanup_successful();
    }

    #[test]
    fn test_empty_matrix_is_an_error() {
        let logctx = test_setup_log("test_empty_matrix_is_an_error");
        let env = Environment::new(Family::new(4, 0));
        let error = TestMatrix::generate(
            &logctx.log,
            Arc::new(NoopTest),
            &two_path_manifest(),
            &env,
            &matrix_config(Family::new(4, 0)),
        )
        .unwrap_err();
        assert_matches!(
            error,
            ConfigurationError::EmptyMatrix { minimum_family } => {
                assert_eq!(minimum_family, Family::new(4, 0));
            }
        );
        logctx.cleanup_successful();
    }

    #[test]
    fn test_static_matrix_runs_everything() {
        let logctx = test_setup_log("test_static_matrix_runs_everything");
        let env = Environment {
            run_static_matrix: true,
            ..Environment::new(Family::new(4, 0))
        };
        let matrix = TestMatrix::generate(
            &logctx.log,
            Arc::new(NoopTest),
            &two_path_manifest(),
            &env,
            &matrix_config(Family::new(3, 0)),
        )
        .unwrap();
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.skipped().count(), 0);
        logctx.cleanup_successful();
    }

    #[test]
    fn test_skip_iff_not_applicable() {
        let logctx = test_setup_log("test_skip_iff_not_applicable");
        let manifest = Manifest::builtin().unwrap();
        for family in [Family::new(3, 0), Family::new(3, 11), Family::new(4, 0)]
        {
            let env = Environment::new(family);
            let matrix = TestMatrix::generate(
                &logctx.log,
                Arc::new(NoopTest),
                &manifest,
                &env,
                &MatrixConfig::default(),
            )
            .unwrap();
            for case in matrix.cases() {
                assert_eq!(
                    case.is_skipped(),
                    !case.path().applies_to_current_environment(&env),
                    "{}",
                    case.name()
                );
            }
        }
        logctx.cleanup_successful();
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let logctx = test_setup_log("test_duplicate_names_rejected");
        let manifest = two_path_manifest();
        let env = Environment::new(Family::new(4, 0));
        let options = GenerateOptions::new(Family::new(3, 0));
        let paths = generate(&logctx.log, &manifest, &env, &options).unwrap();
        let mut doubled = paths.clone();
        doubled.push(paths[1].clone());

        let error = TestMatrixBuilder::new(
            &logctx.log,
            Arc::new(NoopTest),
            env.clone(),
            Family::new(3, 0),
        )
        .build(doubled)
        .unwrap_err();
        assert_matches!(
            error,
            ConfigurationError::DuplicateTestName { name, path } => {
                assert_eq!(name, "noop::upgrade_v3_11_to_v4_0");
                assert_eq!(path, "upgrade_v3_11_to_v4_0");
            }
        );

        // The builtin catalog never produces duplicates.
        let matrix = TestMatrix::generate(
            &logctx.log,
            Arc::new(NoopTest),
            &Manifest::builtin().unwrap(),
            &env,
            &matrix_config(Family::new(2, 2)),
        )
        .unwrap();
        assert!(matrix.len() > 2);
        logctx.cleanup_successful();
    }
}
