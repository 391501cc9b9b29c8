// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! List or run the rolling-upgrade test matrix

use anyhow::bail;
use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingLevel;
use slog::{info, Logger};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tabled::Tabled;
use upgrade_manifest::Environment;
use upgrade_manifest::Family;
use upgrade_manifest::Manifest;
use upgrade_tests::run_matrix;
use upgrade_tests::sim::InjectedEvent;
use upgrade_tests::sim::SimConfig;
use upgrade_tests::sim::SimProvisioner;
use upgrade_tests::suites::DigestConsistency;
use upgrade_tests::HarnessConfig;
use upgrade_tests::ObservationMode;
use upgrade_tests::TestMatrix;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = UpgradeMatrix::parse();
    args.exec().await
}

/// Rolling-upgrade test matrix
#[derive(Debug, Parser)]
struct UpgradeMatrix {
    /// log level filter (defaults to the config file's setting)
    #[arg(env, long, value_parser = parse_dropshot_log_level)]
    log_level: Option<ConfigLoggingLevel>,

    /// harness configuration file
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// family of the build under test, overriding the config file and the
    /// environment
    #[arg(long)]
    current_family: Option<Family>,

    /// release catalog to use instead of the built-in one
    #[arg(long)]
    manifest: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the test cases the matrix would run
    List,
    /// Run the digest consistency matrix against simulated clusters
    RunSim(RunSimArgs),
}

#[derive(Debug, Args)]
struct RunSimArgs {
    /// number of nodes in each simulated cluster
    #[arg(long, default_value_t = 3)]
    nodes: usize,

    /// report a digest mismatch in every trace once this many nodes have
    /// been upgraded
    #[arg(long, value_name = "STEP")]
    inject_mismatch_at: Option<usize>,

    /// how many cases to run at once (defaults to the config file's setting)
    #[arg(long)]
    parallelism: Option<NonZeroUsize>,

    /// query every node at every step, not just the one last upgraded
    #[arg(long)]
    every_node: bool,
}

fn parse_dropshot_log_level(
    s: &str,
) -> Result<ConfigLoggingLevel, anyhow::Error> {
    serde_json::from_str(&format!("{:?}", s)).context("parsing log level")
}

const INJECTED_MISMATCH: &str = "Digest mismatch for key DecoratedKey(1, \
     00000001) (d41d8cd98f00b204e9800998ecf8427e vs \
     9e107d9d372bb6826bd81d3542a419d6)";

impl UpgradeMatrix {
    async fn exec(self) -> Result<(), anyhow::Error> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_file(path)
                .with_context(|| format!("loading config {path}"))?,
            None => HarnessConfig::new(Environment::new(
                self.current_family.unwrap_or(Family::new(4, 0)),
            )),
        };
        if let Some(path) = &self.manifest {
            config.matrix.manifest = Some(path.clone());
        }

        let log_config = match &self.log_level {
            Some(level) => {
                ConfigLogging::StderrTerminal { level: level.clone() }
            }
            None => config.log.clone(),
        };
        let log = log_config
            .to_logger("upgrade-matrix")
            .context("failed to create logger")?;

        let mut env = config
            .resolved_environment()
            .context("reading environment overrides")?;
        if let Some(family) = self.current_family {
            env.current_family = family;
        }
        info!(log, "resolved environment";
            "current_family" => %env.current_family,
            "run_static_matrix" => env.run_static_matrix,
        );

        let manifest = match &config.matrix.manifest {
            Some(path) => Manifest::from_file(path)
                .with_context(|| format!("loading manifest {path}"))?,
            None => Manifest::builtin().context("loading built-in manifest")?,
        };
        let matrix = TestMatrix::generate(
            &log,
            Arc::new(DigestConsistency),
            &manifest,
            &env,
            &config.matrix,
        )
        .context("building test matrix")?;

        match self.command {
            Commands::List => {
                list(&matrix);
                Ok(())
            }
            Commands::RunSim(args) => {
                run_sim(&log, &matrix, &mut config, args).await
            }
        }
    }
}

#[derive(Tabled)]
#[tabled(rename_all = "SCREAMING_SNAKE_CASE")]
struct CaseRow<'a> {
    name: &'a str,
    from: String,
    to: String,
    status: String,
}

fn list(matrix: &TestMatrix) {
    let rows = matrix.cases().map(|case| CaseRow {
        name: case.name(),
        from: case.path().starting().install.to_string(),
        to: case.path().target().install.to_string(),
        status: match case.skip_reason() {
            Some(reason) => format!("skip: {reason}"),
            None => "run".to_string(),
        },
    });
    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::empty())
        .with(tabled::settings::Padding::new(0, 1, 0, 0))
        .to_string();
    println!("{table}");
}

#[derive(Tabled)]
#[tabled(rename_all = "SCREAMING_SNAKE_CASE")]
struct ResultRow<'a> {
    name: &'a str,
    result: String,
}

async fn run_sim(
    log: &Logger,
    matrix: &TestMatrix,
    config: &mut HarnessConfig,
    args: RunSimArgs,
) -> Result<(), anyhow::Error> {
    if args.every_node {
        config.rolling.observe = ObservationMode::EveryNode;
    }
    let mut sim = SimConfig::new(args.nodes);
    if let Some(step) = args.inject_mismatch_at {
        let event = InjectedEvent::at_step(step, INJECTED_MISMATCH);
        sim = sim.with_injected_event(event);
    }
    let parallelism =
        args.parallelism.unwrap_or(config.matrix.max_parallel_cases);

    let provisioner = SimProvisioner::new(sim);
    let report =
        run_matrix(log, matrix, &provisioner, &config.session(), parallelism)
            .await;

    let rows = report.cases.iter().map(|case| ResultRow {
        name: &case.name,
        result: case.outcome.to_string(),
    });
    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::empty())
        .with(tabled::settings::Padding::new(0, 1, 0, 0))
        .to_string();
    println!("{table}");

    let mut nfailed = 0;
    for (name, failure) in report.failed() {
        nfailed += 1;
        eprintln!("\n{name}: {}", error_chain(failure));
    }
    if nfailed > 0 {
        bail!("{nfailed} test case(s) failed");
    }
    Ok(())
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli() {
        UpgradeMatrix::command().debug_assert();
    }

    #[test]
    fn test_parse_run_sim() {
        let args = UpgradeMatrix::try_parse_from([
            "upgrade-matrix",
            "--current-family",
            "3.11",
            "--log-level",
            "debug",
            "run-sim",
            "--inject-mismatch-at",
            "1",
        ])
        .unwrap();
        assert_eq!(args.current_family, Some(Family::new(3, 11)));
        assert!(matches!(args.log_level, Some(ConfigLoggingLevel::Debug)));
        let Commands::RunSim(run) = args.command else {
            panic!("expected run-sim");
        };
        assert_eq!(run.nodes, 3);
        assert_eq!(run.inject_mismatch_at, Some(1));

        assert!(UpgradeMatrix::try_parse_from([
            "upgrade-matrix",
            "--current-family",
            "four",
            "list",
        ])
        .is_err());
    }
}
