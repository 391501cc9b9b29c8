// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rolling-upgrade tests for a replicated database
//!
//! Each upgrade path produced by [`upgrade_manifest::generate()`] becomes a
//! [`TestCase`] in a [`TestMatrix`].  Running a case provisions a cluster on
//! the path's starting release, then upgrades it one node at a time with
//! [`RollingUpgrade`], handing the test body a live session at every step.
//! [`DigestChecker`] inspects query traces for replicas that disagree about
//! the data they hold.
//!
//! The cluster itself sits behind [`ClusterControl`] and [`QuerySession`].
//! [`sim`] provides in-memory implementations of both.

mod cluster;
mod config;
mod digest;
mod driver;
mod errors;
mod harness;
mod matrix;
mod rolling;
mod runner;
pub mod sim;
pub mod suites;

pub use cluster::ClusterControl;
pub use cluster::ClusterError;
pub use cluster::ClusterProvisioner;
pub use cluster::NodeId;
pub use config::HarnessConfig;
pub use config::MatrixConfig;
pub use config::ObservationMode;
pub use config::RollingUpgradeConfig;
pub use config::SessionConfig;
pub use config::TraceConfig;
pub use digest::find_mismatches;
pub use digest::CheckError;
pub use digest::ConsistencyViolation;
pub use digest::DigestChecker;
pub use digest::TraceVerdict;
pub use digest::DIGEST_MISMATCH;
pub use digest::KEY_MISMATCH;
pub use driver::ConsistencyLevel;
pub use driver::CqlValue;
pub use driver::DriverError;
pub use driver::QuerySession;
pub use driver::QueryTrace;
pub use driver::Row;
pub use driver::Statement;
pub use driver::TraceEvent;
pub use driver::TraceId;
pub use driver::TracedResult;
pub use errors::StepViolation;
pub use errors::UpgradeTestError;
pub use harness::UpgradeHarness;
pub use matrix::SkipReason;
pub use matrix::TestCase;
pub use matrix::TestMatrix;
pub use matrix::TestMatrixBuilder;
pub use matrix::UpgradeTest;
pub use rolling::Composition;
pub use rolling::Observation;
pub use rolling::OrchestrationFailure;
pub use rolling::RollingUpgrade;
pub use runner::run_matrix;
pub use runner::CaseFailure;
pub use runner::CaseOutcome;
pub use runner::CaseReport;
pub use runner::MatrixReport;
