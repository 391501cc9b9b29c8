// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errors reported by upgrade test cases

use crate::cluster::NodeId;
use crate::digest::CheckError;
use crate::digest::ConsistencyViolation;
use crate::driver::DriverError;
use crate::rolling::OrchestrationFailure;
use std::fmt;
use thiserror::Error;

/// A consistency violation found at a particular point in a rolling upgrade
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepViolation {
    pub step: usize,
    /// coordinator of the query that found the violation
    pub node: NodeId,
    pub is_upgraded: bool,
    pub violation: ConsistencyViolation,
}

impl fmt::Display for StepViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {} (coordinator {}, {}): {}",
            self.step,
            self.node,
            if self.is_upgraded { "upgraded" } else { "not upgraded" },
            self.violation
        )
    }
}

fn format_violations(violations: &[StepViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("\n  {v}"))
        .collect::<Vec<_>>()
        .concat()
}

fn format_earlier(violations: &[StepViolation]) -> String {
    if violations.is_empty() {
        String::new()
    } else {
        format!(
            " after finding {} consistency violation(s):{}",
            violations.len(),
            format_violations(violations)
        )
    }
}

/// An upgrade test case failed
#[derive(Debug, Error)]
pub enum UpgradeTestError {
    /// `earlier` holds violations found before the upgrade failed.
    #[error("{path}: rolling upgrade failed{}", format_earlier(.earlier))]
    Orchestration {
        path: String,
        #[source]
        failure: OrchestrationFailure,
        earlier: Vec<StepViolation>,
    },

    /// `earlier` holds violations found before the check failed.
    #[error(
        "{path}: step {step}: consistency check via node {node} failed{}",
        format_earlier(.earlier)
    )]
    Check {
        path: String,
        step: usize,
        node: NodeId,
        #[source]
        err: CheckError,
        earlier: Vec<StepViolation>,
    },

    #[error("{path}: failed to set up test data with {statement:?}")]
    Setup {
        path: String,
        statement: String,
        #[source]
        err: DriverError,
    },

    #[error(
        "{path}: found {} consistency violation(s):{}",
        .violations.len(),
        format_violations(.violations)
    )]
    ConsistencyViolations { path: String, violations: Vec<StepViolation> },
}
