// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::Environment;
use crate::Family;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a release is the tip of its branch or a published release
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// the head of the release branch, built from source
    Indev,
    /// the most recent published release of the family
    Current,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Indev => f.write_str("indev"),
            Variant::Current => f.write_str("current"),
        }
    }
}

/// Where the binaries for a release come from
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallSpec {
    /// a published release
    Release(semver::Version),
    /// the head of a branch in the upstream repository
    Branch(String),
    /// a build already present on this machine
    Local(Utf8PathBuf),
}

impl fmt::Display for InstallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallSpec::Release(version) => write!(f, "{version}"),
            InstallSpec::Branch(branch) => {
                write!(f, "github:apache/{branch}")
            }
            InstallSpec::Local(path) => write!(f, "local:{path}"),
        }
    }
}

/// Describes one release of the database
///
/// These are created once when a [`crate::Manifest`] is loaded and are shared
/// (via `Arc`) by every upgrade path that refers to them.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct VersionMetadata {
    /// catalog identifier, used to name the upgrade paths
    pub name: String,
    pub family: Family,
    pub variant: Variant,
    pub install: InstallSpec,
    /// oldest native protocol version this release speaks
    pub min_protocol: u8,
    /// newest native protocol version this release speaks
    pub max_protocol: u8,
}

impl VersionMetadata {
    /// Returns true if this release belongs to the family of the build the
    /// tests are running against
    pub fn matches_family(&self, env: &Environment) -> bool {
        self.family == env.current_family
    }

    /// Returns true if a client connected to this release can keep talking to
    /// a node running `other`
    pub fn shares_protocol_with(&self, other: &VersionMetadata) -> bool {
        self.max_protocol >= other.min_protocol
    }

    /// Returns a copy of this release installed from `install` instead
    pub fn with_install(&self, install: InstallSpec) -> VersionMetadata {
        VersionMetadata { install, ..self.clone() }
    }
}

impl fmt::Display for VersionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.family, self.install)
    }
}
