// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::Family;
use camino::Utf8PathBuf;
use thiserror::Error;

/// A defect in the catalog or the harness configuration
///
/// These are fatal and are always raised before any cluster is touched.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error(
        "test case name {name:?} was generated twice (second time for \
         upgrade path {path:?})"
    )]
    DuplicateTestName { name: String, path: String },

    #[error(
        "no upgrade paths start at or after family {minimum_family}: the \
         test matrix would be empty"
    )]
    EmptyMatrix { minimum_family: Family },

    #[error(
        "upgrade from {starting} ({starting_family}) to {target} \
         ({target_family}) would be a downgrade"
    )]
    Downgrade {
        starting: String,
        starting_family: Family,
        target: String,
        target_family: Family,
    },

    #[error("release {0:?} is defined more than once in the manifest")]
    DuplicateVersion(String),

    #[error("upgrade edge refers to unknown release {0:?}")]
    UnknownVersion(String),

    #[error("invalid value {value:?} for environment variable {variable}")]
    InvalidEnvironment { variable: &'static str, value: String },
}

/// Error loading a TOML file from disk
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("error reading \"{path}\"")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\"")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
    #[error("invalid manifest \"{path}\"")]
    Invalid {
        path: Utf8PathBuf,
        #[source]
        err: ConfigurationError,
    },
}
