// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Computing the upgrade paths a suite should cover

use crate::ConfigurationError;
use crate::Environment;
use crate::Family;
use crate::InstallSpec;
use crate::Manifest;
use crate::ManifestSource;
use crate::UpgradePath;
use crate::Variant;
use crate::VersionMetadata;
use serde::{Deserialize, Serialize};
use slog::debug;
use slog::Logger;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Which kinds of releases a run is interested in
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum VersionSelection {
    /// every upgrade in the catalog
    #[default]
    All,
    /// only upgrades between two in-development branches
    Indev,
    /// upgrades involving at least one published release
    Releases,
}

impl VersionSelection {
    fn selects(&self, from: &VersionMetadata, to: &VersionMetadata) -> bool {
        let both_indev =
            from.variant == Variant::Indev && to.variant == Variant::Indev;
        match self {
            VersionSelection::All => true,
            VersionSelection::Indev => both_indev,
            VersionSelection::Releases => !both_indev,
        }
    }
}

impl fmt::Display for VersionSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelection::All => f.write_str("all"),
            VersionSelection::Indev => f.write_str("indev"),
            VersionSelection::Releases => f.write_str("releases"),
        }
    }
}

impl FromStr for VersionSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(VersionSelection::All),
            "indev" => Ok(VersionSelection::Indev),
            "releases" => Ok(VersionSelection::Releases),
            _ => Err(format!(
                "unknown version selection {s:?} \
                 (expected \"all\", \"indev\", or \"releases\")"
            )),
        }
    }
}

/// Knobs controlling which catalog upgrades become [`UpgradePath`]s
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct GenerateOptions {
    /// oldest starting family to include (inclusive)
    pub minimum_family: Family,
    #[serde(default)]
    pub version_selection: VersionSelection,
    /// only include paths that upgrade to the family under test
    #[serde(default)]
    pub target_version_only: bool,
}

impl GenerateOptions {
    pub fn new(minimum_family: Family) -> GenerateOptions {
        GenerateOptions {
            minimum_family,
            version_selection: VersionSelection::All,
            target_version_only: false,
        }
    }
}

/// Returns every upgrade in `manifest` that the suite should cover
///
/// Paths come out in catalog order.  An empty result is not an error here;
/// the test matrix builder decides what an empty matrix means.
///
/// Unless the static matrix is forced or the manifest is an override, paths
/// that upgrade to the family under test are pointed at the local build when
/// `env` names one.
pub fn generate(
    log: &Logger,
    manifest: &Manifest,
    env: &Environment,
    options: &GenerateOptions,
) -> Result<Vec<UpgradePath>, ConfigurationError> {
    let is_override = manifest.source() == ManifestSource::Override;
    let substitute_local = !(env.run_static_matrix || is_override);

    let mut paths = Vec::new();
    for (from, to) in manifest.upgrades() {
        if from.family < options.minimum_family {
            continue;
        }
        if !options.version_selection.selects(from, to) {
            continue;
        }
        if !is_override && !is_targeted_variant_combo(from, to) {
            continue;
        }
        if !from.shares_protocol_with(to) {
            continue;
        }
        if options.target_version_only && !to.matches_family(env) {
            continue;
        }

        let mut path = UpgradePath::new(from.clone(), to.clone())?;
        if let Some(dir) = &env.local_install_dir {
            if substitute_local && path.applies_to_current_environment(env) {
                let local =
                    Arc::new(to.with_install(InstallSpec::Local(dir.clone())));
                debug!(
                    log,
                    "path applies to current env; using local build as target";
                    "path" => path.name(),
                    "old_target" => %to.install,
                    "new_target" => %local.install,
                );
                path = path.with_target(local);
            }
        }
        paths.push(path);
    }

    Ok(paths)
}

// Upgrading from an in-development branch to a published release goes
// backwards in time, so it is never tested.
fn is_targeted_variant_combo(
    from: &VersionMetadata,
    to: &VersionMetadata,
) -> bool {
    !(from.variant == Variant::Indev && to.variant == Variant::Current)
}
