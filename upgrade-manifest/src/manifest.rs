// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The catalog of releases and the upgrades between them

use crate::ConfigurationError;
use crate::Family;
use crate::InstallSpec;
use crate::LoadError;
use crate::Variant;
use crate::VersionMetadata;
use camino::Utf8Path;
use indexmap::IndexMap;
use semver::Prerelease;
use semver::Version;
use serde::Deserialize;
use std::sync::Arc;

/// Where a [`Manifest`] came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestSource {
    /// the catalog compiled into this crate
    Builtin,
    /// a catalog supplied by the user, which is tested exactly as written
    Override,
}

/// A catalog of releases and the upgrades tested from each of them
///
/// Upgrades are kept in declaration order so that generated test names come
/// out in the same order on every run.
#[derive(Clone, Debug)]
pub struct Manifest {
    source: ManifestSource,
    versions: IndexMap<String, Arc<VersionMetadata>>,
    upgrades: Vec<(Arc<VersionMetadata>, Arc<VersionMetadata>)>,
}

/// On-disk form of an override manifest
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    #[serde(rename = "version", default)]
    versions: Vec<VersionMetadata>,
    #[serde(rename = "upgrade", default)]
    upgrades: Vec<UpgradeEdges>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpgradeEdges {
    from: String,
    to: Vec<String>,
}

impl Manifest {
    /// Assemble a manifest from releases and, for each origin release name,
    /// the names of the releases it may be upgraded to
    pub fn new<I, S, T>(
        source: ManifestSource,
        versions: Vec<VersionMetadata>,
        upgrades: I,
    ) -> Result<Manifest, ConfigurationError>
    where
        I: IntoIterator<Item = (S, Vec<T>)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut by_name = IndexMap::with_capacity(versions.len());
        for version in versions {
            let name = version.name.clone();
            if by_name.insert(name.clone(), Arc::new(version)).is_some() {
                return Err(ConfigurationError::DuplicateVersion(name));
            }
        }

        let lookup = |name: &str| {
            by_name
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigurationError::UnknownVersion(name.into()))
        };

        let mut edges = Vec::new();
        for (from, targets) in upgrades {
            let from = lookup(from.as_ref())?;
            for to in targets {
                let to = lookup(to.as_ref())?;
                if from.family > to.family {
                    return Err(ConfigurationError::Downgrade {
                        starting: from.name.clone(),
                        starting_family: from.family,
                        target: to.name.clone(),
                        target_family: to.family,
                    });
                }
                edges.push((from.clone(), to));
            }
        }

        Ok(Manifest { source, versions: by_name, upgrades: edges })
    }

    /// Load an override manifest from the given TOML file
    ///
    /// The file holds `[[version]]` tables (one per release) and `[[upgrade]]`
    /// tables with a `from` release name and a `to` list of release names.
    pub fn from_file(path: &Utf8Path) -> Result<Manifest, LoadError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let parsed: ManifestFile = toml::from_str(&contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        Manifest::new(
            ManifestSource::Override,
            parsed.versions,
            parsed.upgrades.into_iter().map(|edge| (edge.from, edge.to)),
        )
        .map_err(|err| LoadError::Invalid { path: path.into(), err })
    }

    /// The catalog of Apache Cassandra releases compiled into this crate
    pub fn builtin() -> Result<Manifest, ConfigurationError> {
        const INDEV_2_2_X: &str = "indev_2_2_x";
        const CURRENT_2_2_X: &str = "current_2_2_x";
        const INDEV_3_0_X: &str = "indev_3_0_x";
        const CURRENT_3_0_X: &str = "current_3_0_x";
        const INDEV_3_11_X: &str = "indev_3_11_x";
        const CURRENT_3_11_X: &str = "current_3_11_x";
        const INDEV_4_0_X: &str = "indev_4_0_x";
        const CURRENT_4_0_X: &str = "current_4_0_x";
        const INDEV_TRUNK: &str = "indev_trunk";

        let indev = |name: &str, family, branch: &str, protocols: (u8, u8)| {
            VersionMetadata {
                name: name.to_string(),
                family,
                variant: Variant::Indev,
                install: InstallSpec::Branch(branch.to_string()),
                min_protocol: protocols.0,
                max_protocol: protocols.1,
            }
        };
        let current = |name: &str, family, version, protocols: (u8, u8)| {
            VersionMetadata {
                name: name.to_string(),
                family,
                variant: Variant::Current,
                install: InstallSpec::Release(version),
                min_protocol: protocols.0,
                max_protocol: protocols.1,
            }
        };

        let f2_2 = Family::new(2, 2);
        let f3_0 = Family::new(3, 0);
        let f3_11 = Family::new(3, 11);
        let f4_0 = Family::new(4, 0);
        let trunk = Family::new(4, 1);

        let versions = vec![
            indev(INDEV_2_2_X, f2_2, "cassandra-2.2", (1, 4)),
            current(CURRENT_2_2_X, f2_2, Version::new(2, 2, 19), (1, 4)),
            indev(INDEV_3_0_X, f3_0, "cassandra-3.0", (3, 4)),
            current(CURRENT_3_0_X, f3_0, Version::new(3, 0, 24), (3, 4)),
            indev(INDEV_3_11_X, f3_11, "cassandra-3.11", (3, 4)),
            current(CURRENT_3_11_X, f3_11, Version::new(3, 11, 10), (3, 4)),
            indev(INDEV_4_0_X, f4_0, "cassandra-4.0", (3, 5)),
            current(
                CURRENT_4_0_X,
                f4_0,
                Version {
                    pre: Prerelease::new("beta4").unwrap_or_default(),
                    ..Version::new(4, 0, 0)
                },
                (3, 5),
            ),
            indev(INDEV_TRUNK, trunk, "trunk", (3, 5)),
        ];

        let upgrades: Vec<(&str, Vec<&str>)> = vec![
            (
                INDEV_2_2_X,
                vec![INDEV_3_0_X, CURRENT_3_0_X, INDEV_3_11_X, CURRENT_3_11_X],
            ),
            (
                CURRENT_2_2_X,
                vec![
                    INDEV_2_2_X,
                    INDEV_3_0_X,
                    CURRENT_3_0_X,
                    INDEV_3_11_X,
                    CURRENT_3_11_X,
                ],
            ),
            (
                INDEV_3_0_X,
                vec![
                    INDEV_3_11_X,
                    CURRENT_3_11_X,
                    INDEV_4_0_X,
                    CURRENT_4_0_X,
                    INDEV_TRUNK,
                ],
            ),
            (
                CURRENT_3_0_X,
                vec![
                    INDEV_3_0_X,
                    INDEV_3_11_X,
                    CURRENT_3_11_X,
                    INDEV_4_0_X,
                    CURRENT_4_0_X,
                    INDEV_TRUNK,
                ],
            ),
            (INDEV_3_11_X, vec![INDEV_4_0_X, CURRENT_4_0_X, INDEV_TRUNK]),
            (
                CURRENT_3_11_X,
                vec![INDEV_3_11_X, INDEV_4_0_X, CURRENT_4_0_X, INDEV_TRUNK],
            ),
            (CURRENT_4_0_X, vec![INDEV_4_0_X, INDEV_TRUNK]),
            (INDEV_4_0_X, vec![INDEV_TRUNK]),
        ];

        Manifest::new(ManifestSource::Builtin, versions, upgrades)
    }

    pub fn source(&self) -> ManifestSource {
        self.source
    }

    /// Look up a release by name
    pub fn version(&self, name: &str) -> Option<&Arc<VersionMetadata>> {
        self.versions.get(name)
    }

    /// Iterate over all releases in declaration order
    pub fn versions(&self) -> impl Iterator<Item = &Arc<VersionMetadata>> {
        self.versions.values()
    }

    /// Iterate over all (starting, target) upgrades in declaration order
    pub fn upgrades(
        &self,
    ) -> impl Iterator<Item = (&Arc<VersionMetadata>, &Arc<VersionMetadata>)>
    {
        self.upgrades.iter().map(|(from, to)| (from, to))
    }
}
