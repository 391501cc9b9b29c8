// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::ConfigurationError;
use crate::Environment;
use crate::VersionMetadata;
use std::fmt;
use std::sync::Arc;

/// An upgrade from one release to another
///
/// The starting release's family is never newer than the target's: upgrade
/// paths never describe a downgrade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradePath {
    name: String,
    starting: Arc<VersionMetadata>,
    target: Arc<VersionMetadata>,
}

impl UpgradePath {
    pub fn new(
        starting: Arc<VersionMetadata>,
        target: Arc<VersionMetadata>,
    ) -> Result<UpgradePath, ConfigurationError> {
        if starting.family > target.family {
            return Err(ConfigurationError::Downgrade {
                starting: starting.name.clone(),
                starting_family: starting.family,
                target: target.name.clone(),
                target_family: target.family,
            });
        }

        let name = format!("upgrade_{}_to_{}", starting.name, target.name);
        Ok(UpgradePath { name, starting, target })
    }

    /// Stable identifier for this path, derived from the release names
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The release the cluster is provisioned with
    pub fn starting(&self) -> &Arc<VersionMetadata> {
        &self.starting
    }

    /// The release every node is upgraded to
    pub fn target(&self) -> &Arc<VersionMetadata> {
        &self.target
    }

    /// Returns true if this path upgrades to the family of the build under
    /// test
    pub fn applies_to_current_environment(&self, env: &Environment) -> bool {
        self.target.matches_family(env)
    }

    /// Returns a copy of this path whose target is `target` instead
    ///
    /// The name is kept: it identifies the catalog entries, not where their
    /// binaries come from.
    pub(crate) fn with_target(
        &self,
        target: Arc<VersionMetadata>,
    ) -> UpgradePath {
        UpgradePath { target, ..self.clone() }
    }
}

impl fmt::Display for UpgradePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} -> {})",
            self.name, self.starting.install, self.target.install
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Family, InstallSpec, Variant};
    use assert_matches::assert_matches;

    fn release(name: &str, family: Family) -> Arc<VersionMetadata> {
        Arc::new(VersionMetadata {
            name: name.to_string(),
            family,
            variant: Variant::Indev,
            install: InstallSpec::Branch(format!("cassandra-{family}")),
            min_protocol: 3,
            max_protocol: 4,
        })
    }

    #[test]
    fn test_path_name_and_applicability() {
        let path = UpgradePath::new(
            release("indev_3_0_x", Family::new(3, 0)),
            release("indev_3_11_x", Family::new(3, 11)),
        )
        .unwrap();
        assert_eq!(path.name(), "upgrade_indev_3_0_x_to_indev_3_11_x");

        assert!(path.applies_to_current_environment(&Environment::new(
            Family::new(3, 11)
        )));
        // Only the target family decides applicability.
        assert!(!path.applies_to_current_environment(&Environment::new(
            Family::new(3, 0)
        )));
    }

    #[test]
    fn test_same_family_is_not_a_downgrade() {
        let path = UpgradePath::new(
            release("current_3_0_x", Family::new(3, 0)),
            release("indev_3_0_x", Family::new(3, 0)),
        );
        assert!(path.is_ok());
    }

    #[test]
    fn test_downgrade_rejected() {
        let error = UpgradePath::new(
            release("indev_4_0_x", Family::new(4, 0)),
            release("indev_3_11_x", Family::new(3, 11)),
        )
        .unwrap_err();
        assert_matches!(
            error,
            ConfigurationError::Downgrade { starting, target, .. } => {
                assert_eq!(starting, "indev_4_0_x");
                assert_eq!(target, "indev_3_11_x");
            }
        );
    }
}
