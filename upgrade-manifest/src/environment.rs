// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The build the tests are running against

use crate::ConfigurationError;
use crate::Family;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Environment variable that forces every path in the matrix to run
pub const RUN_STATIC_MATRIX_ENV: &str = "RUN_STATIC_UPGRADE_MATRIX";

/// Environment variable naming the family of the build under test
pub const CURRENT_FAMILY_ENV: &str = "UPGRADE_TEST_CURRENT_FAMILY";

/// Describes the database build available to run tests against
///
/// This is read once, before the test matrix is built.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Environment {
    /// family of the build under test
    pub current_family: Family,
    /// run every path in the matrix, even those that don't target
    /// `current_family`
    #[serde(default)]
    pub run_static_matrix: bool,
    /// install directory of the locally built binaries, if any
    #[serde(default)]
    pub local_install_dir: Option<Utf8PathBuf>,
}

impl Environment {
    pub fn new(current_family: Family) -> Environment {
        Environment {
            current_family,
            run_static_matrix: false,
            local_install_dir: None,
        }
    }

    /// Applies overrides from this process's environment variables
    pub fn with_process_overrides(
        self,
    ) -> Result<Environment, ConfigurationError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from the variables returned by `lookup`
    ///
    /// [`RUN_STATIC_MATRIX_ENV`] accepts `1`/`true`/`yes` and
    /// `0`/`false`/`no` (case-insensitive).  [`CURRENT_FAMILY_ENV`] must
    /// parse as a [`Family`].
    pub fn with_overrides<F>(
        mut self,
        lookup: F,
    ) -> Result<Environment, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(RUN_STATIC_MATRIX_ENV) {
            self.run_static_matrix =
                match value.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" => true,
                    "0" | "false" | "no" | "" => false,
                    _ => {
                        return Err(ConfigurationError::InvalidEnvironment {
                            variable: RUN_STATIC_MATRIX_ENV,
                            value,
                        });
                    }
                };
        }

        if let Some(value) = lookup(CURRENT_FAMILY_ENV) {
            self.current_family = value.parse().map_err(|_| {
                ConfigurationError::InvalidEnvironment {
                    variable: CURRENT_FAMILY_ENV,
                    value,
                }
            })?;
        }

        Ok(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    fn lookup_in(
        vars: &[(&str, &str)],
    ) -> impl Fn(&str) -> Option<String> {
        let vars: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_overrides() {
        let env = Environment::new(Family::new(3, 11));

        let unchanged = env.clone().with_overrides(lookup_in(&[])).unwrap();
        assert_eq!(unchanged, env);

        let overridden = env
            .clone()
            .with_overrides(lookup_in(&[
                (RUN_STATIC_MATRIX_ENV, "True"),
                (CURRENT_FAMILY_ENV, "4.0"),
            ]))
            .unwrap();
        assert!(overridden.run_static_matrix);
        assert_eq!(overridden.current_family, Family::new(4, 0));

        let error = env
            .clone()
            .with_overrides(lookup_in(&[(RUN_STATIC_MATRIX_ENV, "maybe")]))
            .unwrap_err();
        assert_matches!(
            error,
            ConfigurationError::InvalidEnvironment { variable, .. }
                if variable == RUN_STATIC_MATRIX_ENV
        );

        let error = env
            .with_overrides(lookup_in(&[(CURRENT_FAMILY_ENV, "trunk")]))
            .unwrap_err();
        assert_matches!(
            error,
            ConfigurationError::InvalidEnvironment { variable, .. }
                if variable == CURRENT_FAMILY_ENV
        );
    }
}
