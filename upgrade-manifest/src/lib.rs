// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Catalog of database releases and the upgrade paths tested between them
//!
//! A [`Manifest`] lists releases ([`VersionMetadata`]) and the upgrades that
//! are legal from each of them.  [`generate()`] turns a manifest into the set
//! of [`UpgradePath`]s a test suite should cover, given a minimum release
//! [`Family`] and the [`Environment`] the suite runs in.  Nothing here touches
//! a cluster; this is all computed when the test matrix is collected.

mod environment;
mod errors;
mod family;
mod generate;
mod manifest;
mod path;
mod version;

pub use environment::Environment;
pub use environment::CURRENT_FAMILY_ENV;
pub use environment::RUN_STATIC_MATRIX_ENV;
pub use errors::ConfigurationError;
pub use errors::LoadError;
pub use family::Family;
pub use family::FamilyParseError;
pub use generate::generate;
pub use generate::GenerateOptions;
pub use generate::VersionSelection;
pub use manifest::Manifest;
pub use manifest::ManifestSource;
pub use path::UpgradePath;
pub use version::InstallSpec;
pub use version::Variant;
pub use version::VersionMetadata;
