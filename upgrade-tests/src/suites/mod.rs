// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test bodies run across the upgrade matrix

mod digest_consistency;

pub use digest_consistency::DigestConsistency;
pub use digest_consistency::CHECKED_QUERIES;
