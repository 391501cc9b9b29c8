// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde_with::DeserializeFromStr;
use serde_with::SerializeDisplay;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A release series, written `major.minor` (e.g. `3.0`, `3.11`, `4.0`)
///
/// Families compare numerically one component at a time, so `3.11` sorts
/// after `3.2` and before `4.0`.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    SerializeDisplay,
    DeserializeFromStr,
)]
pub struct Family {
    major: u32,
    minor: u32,
}

impl Family {
    pub const fn new(major: u32, minor: u32) -> Family {
        Family { major, minor }
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid release family {input:?}: expected \"major.minor\"")]
pub struct FamilyParseError {
    input: String,
}

impl FromStr for Family {
    type Err = FamilyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || FamilyParseError { input: s.to_owned() };
        let (major, minor) = s.trim().split_once('.').ok_or_else(err)?;
        // `u32::from_str` accepts a leading '+', which isn't a family.
        let parse = |part: &str| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err());
            }
            part.parse::<u32>().map_err(|_| err())
        };
        Ok(Family { major: parse(major)?, minor: parse(minor)? })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_family_parse() {
        assert_eq!("3.0".parse::<Family>().unwrap(), Family::new(3, 0));
        assert_eq!("3.11".parse::<Family>().unwrap(), Family::new(3, 11));
        assert_eq!(" 4.0 ".parse::<Family>().unwrap(), Family::new(4, 0));

        for bad in ["", "3", "3.", ".1", "3.0.1", "trunk", "+3.0", "3.x"] {
            let error = bad.parse::<Family>().unwrap_err();
            assert!(
                error.to_string().contains("expected \"major.minor\""),
                "unexpected error for {bad:?}: {error}"
            );
        }
    }

    #[test]
    fn test_family_order_is_numeric() {
        let mut families: Vec<Family> = ["4.0", "3.11", "2.2", "3.2", "3.0"]
            .into_iter()
            .map(|s| s.parse().unwrap())
            .collect();
        families.sort();
        let sorted: Vec<String> =
            families.iter().map(|f| f.to_string()).collect();
        assert_eq!(sorted, ["2.2", "3.0", "3.2", "3.11", "4.0"]);
        assert!(Family::new(3, 11) >= Family::new(3, 11));
        assert!(Family::new(4, 0) > Family::new(3, 11));
    }
}
