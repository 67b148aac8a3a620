use crate::{DOT_INODES, DOT_RESERVED};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Stable identity of an inode; survives renames, never gets reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InodeId(u64);

impl InodeId {
    pub const ROOT: Self = Self(1);

    /// First id handed out by the allocator.
    pub const FIRST_ALLOCATED: Self = Self(Self::ROOT.0 + 1);

    pub fn new(iid: u64) -> Self {
        Self(iid)
    }

    /// Hands out the current id and moves onto the next one.
    pub fn take_next(&mut self) -> Result<Self> {
        let this = *self;

        self.0 = self.0.checked_add(1).context("ran out of inode ids")?;

        Ok(this)
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// `/.reserved/.inodes/<id>`, which resolves to wherever the inode
    /// currently lives.
    pub fn reserved_path(self) -> String {
        format!("/{}/{}/{}", DOT_RESERVED, DOT_INODES, self.0)
    }
}

impl FromStr for InodeId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_handed_out_in_order() {
        let mut next = InodeId::FIRST_ALLOCATED;

        assert_eq!(InodeId::new(2), next.take_next().unwrap());
        assert_eq!(InodeId::new(3), next.take_next().unwrap());
        assert_eq!(4, next.get());
    }

    #[test]
    fn allocator_refuses_to_wrap() {
        let mut next = InodeId::new(u64::MAX);

        assert!(next.take_next().is_err());
    }

    #[test]
    fn reserved_path_parses_back() {
        let iid = InodeId::new(42);

        assert_eq!("/.reserved/.inodes/42", iid.reserved_path());
        assert_eq!(Ok(iid), iid.reserved_path().rsplit('/').next().unwrap().parse());
        assert!("x".parse::<InodeId>().is_err());
    }
}
