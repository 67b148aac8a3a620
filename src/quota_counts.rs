use crate::StorageType;
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Bytes per storage type.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TypeSpaces([i64; StorageType::COUNT]);

impl TypeSpaces {
    pub fn splat(value: i64) -> Self {
        Self([value; StorageType::COUNT])
    }

    pub fn get(&self, ty: StorageType) -> i64 {
        self.0[ty.index()]
    }

    pub fn set(&mut self, ty: StorageType, value: i64) {
        self.0[ty.index()] = value;
    }

    pub fn add(&mut self, ty: StorageType, delta: i64) {
        self.0[ty.index()] += delta;
    }

    pub fn iter(&self) -> impl Iterator<Item = (StorageType, i64)> + '_ {
        StorageType::ALL.into_iter().map(|ty| (ty, self.get(ty)))
    }
}

impl fmt::Debug for TypeSpaces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().filter(|(_, v)| *v != 0))
            .finish()
    }
}

/// Namespace count, diskspace bytes and per-type bytes.
///
/// Used both for consumption (where it may be negative as a delta) and for
/// limits, where [`QuotaCounts::UNLIMITED`] marks a dimension that is not
/// enforced.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QuotaCounts {
    pub namespace: i64,
    pub diskspace: i64,
    pub types: TypeSpaces,
}

impl QuotaCounts {
    pub const UNLIMITED: i64 = -1;

    /// Passed to a setter to keep the current limit.
    pub const DONT_SET: i64 = i64::MAX;

    pub fn new(namespace: i64, diskspace: i64) -> Self {
        Self {
            namespace,
            diskspace,
            types: TypeSpaces::default(),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            namespace: Self::UNLIMITED,
            diskspace: Self::UNLIMITED,
            types: TypeSpaces::splat(Self::UNLIMITED),
        }
    }

    pub fn with_type_space(mut self, ty: StorageType, bytes: i64) -> Self {
        self.types.set(ty, bytes);
        self
    }

    pub fn type_space(&self, ty: StorageType) -> i64 {
        self.types.get(ty)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Whether any dimension grows; shrinking never needs a quota check.
    pub fn any_positive(&self) -> bool {
        self.namespace > 0 || self.diskspace > 0 || self.types.iter().any(|(_, v)| v > 0)
    }

    pub fn any_limited(&self) -> bool {
        self.namespace >= 0 || self.diskspace >= 0 || self.types.iter().any(|(_, v)| v >= 0)
    }

    pub fn is_violated(limit: i64, consumed: i64, delta: i64) -> bool {
        limit >= 0 && delta > 0 && consumed.saturating_add(delta) > limit
    }

    fn zip(self, other: Self, f: impl Fn(i64, i64) -> i64) -> Self {
        let mut types = TypeSpaces::default();

        for ty in StorageType::ALL {
            types.set(ty, f(self.types.get(ty), other.types.get(ty)));
        }

        Self {
            namespace: f(self.namespace, other.namespace),
            diskspace: f(self.diskspace, other.diskspace),
            types,
        }
    }
}

impl Add for QuotaCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a + b)
    }
}

impl AddAssign for QuotaCounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for QuotaCounts {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a - b)
    }
}

impl SubAssign for QuotaCounts {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for QuotaCounts {
    type Output = Self;

    fn neg(self) -> Self {
        Self::default() - self
    }
}

impl std::iter::Sum for QuotaCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl fmt::Debug for QuotaCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={} ds={} types={:?}", self.namespace, self.diskspace, self.types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_covers_every_dimension() {
        let a = QuotaCounts::new(1, 100).with_type_space(StorageType::Ssd, 100);
        let b = QuotaCounts::new(2, 50).with_type_space(StorageType::Disk, 50);

        let sum = a + b;

        assert_eq!(3, sum.namespace);
        assert_eq!(150, sum.diskspace);
        assert_eq!(100, sum.type_space(StorageType::Ssd));
        assert_eq!(50, sum.type_space(StorageType::Disk));
        assert_eq!(a, sum - b);
        assert!((a - a).is_zero());
        assert_eq!(-1, (-a).namespace);
    }

    #[test]
    fn only_growth_can_violate() {
        assert!(QuotaCounts::is_violated(10, 8, 3));
        assert!(!QuotaCounts::is_violated(10, 8, 2));
        assert!(!QuotaCounts::is_violated(10, 20, -5));
        assert!(!QuotaCounts::is_violated(10, 20, 0));
        assert!(!QuotaCounts::is_violated(QuotaCounts::UNLIMITED, 20, 5));
    }

    #[test]
    fn positivity_looks_at_types_too() {
        assert!(!QuotaCounts::new(-1, 0).any_positive());
        assert!(QuotaCounts::new(-1, 0)
            .with_type_space(StorageType::Archive, 1)
            .any_positive());
    }

    #[test]
    fn unlimited_is_not_limited() {
        assert!(!QuotaCounts::unlimited().any_limited());
        assert!(QuotaCounts::unlimited()
            .with_type_space(StorageType::Ssd, 0)
            .any_limited());
    }
}
