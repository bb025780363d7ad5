//! Named amounts with element-wise arithmetic.
//!
//! Comparisons are *asymmetric*: `a.ge(b)` holds when `a[k] >= b[k]` for
//! every key `k` present in `b`. The right-hand side is usually a partial
//! request, so keys it omits are simply not compared.

use std::{
    collections::{BTreeMap, btree_map},
    fmt,
    ops::{Add, Sub},
};

/// A numeric amount of some resource. `Default::default()` is the zero.
pub trait Amount:
    Copy + PartialOrd + Default + Add<Output = Self> + Sub<Output = Self> + fmt::Debug + fmt::Display
{
}

impl<T> Amount for T where
    T: Copy
        + PartialOrd
        + Default
        + Add<Output = Self>
        + Sub<Output = Self>
        + fmt::Debug
        + fmt::Display
{
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vector<T> {
    levels: BTreeMap<String, T>,
}

impl<T: Amount> Vector<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// Amount stored for `name`, or zero for unknown names.
    #[must_use]
    pub fn get(&self, name: &str) -> T {
        self.levels.get(name).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.levels.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, amount: T) {
        self.levels.insert(name.into(), amount);
    }

    pub fn iter(&self) -> Iter<'_, T> {
        self.into_iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.levels.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Same keys, every amount zero.
    #[must_use]
    pub fn zero_like(&self) -> Self {
        self.levels
            .keys()
            .map(|name| (name.clone(), T::default()))
            .collect()
    }

    #[must_use]
    pub fn ge(&self, other: &Self) -> bool {
        other.iter().all(|(name, amount)| self.get(name) >= amount)
    }

    #[must_use]
    pub fn gt(&self, other: &Self) -> bool {
        other.iter().all(|(name, amount)| self.get(name) > amount)
    }

    #[must_use]
    pub fn le(&self, other: &Self) -> bool {
        other.iter().all(|(name, amount)| self.get(name) <= amount)
    }

    /// First key of `other` for which `relation(self[key], other[key])`
    /// fails.
    pub(crate) fn violation<'a>(
        &self,
        other: &'a Self,
        relation: impl Fn(T, T) -> bool,
    ) -> Option<&'a str> {
        other
            .levels
            .iter()
            .find(|(name, amount)| !relation(self.get(name), **amount))
            .map(|(name, _)| name.as_str())
    }
}

pub type Iter<'a, T> =
    std::iter::Map<btree_map::Iter<'a, String, T>, fn((&'a String, &'a T)) -> (&'a str, T)>;

impl<'a, T: Amount> IntoIterator for &'a Vector<T> {
    type Item = (&'a str, T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.levels
            .iter()
            .map(|(name, amount)| (name.as_str(), *amount))
    }
}

impl<T: Amount> Add<&Vector<T>> for &Vector<T> {
    type Output = Vector<T>;

    fn add(self, other: &Vector<T>) -> Vector<T> {
        self.levels
            .iter()
            .map(|(name, amount)| (name.clone(), *amount + other.get(name)))
            .collect()
    }
}

impl<T: Amount> Sub<&Vector<T>> for &Vector<T> {
    type Output = Vector<T>;

    fn sub(self, other: &Vector<T>) -> Vector<T> {
        self.levels
            .iter()
            .map(|(name, amount)| (name.clone(), *amount - other.get(name)))
            .collect()
    }
}

impl<K: Into<String>, T> FromIterator<(K, T)> for Vector<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        Self {
            levels: iter
                .into_iter()
                .map(|(name, amount)| (name.into(), amount))
                .collect(),
        }
    }
}

impl<K: Into<String>, T, const N: usize> From<[(K, T); N]> for Vector<T> {
    fn from(levels: [(K, T); N]) -> Self {
        levels.into_iter().collect()
    }
}

impl<T: fmt::Display> fmt::Display for Vector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, amount)) in self.levels.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {amount}")?;
        }
        f.write_str("}")
    }
}
