//! Bounded lattices for meet-over-paths calculations.

use std::collections::BTreeSet;
use std::fmt;

/// Rendering of the Top element in diagnostics.
pub const TOP_SYMBOL: &str = "\u{22a4}";
/// Rendering of the Bottom element in diagnostics.
pub const BOTTOM_SYMBOL: &str = "\u{22a5}";

/// A bounded lattice of unordered values.
///
/// Values are incomparable with one another, while Top and Bottom compare
/// superior and inferior with every other element, respectively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlatLattice<T> {
    Top,
    Bottom,
    Value(T),
}

impl<T: Clone + Eq> FlatLattice<T> {
    pub fn is_top(&self) -> bool {
        matches!(self, FlatLattice::Top)
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, FlatLattice::Bottom)
    }

    /// True iff this element is neither Top nor Bottom.
    pub fn is_value(&self) -> bool {
        matches!(self, FlatLattice::Value(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            FlatLattice::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The infimum of the given elements.
    pub fn meet(a: &Self, b: &Self) -> Self {
        match (a, b) {
            (FlatLattice::Bottom, _) | (_, FlatLattice::Bottom) => FlatLattice::Bottom,
            (FlatLattice::Top, x) => x.clone(),
            (x, FlatLattice::Top) => x.clone(),
            (FlatLattice::Value(x), FlatLattice::Value(y)) if x == y => a.clone(),
            _ => FlatLattice::Bottom,
        }
    }

    /// The supremum of the given elements.
    pub fn join(a: &Self, b: &Self) -> Self {
        match (a, b) {
            (FlatLattice::Top, _) | (_, FlatLattice::Top) => FlatLattice::Top,
            (FlatLattice::Bottom, x) => x.clone(),
            (x, FlatLattice::Bottom) => x.clone(),
            (FlatLattice::Value(x), FlatLattice::Value(y)) if x == y => a.clone(),
            _ => FlatLattice::Top,
        }
    }

    pub fn meet_all<'a, I: IntoIterator<Item = &'a Self>>(elements: I) -> Self
    where
        T: 'a,
    {
        elements
            .into_iter()
            .fold(FlatLattice::Top, |a, b| Self::meet(&a, b))
    }

    pub fn join_all<'a, I: IntoIterator<Item = &'a Self>>(elements: I) -> Self
    where
        T: 'a,
    {
        elements
            .into_iter()
            .fold(FlatLattice::Bottom, |a, b| Self::join(&a, b))
    }
}

impl<T: fmt::Display> fmt::Display for FlatLattice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlatLattice::Top => f.write_str(TOP_SYMBOL),
            FlatLattice::Bottom => f.write_str(BOTTOM_SYMBOL),
            FlatLattice::Value(v) => v.fmt(f),
        }
    }
}

/// A subset lattice element.
///
/// Top is the complete universe, Bottom is the empty set, and every other
/// element is a finite subset of the universe. Top is never materialised
/// as a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubsetLattice<T: Ord> {
    Top,
    Set(BTreeSet<T>),
}

impl<T: Ord + Clone> SubsetLattice<T> {
    pub fn top() -> Self {
        SubsetLattice::Top
    }

    /// The empty set.
    pub fn bottom() -> Self {
        SubsetLattice::Set(BTreeSet::new())
    }

    pub fn singleton(value: T) -> Self {
        SubsetLattice::Set(BTreeSet::from_iter([value]))
    }

    pub fn is_top(&self) -> bool {
        matches!(self, SubsetLattice::Top)
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, SubsetLattice::Set(s) if s.is_empty())
    }

    /// True iff this element holds a finite, nonzero number of values.
    pub fn is_finite(&self) -> bool {
        !(self.is_top() || self.is_bottom())
    }

    /// True iff this element holds exactly one value.
    pub fn is_const(&self) -> bool {
        matches!(self, SubsetLattice::Set(s) if s.len() == 1)
    }

    /// The cardinality of this element, or None for Top.
    pub fn len(&self) -> Option<usize> {
        match self {
            SubsetLattice::Top => None,
            SubsetLattice::Set(s) => Some(s.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is_bottom()
    }

    pub fn as_set(&self) -> Option<&BTreeSet<T>> {
        match self {
            SubsetLattice::Top => None,
            SubsetLattice::Set(s) => Some(s),
        }
    }

    /// Iterate the contained values in ascending order; Top yields nothing.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.as_set().into_iter().flatten()
    }

    /// The infimum: set intersection, with Top as identity.
    pub fn meet(a: &Self, b: &Self) -> Self {
        match (a, b) {
            (SubsetLattice::Top, x) => x.clone(),
            (x, SubsetLattice::Top) => x.clone(),
            (SubsetLattice::Set(x), SubsetLattice::Set(y)) => {
                SubsetLattice::Set(x.intersection(y).cloned().collect())
            }
        }
    }

    /// The supremum: set union, with Top absorbing.
    pub fn join(a: &Self, b: &Self) -> Self {
        match (a, b) {
            (SubsetLattice::Top, _) | (_, SubsetLattice::Top) => SubsetLattice::Top,
            (SubsetLattice::Set(x), SubsetLattice::Set(y)) => {
                SubsetLattice::Set(x.union(y).cloned().collect())
            }
        }
    }

    pub fn meet_all<'a, I: IntoIterator<Item = &'a Self>>(elements: I) -> Self
    where
        T: 'a,
    {
        elements
            .into_iter()
            .fold(SubsetLattice::Top, |a, b| Self::meet(&a, b))
    }

    pub fn join_all<'a, I: IntoIterator<Item = &'a Self>>(elements: I) -> Self
    where
        T: 'a,
    {
        elements
            .into_iter()
            .fold(Self::bottom(), |a, b| Self::join(&a, b))
    }

    /// Apply a function pointwise; Top maps to Top.
    pub fn map<U: Ord + Clone, F: Fn(&T) -> U>(&self, f: F) -> SubsetLattice<U> {
        match self {
            SubsetLattice::Top => SubsetLattice::Top,
            SubsetLattice::Set(s) => SubsetLattice::Set(s.iter().map(f).collect()),
        }
    }

    /// Apply an n-ary function to every ordered combination of values drawn
    /// from the given elements. Top in any argument yields Top.
    pub fn cartesian_map<F: Fn(&[&T]) -> T>(f: F, elements: &[&Self]) -> Self {
        let mut sets = Vec::with_capacity(elements.len());
        for e in elements {
            match e {
                SubsetLattice::Top => return SubsetLattice::Top,
                SubsetLattice::Set(s) => sets.push(s),
            }
        }

        let mut result = BTreeSet::new();
        if sets.iter().any(|s| s.is_empty()) {
            return SubsetLattice::Set(result);
        }

        // Odometer over the argument sets.
        let mut cursors: Vec<_> = sets.iter().map(|s| s.iter()).collect();
        let mut current: Vec<&T> = cursors
            .iter_mut()
            .map(|c| c.next().expect("nonempty set"))
            .collect();
        loop {
            result.insert(f(&current));

            let mut pos = sets.len();
            loop {
                if pos == 0 {
                    return SubsetLattice::Set(result);
                }
                pos -= 1;
                if let Some(next) = cursors[pos].next() {
                    current[pos] = next;
                    break;
                }
                cursors[pos] = sets[pos].iter();
                current[pos] = cursors[pos].next().expect("nonempty set");
            }
        }
    }
}

impl<T: Ord + Clone> FromIterator<T> for SubsetLattice<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        SubsetLattice::Set(iter.into_iter().collect())
    }
}

impl<T: Ord + fmt::Display> fmt::Display for SubsetLattice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubsetLattice::Top => f.write_str(TOP_SYMBOL),
            SubsetLattice::Set(s) if s.is_empty() => f.write_str(BOTTOM_SYMBOL),
            SubsetLattice::Set(s) => {
                write!(f, "{{")?;
                for (i, v) in s.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
