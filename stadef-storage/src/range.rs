//! Time range utilities
//!
//! [`TimeRange`] is an interval over [`Timestamp`]s whose bounds are
//! expressed as [`Cut`]s, so closed, open, half-open and unbounded intervals
//! share one representation. [`RangeSet`] is a sorted list of disjoint ranges
//! supporting subtraction, used to compute the sub-ranges of a request that
//! are not cached yet. [`RangeMap`] maps disjoint ranges to values and backs
//! the per-entity version cache.

use stadef_core::Timestamp;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// CUT
// ============================================================================

/// A boundary between timestamps.
///
/// `Below(t)` sits just before `t`, `Above(t)` just after it. A range from
/// `Below(a)` to `Above(b)` is therefore `[a, b]`, and one from `Below(a)` to
/// `Below(b)` is `[a, b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cut {
    BelowAll,
    Below(Timestamp),
    Above(Timestamp),
    AboveAll,
}

impl Cut {
    fn rank(&self) -> u8 {
        match self {
            Cut::BelowAll => 0,
            Cut::Below(_) | Cut::Above(_) => 1,
            Cut::AboveAll => 2,
        }
    }

    /// True if this cut lies before `t`.
    pub fn is_less_than(&self, t: Timestamp) -> bool {
        match self {
            Cut::BelowAll => true,
            Cut::Below(x) => *x <= t,
            Cut::Above(x) => *x < t,
            Cut::AboveAll => false,
        }
    }

    /// The timestamp this cut is attached to, if bounded.
    pub fn endpoint(&self) -> Option<Timestamp> {
        match self {
            Cut::Below(t) | Cut::Above(t) => Some(*t),
            Cut::BelowAll | Cut::AboveAll => None,
        }
    }
}

impl Ord for Cut {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Cut::Below(a), Cut::Below(b)) | (Cut::Above(a), Cut::Above(b)) => a.cmp(b),
            (Cut::Below(a), Cut::Above(b)) => a.cmp(b).then(Ordering::Less),
            (Cut::Above(a), Cut::Below(b)) => a.cmp(b).then(Ordering::Greater),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Cut {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// TIME RANGE
// ============================================================================

/// Interval of timestamps between two cuts, `lower <= upper`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    lower: Cut,
    upper: Cut,
}

impl TimeRange {
    /// Range between two cuts. Inverted bounds collapse to an empty range at
    /// the lower cut.
    pub fn from_cuts(lower: Cut, upper: Cut) -> Self {
        if lower <= upper {
            Self { lower, upper }
        } else {
            Self {
                lower,
                upper: lower,
            }
        }
    }

    /// `[start, end]`
    pub fn closed(start: Timestamp, end: Timestamp) -> Self {
        Self::from_cuts(Cut::Below(start), Cut::Above(end))
    }

    /// `[start, end)`
    pub fn closed_open(start: Timestamp, end: Timestamp) -> Self {
        Self::from_cuts(Cut::Below(start), Cut::Below(end))
    }

    /// `(start, end]`
    pub fn open_closed(start: Timestamp, end: Timestamp) -> Self {
        Self::from_cuts(Cut::Above(start), Cut::Above(end))
    }

    /// `(start, end)`
    pub fn open(start: Timestamp, end: Timestamp) -> Self {
        Self::from_cuts(Cut::Above(start), Cut::Below(end))
    }

    /// `[start, +inf)`
    pub fn at_least(start: Timestamp) -> Self {
        Self::from_cuts(Cut::Below(start), Cut::AboveAll)
    }

    /// Every timestamp.
    pub fn all() -> Self {
        Self::from_cuts(Cut::BelowAll, Cut::AboveAll)
    }

    /// Validity range of a version: `[effective_at, effective_until)`, or
    /// unbounded above for the open, latest version.
    pub fn effective(effective_at: Timestamp, effective_until: Option<Timestamp>) -> Self {
        match effective_until {
            Some(until) => Self::closed_open(effective_at, until),
            None => Self::at_least(effective_at),
        }
    }

    pub fn lower(&self) -> Cut {
        self.lower
    }

    pub fn upper(&self) -> Cut {
        self.upper
    }

    pub fn lower_endpoint(&self) -> Option<Timestamp> {
        self.lower.endpoint()
    }

    pub fn upper_endpoint(&self) -> Option<Timestamp> {
        self.upper.endpoint()
    }

    pub fn is_empty(&self) -> bool {
        self.lower == self.upper
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.lower.is_less_than(t) && !self.upper.is_less_than(t)
    }

    /// True if there is a (possibly empty) range enclosed by both.
    pub fn is_connected(&self, other: &TimeRange) -> bool {
        self.lower <= other.upper && other.lower <= self.upper
    }

    /// Largest range enclosed by both, if they are connected.
    pub fn intersection(&self, other: &TimeRange) -> Option<TimeRange> {
        if !self.is_connected(other) {
            return None;
        }
        Some(TimeRange::from_cuts(
            self.lower.max(other.lower),
            self.upper.min(other.upper),
        ))
    }

    /// True if at least one timestamp lies in both ranges.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.intersection(other).is_some_and(|r| !r.is_empty())
    }

    /// Pieces of `self` not covered by `other`, in ascending order.
    fn subtract(&self, other: &TimeRange) -> Vec<TimeRange> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut pieces = Vec::with_capacity(2);
        if self.lower < other.lower {
            pieces.push(TimeRange::from_cuts(self.lower, other.lower));
        }
        if other.upper < self.upper {
            pieces.push(TimeRange::from_cuts(other.upper, self.upper));
        }
        pieces
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lower {
            Cut::BelowAll => f.write_str("(-inf")?,
            Cut::Below(t) => write!(f, "[{}", t.to_rfc3339())?,
            Cut::Above(t) => write!(f, "({}", t.to_rfc3339())?,
            Cut::AboveAll => f.write_str("(+inf")?,
        }
        f.write_str("..")?;
        match self.upper {
            Cut::BelowAll => f.write_str("-inf)"),
            Cut::Below(t) => write!(f, "{})", t.to_rfc3339()),
            Cut::Above(t) => write!(f, "{}]", t.to_rfc3339()),
            Cut::AboveAll => f.write_str("+inf)"),
        }
    }
}

// ============================================================================
// RANGE SET
// ============================================================================

/// Set of timestamps stored as sorted, disjoint, non-empty ranges.
///
/// Connected ranges are coalesced on insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<TimeRange>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(range: TimeRange) -> Self {
        let mut set = Self::new();
        set.add(range);
        set
    }

    pub fn add(&mut self, range: TimeRange) {
        if range.is_empty() {
            return;
        }
        let mut merged = range;
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for existing in self.ranges.drain(..) {
            if existing.is_connected(&merged) {
                merged = TimeRange::from_cuts(
                    existing.lower.min(merged.lower),
                    existing.upper.max(merged.upper),
                );
            } else {
                kept.push(existing);
            }
        }
        let position = kept.partition_point(|r| r.lower < merged.lower);
        kept.insert(position, merged);
        self.ranges = kept;
    }

    /// Remove every timestamp in `range` from the set.
    pub fn remove(&mut self, range: &TimeRange) {
        if range.is_empty() {
            return;
        }
        self.ranges = self
            .ranges
            .iter()
            .flat_map(|existing| existing.subtract(range))
            .filter(|piece| !piece.is_empty())
            .collect();
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.ranges.iter().any(|r| r.contains(t))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Ranges in ascending order.
    pub fn as_ranges(&self) -> &[TimeRange] {
        &self.ranges
    }

    /// Ranges in descending order.
    pub fn as_descending_ranges(&self) -> impl Iterator<Item = &TimeRange> {
        self.ranges.iter().rev()
    }
}

// ============================================================================
// RANGE MAP
// ============================================================================

/// Map from disjoint, non-empty ranges to values.
///
/// Putting a range overwrites whatever overlapped it; the uncovered remainder
/// of an overwritten entry keeps its old value. Adjacent entries are never
/// merged, so each entry stays exactly the range it was written with unless
/// a later write clipped it.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeMap<V> {
    entries: BTreeMap<Cut, (TimeRange, V)>,
}

impl<V> Default for RangeMap<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V: Clone> RangeMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, range: TimeRange, value: V) {
        if range.is_empty() {
            return;
        }
        let overlapping: Vec<Cut> = self
            .entries
            .range(..range.upper)
            .filter(|(_, (existing, _))| existing.upper > range.lower)
            .map(|(lower, _)| *lower)
            .collect();

        for lower in overlapping {
            if let Some((existing, old)) = self.entries.remove(&lower) {
                for piece in existing.subtract(&range) {
                    if !piece.is_empty() {
                        self.entries.insert(piece.lower, (piece, old.clone()));
                    }
                }
            }
        }
        self.entries.insert(range.lower, (range, value));
    }

    /// Put every entry of `other`, in ascending order.
    pub fn put_all(&mut self, other: &RangeMap<V>) {
        for (range, value) in other.iter() {
            self.put(*range, value.clone());
        }
    }

    /// Entry whose range contains `t`.
    pub fn get_entry(&self, t: Timestamp) -> Option<(&TimeRange, &V)> {
        self.entries
            .range(..=Cut::Below(t))
            .next_back()
            .filter(|(_, (range, _))| range.contains(t))
            .map(|(_, (range, value))| (range, value))
    }

    pub fn get(&self, t: Timestamp) -> Option<&V> {
        self.get_entry(t).map(|(_, value)| value)
    }

    /// Entries in ascending range order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&TimeRange, &V)> {
        self.entries.values().map(|(range, value)| (range, value))
    }

    pub fn ranges(&self) -> impl DoubleEndedIterator<Item = &TimeRange> {
        self.entries.values().map(|(range, _)| range)
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> {
        self.entries.values().map(|(_, value)| value)
    }

    /// Smallest range enclosing every entry.
    pub fn span(&self) -> Option<TimeRange> {
        let first = self.entries.values().next()?;
        let last = self.entries.values().next_back()?;
        Some(TimeRange::from_cuts(first.0.lower, last.0.upper))
    }

    /// Map each value, dropping entries for which `f` returns `None`.
    pub fn filter_map<U: Clone>(&self, mut f: impl FnMut(&V) -> Option<U>) -> RangeMap<U> {
        RangeMap {
            entries: self
                .entries
                .iter()
                .filter_map(|(lower, (range, value))| f(value).map(|u| (*lower, (*range, u))))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> FromIterator<(TimeRange, V)> for RangeMap<V> {
    fn from_iter<I: IntoIterator<Item = (TimeRange, V)>>(iter: I) -> Self {
        let mut map = RangeMap::new();
        for (range, value) in iter {
            map.put(range, value);
        }
        map
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_cut_ordering() {
        assert!(Cut::BelowAll < Cut::Below(ts(1)));
        assert!(Cut::Below(ts(1)) < Cut::Above(ts(1)));
        assert!(Cut::Above(ts(1)) < Cut::Below(ts(2)));
        assert!(Cut::Above(ts(28)) < Cut::AboveAll);
    }

    #[test]
    fn test_contains_respects_bounds() {
        let closed = TimeRange::closed(ts(1), ts(5));
        assert!(closed.contains(ts(1)));
        assert!(closed.contains(ts(5)));

        let half_open = TimeRange::closed_open(ts(1), ts(5));
        assert!(half_open.contains(ts(1)));
        assert!(!half_open.contains(ts(5)));

        let open = TimeRange::open(ts(1), ts(5));
        assert!(!open.contains(ts(1)));
        assert!(open.contains(ts(3)));

        assert!(TimeRange::at_least(ts(1)).contains(ts(28)));
        assert!(!TimeRange::at_least(ts(2)).contains(ts(1)));
        assert!(TimeRange::all().contains(ts(1)));
    }

    #[test]
    fn test_inverted_bounds_collapse_to_empty() {
        let range = TimeRange::closed(ts(5), ts(1));
        assert!(range.is_empty());
        assert!(!range.contains(ts(3)));
    }

    #[test]
    fn test_connected_but_not_overlapping() {
        let a = TimeRange::closed_open(ts(1), ts(5));
        let b = TimeRange::closed_open(ts(5), ts(9));
        assert!(a.is_connected(&b));
        assert!(!a.overlaps(&b));
        assert!(a.intersection(&b).unwrap().is_empty());

        let c = TimeRange::closed(ts(10), ts(12));
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn test_display() {
        let range = TimeRange::closed_open(ts(1), ts(2));
        let text = range.to_string();
        assert!(text.starts_with('['));
        assert!(text.ends_with(')'));
        assert_eq!(TimeRange::all().to_string(), "(-inf..+inf)");
    }

    #[test]
    fn test_range_set_subtract_middle() {
        let mut set = RangeSet::of(TimeRange::closed(ts(1), ts(20)));
        set.remove(&TimeRange::closed_open(ts(5), ts(10)));

        assert_eq!(
            set.as_ranges(),
            [
                TimeRange::closed_open(ts(1), ts(5)),
                TimeRange::closed(ts(10), ts(20)),
            ]
        );

        let descending: Vec<_> = set.as_descending_ranges().copied().collect();
        assert_eq!(descending[0], TimeRange::closed(ts(10), ts(20)));
    }

    #[test]
    fn test_range_set_subtract_closed_leaves_open_edges() {
        let mut set = RangeSet::of(TimeRange::closed(ts(1), ts(20)));
        set.remove(&TimeRange::closed(ts(5), ts(10)));

        assert_eq!(
            set.as_ranges(),
            [
                TimeRange::closed_open(ts(1), ts(5)),
                TimeRange::open_closed(ts(10), ts(20)),
            ]
        );
    }

    #[test]
    fn test_range_set_subtract_everything() {
        let mut set = RangeSet::of(TimeRange::closed(ts(3), ts(4)));
        set.remove(&TimeRange::at_least(ts(1)));
        assert!(set.is_empty());
    }

    #[test]
    fn test_range_set_subtract_disjoint_is_noop() {
        let mut set = RangeSet::of(TimeRange::closed(ts(3), ts(4)));
        set.remove(&TimeRange::closed_open(ts(5), ts(9)));
        set.remove(&TimeRange::closed_open(ts(1), ts(3)));
        assert_eq!(set.as_ranges(), [TimeRange::closed(ts(3), ts(4))]);
    }

    #[test]
    fn test_range_set_add_coalesces() {
        let mut set = RangeSet::new();
        set.add(TimeRange::closed_open(ts(1), ts(3)));
        set.add(TimeRange::closed_open(ts(5), ts(7)));
        set.add(TimeRange::closed_open(ts(3), ts(5)));
        assert_eq!(set.as_ranges(), [TimeRange::closed_open(ts(1), ts(7))]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_range_map_point_lookup() {
        let mut map = RangeMap::new();
        map.put(TimeRange::closed_open(ts(1), ts(5)), "a");
        map.put(TimeRange::at_least(ts(5)), "b");

        assert_eq!(map.get(ts(1)), Some(&"a"));
        assert_eq!(map.get(ts(4)), Some(&"a"));
        assert_eq!(map.get(ts(5)), Some(&"b"));
        assert_eq!(map.get(ts(28)), Some(&"b"));
        assert_eq!(
            map.get(Utc.with_ymd_and_hms(2019, 12, 31, 0, 0, 0).unwrap()),
            None
        );
    }

    #[test]
    fn test_range_map_gap_returns_none() {
        let mut map = RangeMap::new();
        map.put(TimeRange::closed_open(ts(1), ts(3)), 1);
        map.put(TimeRange::closed_open(ts(5), ts(7)), 2);
        assert_eq!(map.get(ts(4)), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_range_map_overwrite_splits_existing() {
        let mut map = RangeMap::new();
        map.put(TimeRange::closed_open(ts(1), ts(10)), "old");
        map.put(TimeRange::closed_open(ts(4), ts(6)), "new");

        let entries: Vec<_> = map.iter().map(|(r, v)| (*r, *v)).collect();
        assert_eq!(
            entries,
            vec![
                (TimeRange::closed_open(ts(1), ts(4)), "old"),
                (TimeRange::closed_open(ts(4), ts(6)), "new"),
                (TimeRange::closed_open(ts(6), ts(10)), "old"),
            ]
        );
    }

    #[test]
    fn test_range_map_identical_put_is_replacement() {
        let mut map = RangeMap::new();
        map.put(TimeRange::closed_open(ts(1), ts(10)), 1);
        map.put(TimeRange::closed_open(ts(1), ts(10)), 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(ts(2)), Some(&2));
    }

    #[test]
    fn test_range_map_span_and_filter_map() {
        let map: RangeMap<i32> = vec![
            (TimeRange::closed_open(ts(5), ts(7)), 2),
            (TimeRange::closed_open(ts(1), ts(3)), 1),
        ]
        .into_iter()
        .collect();

        assert_eq!(map.span(), Some(TimeRange::closed_open(ts(1), ts(7))));

        let odd = map.filter_map(|v| (v % 2 == 1).then_some(*v));
        assert_eq!(odd.len(), 1);
        assert_eq!(odd.get(ts(2)), Some(&1));
    }
}
