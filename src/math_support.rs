use std::cmp::Ordering;

/// Closed interval of flash bytes, tagged with the index of the entry it belongs to
#[derive(Debug, Clone, Copy)]
pub struct Interval {
    start: u64,
    end: u64,
    owner: usize,
}
impl Interval {
    pub fn new(start: u64, end: u64, owner: usize) -> Self {
        Interval { start, end, owner }
    }
}
impl Ord for Interval {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start.cmp(&other.start).then(self.end.cmp(&other.end))
    }
}
impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Interval {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end
    }
}

impl Eq for Interval {}

#[derive(Debug, PartialEq)]
pub enum IntervalState {
    Disjoint,
    Equal,
    Subset,
    Superset,
    Overlap,
}

impl IntervalState {
    /// How the first interval relates to the second, worded for error messages
    pub fn describe(&self) -> &'static str {
        match self {
            IntervalState::Disjoint => "is disjoint from",
            IntervalState::Equal => "covers the same range as",
            IntervalState::Subset => "lies inside",
            IntervalState::Superset => "contains",
            IntervalState::Overlap => "overlaps",
        }
    }
}
/// check states of two closed intervals
/// If the first interval (interval1) is a subset of the second interval (interval2),
/// the function will return IntervalState::Subset.
pub fn check_interval_state(interval1: &Interval, interval2: &Interval) -> IntervalState {
    if interval1.end < interval2.start || interval1.start > interval2.end {
        return IntervalState::Disjoint;
    }
    if interval1 == interval2 {
        return IntervalState::Equal;
    }
    if interval1.start >= interval2.start && interval1.end <= interval2.end {
        return IntervalState::Subset;
    }
    if interval1.start <= interval2.start && interval1.end >= interval2.end {
        return IntervalState::Superset;
    }
    IntervalState::Overlap
}

/// find the first pair of intervals that share any byte
/// returns the owners of both intervals, lower start first, and how the first relates to the second
pub fn find_first_overlap(intervals: &mut [Interval]) -> Option<(usize, usize, IntervalState)> {
    intervals.sort();
    intervals.windows(2).find_map(|pair| match check_interval_state(&pair[0], &pair[1]) {
        IntervalState::Disjoint => None,
        state => Some((pair[0].owner, pair[1].owner, state)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_states() {
        let a = Interval::new(0, 9, 0);
        assert_eq!(check_interval_state(&a, &Interval::new(10, 19, 1)), IntervalState::Disjoint);
        assert_eq!(check_interval_state(&a, &Interval::new(0, 9, 1)), IntervalState::Equal);
        assert_eq!(check_interval_state(&Interval::new(2, 3, 1), &a), IntervalState::Subset);
        assert_eq!(check_interval_state(&a, &Interval::new(2, 3, 1)), IntervalState::Superset);
        assert_eq!(check_interval_state(&a, &Interval::new(9, 12, 1)), IntervalState::Overlap);
    }

    #[test]
    fn overlap_search_is_order_independent() {
        let mut touching = vec![Interval::new(0x2000, 0x2fff, 0), Interval::new(0x1000, 0x1fff, 1)];
        assert_eq!(find_first_overlap(&mut touching), None);

        let mut clash = vec![
            Interval::new(0x9000, 0xdfff, 0),
            Interval::new(0x1000, 0x1fff, 1),
            Interval::new(0xd000, 0xdfff, 2),
        ];
        assert_eq!(find_first_overlap(&mut clash), Some((0, 2, IntervalState::Superset)));
    }

    #[test]
    fn overlap_reports_how_ranges_meet() {
        let mut shared_start = vec![Interval::new(0x1000, 0x3fff, 0), Interval::new(0x1000, 0x1fff, 1)];
        assert_eq!(find_first_overlap(&mut shared_start), Some((1, 0, IntervalState::Subset)));

        let mut same = vec![Interval::new(0x1000, 0x1fff, 0), Interval::new(0x1000, 0x1fff, 1)];
        assert_eq!(find_first_overlap(&mut same).map(|(_, _, state)| state), Some(IntervalState::Equal));

        let mut straddle = vec![Interval::new(0x1800, 0x27ff, 0), Interval::new(0x1000, 0x1fff, 1)];
        assert_eq!(find_first_overlap(&mut straddle), Some((1, 0, IntervalState::Overlap)));
        assert_eq!(IntervalState::Overlap.describe(), "overlaps");
    }
}
