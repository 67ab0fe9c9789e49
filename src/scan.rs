//! Filtered range scan: walks one sorted set's score window and keeps the
//! members that are present in (intersection) or absent from (difference) a
//! second sorted set.
//!
//! The engine never materializes either set. It pulls elements one at a time
//! from the host's ordered range iterator, asks the host's membership oracle
//! about each one, and pushes the survivors into a [`RangeSink`].

use crate::error::Result;
use crate::range::RangeQuery;
use crate::types::{ScanDirection, ScoreRange, SetOpMode, ZMember};

/// Opens keys of the host store read-only
pub trait KeyResolver {
    /// An opened sorted set. Dropping the handle releases the key.
    type Handle;

    /// `Ok(None)` if the key does not exist, `Err(KvError::WrongType)` if it
    /// holds something other than a sorted set.
    fn open_zset(&self, key: &str) -> Result<Option<Self::Handle>>;
}

/// Score-ordered iteration over an opened sorted set
pub trait RangeScanner: KeyResolver {
    fn range<'a>(
        &'a self,
        zset: &'a Self::Handle,
        window: &ScoreRange,
        direction: ScanDirection,
    ) -> Result<Box<dyn Iterator<Item = Result<ZMember>> + 'a>>;
}

/// Point lookups into an opened sorted set
pub trait MembershipOracle: KeyResolver {
    /// Score of `member`, or `None` when it is not in the set
    fn score(&self, zset: &Self::Handle, member: &[u8]) -> Result<Option<f64>>;
}

/// Receives the emitted elements of a scan, in scan order
pub trait RangeSink {
    fn push(&mut self, entry: ZMember);
}

impl RangeSink for Vec<ZMember> {
    fn push(&mut self, entry: ZMember) {
        Vec::push(self, entry);
    }
}

/// How a scan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The window is empty; no key was opened
    EmptyWindow,
    /// The subject set does not exist
    MissingSubject,
    /// Intersection against a filter set that does not exist
    MissingFilter,
    /// The window was walked until exhausted or the limit was reached
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub outcome: ScanOutcome,
    /// Elements pulled from the subject window
    pub scanned: u64,
    /// Elements that passed the membership test
    pub qualified: u64,
    /// Elements pushed into the sink
    pub emitted: u64,
}

impl ScanSummary {
    fn short_circuit(outcome: ScanOutcome) -> Self {
        Self {
            outcome,
            scanned: 0,
            qualified: 0,
            emitted: 0,
        }
    }
}

/// Run `query` against `store`, pushing results into `sink`.
///
/// Errors are only reported before anything reaches the sink, except for
/// host storage failures in the middle of the walk; callers that must not
/// produce partial replies should buffer the sink until this returns `Ok`.
pub fn run<S, K>(store: &S, query: &RangeQuery, sink: &mut K) -> Result<ScanSummary>
where
    S: RangeScanner + MembershipOracle,
    K: RangeSink + ?Sized,
{
    if query.is_empty_window() {
        return Ok(ScanSummary::short_circuit(ScanOutcome::EmptyWindow));
    }

    // Both keys are type checked before existence decides anything.
    let subject = store.open_zset(&query.subject)?;
    let filter = store.open_zset(&query.filter)?;

    let Some(subject) = subject else {
        return Ok(ScanSummary::short_circuit(ScanOutcome::MissingSubject));
    };
    if filter.is_none() && query.mode == SetOpMode::Intersection {
        return Ok(ScanSummary::short_circuit(ScanOutcome::MissingFilter));
    }

    let page = query.page;
    let limit_reached = |emitted: u64| !page.is_unbounded() && emitted >= page.limit as u64;

    let mut summary = ScanSummary::short_circuit(ScanOutcome::Completed);
    if limit_reached(0) {
        return Ok(summary);
    }

    let mut to_skip = page.offset;
    for entry in store.range(&subject, &query.window(), query.direction)? {
        let entry = entry?;
        summary.scanned += 1;

        let qualifies = match &filter {
            // a missing filter set excludes nothing
            None => true,
            Some(filter) => {
                let present = store.score(filter, &entry.member)?.is_some();
                match query.mode {
                    SetOpMode::Intersection => present,
                    SetOpMode::Difference => !present,
                }
            }
        };
        if !qualifies {
            continue;
        }

        summary.qualified += 1;
        if to_skip > 0 {
            to_skip -= 1;
            continue;
        }

        sink.push(entry);
        summary.emitted += 1;
        if limit_reached(summary.emitted) {
            break;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KvError;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::rc::Rc;

    enum FakeValue {
        ZSet(Vec<ZMember>),
        Str,
    }

    /// In-memory host that counts opened and still-open handles
    #[derive(Default)]
    struct FakeStore {
        keys: HashMap<String, FakeValue>,
        opened: Cell<usize>,
        live: Rc<Cell<usize>>,
        lookups: Cell<usize>,
    }

    struct FakeHandle {
        key: String,
        live: Rc<Cell<usize>>,
    }

    impl Drop for FakeHandle {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    impl FakeStore {
        fn zadd(mut self, key: &str, members: &[(f64, &str)]) -> Self {
            let members = members.iter().map(|(s, m)| ZMember::new(*s, *m)).collect();
            self.keys.insert(key.to_string(), FakeValue::ZSet(members));
            self
        }

        fn string(mut self, key: &str) -> Self {
            self.keys.insert(key.to_string(), FakeValue::Str);
            self
        }

        fn members(&self, key: &str) -> &[ZMember] {
            match self.keys.get(key) {
                Some(FakeValue::ZSet(members)) => members,
                _ => &[],
            }
        }
    }

    impl KeyResolver for FakeStore {
        type Handle = FakeHandle;

        fn open_zset(&self, key: &str) -> Result<Option<FakeHandle>> {
            match self.keys.get(key) {
                None => Ok(None),
                Some(FakeValue::Str) => Err(KvError::WrongType),
                Some(FakeValue::ZSet(_)) => {
                    self.opened.set(self.opened.get() + 1);
                    self.live.set(self.live.get() + 1);
                    Ok(Some(FakeHandle {
                        key: key.to_string(),
                        live: self.live.clone(),
                    }))
                }
            }
        }
    }

    impl RangeScanner for FakeStore {
        fn range<'a>(
            &'a self,
            zset: &'a FakeHandle,
            window: &ScoreRange,
            direction: ScanDirection,
        ) -> Result<Box<dyn Iterator<Item = Result<ZMember>> + 'a>> {
            let mut items: Vec<ZMember> = self
                .members(&zset.key)
                .iter()
                .filter(|m| window.contains(m.score))
                .cloned()
                .collect();
            items.sort_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.member.cmp(&b.member))
            });
            if direction.is_reverse() {
                items.reverse();
            }
            Ok(Box::new(items.into_iter().map(Ok)))
        }
    }

    impl MembershipOracle for FakeStore {
        fn score(&self, zset: &FakeHandle, member: &[u8]) -> Result<Option<f64>> {
            self.lookups.set(self.lookups.get() + 1);
            Ok(self
                .members(&zset.key)
                .iter()
                .find(|m| m.member == member)
                .map(|m| m.score))
        }
    }

    fn scenario_ab() -> FakeStore {
        FakeStore::default()
            .zadd("subject", &[(1.0, "a"), (2.0, "b"), (3.0, "c")])
            .zadd("filter", &[(2.0, "b"), (5.0, "c"), (9.0, "d")])
    }

    fn five() -> FakeStore {
        let members = [(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d"), (5.0, "e")];
        FakeStore::default()
            .zadd("subject", &members)
            .zadd("filter", &members)
    }

    fn query(mode: SetOpMode, direction: ScanDirection, first: f64, second: f64) -> RangeQuery {
        RangeQuery::new("subject", "filter", (first, false), (second, false), mode, direction)
    }

    fn names(out: &[ZMember]) -> Vec<&str> {
        out.iter()
            .map(|m| std::str::from_utf8(&m.member).unwrap())
            .collect()
    }

    fn collect(store: &FakeStore, q: &RangeQuery) -> (Vec<ZMember>, ScanSummary) {
        let mut out = Vec::new();
        let summary = run(store, q, &mut out).unwrap();
        (out, summary)
    }

    #[test]
    fn test_intersection_by_member_identity() {
        let store = scenario_ab();
        let q = query(SetOpMode::Intersection, ScanDirection::Forward, 1.0, 3.0).with_scores();
        let (out, summary) = collect(&store, &q);
        assert_eq!(names(&out), vec!["b", "c"]);
        // the subject's score is reported, not the filter's
        assert_eq!(out[1].score, 3.0);
        assert_eq!(summary.outcome, ScanOutcome::Completed);
        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.emitted, 2);
    }

    #[test]
    fn test_difference_by_member_identity() {
        let store = scenario_ab();
        let q = query(SetOpMode::Difference, ScanDirection::Forward, 1.0, 3.0);
        let (out, _) = collect(&store, &q);
        assert_eq!(names(&out), vec!["a"]);
    }

    #[test]
    fn test_pagination_counts_qualifying_elements() {
        let store = five();
        let q = query(SetOpMode::Intersection, ScanDirection::Forward, 2.0, 4.0).with_page(1, 2);
        let (out, summary) = collect(&store, &q);
        assert_eq!(names(&out), vec!["c", "d"]);
        assert_eq!(summary.qualified, 3);

        // non-qualifying elements do not consume the offset
        let store = FakeStore::default()
            .zadd("subject", &[(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d"), (5.0, "e")])
            .zadd("filter", &[(0.0, "b"), (0.0, "d"), (0.0, "e")]);
        let q = query(SetOpMode::Intersection, ScanDirection::Forward, 1.0, 5.0).with_page(1, 1);
        let (out, _) = collect(&store, &q);
        assert_eq!(names(&out), vec!["d"]);
    }

    #[test]
    fn test_limit_stops_the_walk() {
        let store = five();
        let q = query(SetOpMode::Intersection, ScanDirection::Forward, f64::NEG_INFINITY, f64::INFINITY)
            .with_page(0, 2);
        let (out, summary) = collect(&store, &q);
        assert_eq!(names(&out), vec!["a", "b"]);
        assert_eq!(summary.scanned, 2);
    }

    #[test]
    fn test_limit_zero_emits_nothing() {
        let store = five();
        let q = query(SetOpMode::Difference, ScanDirection::Forward, 1.0, 5.0).with_page(0, 0);
        let (out, summary) = collect(&store, &q);
        assert!(out.is_empty());
        assert_eq!(summary.scanned, 0);
    }

    #[test]
    fn test_negative_limit_is_unbounded() {
        let store = five();
        let q = query(SetOpMode::Intersection, ScanDirection::Forward, 1.0, 5.0).with_page(0, -7);
        let (out, _) = collect(&store, &q);
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn test_offset_past_the_end() {
        let store = five();
        let q = query(SetOpMode::Intersection, ScanDirection::Forward, 2.0, 3.0).with_page(10, 5);
        let (out, summary) = collect(&store, &q);
        assert!(out.is_empty());
        assert_eq!(summary.outcome, ScanOutcome::Completed);
        assert_eq!(summary.qualified, 2);
    }

    #[test]
    fn test_negative_offset_skips_nothing() {
        let store = five();
        let q = query(SetOpMode::Intersection, ScanDirection::Forward, 1.0, 2.0).with_page(-3, -1);
        let (out, _) = collect(&store, &q);
        assert_eq!(names(&out), vec!["a", "b"]);
    }

    #[test]
    fn test_forward_and_reverse_ordering() {
        let store = FakeStore::default()
            .zadd("subject", &[(3.0, "x"), (1.0, "y"), (2.0, "z"), (2.0, "w"), (5.0, "v")])
            .zadd("filter", &[]);

        let q = query(SetOpMode::Difference, ScanDirection::Forward, f64::NEG_INFINITY, f64::INFINITY);
        let (out, _) = collect(&store, &q);
        assert_eq!(names(&out), vec!["y", "w", "z", "x", "v"]);
        assert!(out.windows(2).all(|w| w[0].score <= w[1].score));

        let q = query(SetOpMode::Difference, ScanDirection::Reverse, f64::INFINITY, f64::NEG_INFINITY);
        let (out, _) = collect(&store, &q);
        assert_eq!(names(&out), vec!["v", "x", "z", "w", "y"]);
        assert!(out.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_reverse_uses_first_token_as_upper_bound() {
        let store = five();
        let q = RangeQuery::new(
            "subject",
            "filter",
            (4.0, true),
            (2.0, false),
            SetOpMode::Intersection,
            ScanDirection::Reverse,
        );
        let (out, _) = collect(&store, &q);
        assert_eq!(names(&out), vec!["c", "b"]);
    }

    #[test]
    fn test_exclusive_bounds() {
        let store = five();
        let q = RangeQuery::new(
            "subject",
            "filter",
            (1.0, true),
            (4.0, true),
            SetOpMode::Intersection,
            ScanDirection::Forward,
        );
        let (out, _) = collect(&store, &q);
        assert_eq!(names(&out), vec!["b", "c"]);
    }

    #[test]
    fn test_empty_window_opens_no_key() {
        let store = FakeStore::default().string("subject").string("filter");
        let q = query(SetOpMode::Intersection, ScanDirection::Forward, 5.0, 1.0);
        let (out, summary) = collect(&store, &q);
        assert!(out.is_empty());
        assert_eq!(summary.outcome, ScanOutcome::EmptyWindow);
        assert_eq!(store.opened.get(), 0);

        let q = query(SetOpMode::Difference, ScanDirection::Reverse, 1.0, 5.0);
        let (_, summary) = collect(&store, &q);
        assert_eq!(summary.outcome, ScanOutcome::EmptyWindow);
    }

    #[test]
    fn test_missing_subject_is_empty_for_both_modes() {
        let store = FakeStore::default().zadd("filter", &[(1.0, "a")]);
        for mode in [SetOpMode::Intersection, SetOpMode::Difference] {
            let (out, summary) = collect(&store, &query(mode, ScanDirection::Forward, 0.0, 10.0));
            assert!(out.is_empty());
            assert_eq!(summary.outcome, ScanOutcome::MissingSubject);
        }
        assert_eq!(store.live.get(), 0);
    }

    #[test]
    fn test_missing_filter() {
        let store = FakeStore::default().zadd("subject", &[(1.0, "a"), (2.0, "b"), (9.0, "c")]);

        let q = query(SetOpMode::Intersection, ScanDirection::Forward, 0.0, 5.0);
        let (out, summary) = collect(&store, &q);
        assert!(out.is_empty());
        assert_eq!(summary.outcome, ScanOutcome::MissingFilter);

        let q = query(SetOpMode::Difference, ScanDirection::Forward, 0.0, 5.0);
        let (out, _) = collect(&store, &q);
        assert_eq!(names(&out), vec!["a", "b"]);
        assert_eq!(store.lookups.get(), 0);
    }

    #[test]
    fn test_wrong_type_subject_never_opens_filter() {
        let store = FakeStore::default().string("subject").zadd("filter", &[(1.0, "a")]);
        let q = query(SetOpMode::Difference, ScanDirection::Forward, 0.0, 5.0);
        let mut out = Vec::new();
        assert!(matches!(run(&store, &q, &mut out), Err(KvError::WrongType)));
        assert_eq!(store.opened.get(), 0);
    }

    #[test]
    fn test_wrong_type_filter_releases_subject() {
        let store = FakeStore::default().zadd("subject", &[(1.0, "a")]).string("filter");
        let q = query(SetOpMode::Intersection, ScanDirection::Forward, 0.0, 5.0);
        let mut out = Vec::new();
        assert!(matches!(run(&store, &q, &mut out), Err(KvError::WrongType)));
        assert_eq!(store.opened.get(), 1);
        assert_eq!(store.live.get(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_wrong_type_filter_wins_over_missing_subject() {
        let store = FakeStore::default().string("filter");
        let q = query(SetOpMode::Difference, ScanDirection::Forward, 0.0, 5.0);
        let mut out = Vec::new();
        assert!(matches!(run(&store, &q, &mut out), Err(KvError::WrongType)));
    }

    #[test]
    fn test_full_difference_matches_set_subtraction() {
        let store = FakeStore::default()
            .zadd("subject", &[(4.0, "d"), (1.0, "a"), (3.0, "c"), (2.0, "b"), (5.0, "e")])
            .zadd("filter", &[(100.0, "b"), (-1.0, "e"), (0.0, "z")]);
        let q = query(SetOpMode::Difference, ScanDirection::Forward, f64::NEG_INFINITY, f64::INFINITY);
        let (out, _) = collect(&store, &q);
        assert_eq!(names(&out), vec!["a", "c", "d"]);
        assert_eq!(store.live.get(), 0);
    }
}
