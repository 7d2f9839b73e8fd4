//! Deduplication, ordering and truncation of search matches.

use crate::matching::Match;
use serde::Serialize;
use std::cmp::Ordering;

pub const SORT_NONE: i64 = 0;
pub const SORT_COST: i64 = 2;
pub const SORT_SECONDARY_ASC: i64 = 3;
pub const SORT_SECONDARY_DESC: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankOptions {
    /// Keep only the best match of each song.
    pub song_once: bool,
    pub sort: i64,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Ranked {
    pub matches: Vec<Match>,
    /// Matches reported by the algorithm, before any collapsing or truncation.
    pub total: usize,
    /// Songs with at least one match.
    pub distinct_songs: usize,
}

/// Rank matches that are still in scan order.
///
/// Collapsing and counting rely on matches of one song being contiguous.
pub fn rank(mut matches: Vec<Match>, options: &RankOptions) -> Ranked {
    let total = matches.len();

    let distinct_songs = if options.song_once {
        matches = collapse_per_song(matches);
        matches.len()
    } else {
        count_songs(&matches)
    };

    match options.sort {
        SORT_NONE => {}
        SORT_COST => merge_sort_by(&mut matches, by_cost),
        SORT_SECONDARY_ASC => merge_sort_by(&mut matches, |a, b| by_secondary(a, b, false)),
        SORT_SECONDARY_DESC => merge_sort_by(&mut matches, |a, b| by_secondary(a, b, true)),
        _ => merge_sort_by(&mut matches, by_transposition),
    }

    matches.truncate(options.limit);
    Ranked {
        matches,
        total,
        distinct_songs,
    }
}

/// Keep the best match of each run of same-song matches: lower cost, then
/// smaller absolute transposition. The earliest of equals wins.
fn collapse_per_song(matches: Vec<Match>) -> Vec<Match> {
    let mut out: Vec<Match> = Vec::with_capacity(matches.len());
    for m in matches {
        match out.last_mut() {
            Some(best) if best.song == m.song => {
                let better = m.cost < best.cost
                    || (m.cost == best.cost && m.transposition.abs() < best.transposition.abs());
                if better {
                    *best = m;
                }
            }
            _ => out.push(m),
        }
    }
    out
}

fn count_songs(matches: &[Match]) -> usize {
    match matches.first() {
        None => 0,
        Some(_) => 1 + matches.windows(2).filter(|w| w[0].song != w[1].song).count(),
    }
}

/// Smaller absolute transposition first, then the signed value.
fn by_transposition(a: &Match, b: &Match) -> Ordering {
    a.transposition
        .abs()
        .cmp(&b.transposition.abs())
        .then(a.transposition.cmp(&b.transposition))
}

fn by_cost(a: &Match, b: &Match) -> Ordering {
    a.cost.cmp(&b.cost).then_with(|| by_transposition(a, b))
}

/// Secondary key when both matches carry one; otherwise transposition only.
fn by_secondary(a: &Match, b: &Match, descending: bool) -> Ordering {
    match (a.secondary, b.secondary) {
        (Some(x), Some(y)) => {
            let key = if descending { y.cmp(&x) } else { x.cmp(&y) };
            key.then_with(|| by_transposition(a, b))
        }
        _ => by_transposition(a, b),
    }
}

/// Stable top-down merge sort.
///
/// The secondary-key orderings are not transitive once some matches lack the
/// key, which the standard library sorts are allowed to panic on.
fn merge_sort_by<T: Clone, F>(items: &mut [T], mut compare: F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    let len = items.len();
    if len < 2 {
        return;
    }
    let mut buf = items.to_vec();
    sort_range(items, &mut buf, 0, len, &mut compare);
}

fn sort_range<T: Clone, F>(items: &mut [T], buf: &mut [T], lo: usize, hi: usize, compare: &mut F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    if hi - lo < 2 {
        return;
    }
    let mid = lo + (hi - lo) / 2;
    sort_range(items, buf, lo, mid, compare);
    sort_range(items, buf, mid, hi, compare);

    buf[lo..hi].clone_from_slice(&items[lo..hi]);
    let (mut i, mut j, mut k) = (lo, mid, lo);
    while i < mid && j < hi {
        // take from the right only when strictly smaller, keeping equal items in order
        if compare(&buf[j], &buf[i]) == Ordering::Less {
            items[k] = buf[j].clone();
            j += 1;
        } else {
            items[k] = buf[i].clone();
            i += 1;
        }
        k += 1;
    }
    while i < mid {
        items[k] = buf[i].clone();
        i += 1;
        k += 1;
    }
    while j < hi {
        items[k] = buf[j].clone();
        j += 1;
        k += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::SongId;

    fn m(song: usize, cost: u32, transposition: i32, secondary: Option<i64>) -> Match {
        Match {
            song: SongId { collection: 0, song },
            first_chord: 0,
            last_chord: 1,
            matched_notes: vec![],
            transposition,
            cost,
            secondary,
        }
    }

    fn opts(song_once: bool, sort: i64, limit: usize) -> RankOptions {
        RankOptions { song_once, sort, limit }
    }

    fn key(r: &Ranked) -> Vec<(usize, u32, i32)> {
        r.matches.iter().map(|m| (m.song.song, m.cost, m.transposition)).collect()
    }

    #[test]
    fn test_sort_by_cost_then_transposition() {
        let input = vec![m(0, 1, 3, None), m(1, 0, -2, None), m(2, 0, 2, None)];
        let r = rank(input, &opts(false, 2, 1000));
        assert_eq!(key(&r), vec![(1, 0, -2), (2, 0, 2), (0, 1, 3)]);
        assert_eq!(r.total, 3);
        assert_eq!(r.distinct_songs, 3);
    }

    #[test]
    fn test_song_once_collapses_contiguous_runs() {
        let input = vec![m(0, 5, 0, None), m(0, 2, 0, None), m(1, 1, 0, None)];
        let r = rank(input, &opts(true, 0, 1000));
        assert_eq!(key(&r), vec![(0, 2, 0), (1, 1, 0)]);
        assert_eq!(r.total, 3);
        assert_eq!(r.distinct_songs, 2);
    }

    #[test]
    fn test_song_once_tie_prefers_smaller_transposition() {
        let input = vec![m(0, 1, -7, None), m(0, 1, 3, None), m(0, 1, -3, None)];
        let r = rank(input, &opts(true, 0, 1000));
        assert_eq!(key(&r), vec![(0, 1, 3)]);
    }

    #[test]
    fn test_distinct_count_follows_transitions() {
        // song 0 appears in two separate runs and is counted twice
        let input = vec![m(0, 0, 0, None), m(1, 0, 0, None), m(0, 0, 0, None), m(0, 0, 1, None)];
        let r = rank(input, &opts(false, 0, 1000));
        assert_eq!(r.distinct_songs, 3);
        assert_eq!(r.matches.len(), 4);
    }

    #[test]
    fn test_mode_zero_keeps_scan_order() {
        let input = vec![m(0, 9, 5, None), m(1, 0, 0, None)];
        let r = rank(input, &opts(false, 0, 1000));
        assert_eq!(key(&r), vec![(0, 9, 5), (1, 0, 0)]);
    }

    #[test]
    fn test_other_modes_sort_by_transposition() {
        let input = vec![m(0, 0, 4, None), m(1, 9, -1, None), m(2, 0, 1, None), m(3, 0, -4, None)];
        for sort in [1, 5, 10] {
            let r = rank(input.clone(), &opts(false, sort, 1000));
            assert_eq!(key(&r), vec![(1, 9, -1), (2, 0, 1), (3, 0, -4), (0, 0, 4)]);
        }
    }

    #[test]
    fn test_secondary_ascending_and_descending() {
        let input = vec![m(0, 0, 0, Some(5)), m(1, 0, 2, Some(1)), m(2, 0, -1, Some(3))];
        let asc = rank(input.clone(), &opts(false, 3, 1000));
        assert_eq!(asc.matches.iter().map(|m| m.song.song).collect::<Vec<_>>(), vec![1, 2, 0]);
        let desc = rank(input, &opts(false, 4, 1000));
        assert_eq!(desc.matches.iter().map(|m| m.song.song).collect::<Vec<_>>(), vec![0, 2, 1]);
    }

    #[test]
    fn test_secondary_missing_uses_transposition_only() {
        // the keyless match is placed purely by transposition
        let input = vec![m(0, 0, 5, Some(1)), m(1, 0, 0, None), m(2, 0, 1, Some(9))];
        let r = rank(input, &opts(false, 3, 1000));
        assert_eq!(r.matches.len(), 3);
        assert_eq!(r.matches[0].song.song, 1);
    }

    #[test]
    fn test_truncate_reports_pre_truncation_total() {
        let input: Vec<Match> = (0..10).map(|i| m(i, 0, 0, None)).collect();
        let r = rank(input, &opts(false, 0, 4));
        assert_eq!(r.matches.len(), 4);
        assert_eq!(r.total, 10);
        assert_eq!(r.distinct_songs, 10);
    }

    #[test]
    fn test_empty_input() {
        let r = rank(vec![], &opts(true, 2, 10));
        assert!(r.matches.is_empty());
        assert_eq!((r.total, r.distinct_songs), (0, 0));
    }

    #[test]
    fn test_merge_sort_is_stable() {
        let mut v = vec![(1, 'a'), (0, 'b'), (1, 'c'), (0, 'd'), (1, 'e')];
        merge_sort_by(&mut v, |a, b| a.0.cmp(&b.0));
        assert_eq!(v, vec![(0, 'b'), (0, 'd'), (1, 'a'), (1, 'c'), (1, 'e')]);
    }
}
