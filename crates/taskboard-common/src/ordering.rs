//! Sparse fractional ordering of tasks inside a `(project, status)` partition.
//!
//! Orders are plain `f64` keys. A task dropped between two neighbours takes
//! their midpoint, a task dropped at either end steps one [`GAP`] past the
//! current boundary. Only the moved row changes, at the cost of halving the
//! gap on every insert into the same slot: [`fits_between`] detects when the
//! slot is exhausted and [`spread`] produces a fresh evenly spaced sequence.

/// Order given to the first task of an empty partition.
pub const BASE_ORDER: f64 = 1000.0;

/// Distance kept between a new boundary task and its neighbour.
pub const GAP: f64 = 1000.0;

/// Compute the order for a task inserted at `index` among `neighbors`.
///
/// `neighbors` is the ascending sequence of orders already in the destination
/// partition, with the moving task removed. An `index` past the end appends.
pub fn assign_order(neighbors: &[f64], index: usize) -> f64 {
    match neighbors {
        [] => BASE_ORDER,
        [first, ..] if index == 0 => first - GAP,
        [.., last] if index >= neighbors.len() => last + GAP,
        _ => (neighbors[index - 1] + neighbors[index]) / 2.0,
    }
}

/// Whether `value` lands strictly between the neighbours around `index`.
///
/// Returns `false` once bisection has run out of representable values and the
/// midpoint collapsed onto one of the neighbours.
pub fn fits_between(neighbors: &[f64], index: usize, value: f64) -> bool {
    if !value.is_finite() {
        return false;
    }
    let index = index.min(neighbors.len());
    let after_prev = index == 0 || value > neighbors[index - 1];
    let before_next = neighbors.get(index).is_none_or(|next| value < *next);
    after_prev && before_next
}

/// Evenly spaced orders for a partition of `len` tasks.
pub fn spread(len: usize) -> Vec<f64> {
    (0..len).map(|i| BASE_ORDER + GAP * i as f64).collect()
}

/// The insertion index that `order` implies within ascending `neighbors`.
///
/// An order equal to an existing neighbour sorts before it.
pub fn index_for_order(neighbors: &[f64], order: f64) -> usize {
    neighbors.partition_point(|n| *n < order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_partition_gets_base_order() {
        assert_eq!(assign_order(&[], 0), 1000.0);
        assert_eq!(assign_order(&[], 7), 1000.0);
    }

    #[test]
    fn test_insert_before_single_neighbor() {
        assert_eq!(assign_order(&[1000.0], 0), 0.0);
    }

    #[test]
    fn test_insert_after_single_neighbor() {
        assert_eq!(assign_order(&[1000.0], 1), 2000.0);
    }

    #[test]
    fn test_insert_between_takes_midpoint() {
        assert_eq!(assign_order(&[1000.0, 2000.0, 3000.0], 1), 1500.0);
        assert_eq!(assign_order(&[1000.0, 2000.0, 3000.0], 2), 2500.0);
    }

    #[test]
    fn test_index_past_end_appends() {
        assert_eq!(assign_order(&[1000.0, 2000.0], 9), 3000.0);
    }

    #[test]
    fn test_negative_orders_are_fine() {
        assert_eq!(assign_order(&[-500.0, 0.0], 0), -1500.0);
        assert_eq!(assign_order(&[-500.0, 0.0], 1), -250.0);
    }

    #[test]
    fn test_repeated_bisection_is_eventually_detected() {
        let upper = 2000.0;
        let mut lower = 1000.0;
        let mut inserts = 0;
        loop {
            let neighbors = [lower, upper];
            let value = assign_order(&neighbors, 1);
            if !fits_between(&neighbors, 1, value) {
                break;
            }
            lower = value;
            inserts += 1;
            assert!(inserts < 2000, "bisection never exhausted");
        }
        // f64 has 52 mantissa bits; a 1000-wide gap near 2000 runs out in ~50 halvings.
        assert!(inserts > 30);
    }

    #[test]
    fn test_fits_between_boundaries() {
        let n = [1000.0, 2000.0];
        assert!(fits_between(&n, 0, 0.0));
        assert!(!fits_between(&n, 0, 1000.0));
        assert!(fits_between(&n, 2, 3000.0));
        assert!(!fits_between(&n, 2, 2000.0));
        assert!(!fits_between(&n, 1, 2000.0));
        assert!(fits_between(&[], 0, 1000.0));
        assert!(!fits_between(&[], 0, f64::NAN));
    }

    #[test]
    fn test_spread_is_evenly_spaced() {
        assert_eq!(spread(0), Vec::<f64>::new());
        assert_eq!(spread(3), vec![1000.0, 2000.0, 3000.0]);
    }

    #[test]
    fn test_index_for_order() {
        let n = [500.0, 1500.0];
        assert_eq!(index_for_order(&n, 0.0), 0);
        assert_eq!(index_for_order(&n, 500.0), 0);
        assert_eq!(index_for_order(&n, 1000.0), 1);
        assert_eq!(index_for_order(&n, 2500.0), 2);
        assert_eq!(index_for_order(&[], 42.0), 0);
    }

    proptest! {
        #[test]
        fn prop_insertion_keeps_sequence_strictly_ascending(
            raw in prop::collection::btree_set(-1_000_000i32..1_000_000, 0..40),
            pick in any::<prop::sample::Index>(),
        ) {
            let neighbors: Vec<f64> = raw.into_iter().map(f64::from).collect();
            let index = pick.index(neighbors.len() + 1);
            let value = assign_order(&neighbors, index);

            let mut merged = neighbors.clone();
            merged.insert(index, value);
            prop_assert!(merged.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(fits_between(&neighbors, index, value));
            prop_assert_eq!(index_for_order(&neighbors, value), index);
        }
    }
}
