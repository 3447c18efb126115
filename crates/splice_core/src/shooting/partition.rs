use super::types::Group;
use crate::error::{Result, ShootingError};

/// Splits `len` samples into groups of `group_size` that share exactly one
/// index with their neighbour.
///
/// Group `k` spans `[k (G-1), min(len-1, k (G-1) + G-1)]`. When `len - 1` is
/// not a multiple of `G - 1` the final group is shrunk, never padded, so the
/// union of groups is exactly `[0, len-1]`.
pub fn partition(len: usize, group_size: usize) -> Result<Vec<Group>> {
    let count = group_count(len, group_size)?;
    let stride = group_size - 1;
    Ok((0..count)
        .map(|index| {
            let start = index * stride;
            Group {
                index,
                start,
                end: (start + stride).min(len - 1),
            }
        })
        .collect())
}

/// `ceil((len - 1) / (group_size - 1))`, after validating the sizes.
pub fn group_count(len: usize, group_size: usize) -> Result<usize> {
    if len < 2 {
        return Err(ShootingError::invalid(format!(
            "dataset needs at least 2 samples, got {len}"
        )));
    }
    if group_size < 2 || group_size > len {
        return Err(ShootingError::invalid(format!(
            "group_size must lie in [2, {len}], got {group_size}"
        )));
    }
    Ok((len - 1).div_ceil(group_size - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(groups: &[Group]) -> Vec<(usize, usize)> {
        groups.iter().map(|g| (g.start, g.end)).collect()
    }

    #[test]
    fn rejects_out_of_range_group_size() {
        for (len, group_size) in [(10, 0), (10, 1), (10, 11), (1, 1), (0, 2)] {
            let err = partition(len, group_size).expect_err("invalid sizes");
            assert!(matches!(err, ShootingError::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn covers_dataset_with_single_index_overlaps() {
        for len in 2..40 {
            for group_size in 2..=len {
                let groups = partition(len, group_size).unwrap();
                assert_eq!(groups.len(), (len - 1).div_ceil(group_size - 1));
                assert_eq!(groups[0].start, 0);
                assert_eq!(groups.last().unwrap().end, len - 1);
                for (k, g) in groups.iter().enumerate() {
                    assert_eq!(g.index, k);
                    assert!(g.len() >= 2 && g.len() <= group_size);
                }
                for pair in groups.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                    assert_eq!(pair[0].len(), group_size);
                }
            }
        }
    }

    #[test]
    fn thirty_samples_in_threes_shrink_the_tail() {
        let groups = partition(30, 3).unwrap();
        assert_eq!(groups.len(), 15);
        assert!(groups[..14].iter().all(|g| g.len() == 3));
        assert_eq!(spans(&groups[..2]), vec![(0, 2), (2, 4)]);
        assert_eq!(spans(&groups[13..]), vec![(26, 28), (28, 29)]);
        assert_eq!(groups[14].len(), 2);
        assert_eq!(groups.windows(2).count(), 14);
    }

    #[test]
    fn pairs_of_samples_give_single_steps() {
        let groups = partition(10, 2).unwrap();
        assert_eq!(groups.len(), 9);
        assert!(groups.iter().all(|g| g.len() == 2));
        assert_eq!(groups.windows(2).count(), 10 - 2);
    }

    #[test]
    fn full_length_group_is_single_shooting() {
        let groups = partition(7, 7).unwrap();
        assert_eq!(spans(&groups), vec![(0, 6)]);
    }
}
