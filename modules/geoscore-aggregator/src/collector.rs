//! Level-0 collection: users → pincode rows.

use std::collections::BTreeMap;

use geoscore_common::{geo_key, AggregateRow, UserGroupScore};

use crate::mean::WeightedMean;

/// Rows produced from one pass over users.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub rows: Vec<AggregateRow>,
    /// Users with a missing or blank attribute.
    pub skipped: usize,
}

/// Merge user groups by normalised attribute into the unweighted per-user mean.
///
/// Every user counts once regardless of how many observations they have, so a
/// group's mean is weighted by its user count when groups merge. Groups with no
/// members never produce a row.
pub fn collect_level0(user_groups: &[UserGroupScore]) -> Collected {
    let mut groups: BTreeMap<&str, WeightedMean> = BTreeMap::new();
    let mut skipped = 0;

    for group in user_groups {
        if group.users < 1 {
            continue;
        }
        match geo_key(Some(&group.geo_value)) {
            Some(key) => groups
                .entry(key)
                .or_insert_with(WeightedMean::new)
                .add(&group.scores, group.users),
            None => skipped += group.users as usize,
        }
    }

    let rows = groups
        .into_iter()
        .filter_map(|(key, mean)| {
            mean.finish().map(|scores| AggregateRow {
                geo_identifier: key.to_string(),
                total_entities_contributing: mean.weight(),
                scores,
            })
        })
        .collect();

    Collected { rows, skipped }
}

#[cfg(test)]
mod tests {
    use geoscore_common::ScoreVector;

    use super::*;

    fn user(pincode: &str, courage: f64) -> UserGroupScore {
        UserGroupScore {
            geo_value: pincode.to_string(),
            users: 1,
            scores: ScoreVector::neutral().with("courage", courage).unwrap(),
        }
    }

    #[test]
    fn pincode_mean_is_unweighted() {
        let users = vec![
            user("500081", 0.2),
            user("500081", 0.4),
            user("500081", 0.6),
        ];

        let collected = collect_level0(&users);

        assert_eq!(collected.rows.len(), 1);
        let row = &collected.rows[0];
        assert_eq!(row.geo_identifier, "500081");
        assert_eq!(row.total_entities_contributing, 3);
        assert!((row.scores.get("courage").unwrap() - 0.4).abs() < 1e-12);
        assert!((row.scores.get("empathy").unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn groups_are_split_by_attribute() {
        let users = vec![user("A", 0.0), user("B", 1.0), user("A", 1.0)];

        let collected = collect_level0(&users);

        let ids: Vec<_> = collected.rows.iter().map(|r| r.geo_identifier.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(collected.rows[0].total_entities_contributing, 2);
        assert_eq!(collected.rows[1].total_entities_contributing, 1);
    }

    #[test]
    fn blank_attributes_are_skipped_not_grouped() {
        let users = vec![user("", 0.9), user("   ", 0.9), user("500081", 0.1)];

        let collected = collect_level0(&users);

        assert_eq!(collected.skipped, 2);
        assert_eq!(collected.rows.len(), 1);
        assert_eq!(collected.rows[0].total_entities_contributing, 1);
    }

    #[test]
    fn surrounding_whitespace_does_not_split_groups() {
        let users = vec![user("500081", 0.0), user(" 500081 ", 1.0)];

        let collected = collect_level0(&users);

        assert_eq!(collected.rows.len(), 1);
        assert_eq!(collected.rows[0].total_entities_contributing, 2);
    }

    #[test]
    fn pre_grouped_means_are_weighted_by_user_count() {
        let mut busy = user("500081", 0.2);
        busy.users = 3;
        let groups = vec![busy, user(" 500081", 0.6)];

        let collected = collect_level0(&groups);

        assert_eq!(collected.rows.len(), 1);
        assert_eq!(collected.rows[0].total_entities_contributing, 4);
        assert!((collected.rows[0].scores.get("courage").unwrap() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn blank_groups_count_every_user_as_skipped() {
        let mut blank = user("  ", 0.9);
        blank.users = 5;
        let mut empty = user("500081", 0.9);
        empty.users = 0;

        let collected = collect_level0(&[blank, empty]);

        assert_eq!(collected.skipped, 5);
        assert!(collected.rows.is_empty());
    }

    #[test]
    fn no_users_no_rows() {
        let collected = collect_level0(&[]);
        assert!(collected.rows.is_empty());
        assert_eq!(collected.skipped, 0);
    }

    #[test]
    fn repeated_collection_is_identical() {
        let users = vec![user("A", 0.3), user("A", 0.7), user("B", 0.1)];
        assert_eq!(collect_level0(&users).rows, collect_level0(&users).rows);
    }
}
