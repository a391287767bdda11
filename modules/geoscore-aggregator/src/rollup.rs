//! Count-weighted rollups: level N batch → level N+1 rows, and countries → global.

use std::collections::BTreeMap;

use tracing::warn;

use geoscore_common::{AggregateRow, GeoAggregate, GeoLevel};

use crate::hierarchy::GeoHierarchyMap;
use crate::mean::WeightedMean;

/// Rows produced from one child batch.
#[derive(Debug, Clone, Default)]
pub struct Rollup {
    pub rows: Vec<AggregateRow>,
    /// Child rows with no parent in the hierarchy map.
    pub unmapped: usize,
    /// Child rows with a contributor count below one.
    pub invalid: usize,
}

impl Rollup {
    pub fn skipped(&self) -> usize {
        self.unmapped + self.invalid
    }
}

/// Group child rows by mapped parent and take the count-weighted mean.
///
/// `count(parent) = Σ count(child)` and
/// `avg(parent) = Σ avg(child) × count(child) / count(parent)`.
pub fn propagate(children: &[GeoAggregate], map: &GeoHierarchyMap) -> Rollup {
    weighted_by(children, |child| map.parent_of(&child.geo_identifier))
}

/// Fold every country row into the single global row.
pub fn reduce_global(countries: &[GeoAggregate]) -> Rollup {
    weighted_by(countries, |_| Some(GeoLevel::GLOBAL_IDENTIFIER))
}

fn weighted_by<'a, F>(children: &'a [GeoAggregate], parent_of: F) -> Rollup
where
    F: Fn(&'a GeoAggregate) -> Option<&'a str>,
{
    let mut groups: BTreeMap<&str, WeightedMean> = BTreeMap::new();
    let mut unmapped = 0;
    let mut invalid = 0;

    for child in children {
        if child.total_entities_contributing < 1 {
            warn!(
                geo_level = %child.geo_level,
                geo_identifier = child.geo_identifier.as_str(),
                count = child.total_entities_contributing,
                "Skipping child row with no contributors"
            );
            invalid += 1;
            continue;
        }
        match parent_of(child) {
            Some(parent) => groups
                .entry(parent)
                .or_insert_with(WeightedMean::new)
                .add(&child.scores, child.total_entities_contributing),
            None => unmapped += 1,
        }
    }

    let rows = groups
        .into_iter()
        .filter_map(|(parent, mean)| {
            mean.finish().map(|scores| AggregateRow {
                geo_identifier: parent.to_string(),
                total_entities_contributing: mean.weight(),
                scores,
            })
        })
        .collect();

    Rollup {
        rows,
        unmapped,
        invalid,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use geoscore_common::{GeoPair, ScoreVector};

    use super::*;

    fn child(level: GeoLevel, id: &str, count: i64, courage: f64) -> GeoAggregate {
        GeoAggregate {
            geo_level: level,
            geo_identifier: id.to_string(),
            created_at: Utc::now(),
            total_entities_contributing: count,
            scores: ScoreVector::neutral().with("courage", courage).unwrap(),
        }
    }

    fn pincode_map(pairs: &[(&str, &str)]) -> GeoHierarchyMap {
        let pairs: Vec<GeoPair> = pairs
            .iter()
            .map(|(l, u)| GeoPair {
                lower: l.to_string(),
                upper: u.to_string(),
                users: 1,
            })
            .collect();
        GeoHierarchyMap::from_pairs(GeoLevel::Pincode, &pairs)
    }

    #[test]
    fn city_average_is_weighted_by_contributors() {
        let map = pincode_map(&[("A", "Hyderabad"), ("B", "Hyderabad")]);
        let children = vec![
            child(GeoLevel::Pincode, "A", 1, 0.0),
            child(GeoLevel::Pincode, "B", 9, 1.0),
        ];

        let rollup = propagate(&children, &map);

        assert_eq!(rollup.rows.len(), 1);
        let city = &rollup.rows[0];
        assert_eq!(city.geo_identifier, "Hyderabad");
        assert_eq!(city.total_entities_contributing, 10);
        assert!((city.scores.get("courage").unwrap() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn unmapped_children_are_counted_and_skipped() {
        let map = pincode_map(&[("A", "Hyderabad")]);
        let children = vec![
            child(GeoLevel::Pincode, "A", 2, 0.4),
            child(GeoLevel::Pincode, "Z", 5, 0.9),
        ];

        let rollup = propagate(&children, &map);

        assert_eq!(rollup.unmapped, 1);
        assert_eq!(rollup.rows.len(), 1);
        assert_eq!(rollup.rows[0].total_entities_contributing, 2);
    }

    #[test]
    fn zero_count_children_never_contribute() {
        let map = pincode_map(&[("A", "Hyderabad"), ("B", "Pune")]);
        let children = vec![
            child(GeoLevel::Pincode, "A", 3, 0.2),
            child(GeoLevel::Pincode, "B", 0, 0.9),
        ];

        let rollup = propagate(&children, &map);

        assert_eq!(rollup.invalid, 1);
        let ids: Vec<_> = rollup.rows.iter().map(|r| r.geo_identifier.as_str()).collect();
        assert_eq!(ids, vec!["Hyderabad"]);
    }

    #[test]
    fn empty_child_batch_produces_nothing() {
        let rollup = propagate(&[], &pincode_map(&[("A", "Hyderabad")]));
        assert!(rollup.rows.is_empty());
        assert!(reduce_global(&[]).rows.is_empty());
    }

    #[test]
    fn global_row_weights_countries() {
        let countries = vec![
            child(GeoLevel::Country, "India", 30, 0.2),
            child(GeoLevel::Country, "Nepal", 10, 0.6),
        ];

        let rollup = reduce_global(&countries);

        assert_eq!(rollup.rows.len(), 1);
        let global = &rollup.rows[0];
        assert_eq!(global.geo_identifier, "global");
        assert_eq!(global.total_entities_contributing, 40);
        assert!((global.scores.get("courage").unwrap() - 0.3).abs() < 1e-12);
    }
}
