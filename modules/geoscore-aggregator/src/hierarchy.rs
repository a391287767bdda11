//! Child → parent identifier mapping derived from user addresses.
//!
//! The map is rebuilt every run from the `(child, parent)` pairs users carry.
//! When one child shows up under several parents, the parent with the most
//! users wins; ties go to the lexicographically smallest parent. Every such
//! override is kept in `conflicts` and logged.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use geoscore_common::{geo_key, GeoLevel, GeoPair};

/// A child identifier observed under more than one parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingConflict {
    pub child: String,
    pub chosen: String,
    pub chosen_users: i64,
    /// Losing parents with their user counts.
    pub overridden: Vec<(String, i64)>,
}

#[derive(Debug, Clone)]
pub struct GeoHierarchyMap {
    parents: HashMap<String, String>,
    conflicts: Vec<MappingConflict>,
    skipped_pairs: usize,
}

impl GeoHierarchyMap {
    /// Build the map for `child_level → child_level.parent()`.
    pub fn from_pairs(child_level: GeoLevel, pairs: &[GeoPair]) -> Self {
        let mut votes: BTreeMap<&str, BTreeMap<&str, i64>> = BTreeMap::new();
        let mut skipped_pairs = 0;

        for pair in pairs {
            match (geo_key(Some(&pair.lower)), geo_key(Some(&pair.upper))) {
                (Some(child), Some(parent)) if pair.users > 0 => {
                    *votes.entry(child).or_default().entry(parent).or_default() += pair.users;
                }
                _ => skipped_pairs += 1,
            }
        }

        let mut parents = HashMap::with_capacity(votes.len());
        let mut conflicts = Vec::new();

        for (child, candidates) in votes {
            // Ascending iteration + strict `>` keeps the smallest name on ties.
            let mut best: Option<(&str, i64)> = None;
            for (&parent, &users) in &candidates {
                if best.map_or(true, |(_, n)| users > n) {
                    best = Some((parent, users));
                }
            }
            let Some((chosen, chosen_users)) = best else {
                continue;
            };

            if candidates.len() > 1 {
                let overridden: Vec<(String, i64)> = candidates
                    .iter()
                    .filter(|(p, _)| **p != chosen)
                    .map(|(p, n)| (p.to_string(), *n))
                    .collect();
                warn!(
                    geo_level = %child_level,
                    child,
                    chosen,
                    chosen_users,
                    overridden = ?overridden,
                    "Ambiguous parent mapping, majority wins"
                );
                conflicts.push(MappingConflict {
                    child: child.to_string(),
                    chosen: chosen.to_string(),
                    chosen_users,
                    overridden,
                });
            }

            parents.insert(child.to_string(), chosen.to_string());
        }

        Self {
            parents,
            conflicts,
            skipped_pairs,
        }
    }

    pub fn parent_of(&self, child: &str) -> Option<&str> {
        self.parents.get(child.trim()).map(String::as_str)
    }

    pub fn conflicts(&self) -> &[MappingConflict] {
        &self.conflicts
    }

    /// Pairs dropped for a blank identifier.
    pub fn skipped_pairs(&self) -> usize {
        self.skipped_pairs
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(lower: &str, upper: &str, users: i64) -> GeoPair {
        GeoPair {
            lower: lower.to_string(),
            upper: upper.to_string(),
            users,
        }
    }

    #[test]
    fn maps_each_child_to_its_parent() {
        let map = GeoHierarchyMap::from_pairs(
            GeoLevel::Pincode,
            &[pair("500081", "Hyderabad", 4), pair("560001", "Bengaluru", 2)],
        );

        assert_eq!(map.parent_of("500081"), Some("Hyderabad"));
        assert_eq!(map.parent_of("560001"), Some("Bengaluru"));
        assert_eq!(map.parent_of("110001"), None);
        assert!(map.conflicts().is_empty());
    }

    #[test]
    fn majority_by_user_count_wins() {
        let map = GeoHierarchyMap::from_pairs(
            GeoLevel::Pincode,
            &[pair("500081", "Secunderabad", 2), pair("500081", "Hyderabad", 7)],
        );

        assert_eq!(map.parent_of("500081"), Some("Hyderabad"));
        let conflict = &map.conflicts()[0];
        assert_eq!(conflict.chosen_users, 7);
        assert_eq!(conflict.overridden, vec![("Secunderabad".to_string(), 2)]);
    }

    #[test]
    fn tie_goes_to_smallest_parent_name() {
        let map = GeoHierarchyMap::from_pairs(
            GeoLevel::City,
            &[pair("Hyderabad", "Rangareddy", 3), pair("Hyderabad", "Medchal", 3)],
        );

        assert_eq!(map.parent_of("Hyderabad"), Some("Medchal"));
        assert_eq!(map.conflicts().len(), 1);
    }

    #[test]
    fn pairs_differing_only_by_whitespace_are_merged() {
        let map = GeoHierarchyMap::from_pairs(
            GeoLevel::Pincode,
            &[
                pair("500081", "Hyderabad", 1),
                pair("500081 ", " Hyderabad", 1),
                pair("500081", "Secunderabad", 1),
            ],
        );

        assert_eq!(map.parent_of("500081"), Some("Hyderabad"));
        assert_eq!(map.conflicts()[0].chosen_users, 2);
    }

    #[test]
    fn blank_identifiers_are_skipped() {
        let map = GeoHierarchyMap::from_pairs(
            GeoLevel::State,
            &[pair("", "India", 3), pair("Telangana", " ", 1), pair("Telangana", "India", 1)],
        );

        assert_eq!(map.len(), 1);
        assert_eq!(map.skipped_pairs(), 2);
        assert!(map.conflicts().is_empty());
    }
}
