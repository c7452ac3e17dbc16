//! Merging of raw registry records into unique business entities.
//!
//! The same business shows up once per batch and page that matched one of
//! its establishments. Records sharing a SIREN are folded into the first
//! one seen, which collects every distinct establishment (by SIRET).
//! Records without a SIREN cannot be matched safely and are kept as-is.

use std::collections::{HashMap, HashSet};

use crate::types::{BusinessEntity, EstablishmentMatch};

/// Merge raw records into unique entities, in first-seen order.
pub fn merge_entities(raw: Vec<BusinessEntity>) -> Vec<BusinessEntity> {
    let mut merged: Vec<BusinessEntity> = Vec::with_capacity(raw.len());
    // SIREN → (index in `merged`, SIRETs already attached).
    let mut by_siren: HashMap<String, (usize, HashSet<String>)> = HashMap::new();

    for mut entity in raw {
        let Some(siren) = entity.siren.clone() else {
            merged.push(entity);
            continue;
        };

        match by_siren.get_mut(&siren) {
            Some((index, seen)) => {
                let canonical = &mut merged[*index];
                for establishment in entity.matching_etablissements {
                    if is_new(&establishment, seen) {
                        canonical.matching_etablissements.push(establishment);
                    }
                }
            }
            None => {
                let mut seen = HashSet::new();
                let establishments = std::mem::take(&mut entity.matching_etablissements);
                entity.matching_etablissements = establishments
                    .into_iter()
                    .filter(|e| is_new(e, &mut seen))
                    .collect();
                by_siren.insert(siren, (merged.len(), seen));
                merged.push(entity);
            }
        }
    }

    merged
}

/// Record the establishment's SIRET, returning `false` if it was already seen.
///
/// Establishments without a SIRET are always kept.
fn is_new(establishment: &EstablishmentMatch, seen: &mut HashSet<String>) -> bool {
    match establishment.siret {
        Some(ref siret) => seen.insert(siret.clone()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn etab(siret: &str) -> EstablishmentMatch {
        EstablishmentMatch {
            siret: Some(siret.to_owned()),
            ..Default::default()
        }
    }

    fn entity(siren: Option<&str>, name: &str, sirets: &[&str]) -> BusinessEntity {
        BusinessEntity {
            siren: siren.map(str::to_owned),
            nom_complet: Some(name.to_owned()),
            matching_etablissements: sirets.iter().map(|s| etab(s)).collect(),
            ..Default::default()
        }
    }

    fn sirets(entity: &BusinessEntity) -> Vec<&str> {
        entity
            .matching_etablissements
            .iter()
            .filter_map(|e| e.siret.as_deref())
            .collect()
    }

    #[test]
    fn unique_sirens_pass_through() {
        let merged = merge_entities(vec![
            entity(Some("111"), "A", &["1110001"]),
            entity(Some("222"), "B", &["2220001"]),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn same_siren_unions_establishments() {
        let merged = merge_entities(vec![
            entity(Some("111"), "Company A", &["1110001"]),
            entity(Some("222"), "Company B", &["2220001"]),
            entity(Some("111"), "Company A", &["1110002"]),
            entity(Some("333"), "Company C", &["3330001"]),
        ]);
        assert_eq!(merged.len(), 3);
        assert_eq!(sirets(&merged[0]), vec!["1110001", "1110002"]);
        assert_eq!(sirets(&merged[1]), vec!["2220001"]);
        assert_eq!(sirets(&merged[2]), vec!["3330001"]);
    }

    #[test]
    fn duplicate_establishments_dropped() {
        let merged = merge_entities(vec![
            entity(Some("111"), "A", &["1110001", "1110002"]),
            entity(Some("111"), "A", &["1110002", "1110003"]),
            entity(Some("111"), "A", &["1110001"]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(sirets(&merged[0]), vec!["1110001", "1110002", "1110003"]);
    }

    #[test]
    fn duplicates_within_first_record_dropped() {
        let merged = merge_entities(vec![entity(Some("111"), "A", &["1110001", "1110001"])]);
        assert_eq!(sirets(&merged[0]), vec!["1110001"]);
    }

    #[test]
    fn first_occurrence_is_canonical() {
        let merged = merge_entities(vec![
            entity(Some("111"), "First name", &[]),
            entity(Some("111"), "Second name", &["1110001"]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].nom_complet.as_deref(), Some("First name"));
        assert_eq!(sirets(&merged[0]), vec!["1110001"]);
    }

    #[test]
    fn records_without_siren_kept_standalone() {
        let merged = merge_entities(vec![
            entity(None, "Anonymous 1", &["9990001"]),
            entity(None, "Anonymous 2", &["9990001"]),
            entity(Some("111"), "A", &[]),
        ]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].nom_complet.as_deref(), Some("Anonymous 1"));
        assert_eq!(merged[1].nom_complet.as_deref(), Some("Anonymous 2"));
    }

    #[test]
    fn establishments_without_siret_are_kept() {
        let mut first = entity(Some("111"), "A", &["1110001"]);
        first.matching_etablissements.push(EstablishmentMatch::default());
        let mut second = entity(Some("111"), "A", &[]);
        second.matching_etablissements.push(EstablishmentMatch::default());

        let merged = merge_entities(vec![first, second]);
        assert_eq!(merged[0].matching_etablissements.len(), 3);
    }

    #[test]
    fn empty_input_returns_empty() {
        assert!(merge_entities(vec![]).is_empty());
    }

    #[test]
    fn merged_counts_match_distinct_sirets() {
        let raw: Vec<BusinessEntity> = (0..30)
            .map(|i| {
                let siren = format!("{}", i % 4);
                let sirets: Vec<String> = (0..3)
                    .map(|j| format!("{siren}-{}", (i + j) % 5))
                    .collect();
                let refs: Vec<&str> = sirets.iter().map(String::as_str).collect();
                entity(Some(siren.as_str()), "X", &refs)
            })
            .collect();

        let mut expected: HashMap<String, HashSet<String>> = HashMap::new();
        for e in &raw {
            let set = expected.entry(e.siren.clone().unwrap_or_default()).or_default();
            set.extend(e.matching_etablissements.iter().filter_map(|m| m.siret.clone()));
        }

        let merged = merge_entities(raw);
        assert_eq!(merged.len(), expected.len());
        let mut sirens = HashSet::new();
        for e in &merged {
            let siren = e.siren.clone().unwrap_or_default();
            assert!(sirens.insert(siren.clone()), "duplicate siren {siren}");
            assert_eq!(e.matching_etablissements.len(), expected[&siren].len());
        }
    }
}
