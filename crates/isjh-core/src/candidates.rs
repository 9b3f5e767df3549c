//! Derivation of platform slug and website domain candidates from an organization name.

use serde::{Deserialize, Serialize};

use crate::tables::{normalize_words, LookupTables};

/// ATS slugs shorter than this collide with unrelated companies.
pub const MIN_SLUG_LEN: usize = 5;
pub const MIN_DOMAIN_BASE_LEN: usize = 3;
/// Acronyms are only meaningful once the stripped name has this many words.
pub const ACRONYM_MIN_WORDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainCandidate {
    pub domain: String,
    /// Country-scoped educational suffix; such domains need no identity verification.
    pub locally_scoped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub slugs: Vec<String>,
    pub domains: Vec<DomainCandidate>,
    pub acronym: Option<String>,
}

pub fn generate_candidates(
    name: &str,
    country_code: &str,
    city: Option<&str>,
    tables: &LookupTables,
) -> CandidateSet {
    let words: Vec<String> = ascii_words(name);
    let stripped: Vec<String> = words
        .iter()
        .filter(|w| !tables.is_generic_word(w))
        .cloned()
        .collect();
    let acronym = (stripped.len() >= ACRONYM_MIN_WORDS).then(|| {
        stripped
            .iter()
            .filter_map(|w| w.chars().next())
            .collect::<String>()
    });
    let city_words = city.map(ascii_words).unwrap_or_default();
    let city_join = city_words.concat();
    let city_in_name = !city_words.is_empty()
        && city_words.iter().all(|c| stripped.contains(c));

    let full_hyphen = words.join("-");
    let stripped_hyphen = stripped.join("-");
    let full_join = words.concat();
    let stripped_join = stripped.concat();

    let mut slugs = vec![
        full_hyphen,
        stripped_hyphen.clone(),
        full_join.clone(),
        stripped_join.clone(),
    ];
    if let Some(acronym) = &acronym {
        slugs.push(acronym.clone());
    }
    if !city_join.is_empty() && !city_in_name {
        if let Some(acronym) = &acronym {
            slugs.push(format!("{acronym}{city_join}"));
        }
        if !stripped_join.is_empty() {
            slugs.push(format!("{stripped_join}{city_join}"));
            slugs.push(format!("{stripped_hyphen}-{}", city_words.join("-")));
        }
    }
    let slugs = dedup_preserving_order(
        slugs
            .into_iter()
            .filter(|s| s.chars().count() >= MIN_SLUG_LEN),
    );

    let mut bases = vec![stripped_join.clone(), full_join];
    if let Some(acronym) = &acronym {
        bases.push(acronym.clone());
        if !city_join.is_empty() && !city_in_name {
            bases.push(format!("{acronym}{city_join}"));
        }
    }
    if !city_join.is_empty() && !city_in_name && !stripped_join.is_empty() {
        bases.push(format!("{stripped_join}{city_join}"));
    }
    let bases = dedup_preserving_order(
        bases
            .into_iter()
            .filter(|b| b.chars().count() >= MIN_DOMAIN_BASE_LEN),
    );

    CandidateSet {
        domains: domain_candidates(&bases, country_code, tables),
        slugs,
        acronym,
    }
}

/// Suffix-major ordering: every base under the local educational suffixes first,
/// then the generic suffixes, then the bare country TLD as catch-all.
fn domain_candidates(bases: &[String], country_code: &str, tables: &LookupTables) -> Vec<DomainCandidate> {
    let country = tables.country_by_code(country_code);
    let local = country.map(|c| c.local_suffixes).unwrap_or_default();

    let mut ordered: Vec<(&str, bool)> = local.iter().map(|s| (*s, true)).collect();
    ordered.extend(tables.generic_domain_suffixes.iter().map(|s| (*s, false)));
    if let Some(country) = country {
        ordered.push((country.cctld, false));
    }

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for (suffix, locally_scoped) in ordered {
        for base in bases {
            let domain = format!("{base}.{suffix}");
            if seen.insert(domain.clone()) {
                out.push(DomainCandidate {
                    domain,
                    locally_scoped,
                });
            }
        }
    }
    out
}

fn ascii_words(input: &str) -> Vec<String> {
    normalize_words(&input.replace('&', " and "))
        .split(' ')
        .map(|w| w.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect()
}

fn dedup_preserving_order(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.filter(|item| seen.insert(item.clone())).collect()
}
