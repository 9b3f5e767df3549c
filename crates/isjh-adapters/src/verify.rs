//! Confirms a probed slug or domain actually belongs to the organization.

use isjh_core::tables::{contains_term, normalize_words};
use isjh_core::{DomainCandidate, LookupTables};
use isjh_storage::Fetch;
use scraper::Html;
use tracing::debug;

use crate::{element_text, select_first_attr, selector};

/// Name words shorter than this are too common to identify anyone.
pub const MIN_SIGNIFICANT_WORD_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// Country-scoped educational domain; ownership is implied.
    SelfVerified,
    NoSignificantWords,
    NoOverlap,
    Unreachable,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted | Verdict::SelfVerified)
    }
}

pub fn significant_words(name: &str, tables: &LookupTables) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for word in normalize_words(name).split(' ') {
        if word.chars().count() >= MIN_SIGNIFICANT_WORD_LEN
            && !tables.is_generic_word(word)
            && !words.iter().any(|w| w == word)
        {
            words.push(word.to_string());
        }
    }
    words
}

/// Title, `og:site_name`, `og:title`, first `<h1>` and meta description, normalized.
pub fn identity_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<String> = Vec::new();
    for css in ["title", "h1"] {
        if let Ok(sel) = selector(css) {
            if let Some(text) = document.select(&sel).find_map(element_text) {
                parts.push(text);
            }
        }
    }
    for css in [
        r#"meta[property="og:site_name"]"#,
        r#"meta[property="og:title"]"#,
        r#"meta[name="description"]"#,
    ] {
        if let Ok(Some(content)) = select_first_attr(&document, css, "content") {
            parts.push(content);
        }
    }
    normalize_words(&parts.join(" "))
}

#[derive(Debug, Clone, Copy)]
pub struct IdentityVerifier {
    tables: &'static LookupTables,
}

impl Default for IdentityVerifier {
    fn default() -> Self {
        Self::new(LookupTables::standard())
    }
}

impl IdentityVerifier {
    pub fn new(tables: &'static LookupTables) -> Self {
        Self { tables }
    }

    pub fn verify_html(&self, html: &str, organization_name: &str) -> Verdict {
        let words = significant_words(organization_name, self.tables);
        if words.is_empty() {
            return Verdict::NoSignificantWords;
        }
        let text = identity_text(html);
        if words.iter().any(|w| contains_term(&text, w)) {
            Verdict::Accepted
        } else {
            Verdict::NoOverlap
        }
    }

    /// Fetch the public board page and compare it against the organization name.
    pub async fn verify_board(
        &self,
        fetch: &dyn Fetch,
        board_url: &str,
        organization_name: &str,
    ) -> Verdict {
        if significant_words(organization_name, self.tables).is_empty() {
            return Verdict::NoSignificantWords;
        }
        let verdict = match fetch.get(board_url).await {
            Ok(page) => self.verify_html(&page.text(), organization_name),
            Err(err) => {
                debug!(board_url, %err, "board page unreachable");
                Verdict::Unreachable
            }
        };
        debug!(board_url, organization = organization_name, ?verdict, "identity check");
        verdict
    }

    /// Locally scoped domains skip the page comparison.
    pub fn verify_domain_page(
        &self,
        candidate: &DomainCandidate,
        html: &str,
        organization_name: &str,
    ) -> Verdict {
        if candidate.locally_scoped {
            Verdict::SelfVerified
        } else {
            self.verify_html(html, organization_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isjh_storage::FixtureFetcher;

    #[test]
    fn significant_words_drop_generic_terms_and_short_words() {
        let words = significant_words("The International School of Kuala Lumpur", LookupTables::standard());
        assert_eq!(words, vec!["kuala", "lumpur"]);
        assert!(significant_words("The IB School", LookupTables::standard()).is_empty());
    }

    #[test]
    fn one_shared_significant_word_is_enough() {
        let verifier = IdentityVerifier::default();
        let html = r#"<html><head><title>Jobs at Lumpur Learning</title></head><body></body></html>"#;
        assert_eq!(
            verifier.verify_html(html, "International School of Kuala Lumpur"),
            Verdict::Accepted
        );

        let og = r#"<head><meta property="og:site_name" content="Kuala Group Careers"></head>"#;
        assert_eq!(verifier.verify_html(og, "Kuala Lumpur Academy"), Verdict::Accepted);

        let other = r#"<title>Acme Logistics</title><h1>Open roles</h1>"#;
        assert_eq!(verifier.verify_html(other, "Kuala Lumpur Academy"), Verdict::NoOverlap);
    }

    #[test]
    fn names_without_significant_words_cannot_be_verified() {
        let verifier = IdentityVerifier::default();
        assert_eq!(
            verifier.verify_html("<title>The IB School</title>", "The IB School"),
            Verdict::NoSignificantWords
        );
    }

    #[test]
    fn local_domains_are_self_verifying() {
        let verifier = IdentityVerifier::default();
        let local = DomainCandidate {
            domain: "harbourside.edu.sg".into(),
            locally_scoped: true,
        };
        assert_eq!(
            verifier.verify_domain_page(&local, "<title>Unrelated</title>", "Harbourside School"),
            Verdict::SelfVerified
        );
        let generic = DomainCandidate {
            domain: "harbourside.com".into(),
            locally_scoped: false,
        };
        assert!(!verifier
            .verify_domain_page(&generic, "<title>Unrelated</title>", "Harbourside School")
            .is_accepted());
    }

    #[tokio::test]
    async fn unreachable_board_page_rejects() {
        let fetcher = FixtureFetcher::new();
        let verdict = IdentityVerifier::default()
            .verify_board(&fetcher, "https://boards.greenhouse.io/ghost", "Ghostwood Academy")
            .await;
        assert_eq!(verdict, Verdict::Unreachable);
    }
}
