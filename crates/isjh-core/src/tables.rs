//! Static lookup data shared by the normalizer, candidate generator and extractors.
//!
//! Everything here is immutable. Consumers take a `&LookupTables` so tests can swap in
//! narrower tables without touching global state.

use crate::{ContractType, JobCategory};

pub const UNKNOWN_COUNTRY_CODE: &str = "XX";
pub const UNKNOWN_REGION: &str = "Other";

#[derive(Debug, Clone, Copy)]
pub struct CountryEntry {
    pub code: &'static str,
    pub name: &'static str,
    pub region: &'static str,
    pub aliases: &'static [&'static str],
    /// Bare country-code TLD (differs from `code` only for GB).
    pub cctld: &'static str,
    /// Locally scoped educational suffixes, most authoritative first.
    pub local_suffixes: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub struct LookupTables {
    pub countries: &'static [CountryEntry],
    pub category_ladder: &'static [(JobCategory, &'static [&'static str])],
    pub contract_ladder: &'static [(ContractType, &'static [&'static str])],
    pub default_category: JobCategory,
    pub generic_name_words: &'static [&'static str],
    pub articles: &'static [&'static str],
    pub generic_domain_suffixes: &'static [&'static str],
    pub job_title_keywords: &'static [&'static str],
    pub navigation_phrases: &'static [&'static str],
    pub career_page_markers: &'static [&'static str],
}

impl LookupTables {
    pub fn standard() -> &'static LookupTables {
        &STANDARD
    }

    pub fn country_by_code(&self, code: &str) -> Option<&'static CountryEntry> {
        self.countries
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(code))
    }

    pub fn region_for(&self, code: &str) -> &'static str {
        self.country_by_code(code)
            .map(|c| c.region)
            .unwrap_or(UNKNOWN_REGION)
    }

    pub fn is_generic_word(&self, word: &str) -> bool {
        self.generic_name_words.contains(&word) || self.articles.contains(&word)
    }
}

/// Lowercase, map every non-alphanumeric char to a space and collapse runs.
pub fn normalize_words(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-word/phrase containment on already-normalized text.
pub fn contains_term(normalized_haystack: &str, term: &str) -> bool {
    let term = normalize_words(term);
    if term.is_empty() {
        return false;
    }
    let padded = format!(" {normalized_haystack} ");
    padded.contains(&format!(" {term} "))
}

static STANDARD: LookupTables = LookupTables {
    countries: COUNTRIES,
    category_ladder: CATEGORY_LADDER,
    contract_ladder: CONTRACT_LADDER,
    default_category: JobCategory::HighSchool,
    generic_name_words: &[
        "school",
        "schools",
        "international",
        "academy",
        "college",
        "institute",
        "university",
    ],
    articles: &["the", "of", "and", "a", "an", "for", "at", "in", "de", "la", "le"],
    generic_domain_suffixes: &["org", "edu", "com"],
    job_title_keywords: &[
        "teacher",
        "teaching",
        "director",
        "coordinator",
        "principal",
        "head of",
        "headteacher",
        "counsellor",
        "counselor",
        "librarian",
        "assistant",
        "nurse",
        "administrator",
        "manager",
        "officer",
        "specialist",
        "tutor",
        "educator",
        "instructor",
        "leader",
        "psychologist",
        "technician",
        "receptionist",
        "accountant",
        "registrar",
        "coach",
        "therapist",
        "dean",
    ],
    navigation_phrases: &[
        "careers",
        "career",
        "jobs",
        "vacancies",
        "current vacancies",
        "job opportunities",
        "employment",
        "apply",
        "apply now",
        "apply here",
        "view all",
        "view all jobs",
        "see all jobs",
        "join our team",
        "join us",
        "work with us",
        "working with us",
        "teaching and learning",
        "read more",
        "learn more",
        "our teachers",
        "leadership team",
        "our leadership team",
        "meet our teachers",
        "meet the team",
    ],
    career_page_markers: &[
        "vacancies",
        "vacancy",
        "careers",
        "job opportunities",
        "current openings",
        "open positions",
        "join our team",
        "work with us",
        "employment opportunities",
        "recruitment",
    ],
};

const CATEGORY_LADDER: &[(JobCategory, &[&str])] = &[
    (
        JobCategory::Admin,
        &[
            "principal",
            "vice principal",
            "assistant principal",
            "head of school",
            "headteacher",
            "head teacher",
            "deputy head",
            "head of",
            "director",
            "superintendent",
            "coordinator",
            "dean",
            "admissions",
            "registrar",
            "bursar",
            "business manager",
            "finance",
            "accountant",
            "human resources",
            "hr",
            "marketing",
            "operations",
            "administrator",
            "office manager",
            "leadership",
        ],
    ),
    (
        JobCategory::SupportStaff,
        &[
            "teaching assistant",
            "learning assistant",
            "classroom assistant",
            "learning support assistant",
            "lab assistant",
            "aide",
            "nurse",
            "medical",
            "librarian",
            "library",
            "counsellor",
            "counselor",
            "psychologist",
            "technician",
            "it support",
            "receptionist",
            "secretary",
            "maintenance",
            "facilities",
            "security",
            "driver",
            "cleaner",
            "catering",
            "cook",
            "chef",
            "boarding",
        ],
    ),
    (
        JobCategory::Elementary,
        &[
            "elementary",
            "primary",
            "kindergarten",
            "kg",
            "early years",
            "early childhood",
            "eyfs",
            "pre k",
            "prek",
            "preschool",
            "pre school",
            "nursery",
            "reception",
            "foundation stage",
            "pyp",
            "lower school",
            "junior school",
            "infant",
            "ks1",
            "ks2",
            "key stage 1",
            "key stage 2",
            "grade 1",
            "grade 2",
            "grade 3",
            "grade 4",
            "grade 5",
            "year 1",
            "year 2",
            "year 3",
            "year 4",
            "year 5",
            "year 6",
        ],
    ),
    (
        JobCategory::MiddleSchool,
        &[
            "middle school",
            "middle years",
            "myp",
            "lower secondary",
            "ks3",
            "key stage 3",
            "grade 6",
            "grade 7",
            "grade 8",
            "year 7",
            "year 8",
            "year 9",
        ],
    ),
    (
        JobCategory::HighSchool,
        &[
            "high school",
            "secondary",
            "upper school",
            "senior school",
            "sixth form",
            "diploma",
            "ib dp",
            "dp",
            "a level",
            "igcse",
            "ap",
            "ks4",
            "ks5",
            "grade 9",
            "grade 10",
            "grade 11",
            "grade 12",
            "year 10",
            "year 11",
            "year 12",
            "year 13",
        ],
    ),
];

const CONTRACT_LADDER: &[(ContractType, &[&str])] = &[
    (
        ContractType::PartTime,
        &["part time", "parttime", "fractional", "hourly", "0 5 fte"],
    ),
    (
        ContractType::Contract,
        &[
            "fixed term",
            "casual",
            "temporary",
            "temp",
            "maternity",
            "maternity cover",
            "cover",
            "contract",
            "contractor",
            "supply",
            "substitute",
            "interim",
            "locum",
            "short term",
        ],
    ),
];

macro_rules! country {
    ($code:literal, $name:literal, $region:literal, [$($alias:literal),*], $cctld:literal, [$($suffix:literal),*]) => {
        CountryEntry {
            code: $code,
            name: $name,
            region: $region,
            aliases: &[$($alias),*],
            cctld: $cctld,
            local_suffixes: &[$($suffix),*],
        }
    };
}

const COUNTRIES: &[CountryEntry] = &[
    country!("AE", "United Arab Emirates", "Middle East", ["uae", "u a e", "emirates"], "ae", ["sch.ae", "ac.ae"]),
    country!("SA", "Saudi Arabia", "Middle East", ["ksa", "kingdom of saudi arabia"], "sa", ["edu.sa", "sch.sa"]),
    country!("QA", "Qatar", "Middle East", ["state of qatar"], "qa", ["edu.qa", "sch.qa"]),
    country!("KW", "Kuwait", "Middle East", [], "kw", ["edu.kw"]),
    country!("BH", "Bahrain", "Middle East", ["kingdom of bahrain"], "bh", ["edu.bh"]),
    country!("OM", "Oman", "Middle East", ["sultanate of oman"], "om", ["edu.om"]),
    country!("JO", "Jordan", "Middle East", [], "jo", ["edu.jo", "sch.jo"]),
    country!("LB", "Lebanon", "Middle East", [], "lb", ["edu.lb"]),
    country!("IL", "Israel", "Middle East", [], "il", ["k12.il", "ac.il"]),
    country!("TR", "Turkey", "Europe", ["turkiye", "türkiye"], "tr", ["k12.tr", "edu.tr"]),
    country!("EG", "Egypt", "Africa", [], "eg", ["edu.eg", "sch.eg"]),
    country!("MA", "Morocco", "Africa", [], "ma", ["ac.ma"]),
    country!("NG", "Nigeria", "Africa", [], "ng", ["sch.ng", "edu.ng"]),
    country!("GH", "Ghana", "Africa", [], "gh", ["edu.gh"]),
    country!("KE", "Kenya", "Africa", [], "ke", ["sc.ke", "ac.ke"]),
    country!("TZ", "Tanzania", "Africa", ["united republic of tanzania"], "tz", ["sc.tz", "ac.tz"]),
    country!("UG", "Uganda", "Africa", [], "ug", ["sc.ug", "ac.ug"]),
    country!("ET", "Ethiopia", "Africa", [], "et", ["edu.et"]),
    country!("ZA", "South Africa", "Africa", ["rsa"], "za", ["school.za", "ac.za"]),
    country!("CN", "China", "Asia", ["prc", "people s republic of china", "mainland china"], "cn", ["edu.cn"]),
    country!("HK", "Hong Kong", "Asia", ["hong kong sar", "hksar"], "hk", ["edu.hk"]),
    country!("MO", "Macau", "Asia", ["macao"], "mo", ["edu.mo"]),
    country!("TW", "Taiwan", "Asia", [], "tw", ["edu.tw"]),
    country!("JP", "Japan", "Asia", [], "jp", ["ed.jp", "ac.jp"]),
    country!("KR", "South Korea", "Asia", ["korea", "republic of korea", "korea republic of"], "kr", ["hs.kr", "ms.kr", "es.kr", "ac.kr"]),
    country!("MN", "Mongolia", "Asia", [], "mn", ["edu.mn"]),
    country!("SG", "Singapore", "Asia", ["republic of singapore"], "sg", ["edu.sg"]),
    country!("MY", "Malaysia", "Asia", [], "my", ["edu.my"]),
    country!("TH", "Thailand", "Asia", [], "th", ["ac.th"]),
    country!("VN", "Vietnam", "Asia", ["viet nam"], "vn", ["edu.vn"]),
    country!("KH", "Cambodia", "Asia", [], "kh", ["edu.kh"]),
    country!("LA", "Laos", "Asia", ["lao pdr"], "la", ["edu.la"]),
    country!("MM", "Myanmar", "Asia", ["burma"], "mm", ["edu.mm"]),
    country!("ID", "Indonesia", "Asia", [], "id", ["sch.id", "ac.id"]),
    country!("PH", "Philippines", "Asia", ["the philippines"], "ph", ["edu.ph"]),
    country!("IN", "India", "Asia", [], "in", ["edu.in", "ac.in"]),
    country!("PK", "Pakistan", "Asia", [], "pk", ["edu.pk"]),
    country!("BD", "Bangladesh", "Asia", [], "bd", ["edu.bd"]),
    country!("LK", "Sri Lanka", "Asia", [], "lk", ["sch.lk", "ac.lk"]),
    country!("NP", "Nepal", "Asia", [], "np", ["edu.np"]),
    country!("KZ", "Kazakhstan", "Asia", [], "kz", ["edu.kz"]),
    country!("UZ", "Uzbekistan", "Asia", [], "uz", ["edu.uz"]),
    country!("AU", "Australia", "Oceania", [], "au", ["edu.au"]),
    country!("NZ", "New Zealand", "Oceania", ["aotearoa"], "nz", ["school.nz", "ac.nz"]),
    country!("GB", "United Kingdom", "Europe", ["uk", "u k", "great britain", "britain", "england", "scotland", "wales"], "uk", ["sch.uk", "ac.uk"]),
    country!("IE", "Ireland", "Europe", ["republic of ireland"], "ie", []),
    country!("FR", "France", "Europe", [], "fr", []),
    country!("DE", "Germany", "Europe", ["deutschland"], "de", []),
    country!("NL", "Netherlands", "Europe", ["the netherlands", "holland"], "nl", []),
    country!("BE", "Belgium", "Europe", [], "be", []),
    country!("LU", "Luxembourg", "Europe", [], "lu", []),
    country!("CH", "Switzerland", "Europe", ["suisse", "schweiz"], "ch", []),
    country!("AT", "Austria", "Europe", [], "at", ["ac.at"]),
    country!("IT", "Italy", "Europe", ["italia"], "it", ["edu.it"]),
    country!("ES", "Spain", "Europe", ["espana", "españa"], "es", ["edu.es"]),
    country!("PT", "Portugal", "Europe", [], "pt", ["edu.pt"]),
    country!("GR", "Greece", "Europe", [], "gr", ["sch.gr"]),
    country!("PL", "Poland", "Europe", [], "pl", ["edu.pl"]),
    country!("CZ", "Czech Republic", "Europe", ["czechia"], "cz", []),
    country!("HU", "Hungary", "Europe", [], "hu", ["sulinet.hu"]),
    country!("RO", "Romania", "Europe", [], "ro", ["edu.ro"]),
    country!("SE", "Sweden", "Europe", [], "se", []),
    country!("NO", "Norway", "Europe", [], "no", []),
    country!("DK", "Denmark", "Europe", [], "dk", []),
    country!("FI", "Finland", "Europe", [], "fi", []),
    country!("RU", "Russia", "Europe", ["russian federation"], "ru", ["edu.ru"]),
    country!("UA", "Ukraine", "Europe", [], "ua", ["edu.ua"]),
    country!("US", "United States", "North America", ["usa", "u s a", "us", "u s", "united states of america", "america"], "us", ["k12.us"]),
    country!("CA", "Canada", "North America", [], "ca", []),
    country!("MX", "Mexico", "Latin America", ["méxico"], "mx", ["edu.mx"]),
    country!("BR", "Brazil", "Latin America", ["brasil"], "br", ["g12.br", "edu.br"]),
    country!("AR", "Argentina", "Latin America", [], "ar", ["edu.ar"]),
    country!("CL", "Chile", "Latin America", [], "cl", []),
    country!("CO", "Colombia", "Latin America", [], "co", ["edu.co"]),
    country!("PE", "Peru", "Latin America", ["perú"], "pe", ["edu.pe"]),
    country!("EC", "Ecuador", "Latin America", [], "ec", ["edu.ec"]),
    country!("CR", "Costa Rica", "Latin America", [], "cr", ["ed.cr", "ac.cr"]),
    country!("PA", "Panama", "Latin America", ["panamá"], "pa", ["edu.pa"]),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_word_terms_do_not_match_inside_longer_words() {
        let title = normalize_words("Receptionist (Front Office)");
        assert!(!contains_term(&title, "reception"));
        assert!(contains_term(&title, "receptionist"));
        assert!(contains_term(&normalize_words("Year 10 English"), "year 10"));
        assert!(!contains_term(&normalize_words("Year 10 English"), "year 1"));
    }

    #[test]
    fn country_codes_are_unique_and_regions_resolve() {
        let tables = LookupTables::standard();
        let mut codes: Vec<_> = tables.countries.iter().map(|c| c.code).collect();
        codes.sort_unstable();
        let before = codes.len();
        codes.dedup();
        assert_eq!(before, codes.len());
        assert_eq!(tables.region_for("ae"), "Middle East");
        assert_eq!(tables.region_for("ZZ"), UNKNOWN_REGION);
    }
}
