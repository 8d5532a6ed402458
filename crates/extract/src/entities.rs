use regex::Regex;
use std::sync::LazyLock;

use crate::schema::{Entities, Metric, Period, Sentiment};

/// Words that never start a fund name even when capitalised.
const NAME_STOPWORDS: &[&str] = &[
    "what", "whats", "is", "are", "the", "a", "an", "tell", "show", "me", "compare", "find",
    "search", "list", "give", "get", "explain", "how", "which", "why", "when", "where", "who",
    "hi", "hello", "hey", "i", "my", "please", "can", "could", "should", "would", "does", "do",
    "nav", "aum", "isin", "sip", "kyc", "ytd", "vs", "versus", "and", "or", "between", "current",
    "latest", "difference", "about", "of", "for", "with", "in", "to", "on", "from", "its", "it",
    "thanks", "thank", "performance", "returns", "return",
];

/// Words that may sit inside a name ("HDFC Top 100") but never open one.
const NAME_START_EXCLUDED: &[&str] = &["top", "best", "good"];

/// Lowercase words allowed to continue a capitalised name run.
const NAME_CONNECTORS: &[&str] = &[
    "fund", "funds", "mutual", "direct", "regular", "plan", "scheme", "growth", "cap", "&",
];

/// Category words; a "name" made only of these ("mutual fund", "index
/// funds") names no particular scheme.
const GENERIC_NAME_WORDS: &[&str] = &[
    "mutual", "index", "equity", "debt", "hybrid", "liquid", "elss", "tax", "saving", "savings",
    "fund", "funds", "plan", "scheme", "direct", "regular", "growth", "any", "this", "that",
];

/// Suffixes that mark the end of a fund name.
const NAME_SUFFIXES: &[&str] = &["fund", "plan", "scheme"];

static ISIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(in[a-z0-9]{9}[0-9])\b").expect("valid isin regex"));

static SUFFIX_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b((?:[a-z0-9&]+\s+){1,5})(fund|plan|scheme)\b").expect("valid suffix regex")
});

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:₹|\brs\.?|\binr)\s*([0-9][0-9,]*(?:\.[0-9]+)?)\s*(lakhs?|crores?|k)?\b")
        .expect("valid amount regex")
});

static PERIOD_PATTERNS: LazyLock<Vec<(Regex, Period)>> = LazyLock::new(|| {
    [
        (r"\b(1\s?y|1[\s-]years?|one[\s-]years?)\b", Period::OneYear),
        (r"\b(3\s?y|3[\s-]years?|three[\s-]years?)\b", Period::ThreeYears),
        (r"\b(5\s?y|5[\s-]years?|five[\s-]years?)\b", Period::FiveYears),
        (r"\b(ytd|year to date|this year|current year)\b", Period::YearToDate),
    ]
    .into_iter()
    .map(|(pattern, period)| (Regex::new(pattern).expect("valid period regex"), period))
    .collect()
});

/// Pull every slot out of the raw utterance. Runs before intent rules so
/// the rules can see what was found.
pub fn extract_entities(text: &str) -> Entities {
    let lower = text.to_lowercase();
    let isin = extract_isin(text);

    let mut names = capitalised_names(text);
    if names.len() < 2 {
        for candidate in suffix_names(&lower) {
            if !names.iter().any(|n| same_fund(n, &candidate)) {
                names.push(candidate);
            }
        }
    }

    let compare_with = if names.len() > 1 { names.clone() } else { Vec::new() };

    Entities {
        fund_name: names.into_iter().next(),
        isin,
        metric: extract_metric(&lower),
        period: extract_period(&lower),
        amount: extract_amount(&lower),
        compare_with,
    }
}

pub fn extract_isin(text: &str) -> Option<String> {
    ISIN_RE
        .captures(text)
        .map(|c| c[1].to_ascii_uppercase())
}

pub fn extract_metric(lower: &str) -> Option<Metric> {
    if lower.contains("nav") || lower.contains("net asset value") {
        Some(Metric::Nav)
    } else if lower.contains("expense") || lower.contains("ratio") {
        Some(Metric::ExpenseRatio)
    } else if has_word(lower, "aum") || lower.contains("assets under management") {
        Some(Metric::Aum)
    } else if lower.contains("return") || lower.contains("performance") {
        Some(Metric::Returns)
    } else {
        None
    }
}

pub fn extract_period(lower: &str) -> Option<Period> {
    PERIOD_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(lower))
        .map(|(_, period)| *period)
}

/// Currency-marked amounts only, so "Top 100" is never read as money.
pub fn extract_amount(lower: &str) -> Option<f64> {
    let caps = AMOUNT_RE.captures(lower)?;
    let value: f64 = caps[1].replace(',', "").parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str()) {
        Some("k") => 1_000.0,
        Some("lakh") | Some("lakhs") => 100_000.0,
        Some("crore") | Some("crores") => 10_000_000.0,
        _ => 1.0,
    };
    Some(value * multiplier)
}

pub fn detect_sentiment(lower: &str) -> Sentiment {
    const URGENT: &[&str] = &["urgent", "immediately", "asap", "quickly", "emergency", "critical"];
    const NEGATIVE: &[&str] = &[
        "bad", "terrible", "awful", "hate", "angry", "frustrated", "problem", "issue", "wrong",
    ];
    const POSITIVE: &[&str] = &[
        "good", "great", "excellent", "love", "happy", "satisfied", "perfect", "amazing",
    ];

    if URGENT.iter().any(|w| lower.contains(w)) {
        Sentiment::Urgent
    } else if NEGATIVE.iter().any(|w| lower.contains(w)) {
        Sentiment::Negative
    } else if POSITIVE.iter().any(|w| lower.contains(w)) {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    }
}

/// Runs of capitalised words, e.g. "HDFC Top 100 Fund". Digits and a few
/// lowercase connectors may continue a run; a run is kept when it has at
/// least two words or ends in a known suffix.
fn capitalised_names(text: &str) -> Vec<String> {
    let words: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '&'))
        .filter(|w| !w.is_empty())
        .collect();

    let mut names = Vec::new();
    let mut i = 0;

    while i < words.len() {
        if !is_name_start(words[i]) {
            i += 1;
            continue;
        }

        let mut run = vec![words[i]];
        let mut j = i + 1;
        while j < words.len() && continues_name(words[j]) {
            run.push(words[j]);
            j += 1;
        }

        let ends_in_suffix = run
            .last()
            .is_some_and(|w| NAME_SUFFIXES.contains(&w.to_lowercase().as_str()));
        if (run.len() >= 2 || ends_in_suffix) && !is_generic(&run) {
            let name = run.join(" ");
            if !names.contains(&name) {
                names.push(name);
            }
        }
        i = j;
    }

    names
}

fn is_name_start(word: &str) -> bool {
    let starts_upper = word.chars().next().is_some_and(|c| c.is_uppercase());
    let lower = word.to_lowercase();
    starts_upper
        && word.chars().count() > 2
        && !NAME_STOPWORDS.contains(&lower.as_str())
        && !NAME_START_EXCLUDED.contains(&lower.as_str())
        && !ISIN_RE.is_match(word)
}

fn continues_name(word: &str) -> bool {
    let lower = word.to_lowercase();
    if NAME_STOPWORDS.contains(&lower.as_str()) {
        return false;
    }
    let first = word.chars().next();
    first.is_some_and(|c| c.is_uppercase() || c.is_ascii_digit())
        || NAME_CONNECTORS.contains(&lower.as_str())
}

/// Lowercase fallback: every "... hdfc top 100 fund" in the text, each
/// keeping the words after the last stopword in front of its suffix.
fn suffix_names(lower: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in SUFFIX_NAME_RE.captures_iter(lower) {
        let prefix: Vec<&str> = caps[1].split_whitespace().collect();
        let start = prefix
            .iter()
            .rposition(|w| NAME_STOPWORDS.contains(w))
            .map_or(0, |p| p + 1);
        let mut kept = &prefix[start..];
        while kept.first().is_some_and(|w| NAME_START_EXCLUDED.contains(w)) {
            kept = &kept[1..];
        }
        if kept.is_empty() || is_generic(kept) {
            continue;
        }
        let name = format!("{} {}", kept.join(" "), &caps[2]);
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Two spellings of one name, e.g. "Axis fund" and "axis fund", or a
/// truncated lowercase match of a longer capitalised run.
fn same_fund(a: &str, b: &str) -> bool {
    let (a, b) = (a.to_lowercase(), b.to_lowercase());
    a.ends_with(&b) || b.ends_with(&a)
}

fn is_generic(words: &[&str]) -> bool {
    words
        .iter()
        .all(|w| GENERIC_NAME_WORDS.contains(&w.to_lowercase().as_str()))
}

pub(crate) fn has_word(lower: &str, word: &str) -> bool {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token == word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capitalised_fund_name() {
        let entities = extract_entities("What is the current NAV of HDFC Top 100 Fund?");
        assert_eq!(entities.fund_name.as_deref(), Some("HDFC Top 100 Fund"));
        assert_eq!(entities.metric, Some(Metric::Nav));
        assert!(entities.compare_with.is_empty());
    }

    #[test]
    fn test_connector_continues_name() {
        let entities = extract_entities("Tell me about Axis fund");
        assert_eq!(entities.fund_name.as_deref(), Some("Axis fund"));
    }

    #[test]
    fn test_generic_category_is_not_a_name() {
        assert_eq!(extract_entities("What is a mutual fund?").fund_name, None);
        assert_eq!(extract_entities("Are Index Funds safe?").fund_name, None);
    }

    #[test]
    fn test_lowercase_suffix_name() {
        let entities = extract_entities("what is the nav of hdfc top 100 fund");
        assert_eq!(entities.fund_name.as_deref(), Some("hdfc top 100 fund"));
    }

    #[test]
    fn test_lowercase_comparison_targets() {
        let entities = extract_entities("compare hdfc top 100 fund and axis bluechip fund");
        assert_eq!(entities.compare_with, vec!["hdfc top 100 fund", "axis bluechip fund"]);
        assert_eq!(entities.fund_name.as_deref(), Some("hdfc top 100 fund"));
    }

    #[test]
    fn test_mixed_case_names_are_not_doubled() {
        let entities = extract_entities("Tell me about Axis fund");
        assert!(entities.compare_with.is_empty());

        let entities = extract_entities("Compare HDFC Top 100 Fund with axis bluechip fund");
        assert_eq!(entities.compare_with, vec!["HDFC Top 100 Fund", "axis bluechip fund"]);

        let entities = extract_entities("Is HDFC Top 100 a good fund");
        assert!(entities.compare_with.is_empty());
        assert_eq!(extract_entities("best fund to buy").fund_name, None);
    }

    #[test]
    fn test_comparison_targets() {
        let entities =
            extract_entities("Compare Axis Bluechip Fund and Mirae Asset Large Cap Fund");
        assert_eq!(
            entities.compare_with,
            vec!["Axis Bluechip Fund", "Mirae Asset Large Cap Fund"]
        );
        assert_eq!(entities.fund_name.as_deref(), Some("Axis Bluechip Fund"));
    }

    #[test]
    fn test_period_and_amount() {
        assert_eq!(extract_period("3 year returns"), Some(Period::ThreeYears));
        assert_eq!(extract_period("ytd performance"), Some(Period::YearToDate));
        assert_eq!(extract_period("5y cagr"), Some(Period::FiveYears));
        assert_eq!(extract_amount("invest rs 5,000 monthly"), Some(5000.0));
        assert_eq!(extract_amount("₹2 lakh lumpsum"), Some(200_000.0));
        assert_eq!(extract_amount("top 100 fund"), None);
    }

    #[test]
    fn test_isin() {
        let entities = extract_entities("nav for inf179k01bb8 please");
        assert_eq!(entities.isin.as_deref(), Some("INF179K01BB8"));
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(extract_entities(""), Entities::default());
    }
}
