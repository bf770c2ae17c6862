//! Text normalization and keyword policy.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{Item, MatchOutcome};

/// Symbol-bearing tokens that would otherwise be shredded by punctuation stripping.
fn rewrite_table() -> &'static [(Regex, &'static str)] {
    static TABLE: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            (r"\bc\+\+", "cpp"),
            (r"\bc#", "csharp"),
            (r"\bf#", "fsharp"),
            (r"(^|[^\w])\.net\b", "${1}dotnet"),
        ]
        .into_iter()
        .map(|(pat, rep)| (Regex::new(pat).expect("valid regex"), rep))
        .collect()
    })
}

/// Lower-case, rewrite known symbol tokens, turn every other non-alphanumeric
/// character into a space, then collapse whitespace.
pub fn normalize(text: &str) -> String {
    let mut text = text.to_lowercase();
    for (re, rep) in rewrite_table() {
        if re.is_match(&text) {
            text = re.replace_all(&text, *rep).into_owned();
        }
    }

    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `keyword` equals a token, or a contiguous run of tokens, of `text`.
/// Both sides must already be normalized.
fn is_word_match(text: &str, keyword: &str) -> bool {
    if keyword.is_empty() || text.is_empty() {
        return false;
    }
    format!(" {text} ").contains(&format!(" {keyword} "))
}

fn is_partial_match(text: &str, keyword: &str) -> bool {
    !keyword.is_empty() && text.contains(keyword)
}

/// Apply a feed group's keyword policy to one item.
///
/// Never yields [`MatchOutcome::AlreadyDelivered`]; that is decided by the
/// dedup store before matching runs.
pub fn match_keywords(item: &Item, keywords: &[String], allow_partial: bool) -> MatchOutcome {
    if keywords.is_empty() {
        return MatchOutcome::NoFilterConfigured;
    }

    let title = normalize(&item.title);
    let desc = normalize(&item.description);
    tracing::debug!(
        link = %item.link,
        title = %title,
        description = %desc,
        allow_partial,
        "matching item"
    );

    let mut matched: Vec<String> = Vec::new();
    for keyword in keywords {
        if matched.contains(keyword) {
            continue;
        }

        let kw = normalize(keyword);
        let hit = if is_word_match(&title, &kw) {
            Some("title word")
        } else if is_word_match(&desc, &kw) {
            Some("description word")
        } else if allow_partial && is_partial_match(&title, &kw) {
            Some("title partial")
        } else if allow_partial && is_partial_match(&desc, &kw) {
            Some("description partial")
        } else {
            None
        };

        match hit {
            Some(kind) => {
                tracing::debug!(keyword = %keyword, kind, "keyword matched");
                matched.push(keyword.clone());
            }
            None => tracing::debug!(keyword = %keyword, "keyword not found"),
        }
    }

    if matched.is_empty() {
        MatchOutcome::NoMatch
    } else {
        MatchOutcome::Matched(matched)
    }
}
