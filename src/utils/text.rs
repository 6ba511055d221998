//! Narration text helpers shared by matching and categorization

/// Legal-form and filler words that say nothing about who a party is
const NAME_STOPWORDS: &[&str] = &[
    "THE", "AND", "PVT", "PRIVATE", "LTD", "LIMITED", "LLP", "INC", "CORP", "COMPANY", "INDIA",
    "ENTERPRISES", "CO",
];

/// Uppercase and drop everything that is not a letter or digit
pub fn normalize_alnum(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Uppercase alphanumeric tokens, splitting on any other character
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_uppercase())
        .collect()
}

/// Tokens of a party name that identify it, with legal suffixes removed
pub fn significant_name_tokens(name: &str) -> Vec<String> {
    tokens(name)
        .into_iter()
        .filter(|token| token.chars().count() >= 3 && !NAME_STOPWORDS.contains(&token.as_str()))
        .collect()
}

/// Whether `phrase` occurs in `haystack` as a run of whole tokens.
///
/// Long single-word keywords also match inside a token, since bank
/// narrations often glue merchant names to ids (`SWIGGY8812`).
pub fn contains_phrase(haystack: &[String], phrase: &str, glue_min_len: usize) -> bool {
    let needle = tokens(phrase);
    match needle.len() {
        0 => false,
        1 => {
            let word = &needle[0];
            let glued = word.chars().count() >= glue_min_len;
            haystack.iter().any(|token| token == word || (glued && token.contains(word.as_str())))
        }
        n => haystack.windows(n).any(|window| window == needle.as_slice()),
    }
}

/// Whether some run of adjacent tokens spells `joined` exactly.
///
/// `joined` must already be normalized with [`normalize_alnum`], so
/// `INV 77` and `INV77` both spell `INV77` while `FIRST 1000` never
/// spells `ST100`.
pub fn contains_joined_run(haystack: &[String], joined: &str) -> bool {
    if joined.is_empty() {
        return false;
    }

    for start in 0..haystack.len() {
        let mut run = String::new();
        for token in &haystack[start..] {
            run.push_str(token);
            if run.len() >= joined.len() {
                if run == joined {
                    return true;
                }
                break;
            }
        }
    }

    false
}
