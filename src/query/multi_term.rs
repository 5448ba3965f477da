//! Term expansion for multi-term queries.
//!
//! Prefix, wildcard, regex, range, fuzzy and variation queries enumerate
//! matching terms from a segment's dictionary and execute as a union of
//! term matchers. Every expansion is bounded by the search context's term
//! cap; exceeding it fails with `TooManyTerms`.

use regex::Regex;

use crate::error::{Result, SalixError};
use crate::reader::SegmentReader;

fn too_many(field: &str, cap: usize) -> SalixError {
    SalixError::TooManyTerms {
        field: field.to_string(),
        limit: cap,
    }
}

/// All terms of `field` starting with `prefix`.
pub fn expand_prefix(
    reader: &SegmentReader,
    field: &str,
    prefix: &[u8],
    cap: usize,
) -> Result<Vec<Vec<u8>>> {
    let mut cursor = reader.term_cursor(field, prefix)?;
    let mut terms = Vec::new();
    while let Some((term, _)) = cursor.next_term()? {
        if !term.starts_with(prefix) {
            break;
        }
        if terms.len() >= cap {
            return Err(too_many(field, cap));
        }
        terms.push(term);
    }
    Ok(terms)
}

/// All terms of `field` within the byte range.
pub fn expand_range(
    reader: &SegmentReader,
    field: &str,
    lower: Option<&[u8]>,
    upper: Option<&[u8]>,
    include_lower: bool,
    include_upper: bool,
    cap: usize,
) -> Result<Vec<Vec<u8>>> {
    let start = lower.unwrap_or(&[]);
    let mut cursor = reader.term_cursor(field, start)?;
    let mut terms = Vec::new();
    while let Some((term, _)) = cursor.next_term()? {
        if let Some(lower) = lower {
            if !include_lower && term.as_slice() == lower {
                continue;
            }
        }
        if let Some(upper) = upper {
            match term.as_slice().cmp(upper) {
                std::cmp::Ordering::Greater => break,
                std::cmp::Ordering::Equal if !include_upper => break,
                _ => {}
            }
        }
        if terms.len() >= cap {
            return Err(too_many(field, cap));
        }
        terms.push(term);
    }
    Ok(terms)
}

/// All terms of `field` matching an anchored regex. `literal_prefix`
/// restricts the dictionary scan when the pattern starts with literal
/// text.
pub fn expand_regex(
    reader: &SegmentReader,
    field: &str,
    pattern: &Regex,
    literal_prefix: &[u8],
    cap: usize,
) -> Result<Vec<Vec<u8>>> {
    let mut cursor = reader.term_cursor(field, literal_prefix)?;
    let mut terms = Vec::new();
    while let Some((term, _)) = cursor.next_term()? {
        if !literal_prefix.is_empty() && !term.starts_with(literal_prefix) {
            break;
        }
        let Ok(text) = std::str::from_utf8(&term) else {
            continue;
        };
        if pattern.is_match(text) {
            if terms.len() >= cap {
                return Err(too_many(field, cap));
            }
            terms.push(term);
        }
    }
    Ok(terms)
}

/// Translate a shell-style wildcard pattern (`*`, `?`) to an anchored
/// regex, returning it with the pattern's literal prefix.
pub fn wildcard_to_regex(pattern: &str) -> Result<(Regex, Vec<u8>)> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    let mut prefix = String::new();
    let mut in_prefix = true;
    for c in pattern.chars() {
        match c {
            '*' => {
                in_prefix = false;
                regex.push_str(".*");
            }
            '?' => {
                in_prefix = false;
                regex.push('.');
            }
            c => {
                if in_prefix {
                    prefix.push(c);
                }
                regex.push_str(&regex::escape(&c.to_string()));
            }
        }
    }
    regex.push('$');
    let compiled = Regex::new(&regex)
        .map_err(|e| SalixError::query(format!("bad wildcard pattern: {e}")))?;
    Ok((compiled, prefix.into_bytes()))
}

/// Compile a user regex for term expansion, anchoring it if needed.
pub fn compile_term_regex(pattern: &str) -> Result<(Regex, Vec<u8>)> {
    let anchored = if pattern.starts_with('^') {
        pattern.to_string()
    } else {
        format!("^(?:{pattern})$")
    };
    let compiled =
        Regex::new(&anchored).map_err(|e| SalixError::query(format!("bad regex: {e}")))?;
    // A literal prefix is only extractable from trivially literal heads;
    // scan everything otherwise.
    Ok((compiled, Vec::new()))
}

/// Bounded Levenshtein distance: `None` when the distance exceeds
/// `max_edits`.
pub fn levenshtein_within(a: &str, b: &str, max_edits: u32) -> Option<u32> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (alen, blen) = (a.len(), b.len());
    if alen.abs_diff(blen) > max_edits as usize {
        return None;
    }

    let mut previous: Vec<u32> = (0..=blen as u32).collect();
    let mut current = vec![0u32; blen + 1];
    for i in 1..=alen {
        current[0] = i as u32;
        let mut row_min = current[0];
        for j in 1..=blen {
            let substitution = previous[j - 1] + (a[i - 1] != b[j - 1]) as u32;
            current[j] = substitution.min(previous[j] + 1).min(current[j - 1] + 1);
            row_min = row_min.min(current[j]);
        }
        if row_min > max_edits {
            return None;
        }
        std::mem::swap(&mut previous, &mut current);
    }
    (previous[blen] <= max_edits).then_some(previous[blen])
}

/// All terms of `field` within `max_edits` edits of `text`, sharing a
/// required prefix of `prefix_len` characters.
pub fn expand_fuzzy(
    reader: &SegmentReader,
    field: &str,
    text: &str,
    max_edits: u32,
    prefix_len: usize,
    cap: usize,
) -> Result<Vec<Vec<u8>>> {
    let prefix: String = text.chars().take(prefix_len).collect();
    let prefix_bytes = prefix.as_bytes();

    let mut cursor = reader.term_cursor(field, prefix_bytes)?;
    let mut terms = Vec::new();
    while let Some((term, _)) = cursor.next_term()? {
        if !prefix_bytes.is_empty() && !term.starts_with(prefix_bytes) {
            break;
        }
        let Ok(candidate) = std::str::from_utf8(&term) else {
            continue;
        };
        if levenshtein_within(text, candidate, max_edits).is_some() {
            if terms.len() >= cap {
                return Err(too_many(field, cap));
            }
            terms.push(term);
        }
    }
    Ok(terms)
}

/// Generate simple English inflection candidates of `word`: the word
/// itself, common suffix additions, and suffix strips.
pub fn variations(word: &str) -> Vec<String> {
    let mut forms = vec![word.to_string()];
    let mut push = |form: String| {
        if !form.is_empty() && !forms.contains(&form) {
            forms.push(form);
        }
    };

    for suffix in ["s", "es", "ed", "ing", "er", "est", "ly"] {
        push(format!("{word}{suffix}"));
    }
    if let Some(stem) = word.strip_suffix("ies") {
        push(format!("{stem}y"));
    }
    for suffix in ["ing", "ed", "es", "er", "est", "ly", "s"] {
        if let Some(stem) = word.strip_suffix(suffix) {
            if stem.len() >= 2 {
                push(stem.to_string());
                // handle doubled final consonants: "stopped" -> "stop"
                let chars: Vec<char> = stem.chars().collect();
                if chars.len() >= 2 && chars[chars.len() - 1] == chars[chars.len() - 2] {
                    push(chars[..chars.len() - 1].iter().collect());
                }
                push(format!("{stem}e"));
            }
        }
    }
    if word.ends_with('y') {
        let stem: String = word.chars().take(word.chars().count() - 1).collect();
        push(format!("{stem}ies"));
    }
    forms
}

/// The variation forms of `word` that exist in `field`'s dictionary.
pub fn expand_variations(
    reader: &SegmentReader,
    field: &str,
    word: &str,
    cap: usize,
) -> Result<Vec<Vec<u8>>> {
    let mut terms = Vec::new();
    for form in variations(word) {
        let bytes = form.into_bytes();
        if reader.term_info(field, &bytes)?.is_some() {
            if terms.len() >= cap {
                return Err(too_many(field, cap));
            }
            terms.push(bytes);
        }
    }
    Ok(terms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_to_regex() {
        let (regex, prefix) = wildcard_to_regex("app*e?").unwrap();
        assert_eq!(prefix, b"app".to_vec());
        assert!(regex.is_match("appleX"));
        assert!(regex.is_match("appliqueD"));
        assert!(!regex.is_match("apple"));
        assert!(!regex.is_match("ape"));

        let (regex, prefix) = wildcard_to_regex("a.b*").unwrap();
        assert_eq!(prefix, b"a.b".to_vec());
        // The dot is literal, not a regex any-char.
        assert!(regex.is_match("a.bc"));
        assert!(!regex.is_match("axbc"));
    }

    #[test]
    fn test_levenshtein_within() {
        assert_eq!(levenshtein_within("kitten", "kitten", 2), Some(0));
        assert_eq!(levenshtein_within("kitten", "sitten", 2), Some(1));
        assert_eq!(levenshtein_within("kitten", "sitting", 3), Some(3));
        assert_eq!(levenshtein_within("kitten", "sitting", 2), None);
        assert_eq!(levenshtein_within("", "ab", 2), Some(2));
        assert_eq!(levenshtein_within("abcdef", "", 3), None);
    }

    #[test]
    fn test_variations_contains_inflections() {
        let forms = variations("render");
        assert!(forms.contains(&"render".to_string()));
        assert!(forms.contains(&"renders".to_string()));
        assert!(forms.contains(&"rendering".to_string()));
        assert!(forms.contains(&"rendered".to_string()));

        let forms = variations("stopped");
        assert!(forms.contains(&"stop".to_string()));

        let forms = variations("carry");
        assert!(forms.contains(&"carries".to_string()));
    }
}
