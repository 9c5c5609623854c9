//! URL detection in message text.
//!
//! A URL starts with `http://` or `https://` (any case) at the start of a
//! word, followed by a letter, digit or `:`. It runs to the end of the line
//! and is then trimmed:
//!
//! - cut at the first space, `'`, `"` or backtick
//! - strip trailing `.,?!` (sentence punctuation)
//! - strip trailing `)` unless the URL contains `(` (wikipedia-style links)
//! - strip trailing `.,?!` again, for `(see URL).`

use std::ops::Range;

const SCHEMES: [&str; 2] = ["http://", "https://"];

/// Byte ranges of every URL found in `text`, in order.
pub fn find_urls(text: &str) -> Vec<Range<usize>> {
    let mut found = Vec::new();
    let mut search_start = 0;

    while let Some(start) = next_url_start(text, search_start) {
        let line_end = text[start..].find('\n').map_or(text.len(), |i| start + i);
        let url = trim_url(&text[start..line_end]);
        let end = start + url.len();
        found.push(start..end);

        // resume one character after the match
        search_start = text[end..].chars().next().map_or(end, |c| end + c.len_utf8());
    }
    found
}

/// The URLs in `text` as string slices.
pub fn urls(text: &str) -> Vec<&str> {
    find_urls(text).into_iter().map(|r| &text[r]).collect()
}

fn next_url_start(text: &str, from: usize) -> Option<usize> {
    let mut pos = from;
    while pos < text.len() {
        let offset = text[pos..].find(['h', 'H'])?;
        let candidate = pos + offset;
        if is_word_start(text, candidate) && scheme_len(&text[candidate..]).is_some() {
            return Some(candidate);
        }
        pos = candidate + 1;
    }
    None
}

/// Length of the scheme prefix, if `rest` starts with a scheme followed by a
/// valid first host character.
fn scheme_len(rest: &str) -> Option<usize> {
    SCHEMES.iter().find_map(|scheme| {
        let head = rest.get(..scheme.len())?;
        if !head.eq_ignore_ascii_case(scheme) {
            return None;
        }
        let next = rest[scheme.len()..].chars().next()?;
        (next.is_ascii_alphanumeric() || next == ':').then_some(scheme.len())
    })
}

fn is_word_start(text: &str, pos: usize) -> bool {
    match text[..pos].chars().next_back() {
        Some(prev) => !(prev.is_alphanumeric() || prev == '_'),
        None => true,
    }
}

fn trim_url(candidate: &str) -> &str {
    let mut url = candidate;
    if let Some(cut) = url.find([' ', '\'', '"', '`']) {
        url = &url[..cut];
    }
    url = url.trim_end_matches(['.', ',', '?', '!']);
    if !url.contains('(') {
        url = url.trim_end_matches(')');
    }
    url.trim_end_matches(['.', ',', '?', '!'])
}
