//! RFC 1459 case mapping for nicks and channel names.
//!
//! IRC servers treat `A-Z` and `a-z` as equal, and also the Scandinavian
//! pairs `[]\~` and `{}|^`. Every map keyed by a nick or channel goes through
//! [`IrcKey`] so "Bob" and "bob" resolve to the same entry.

use std::fmt;

/// Lowercase a name under RFC 1459 rules.
pub fn irc_lowercase(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'A'..='Z' => c.to_ascii_lowercase(),
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            _ => c,
        })
        .collect()
}

/// Compare two names under RFC 1459 rules.
pub fn irc_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && irc_lowercase(a) == irc_lowercase(b)
}

/// A case-folded nick or channel name, usable as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IrcKey(String);

impl IrcKey {
    pub fn new(name: &str) -> Self {
        Self(irc_lowercase(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IrcKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<&String> for IrcKey {
    fn from(name: &String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for IrcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_letters_fold() {
        assert_eq!(irc_lowercase("Bob"), "bob");
        assert!(irc_eq("Bob", "bOB"));
        assert_eq!(IrcKey::new("#AutoJoin"), IrcKey::new("#autojoin"));
    }

    #[test]
    fn scandinavian_brackets_fold() {
        assert_eq!(irc_lowercase("[Nick]\\~"), "{nick}|^");
        assert!(irc_eq("foo[away]", "FOO{AWAY}"));
    }

    #[test]
    fn non_ascii_is_untouched() {
        assert_eq!(irc_lowercase("Ärvid"), "Ärvid");
        assert!(!irc_eq("alice", "alicia"));
    }
}
