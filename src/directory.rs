//! Classification of dialed digit sequences against the known-number set.

/// How a dialed candidate relates to the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialMatch {
    /// Exactly a directory entry.
    Complete,
    /// A proper prefix of at least one entry; dialing can continue.
    Partial,
    /// No entry starts with the candidate.
    Invalid,
}

/// Read-only set of reachable numbers, fixed at startup.
#[derive(Debug, Clone)]
pub struct NumberDirectory {
    entries: Vec<String>,
}

impl NumberDirectory {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    pub fn classify(&self, candidate: &str) -> DialMatch {
        if self.entries.iter().any(|entry| entry == candidate) {
            return DialMatch::Complete;
        }
        if self
            .entries
            .iter()
            .any(|entry| entry.starts_with(candidate) && entry.len() > candidate.len())
        {
            return DialMatch::Partial;
        }
        DialMatch::Invalid
    }
}

impl Default for NumberDirectory {
    fn default() -> Self {
        Self::new(crate::config::KNOWN_NUMBERS)
    }
}
