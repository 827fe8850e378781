//! Dotted version numbers of build-tools directories

use std::cmp::Ordering;
use std::fmt;

/// A dotted numeric version such as `30.0.3`, optionally followed by a
/// qualifier (`28.0.0-rc1`).
///
/// Components compare numerically, so `9.0.0 < 10.0.0`, and missing trailing
/// components count as zero. A qualified version sorts below the release with
/// the same numbers.
#[derive(Debug, Clone, Eq)]
pub struct DottedVersion {
    parts: Vec<u64>,
    qualifier: Option<String>,
}

impl DottedVersion {
    /// Parse a directory name; `None` when it does not start with a number
    pub fn parse(name: &str) -> Option<Self> {
        let numeric_len = name
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(name.len());
        let (numeric, rest) = name.split_at(numeric_len);
        let numeric = numeric.trim_end_matches('.');
        if numeric.is_empty() {
            return None;
        }

        let parts = numeric
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;

        let qualifier = rest.trim_start_matches(&['-', '_', '.', ' '][..]);
        Some(Self {
            parts,
            qualifier: (!qualifier.is_empty()).then(|| qualifier.to_string()),
        })
    }

    /// Numeric components
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }

    /// Qualifier after the numeric part, if any
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    fn cmp_parts(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| {
                let a = self.parts.get(i).copied().unwrap_or(0);
                let b = other.parts.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl Ord for DottedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_parts(other)
            .then_with(|| match (&self.qualifier, &other.qualifier) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for DottedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DottedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for DottedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numbers: Vec<String> = self.parts.iter().map(u64::to_string).collect();
        f.write_str(&numbers.join("."))?;
        if let Some(qualifier) = &self.qualifier {
            write!(f, "-{qualifier}")?;
        }
        Ok(())
    }
}
