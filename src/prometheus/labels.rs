use std::fmt;

use super::error::{Error, Result};

pub const BUCKET_LABEL: &str = "le";
pub const QUANTILE_LABEL: &str = "quantile";
const RESERVED_LABEL_PREFIX: &str = "__";

/// Checks the classic label name charset: `[a-zA-Z_][a-zA-Z0-9_]*`, and
/// rejects the `__` prefix reserved for internal use.
pub fn is_valid_label_name(name: &str) -> bool {
    if name.is_empty() || name.starts_with(RESERVED_LABEL_PREFIX) {
        return false;
    }
    name.chars()
        .enumerate()
        .all(|(i, c)| c.is_ascii_alphabetic() || c == '_' || (c.is_ascii_digit() && i > 0))
}

/// Metric names additionally allow `:`.
pub fn is_valid_metric_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    name.chars().enumerate().all(|(i, c)| {
        c.is_ascii_alphabetic() || c == '_' || c == ':' || (c.is_ascii_digit() && i > 0)
    })
}

/// An ordered, immutable sequence of label name/value pairs.
///
/// Equality and hashing cover the full sequence, so two sets with the same
/// pairs in a different order are distinct keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelSet {
    pairs: Vec<(String, String)>,
}

impl LabelSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a label set, rejecting invalid and duplicate names.
    pub fn new<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Result<Self>
    where
        N: Into<String>,
        V: Into<String>,
    {
        let mut set = LabelSet::default();
        for (name, value) in pairs {
            set.push(name.into(), value.into())?;
        }
        Ok(set)
    }

    fn push(&mut self, name: String, value: String) -> Result<()> {
        if !is_valid_label_name(&name) {
            return Err(Error::InvalidLabelName(name));
        }
        if self.get(&name).is_some() {
            return Err(Error::DuplicateLabelName(name));
        }
        self.pairs.push((name, value));
        Ok(())
    }

    /// Appends variable label values to these (constant) labels. Names were
    /// validated when the metric was defined, so this cannot fail.
    pub(crate) fn merge(&self, names: &[String], values: &[String]) -> LabelSet {
        let mut pairs = Vec::with_capacity(self.pairs.len() + names.len());
        pairs.extend(self.pairs.iter().cloned());
        pairs.extend(names.iter().cloned().zip(values.iter().cloned()));
        LabelSet { pairs }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", name, value)?;
        }
        write!(f, "}}")
    }
}
