//! Label selectors
//!
//! Only the equality and existence forms are needed: every back reference in
//! the fabric is a presence label or a `key=value` label.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String),
    Exists,
}

/// A conjunction of label requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: BTreeMap<String, Requirement>,
}

impl LabelSelector {
    /// Selector matching every object
    pub fn everything() -> Self {
        Self::default()
    }

    /// Require `key=value`
    #[must_use]
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .insert(key.into(), Requirement::Equals(value.into()));
        self
    }

    /// Require `key` to be present
    #[must_use]
    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.requirements.insert(key.into(), Requirement::Exists);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.requirements.iter().all(|(key, req)| {
            let value = labels.and_then(|l| l.get(key));
            match req {
                Requirement::Equals(expected) => value == Some(expected),
                Requirement::Exists => value.is_some(),
            }
        })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, req) in &self.requirements {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            match req {
                Requirement::Equals(value) => write!(f, "{key}={value}")?,
                Requirement::Exists => write!(f, "{key}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let sel = LabelSelector::everything()
            .eq("fabric.microscaler.io/vpc", "vpc-1")
            .exists("switch.fabric.microscaler.io/leaf-1");
        assert_eq!(
            sel.to_string(),
            "fabric.microscaler.io/vpc=vpc-1,switch.fabric.microscaler.io/leaf-1"
        );
        assert_eq!(LabelSelector::everything().to_string(), "");
    }

    #[test]
    fn test_matches() {
        let labels = BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "true".to_string()),
        ]);
        assert!(LabelSelector::everything().matches(None));
        assert!(LabelSelector::everything().eq("a", "1").matches(Some(&labels)));
        assert!(!LabelSelector::everything().eq("a", "2").matches(Some(&labels)));
        assert!(LabelSelector::everything().exists("b").matches(Some(&labels)));
        assert!(!LabelSelector::everything().exists("c").matches(Some(&labels)));
        assert!(!LabelSelector::everything().exists("a").matches(None));
    }
}
