use crate::types::Identity;
use std::collections::HashMap;

/// Label → identity profile. Built once at startup, read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct IdentityDirectory {
    by_label: HashMap<String, Identity>,
}

impl IdentityDirectory {
    /// Index `identities` by label. A later duplicate label replaces an earlier one.
    pub fn new(identities: impl IntoIterator<Item = Identity>) -> Self {
        let mut by_label = HashMap::new();
        for identity in identities {
            if let Some(prev) = by_label.insert(identity.label.clone(), identity) {
                tracing::warn!(label = %prev.label, "duplicate identity label; keeping the last one");
            }
        }
        Self { by_label }
    }

    pub fn lookup(&self, label: &str) -> Option<&Identity> {
        self.by_label.get(label)
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: i64, label: &str) -> Identity {
        Identity {
            id,
            label: label.into(),
            affiliation: "UI".into(),
            category: "Frontend".into(),
        }
    }

    #[test]
    fn test_lookup() {
        let dir = IdentityDirectory::new([identity(1, "Alice"), identity(2, "Bob")]);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.lookup("Alice").map(|i| i.id), Some(1));
        assert!(dir.lookup("Mallory").is_none());
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let dir = IdentityDirectory::new([identity(1, "Alice")]);
        assert!(dir.lookup("alice").is_none());
    }

    #[test]
    fn test_duplicate_label_keeps_last() {
        let dir = IdentityDirectory::new([identity(1, "Alice"), identity(9, "Alice")]);
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.lookup("Alice").map(|i| i.id), Some(9));
    }
}
