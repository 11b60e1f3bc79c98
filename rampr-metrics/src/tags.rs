use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted `(key, value)` pairs identifying one series of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Request metrics carry at most three tags; keep them inline.
    pub(crate) tags: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    pub fn from_sorted_iter(iter: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let idx = self.tags.partition_point(|(k, _)| *k < key);
        self.tags.get(idx).and_then(|(k, v)| (*k == key).then_some(*v))
    }

    /// True when every `(key, value)` in `filter` is present in this set.
    pub fn matches(&self, filter: &[(KeyId, KeyId)]) -> bool {
        filter.iter().all(|(k, v)| self.get(*k) == Some(*v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_matches() {
        let a = KeyId::from(1);
        let b = KeyId::from(2);
        let c = KeyId::from(3);

        let set = TagSet::from_sorted_iter([(a, b), (c, a)]);
        assert_eq!(set.get(a), Some(b));
        assert_eq!(set.get(c), Some(a));
        assert_eq!(set.get(b), None);

        assert!(set.matches(&[]));
        assert!(set.matches(&[(c, a)]));
        assert!(set.matches(&[(a, b), (c, a)]));
        assert!(!set.matches(&[(a, a)]));
        assert!(!set.matches(&[(b, b)]));
    }
}
