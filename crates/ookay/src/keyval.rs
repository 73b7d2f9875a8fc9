//! Ordered key-value lists
//!
//! A [`KeyValList`] is the interchange format between the bit-field
//! formatter and its callers: an append-only, ordered sequence of
//! owned string pairs. Decoding produces one; encoding consumes one.

/// A single named value, both sides owned strings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl KeyVal {
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Append-only ordered list of key-value pairs
///
/// Entries keep their insertion order, and duplicate keys are
/// permitted; a device decoding several messages in one call appends
/// each message's fields in turn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyValList(Vec<KeyVal>);

impl KeyValList {
    /// New empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair to the end of the list
    pub fn append(&mut self, kv: KeyVal) {
        self.0.push(kv);
    }

    /// Remove all entries, keeping the allocation
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entry at `index`, if present
    pub fn get(&self, index: usize) -> Option<&KeyVal> {
        self.0.get(index)
    }

    /// Value for the first entry matching `key` (ASCII case-insensitive)
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|kv| kv.key.eq_ignore_ascii_case(key))
            .map(|kv| kv.value.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeyVal> {
        self.0.iter()
    }
}

impl FromIterator<KeyVal> for KeyValList {
    fn from_iter<I: IntoIterator<Item = KeyVal>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a KeyValList {
    type Item = &'a KeyVal;
    type IntoIter = std::slice::Iter<'a, KeyVal>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for KeyValList {
    type Item = KeyVal;
    type IntoIter = std::vec::IntoIter<KeyVal>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_lookup() {
        let mut list = KeyValList::new();
        assert!(list.is_empty());

        list.append(KeyVal::new("Button", "0x02"));
        list.append(KeyVal::new("Serial", "12345"));

        assert_eq!(2, list.len());
        assert_eq!(Some("0x02"), list.value_of("button"));
        assert_eq!("Serial", list.get(1).unwrap().key);
        assert_eq!(None, list.value_of("missing"));

        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn test_duplicate_keys_keep_order() {
        let list: KeyValList = [KeyVal::new("k", "1"), KeyVal::new("k", "2")]
            .into_iter()
            .collect();

        let values: Vec<&str> = list.iter().map(|kv| kv.value.as_str()).collect();
        assert_eq!(vec!["1", "2"], values);
        assert_eq!(Some("1"), list.value_of("k"));
    }
}
