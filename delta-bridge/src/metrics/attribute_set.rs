use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// A string attribute attached to a series.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyValue {
    /// The attribute name.
    pub key: String,
    /// The attribute value.
    pub value: String,
}

impl KeyValue {
    /// Create a new `KeyValue` pair.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for KeyValue {
    fn from((key, value): (K, V)) -> Self {
        KeyValue::new(key, value)
    }
}

/// A normalized set of attributes identifying a series.
///
/// Attributes are sorted by key and duplicate keys keep the value that was
/// given last, so two sets built from the same pairs in any order compare and
/// hash equal. The hash is computed once on construction.
#[derive(Clone, Default)]
pub struct AttributeSet(Vec<KeyValue>, u64);

impl PartialEq for AttributeSet {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for AttributeSet {}

impl From<&[KeyValue]> for AttributeSet {
    fn from(values: &[KeyValue]) -> Self {
        AttributeSet::from_iter(values.iter().cloned())
    }
}

impl FromIterator<KeyValue> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = KeyValue>>(iter: I) -> Self {
        let mut vec: Vec<KeyValue> = iter.into_iter().collect();
        // Stable sort keeps duplicates in insertion order, so the last one wins below.
        vec.sort_by(|a, b| a.key.cmp(&b.key));

        let mut deduped: Vec<KeyValue> = Vec::with_capacity(vec.len());
        for kv in vec {
            match deduped.last_mut() {
                Some(last) if last.key == kv.key => *last = kv,
                _ => deduped.push(kv),
            }
        }

        let hash = calculate_hash(&deduped);
        AttributeSet(deduped, hash)
    }
}

fn calculate_hash(values: &[KeyValue]) -> u64 {
    let mut hasher = FxHasher::default();
    for item in values {
        item.hash(&mut hasher);
    }
    hasher.finish()
}

impl AttributeSet {
    /// Iterate over key value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|kv| (kv.key.as_str(), kv.value.as_str()))
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .binary_search_by(|kv| kv.key.as_str().cmp(key))
            .ok()
            .map(|idx| self.0[idx].value.as_str())
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The normalized pairs.
    pub fn as_slice(&self) -> &[KeyValue] {
        &self.0
    }
}

impl Hash for AttributeSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.1)
    }
}

impl PartialOrd for AttributeSet {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttributeSet {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Identity of one series: metric name plus attribute set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    name: Cow<'static, str>,
    attributes: AttributeSet,
}

impl SeriesKey {
    /// Create a key for the series `name` with the given attributes.
    pub fn new(name: impl Into<Cow<'static, str>>, attributes: AttributeSet) -> Self {
        SeriesKey {
            name: name.into(),
            attributes,
        }
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The normalized attributes.
    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }
}
