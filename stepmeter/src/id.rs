use std::{
    borrow::Cow,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::MeterKind;

/// An owned or borrowed-for-`'static` string.
pub type SharedString = Cow<'static, str>;

/// A key/value pair qualifying a meter.
///
/// Tags differentiate the context a measurement was taken in: for a web service, the request path
/// or response status; for a cache, the cache name.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug)]
pub struct Tag(SharedString, SharedString);

impl Tag {
    /// Creates a [`Tag`] from a key and value.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<SharedString>,
        V: Into<SharedString>,
    {
        Tag(key.into(), value.into())
    }

    /// Key of this tag.
    pub fn key(&self) -> &str {
        self.0.as_ref()
    }

    /// Value of this tag.
    pub fn value(&self) -> &str {
        self.1.as_ref()
    }
}

impl<K, V> From<(K, V)> for Tag
where
    K: Into<SharedString>,
    V: Into<SharedString>,
{
    fn from(pair: (K, V)) -> Tag {
        Tag::new(pair.0, pair.1)
    }
}

impl<K, V> From<&(K, V)> for Tag
where
    K: Into<SharedString> + Clone,
    V: Into<SharedString> + Clone,
{
    fn from(pair: &(K, V)) -> Tag {
        Tag::new(pair.0.clone(), pair.1.clone())
    }
}

/// A set of tags, sorted by key, with at most one tag per key.
///
/// Order of construction never matters: the same pairs given in any order produce equal sets.
/// When a key repeats, the last value given wins.
#[derive(PartialEq, Eq, Hash, Clone, Debug, Default)]
pub struct Tags(Vec<Tag>);

impl Tags {
    /// An empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a set from anything yielding tags or key/value pairs.
    pub fn of<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        tags.into_iter().map(Into::into).collect()
    }

    /// Merges `other` into this set; on a key conflict `other` wins.
    #[must_use]
    pub fn and<I, T>(self, other: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.0.into_iter().chain(other.into_iter().map(Into::into)).collect()
    }

    /// Value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .binary_search_by(|tag| tag.key().cmp(key))
            .ok()
            .map(|idx| self.0[idx].value())
    }

    /// Iterates the tags in key order.
    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.0.iter()
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Into<Tag>> FromIterator<T> for Tags {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut tags: Vec<Tag> = iter.into_iter().map(Into::into).collect();
        // Stable, so among equal keys the last one given stays last.
        tags.sort_by(|a, b| a.key().cmp(b.key()));

        let mut deduped: Vec<Tag> = Vec::with_capacity(tags.len());
        for tag in tags {
            match deduped.last_mut() {
                Some(last) if last.key() == tag.key() => *last = tag,
                _ => deduped.push(tag),
            }
        }
        Tags(deduped)
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Tags {
    type Item = Tag;
    type IntoIter = std::vec::IntoIter<Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// The identity of a meter.
///
/// Equality and hashing consider only the name and tags. Unit, description and kind travel with
/// the identity, and unit and description decide how meters group at export, but two identities
/// that differ only in those address the same meter.
#[derive(Clone, Debug)]
pub struct Id {
    name: SharedString,
    tags: Tags,
    unit: Option<SharedString>,
    description: Option<SharedString>,
    kind: MeterKind,
    synthetic_association: Option<Arc<Id>>,
}

impl Id {
    /// Creates an identity. The kind starts out as [`MeterKind::Custom`] until a typed
    /// registration sets it.
    pub fn new<N, I, T>(name: N, tags: I) -> Self
    where
        N: Into<SharedString>,
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        Self {
            name: name.into(),
            tags: Tags::of(tags),
            unit: None,
            description: None,
            kind: MeterKind::Custom,
            synthetic_association: None,
        }
    }

    /// Creates an identity with no tags.
    pub fn named<N: Into<SharedString>>(name: N) -> Self {
        Self::new(name, Tags::empty())
    }

    /// Sets the base unit.
    #[must_use]
    pub fn with_unit<U: Into<SharedString>>(mut self, unit: U) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description<D: Into<SharedString>>(mut self, description: D) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the kind.
    #[must_use]
    pub fn with_kind(mut self, kind: MeterKind) -> Self {
        self.kind = kind;
        self
    }

    /// Marks this meter as derived from `parent`, so that removing `parent` removes it too.
    #[must_use]
    pub fn with_synthetic_association(mut self, parent: &Id) -> Self {
        self.synthetic_association = Some(Arc::new(parent.clone()));
        self
    }

    /// Replaces the name.
    #[must_use]
    pub fn with_name<N: Into<SharedString>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Adds or overrides tags.
    #[must_use]
    pub fn and_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.tags = self.tags.and(tags);
        self
    }

    /// Name of the meter.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Tags of the meter.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Value of the tag `key`, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key)
    }

    /// Base unit.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Kind.
    pub fn kind(&self) -> MeterKind {
        self.kind
    }

    /// The meter this one was derived from, if any.
    pub fn synthetic_association(&self) -> Option<&Id> {
        self.synthetic_association.as_deref()
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.tags == other.tags
    }
}

impl Eq for Id {}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.tags.hash(state);
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.tags.is_empty() {
            f.write_str("{")?;
            for (i, tag) in self.tags.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}={}", tag.key(), tag.value())?;
            }
            f.write_str("}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Id, Tag, Tags};
    use crate::MeterKind;
    use proptest::prelude::*;
    use std::{
        collections::hash_map::DefaultHasher,
        hash::{Hash, Hasher},
    };

    fn hash_of(id: &Id) -> u64 {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn last_value_wins_for_repeated_keys() {
        let tags = Tags::of([("b", "1"), ("a", "1"), ("b", "2")]);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("b"), Some("2"));
        assert_eq!(tags.iter().map(Tag::key).collect::<Vec<_>>(), vec!["a", "b"]);

        let merged = tags.and([("a", "override")]);
        assert_eq!(merged.get("a"), Some("override"));
    }

    #[test]
    fn unit_description_and_kind_do_not_affect_identity() {
        let a = Id::new("requests", [("uri", "/")]).with_unit("requests").with_kind(MeterKind::Counter);
        let b = Id::new("requests", [("uri", "/")]).with_description("served").with_kind(MeterKind::Timer);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = Id::new("requests", [("uri", "/home")]);
        assert_ne!(a, c);
    }

    #[test]
    fn display_includes_tags() {
        let id = Id::new("jvm.memory", [("region", "heap"), ("area", "eden")]);
        assert_eq!(id.to_string(), "jvm.memory{area=eden,region=heap}");
        assert_eq!(Id::named("up").to_string(), "up");
    }

    proptest! {
        #[test]
        fn identity_is_stable_under_tag_permutation(
            pairs in proptest::collection::btree_map("[a-z]{1,4}", "[a-z0-9]{0,4}", 0..8),
            seed in any::<u64>(),
        ) {
            let ordered: Vec<(String, String)> = pairs.into_iter().collect();
            let mut shuffled = ordered.clone();
            // Deterministic permutation derived from the seed.
            let len = shuffled.len();
            if len > 1 {
                let mut state = seed;
                for i in (1..len).rev() {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    let j = (state >> 33) as usize % (i + 1);
                    shuffled.swap(i, j);
                }
            }

            let a = Id::new("meter", ordered);
            let b = Id::new("meter", shuffled);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(hash_of(&a), hash_of(&b));
        }
    }
}
