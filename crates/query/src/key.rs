use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Structural cache key.
///
/// A key is an ordered list of JSON segments. Segments are canonicalized on
/// construction: object fields are sorted and fields whose value is `null`
/// are dropped, so `{"a": 1, "b": null}` and `{"a": 1}` name the same entry.
/// Equality and hashing use the canonical form.
///
/// ```
/// use moim_query::QueryKey;
/// use serde_json::json;
///
/// let a = QueryKey::root("gatherings").with("list").with(json!({"type": "DALLAEMFIT", "sort": null}));
/// let b = QueryKey::root("gatherings").with("list").with(json!({"type": "DALLAEMFIT"}));
/// assert_eq!(a, b);
/// assert!(a.starts_with(&QueryKey::root("gatherings")));
/// ```
#[derive(Clone)]
pub struct QueryKey {
    segments: Vec<Value>,
    canonical: Vec<String>,
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(String, Value)> =
                map.into_iter().filter(|(_, value)| !value.is_null()).map(|(k, v)| (k, canonicalize(v))).collect();
            fields.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(fields.into_iter().collect::<Map<String, Value>>())
        },
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

impl QueryKey {
    pub fn new(segments: impl IntoIterator<Item = Value>) -> Self {
        let segments: Vec<Value> = segments.into_iter().map(canonicalize).collect();
        let canonical = segments.iter().map(Value::to_string).collect();
        Self { segments, canonical }
    }

    /// Single-segment key.
    pub fn root(segment: impl Into<Value>) -> Self {
        Self::new([segment.into()])
    }

    /// This key with one more segment appended.
    pub fn with(mut self, segment: impl Into<Value>) -> Self {
        let segment = canonicalize(segment.into());
        self.canonical.push(segment.to_string());
        self.segments.push(segment);
        self
    }

    pub fn segments(&self) -> &[Value] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment-wise prefix match. Every key starts with the empty key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.canonical.starts_with(&prefix.canonical)
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}
impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.canonical.join(","))
    }
}
impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey{self}")
    }
}

impl<S: Into<Value>> FromIterator<S> for QueryKey {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into))
    }
}
