use std::fmt::Display;
use url::form_urlencoded;

/// Ordered query string parameters.
///
/// Parameters without a value are skipped when encoding, so optional filters
/// can be passed straight through. Encoding follows
/// `application/x-www-form-urlencoded` (spaces become `+`).
///
/// ```
/// use moim_http::QueryParams;
///
/// let query = QueryParams::new()
///     .param("type", Some("WORKATION"))
///     .param("location", None::<&str>)
///     .param("limit", Some(10));
/// assert_eq!(query.to_query_string(), "?type=WORKATION&limit=10");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, Option<String>)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>, value: Option<impl Display>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: Option<impl Display>) {
        self.pairs.push((name.into(), value.map(|value| value.to_string())));
    }

    /// Whether any parameter carries a value.
    pub fn is_empty(&self) -> bool {
        self.pairs.iter().all(|(_, value)| value.is_none())
    }

    /// Encoded query including the leading `?`, or an empty string.
    pub fn to_query_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut serializer = form_urlencoded::Serializer::new(String::from("?"));
        for (name, value) in &self.pairs {
            if let Some(value) = value {
                serializer.append_pair(name, value);
            }
        }
        serializer.finish()
    }
}

impl<K, V> FromIterator<(K, Option<V>)> for QueryParams
where
    K: Into<String>,
    V: Display,
{
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.push(name, value);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(QueryParams::new().to_query_string(), "");
        let only_absent: QueryParams = [("a", None::<u32>), ("b", None)].into_iter().collect();
        assert_eq!(only_absent.to_query_string(), "");
    }

    #[test]
    fn test_encoding() {
        let query = QueryParams::new()
            .param("q", Some("a b&c=d"))
            .param("name", Some("달램핏"))
            .param("star", Some("*-._~"));
        assert_eq!(query.to_query_string(), "?q=a+b%26c%3Dd&name=%EB%8B%AC%EB%9E%A8%ED%95%8F&star=*-._%7E");
    }

    #[test]
    fn test_order_and_repeats_preserved() {
        let query = QueryParams::new().param("id", Some(2)).param("id", Some(1)).param("sort", Some("asc"));
        assert_eq!(query.to_query_string(), "?id=2&id=1&sort=asc");
    }
}
