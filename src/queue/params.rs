use std::fmt::Display;

/// Form-encodes a value the way the collector expects (space as `+`).
pub fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Builds an `&`-joined parameter string in insertion order.
#[derive(Debug, Default, Clone)]
pub struct QueryBuilder {
    query: String,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pair whose value is already encoded.
    pub fn raw(mut self, key: &str, value: impl Display) -> Self {
        if !self.query.is_empty() {
            self.query.push('&');
        }
        self.query.push_str(key);
        self.query.push('=');
        self.query.push_str(&value.to_string());
        self
    }

    /// Appends a pair, form-encoding the value.
    pub fn param(self, key: &str, value: &str) -> Self {
        let encoded = form_encode(value);
        self.raw(key, encoded)
    }

    /// Appends a pre-rendered fragment that starts with `&`.
    pub fn fragment(mut self, fragment: &str) -> Self {
        self.query.push_str(fragment);
        self
    }

    pub fn build(self) -> String {
        self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs_in_order() {
        let query = QueryBuilder::new()
            .param("app_key", "k")
            .raw("timestamp", 1_700_000_000)
            .raw("begin_session", 1)
            .build();
        assert_eq!(query, "app_key=k&timestamp=1700000000&begin_session=1");
    }

    #[test]
    fn test_values_are_form_encoded() {
        let query = QueryBuilder::new()
            .param("referrer", "utm_source=ads&x=a b")
            .build();
        assert_eq!(query, "referrer=utm_source%3Dads%26x%3Da+b");
    }

    #[test]
    fn test_fragment_appended_verbatim() {
        let query = QueryBuilder::new()
            .param("app_key", "k")
            .fragment("&user_details=%7B%7D")
            .build();
        assert_eq!(query, "app_key=k&user_details=%7B%7D");
    }
}
