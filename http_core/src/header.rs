//! Header set: an ordered sequence of (name, value) pairs with case-insensitive
//! lookup and a bounded capacity chosen at construction.

pub const DEFAULT_CAPACITY: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSet {
    capacity: usize,
    fields: Vec<(String, String)>,
}

impl Default for HeaderSet {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl HeaderSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            fields: Vec::with_capacity(capacity.min(32)),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Upsert by case-insensitive name match. Returns `false` (no-op) if the
    /// set is at capacity and `name` was not already present.
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) -> bool {
        if let Some(entry) = self.fields.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            entry.1 = value.into();
            return true;
        }
        self.add_field(name, value)
    }

    /// Append unconditionally. Returns `false` if the set is already at capacity.
    pub fn add_field(&mut self, name: &str, value: impl Into<String>) -> bool {
        if self.fields.len() >= self.capacity {
            return false;
        }
        self.fields.push((name.to_string(), value.into()));
        true
    }

    /// Remove all entries matching `name` case-insensitively.
    pub fn erase(&mut self, name: &str) {
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Integer value of `Content-Length`, or 0 when absent or unparseable.
    pub fn content_length(&self) -> usize {
        self.get("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn set_content_length(&mut self, len: usize) {
        self.set_field("Content-Length", len.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_field_upserts_case_insensitively() {
        let mut headers = HeaderSet::default();
        headers.add_field("Content-Type", "text/plain");
        headers.set_field("content-type", "application/json");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn respects_bounded_capacity() {
        let mut headers = HeaderSet::new(1);
        assert!(headers.add_field("A", "1"));
        assert!(!headers.add_field("B", "2"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn content_length_defaults_to_zero() {
        let headers = HeaderSet::default();
        assert_eq!(headers.content_length(), 0);
    }

    #[test]
    fn erase_removes_all_matches() {
        let mut headers = HeaderSet::default();
        headers.add_field("X-Foo", "1");
        headers.add_field("x-foo", "2");
        headers.erase("X-FOO");
        assert!(headers.is_empty());
    }
}
