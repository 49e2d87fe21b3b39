/// Builds wire keys from a class prefix and a per-instance key.
///
/// `prefix:instance` for the instance key itself and
/// `prefix:instance:field` for a sub-key. A blank sub-key addresses the
/// instance key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespacer {
    prefix: String,
}

impl KeyNamespacer {
    /// Creates a namespacer for `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The class namespace prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Derives the wire key for `instance_key` and an optional sub-key.
    pub fn namespace(&self, instance_key: &str, field: Option<&str>) -> String {
        match field {
            Some(field) if !field.trim().is_empty() => {
                format!("{}:{}:{}", self.prefix, instance_key, field)
            }
            _ => format!("{}:{}", self.prefix, instance_key),
        }
    }
}
