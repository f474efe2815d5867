use std::collections::BTreeMap;
use std::fmt;

/// Marker wrapping reserved session variables, e.g. `__request_id__`.
const SYSTEM_MARKER: &str = "__";

/// Identity variables that are already covered by the fingerprint's user component.
const SESSION_KEYS: &[&str] = &["role", "roles", "user", "username", "user_id", "group", "groups"];

/// Whether a variable is session plumbing that must not fragment the cache.
pub fn is_system_variable(name: &str) -> bool {
    let wrapped = name.len() > 2 * SYSTEM_MARKER.len()
        && name.starts_with(SYSTEM_MARKER)
        && name.ends_with(SYSTEM_MARKER);
    wrapped || SESSION_KEYS.iter().any(|key| key.eq_ignore_ascii_case(name))
}

const SEP: char = '\u{1f}';

/// Deterministic cache key for a browse request.
///
/// Composed of source, column, user and the sorted non-system variable bindings. Equality and
/// hashing use the composed key only.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    source: String,
    column: String,
    key: String,
}

impl Fingerprint {
    pub fn builder(
        source: impl Into<String>,
        column: impl Into<String>,
        user: impl Into<String>,
    ) -> FingerprintBuilder {
        FingerprintBuilder {
            source: source.into(),
            column: column.into(),
            user: user.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Fingerprint {}

impl std::hash::Hash for Fingerprint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The separator is unprintable; show something readable instead.
        f.write_str(&self.key.replace(SEP, " | "))
    }
}

#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    source: String,
    column: String,
    user: String,
    variables: BTreeMap<String, String>,
}

impl FingerprintBuilder {
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if !is_system_variable(&name) {
            self.variables.insert(name, value.into());
        }
        self
    }

    pub fn variables<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in vars {
            self = self.variable(name, value);
        }
        self
    }

    pub fn build(self) -> Fingerprint {
        let mut key = String::with_capacity(
            self.source.len() + self.column.len() + self.user.len() + 3,
        );
        key.push_str(&self.source);
        key.push(SEP);
        key.push_str(&self.column);
        key.push(SEP);
        key.push_str(&self.user);
        key.push(SEP);
        for (idx, (name, value)) in self.variables.iter().enumerate() {
            if idx > 0 {
                key.push(';');
            }
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }

        Fingerprint {
            source: self.source,
            column: self.column,
            key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_variables_are_recognised() {
        assert!(is_system_variable("__request_id__"));
        assert!(is_system_variable("ROLES"));
        assert!(is_system_variable("Group"));
        assert!(!is_system_variable("region"));
        assert!(!is_system_variable("__"));
        assert!(!is_system_variable("____"));
        assert!(!is_system_variable("__prefix_only"));
    }

    #[test]
    fn variable_order_does_not_matter() {
        let a = Fingerprint::builder("sales", "region", "ann")
            .variable("year", "2024")
            .variable("country", "FR")
            .build();
        let b = Fingerprint::builder("sales", "region", "ann")
            .variable("country", "FR")
            .variable("year", "2024")
            .build();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), b.as_str());
    }
}
