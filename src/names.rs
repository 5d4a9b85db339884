//! Alias lookup for object names.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{DbError, Result};

const ALIAS_PREFIXES: [&str; 4] = ["V* ", "** ", "NAME ", "* "];

/// Expands a name into the aliases an external name service knows it by.
pub trait NameResolver {
    fn aliases(&self, name: &str) -> Result<Vec<String>>;
}

impl<F> NameResolver for F
where
    F: Fn(&str) -> Result<Vec<String>>,
{
    fn aliases(&self, name: &str) -> Result<Vec<String>> {
        self(name)
    }
}

/// Fixed alias table, matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    aliases: HashMap<String, Vec<String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I, S>(mut self, name: &str, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(name, aliases);
        self
    }

    pub fn insert<I, S>(&mut self, name: &str, aliases: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.insert(
            name.to_lowercase(),
            aliases.into_iter().map(Into::into).collect(),
        );
    }

    /// Reads `{"name": ["alias", ...], ...}`.
    pub fn from_json(text: &str) -> Result<Self> {
        let table: HashMap<String, Vec<String>> = serde_json::from_str(text)
            .map_err(|e| DbError::Resolver(format!("invalid alias table: {e}")))?;
        let mut resolver = Self::new();
        for (name, aliases) in table {
            resolver.insert(&name, aliases);
        }
        Ok(resolver)
    }
}

impl NameResolver for StaticResolver {
    fn aliases(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .aliases
            .get(&name.trim().to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

/// Collapses whitespace and strips catalog prefixes such as `V* `.
/// Hidden identifiers yield `None`.
pub fn format_alias(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() || collapsed.starts_with("HIDDEN") {
        return None;
    }
    let stripped = ALIAS_PREFIXES
        .iter()
        .find_map(|prefix| collapsed.strip_prefix(prefix))
        .unwrap_or(&collapsed);
    Some(stripped.to_string())
}

/// Formatted aliases for `name`, or just `name` when the lookup fails or
/// finds nothing.
pub fn resolve_names(name: &str, resolver: &dyn NameResolver) -> Vec<String> {
    let aliases = match resolver.aliases(name) {
        Ok(aliases) => aliases,
        Err(err) => {
            warn!(name = %name, "Alias lookup failed: {err}");
            Vec::new()
        }
    };
    let names: Vec<String> = aliases.iter().filter_map(|a| format_alias(a)).collect();
    if names.is_empty() {
        vec![name.to_string()]
    } else {
        names
    }
}
