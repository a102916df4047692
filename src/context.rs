//! Contexts
//!
//! A `Context` is the variable environment that parameterizes a single unit
//! of work. It always carries a `frame` entry, and may carry arbitrary named
//! variables on top of that. Contexts are compared entry-for-entry, and hash
//! to a content digest that ignores the frame and any variables in excluded
//! namespaces, so that requests differing only by frame (or by UI state)
//! merge into the same batch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Context variable reserved for the frame number.
pub const FRAME_VARIABLE: &str = "frame";

/// Context variable naming the job directory of the current dispatch.
pub const JOB_DIRECTORY_VARIABLE: &str = "dispatcher:jobDirectory";

/// Context variable naming the serialized script snapshot of the current dispatch.
pub const SCRIPT_FILE_VARIABLE: &str = "dispatcher:scriptFileName";

/// A context variable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ContextValue {
    /// Parse a textual representation, as received on the CLI boundary.
    /// Falls back to a string when no scalar form matches.
    pub fn parse(text: &str) -> Self {
        if let Ok(value) = text.parse::<bool>() {
            return Self::Bool(value);
        }
        if let Ok(value) = text.parse::<i64>() {
            return Self::Int(value);
        }
        if let Ok(value) = text.parse::<f64>() {
            return Self::Float(value);
        }
        Self::Str(text.to_string())
    }

    fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            Self::Bool(value) => {
                hasher.update(b"b");
                hasher.update(&[*value as u8]);
            }
            Self::Int(value) => {
                hasher.update(b"i");
                hasher.update(&value.to_le_bytes());
            }
            Self::Float(value) => {
                hasher.update(b"f");
                hasher.update(&value.to_le_bytes());
            }
            Self::Str(value) => {
                hasher.update(b"s");
                hasher.update(value.as_bytes());
            }
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::Str(value) => write!(f, "{}", value),
        }
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Content digest of context variables, used as a batch-merging key.
pub type ContextHash = [u8; 32];

/// Variable-name prefixes excluded from batch-merging comparisons. The
/// defaults exclude UI state and dispatcher bookkeeping variables.
#[derive(Debug, Clone)]
pub struct ExcludedPrefixes {
    prefixes: Vec<String>,
}

impl Default for ExcludedPrefixes {
    fn default() -> Self {
        Self {
            prefixes: vec!["ui:".to_string(), "dispatcher:".to_string()],
        }
    }
}

impl ExcludedPrefixes {
    pub fn new(prefixes: impl IntoIterator<Item = String>) -> Self {
        Self {
            prefixes: prefixes.into_iter().collect(),
        }
    }

    /// True when the named variable should be ignored for merging purposes.
    pub fn excludes(&self, name: &str) -> bool {
        self.prefixes.iter().any(|prefix| name.starts_with(prefix))
    }
}

/// An ordered mapping from variable name to value, always containing a
/// `frame` entry. Never mutated once handed to a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    variables: BTreeMap<String, ContextValue>,
}

impl Context {
    /// Create a context holding only the given frame.
    pub fn new(frame: i64) -> Self {
        let mut variables = BTreeMap::new();
        variables.insert(FRAME_VARIABLE.to_string(), ContextValue::Int(frame));
        Self { variables }
    }

    pub fn get(&self, name: &str) -> Option<&ContextValue> {
        self.variables.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ContextValue>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<ContextValue> {
        self.variables.remove(name)
    }

    /// The frame number, or 1 when the frame entry has been removed or
    /// holds a non-integer value.
    pub fn frame(&self) -> i64 {
        match self.variables.get(FRAME_VARIABLE) {
            Some(ContextValue::Int(frame)) => *frame,
            Some(ContextValue::Float(frame)) => *frame as i64,
            _ => 1,
        }
    }

    pub fn set_frame(&mut self, frame: i64) {
        self.set(FRAME_VARIABLE, frame);
    }

    /// Derive a copy with a different frame.
    pub fn with_frame(&self, frame: i64) -> Self {
        let mut context = self.clone();
        context.set_frame(frame);
        context
    }

    /// Iterate variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Content hash over every variable, in name order.
    pub fn hash(&self) -> ContextHash {
        self.hash_filtered(|_| true)
    }

    /// Content hash ignoring the frame and any excluded-namespace variables.
    /// Two contexts with equal hashes here merge into the same batch.
    pub fn hash_excluding_frame(&self, excluded: &ExcludedPrefixes) -> ContextHash {
        self.hash_filtered(|name| name != FRAME_VARIABLE && !excluded.excludes(name))
    }

    fn hash_filtered(&self, mut keep: impl FnMut(&str) -> bool) -> ContextHash {
        let mut hasher = blake3::Hasher::new();
        for (name, value) in &self.variables {
            if !keep(name) {
                continue;
            }
            hasher.update(&(name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            value.hash_into(&mut hasher);
        }
        *hasher.finalize().as_bytes()
    }

    /// Substitute `${name}` references with variable values. Unknown
    /// variables substitute as the empty string.
    pub fn substitute(&self, template: &str) -> String {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            match rest[start + 2..].find('}') {
                Some(end) => {
                    let name = &rest[start + 2..start + 2 + end];
                    if let Some(value) = self.variables.get(name) {
                        result.push_str(&value.to_string());
                    }
                    rest = &rest[start + 2 + end + 1..];
                }
                None => {
                    // Unterminated reference; emit it literally.
                    result.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        result.push_str(rest);
        result
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_contains_frame() {
        let context = Context::new(12);
        assert_eq!(context.frame(), 12);
        assert_eq!(context.get(FRAME_VARIABLE), Some(&ContextValue::Int(12)));
    }

    #[test]
    fn test_equality_is_entrywise() {
        let mut a = Context::new(1);
        let mut b = Context::new(1);
        assert_eq!(a, b);

        a.set("wedge", 3i64);
        assert_ne!(a, b);
        b.set("wedge", 3i64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_excluding_frame_ignores_frame() {
        let excluded = ExcludedPrefixes::default();
        let a = Context::new(1);
        let b = Context::new(100);
        assert_eq!(
            a.hash_excluding_frame(&excluded),
            b.hash_excluding_frame(&excluded)
        );
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_excluding_frame_ignores_excluded_namespaces() {
        let excluded = ExcludedPrefixes::default();
        let a = Context::new(1);
        let mut b = Context::new(1);
        b.set("ui:selected", true);
        b.set("dispatcher:jobDirectory", "/tmp/jobs/000001");
        assert_eq!(
            a.hash_excluding_frame(&excluded),
            b.hash_excluding_frame(&excluded)
        );
    }

    #[test]
    fn test_hash_sensitive_to_other_variables() {
        let excluded = ExcludedPrefixes::default();
        let a = Context::new(1);
        let mut b = Context::new(1);
        b.set("wedge", 2i64);
        assert_ne!(
            a.hash_excluding_frame(&excluded),
            b.hash_excluding_frame(&excluded)
        );
    }

    #[test]
    fn test_custom_excluded_prefixes() {
        let excluded = ExcludedPrefixes::new(["scratch:".to_string()]);
        let a = Context::new(1);
        let mut b = Context::new(1);
        b.set("scratch:note", "hello");
        assert_eq!(
            a.hash_excluding_frame(&excluded),
            b.hash_excluding_frame(&excluded)
        );

        let mut c = Context::new(1);
        c.set("ui:selected", true);
        // "ui:" is not excluded by the custom policy.
        assert_ne!(
            a.hash_excluding_frame(&excluded),
            c.hash_excluding_frame(&excluded)
        );
    }

    #[test]
    fn test_substitute() {
        let mut context = Context::new(7);
        context.set("shot", "sq010");
        assert_eq!(
            context.substitute("render/${shot}/${frame}"),
            "render/sq010/7"
        );
        assert_eq!(context.substitute("no variables"), "no variables");
        assert_eq!(context.substitute("${missing}!"), "!");
        assert_eq!(context.substitute("${unterminated"), "${unterminated");
    }

    #[test]
    fn test_value_parse() {
        assert_eq!(ContextValue::parse("true"), ContextValue::Bool(true));
        assert_eq!(ContextValue::parse("42"), ContextValue::Int(42));
        assert_eq!(ContextValue::parse("1.5"), ContextValue::Float(1.5));
        assert_eq!(
            ContextValue::parse("sq010"),
            ContextValue::Str("sq010".to_string())
        );
    }
}
