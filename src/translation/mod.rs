//! Named-placeholder analysis.
//!
//! Rewrites `:name` placeholders to positional `?` markers while leaving comments,
//! quoted text and procedural `BEGIN ... END` blocks alone. Every rewritten token
//! keeps the character width of the original so column numbers in server
//! diagnostics still line up with the caller's SQL.

use std::collections::HashMap;

use regex::Regex;

mod parsers;
mod scanner;

use parsers::{DEFAULT_EXCLUSIONS, DEFAULT_PLACEHOLDER, combine_exclusions};
use scanner::mask_regions;

use crate::error::SqlRuntimeError;
use crate::types::Value;

/// Rewriter for named placeholders.
///
/// # Examples
/// ```rust
/// use sql_runtime::prelude::*;
///
/// let analyzed = PlaceholderAnalyzer::default().analyze("SELECT * FROM T WHERE X = :id");
/// assert_eq!(analyzed.sql(), "SELECT * FROM T WHERE X = ?  ");
/// assert_eq!(analyzed.param_names(), ["id"]);
/// ```
#[derive(Debug, Clone)]
pub struct PlaceholderAnalyzer {
    exclusions: Option<Regex>,
    placeholder: Regex,
}

impl Default for PlaceholderAnalyzer {
    fn default() -> Self {
        Self {
            exclusions: combine_exclusions(&DEFAULT_EXCLUSIONS)
                .expect("built-in exclusion patterns combine"),
            placeholder: DEFAULT_PLACEHOLDER.clone(),
        }
    }
}

impl PlaceholderAnalyzer {
    /// Build an analyzer from an ordered exclusion list and a placeholder pattern.
    /// When two exclusions match at the same position the earlier one wins. A
    /// placeholder pattern with a capture group names the parameter by group 1;
    /// otherwise the match minus its first character is used.
    ///
    /// # Errors
    /// Returns `SqlRuntimeError::ConfigError` if the exclusions cannot be combined
    /// into a single expression.
    pub fn new(exclusions: &[Regex], placeholder: Regex) -> Result<Self, SqlRuntimeError> {
        let exclusions = combine_exclusions(exclusions)
            .map_err(|e| SqlRuntimeError::ConfigError(format!("invalid exclusion pattern: {e}")))?;
        Ok(Self {
            exclusions,
            placeholder,
        })
    }

    #[must_use]
    pub fn analyze(&self, sql: &str) -> AnalyzedSql {
        let mut masked = mask_regions(sql, self.exclusions.as_ref());
        let param_names = masked.replace_placeholders(&self.placeholder);
        AnalyzedSql {
            sql: masked.restore(),
            param_names,
        }
    }
}

/// Analyze `sql` with the default exclusion and placeholder patterns.
#[must_use]
pub fn analyze_placeholders(sql: &str) -> AnalyzedSql {
    PlaceholderAnalyzer::default().analyze(sql)
}

/// Parameter values supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValues {
    Positional(Vec<Value>),
    Named(HashMap<String, Value>),
}

impl ParamValues {
    #[must_use]
    pub fn none() -> Self {
        ParamValues::Positional(Vec::new())
    }

    /// Build a named set from `(name, value)` pairs.
    pub fn named<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        ParamValues::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl Default for ParamValues {
    fn default() -> Self {
        Self::none()
    }
}

impl From<Vec<Value>> for ParamValues {
    fn from(values: Vec<Value>) -> Self {
        ParamValues::Positional(values)
    }
}

impl From<HashMap<String, Value>> for ParamValues {
    fn from(values: HashMap<String, Value>) -> Self {
        ParamValues::Named(values)
    }
}

/// SQL rewritten to positional markers plus the placeholder names in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedSql {
    sql: String,
    param_names: Vec<String>,
}

impl AnalyzedSql {
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    #[must_use]
    pub fn has_named_params(&self) -> bool {
        !self.param_names.is_empty()
    }

    /// Turn caller-supplied values into the positional list the statement expects.
    /// Positional values pass through untouched; named values are projected in
    /// placeholder order, so a repeated name fills each of its positions.
    ///
    /// # Errors
    /// Returns `SqlRuntimeError::MissingParameter` when a named placeholder has no
    /// entry in the supplied map.
    pub fn prepare_params(&self, params: ParamValues) -> Result<Vec<Value>, SqlRuntimeError> {
        match params {
            ParamValues::Positional(values) => Ok(values),
            ParamValues::Named(values) => self
                .param_names
                .iter()
                .map(|name| {
                    values
                        .get(name)
                        .cloned()
                        .ok_or_else(|| SqlRuntimeError::MissingParameter {
                            name: name.clone(),
                            sql: self.sql.clone(),
                        })
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_named_placeholder() {
        let analyzed = analyze_placeholders("SELECT * FROM T WHERE X = :id");
        assert_eq!(analyzed.sql(), "SELECT * FROM T WHERE X = ?  ");
        assert_eq!(analyzed.param_names(), ["id"]);
    }

    #[test]
    fn colons_inside_comments_and_strings_are_ignored() {
        let sql = "SELECT ':a', \":b\" -- :c\n FROM T /* :d\n :e */ WHERE Y = 'it''s :f'";
        let analyzed = analyze_placeholders(sql);
        assert!(analyzed.param_names().is_empty());
        assert_eq!(analyzed.sql(), sql);
        assert_eq!(analyzed.sql().chars().count(), sql.chars().count());
    }

    #[test]
    fn default_analyzer_combines_every_builtin_exclusion() {
        let combined = PlaceholderAnalyzer::default()
            .exclusions
            .expect("default exclusions");
        for pattern in DEFAULT_EXCLUSIONS.iter() {
            assert!(combined.as_str().contains(pattern.as_str()));
        }
        let analyzed = PlaceholderAnalyzer::default().analyze("SELECT ':s' -- :c\nFROM T WHERE A = :a");
        assert_eq!(analyzed.param_names(), ["a"]);
    }

    #[test]
    fn string_containing_comment_marker_stays_a_string() {
        let analyzed = analyze_placeholders("SELECT '--' FROM T WHERE A = :a");
        assert_eq!(analyzed.sql(), "SELECT '--' FROM T WHERE A = ? ");
        assert_eq!(analyzed.param_names(), ["a"]);
    }

    #[test]
    fn procedural_blocks_are_left_alone() {
        let sql = "EXECUTE BLOCK AS BEGIN :x = 1; END";
        let analyzed = analyze_placeholders(sql);
        assert_eq!(analyzed.sql(), sql);
        assert!(analyzed.param_names().is_empty());
    }

    #[test]
    fn sentinel_lookalikes_in_sql_survive() {
        let sql = "SELECT '$0', $1 FROM T WHERE A = :a";
        let analyzed = analyze_placeholders(sql);
        assert_eq!(analyzed.sql(), "SELECT '$0', $1 FROM T WHERE A = ? ");
    }

    #[test]
    fn repeated_name_resolves_to_same_value() {
        let analyzed = analyze_placeholders("SELECT * FROM T WHERE A = :v OR B = :v");
        assert_eq!(analyzed.param_names(), ["v", "v"]);
        let values = analyzed
            .prepare_params(ParamValues::named([("v", 42i64)]))
            .unwrap();
        assert_eq!(values, vec![Value::Int(42), Value::Int(42)]);
    }

    #[test]
    fn missing_named_value_is_reported() {
        let analyzed = analyze_placeholders("UPDATE T SET A = :a WHERE B = :b");
        let err = analyzed
            .prepare_params(ParamValues::named([("a", "x")]))
            .unwrap_err();
        match err {
            SqlRuntimeError::MissingParameter { name, sql } => {
                assert_eq!(name, "b");
                assert_eq!(sql, "UPDATE T SET A = ?  WHERE B = ?  ");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn positional_values_pass_through() {
        let analyzed = analyze_placeholders("SELECT * FROM T WHERE A = ?");
        let values = analyzed
            .prepare_params(vec![Value::Bool(true)].into())
            .unwrap();
        assert_eq!(values, vec![Value::Bool(true)]);
    }

    #[test]
    fn custom_patterns() {
        let analyzer = PlaceholderAnalyzer::new(
            &[Regex::new(r"\[[^\]]*\]").unwrap()],
            Regex::new(r"@\w+").unwrap(),
        )
        .unwrap();
        let analyzed = analyzer.analyze("SELECT [@skip] FROM T WHERE A = @name");
        assert_eq!(analyzed.sql(), "SELECT [@skip] FROM T WHERE A = ?    ");
        assert_eq!(analyzed.param_names(), ["name"]);
    }
}
