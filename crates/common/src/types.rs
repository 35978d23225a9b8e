//! Core types for nbregress

use serde::{Deserialize, Serialize};
use std::fmt;

/// Keyword naming the notebook under test.
pub const PARAM_TESTED_NOTEBOOK: &str = "_tested_notebook";

/// Keyword naming the call site within the notebook.
pub const PARAM_TEST_TARGET: &str = "_test_target";

/// Keyword switching screenshot capture on or off.
pub const PARAM_TAKE_SCREENSHOT: &str = "_take_screenshot";

/// Default designated call.
pub const DEFAULT_CALLEE: &str = "Interactive";

/// A literal value as it must appear in source text after injection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Literal {
    /// Rendered as a double quoted string.
    Str(String),
    /// Rendered as `True` / `False`.
    Bool(bool),
    Int(i64),
    /// Rendered verbatim.
    Raw(String),
}

impl Literal {
    pub fn str(value: impl Into<String>) -> Self {
        Literal::Str(value.into())
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Literal::Raw(text.into())
    }

    /// Source text for this literal.
    pub fn render(&self) -> String {
        match self {
            Literal::Str(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('"');
                for c in s.chars() {
                    match c {
                        '\\' => out.push_str("\\\\"),
                        '"' => out.push_str("\\\""),
                        '\n' => out.push_str("\\n"),
                        _ => out.push(c),
                    }
                }
                out.push('"');
                out
            }
            Literal::Bool(true) => "True".to_string(),
            Literal::Bool(false) => "False".to_string(),
            Literal::Int(i) => i.to_string(),
            Literal::Raw(text) => text.clone(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Int(i)
    }
}

/// Ordered name -> literal mapping of keyword arguments a call must carry.
///
/// Iteration order is insertion order; it is also the order in which missing
/// parameters get appended to a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredParams {
    entries: Vec<(String, Literal)>,
}

impl RequiredParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`RequiredParams::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.set(name, value);
        self
    }

    /// Insert a parameter, replacing the value (but not the position) of an
    /// existing one with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Literal>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Literal> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Literal)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The three instrumentation parameters for one call site.
    pub fn instrumentation(notebook_name: &str, target: &str, take_screenshot: bool) -> Self {
        Self::new()
            .with(PARAM_TESTED_NOTEBOOK, Literal::str(notebook_name))
            .with(PARAM_TEST_TARGET, Literal::str(target))
            .with(PARAM_TAKE_SCREENSHOT, take_screenshot)
    }
}

impl<N: Into<String>, V: Into<Literal>> FromIterator<(N, V)> for RequiredParams {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.set(name, value);
        }
        params
    }
}
