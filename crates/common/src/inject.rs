//! Call-site parameter injection
//!
//! Rewrites every occurrence of a designated call (`Interactive(...)` by
//! default) so that a set of keyword arguments is present with given values.
//! Text outside the rewritten calls is never touched.
//!
//! The scanner is a small lexer, not a parser: it knows about string literals
//! (single, double, triple quoted, backslash escapes), `#` comments and
//! bracket nesting, which is enough to find the matching `)` of a call and to
//! split its arguments on top-level commas. Calls carrying comments are edited
//! in place so that no argument ends up behind a `#`.

use std::ops::{ControlFlow, Range};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{RequiredParams, DEFAULT_CALLEE};

/// Rewrites calls to one callee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInjector {
    callee: String,
}

impl Default for CallInjector {
    fn default() -> Self {
        Self {
            callee: DEFAULT_CALLEE.to_string(),
        }
    }
}

/// Location of one designated call inside a source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// Byte offset of the callee name
    pub start: usize,
    /// Byte offset of the opening parenthesis
    pub open: usize,
    /// Byte offset of the matching closing parenthesis
    pub close: usize,
    /// Whether a `#` comment appears between the parentheses
    pub has_comment: bool,
}

impl CallSite {
    /// Text between the parentheses
    pub fn arguments<'a>(&self, source: &'a str) -> &'a str {
        &source[self.open + 1..self.close]
    }
}

impl CallInjector {
    /// Target calls to `callee`, a plain or dotted identifier.
    pub fn new(callee: &str) -> Result<Self> {
        let valid = !callee.is_empty() && callee.split('.').all(is_identifier);
        if !valid {
            return Err(Error::InvalidCallee(callee.to_string()));
        }
        Ok(Self {
            callee: callee.to_string(),
        })
    }

    pub fn callee(&self) -> &str {
        &self.callee
    }

    /// Every well-formed call in `source`, in order.
    ///
    /// Scanning stops at the first call whose parentheses never balance;
    /// occurrences inside strings and comments are ignored.
    pub fn find_calls(&self, source: &str) -> Vec<CallSite> {
        let mut sites: Vec<CallSite> = Vec::new();
        let needle = format!("{}(", self.callee);
        let first = needle.as_bytes()[0];
        let mut resume_at = 0;
        let mut truncated = false;

        scan_code(source, |i, b| {
            if i < resume_at || b != first || !source[i..].starts_with(&needle) {
                return ControlFlow::Continue(());
            }
            if !preceded_by_boundary(source, i) {
                return ControlFlow::Continue(());
            }

            let open = i + needle.len() - 1;
            match find_close(source, open) {
                Some((close, has_comment)) => {
                    sites.push(CallSite {
                        start: i,
                        open,
                        close,
                        has_comment,
                    });
                    resume_at = close + 1;
                    ControlFlow::Continue(())
                }
                None => {
                    truncated = true;
                    ControlFlow::Break(())
                }
            }
        });

        if truncated {
            debug!("Unbalanced {}( call, leaving the remainder untouched", self.callee);
        }
        sites
    }

    /// Number of calls that [`CallInjector::inject_each`] would rewrite,
    /// including calls nested in another call's arguments.
    pub fn count_calls(&self, source: &str) -> usize {
        self.find_calls(source)
            .iter()
            .map(|site| 1 + self.count_calls(site.arguments(source)))
            .sum()
    }

    /// Apply the same parameters to every call.
    pub fn inject(&self, source: &str, required: &RequiredParams) -> String {
        self.inject_each(source, |_| required.clone())
    }

    /// Apply parameters produced per call; `required_for` receives the
    /// zero-based index of the call in document order (an outer call comes
    /// before the calls nested in its arguments).
    ///
    /// Calls with a comment inside their parentheses are edited in place
    /// instead of being rebuilt on one line.
    pub fn inject_each<F>(&self, source: &str, mut required_for: F) -> String
    where
        F: FnMut(usize) -> RequiredParams,
    {
        let mut occurrence = 0;
        let mut next = || {
            let required = required_for(occurrence);
            occurrence += 1;
            required
        };
        self.rewrite(source, &mut next)
    }

    fn rewrite(&self, source: &str, next: &mut dyn FnMut() -> RequiredParams) -> String {
        let sites = self.find_calls(source);
        if sites.is_empty() {
            return source.to_string();
        }

        let mut out = String::with_capacity(source.len() + 128);
        let mut cursor = 0;

        for site in sites {
            let required = next();
            let arguments = self.rewrite(site.arguments(source), next);

            out.push_str(&source[cursor..site.start]);
            out.push_str(&self.callee);
            out.push('(');
            if site.has_comment {
                debug!(
                    "Editing {}( call at byte {} in place: comments inside the argument list",
                    self.callee, site.start
                );
                out.push_str(&edit_arguments(&arguments, &required));
            } else {
                out.push_str(&merge_arguments(&split_arguments(&arguments), &required).join(", "));
            }
            out.push(')');
            cursor = site.close + 1;
        }

        out.push_str(&source[cursor..]);
        out
    }
}

/// Rewrite `Interactive(...)` calls in `source` with `required`.
pub fn inject(source: &str, required: &RequiredParams) -> String {
    CallInjector::default().inject(source, required)
}

/// Split an argument list on commas that are not nested in brackets or
/// strings. Fragments are trimmed; empty ones (trailing comma) are dropped.
pub fn split_arguments(text: &str) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    scan_code(text, |i, b| {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                fragments.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        ControlFlow::Continue(())
    });
    fragments.push(&text[start..]);

    fragments
        .into_iter()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect()
}

/// The keyword of a `name=value` argument, `None` for positional arguments,
/// comparisons and `**kwargs`.
pub fn keyword_name(fragment: &str) -> Option<&str> {
    let bytes = fragment.as_bytes();
    let mut depth = 0usize;
    let mut eq = None;

    scan_code(fragment, |i, b| match b {
        b'(' | b'[' | b'{' => {
            depth += 1;
            ControlFlow::Continue(())
        }
        b')' | b']' | b'}' => {
            depth = depth.saturating_sub(1);
            ControlFlow::Continue(())
        }
        b'=' if depth == 0 => {
            eq = Some(i);
            ControlFlow::Break(())
        }
        _ => ControlFlow::Continue(()),
    });

    let eq = eq?;
    if bytes.get(eq + 1) == Some(&b'=') {
        return None;
    }
    let name = fragment[..eq].trim();
    is_identifier(name).then_some(name)
}

/// Replace or append each required parameter; everything else keeps its
/// relative order.
fn merge_arguments(fragments: &[&str], required: &RequiredParams) -> Vec<String> {
    let mut arguments: Vec<String> = fragments.iter().map(|f| f.to_string()).collect();

    for (name, value) in required.iter() {
        let assignment = format!("{}={}", name, value.render());
        match arguments.iter().position(|f| keyword_name(f) == Some(name)) {
            Some(index) => arguments[index] = assignment,
            None => arguments.push(assignment),
        }
    }

    arguments
}

/// Replace or add each required parameter without reflowing the argument
/// list: existing keywords are overwritten by span, new ones go after the
/// last argument, one per line when the call spans several lines.
fn edit_arguments(arguments: &str, required: &RequiredParams) -> String {
    let spans = argument_spans(arguments);
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    let mut appended = Vec::new();

    for (name, value) in required.iter() {
        let assignment = format!("{}={}", name, value.render());
        match spans
            .iter()
            .find(|span| keyword_name(&arguments[(*span).clone()]) == Some(name))
        {
            Some(span) => edits.push((span.clone(), assignment)),
            None => appended.push(assignment),
        }
    }

    if !appended.is_empty() {
        edits.extend(append_edits(arguments, spans.last().cloned(), &appended));
    }
    edits.sort_by_key(|(range, _)| (range.start, range.end));

    let mut out = String::with_capacity(arguments.len() + 128);
    let mut cursor = 0;
    for (range, text) in edits {
        out.push_str(&arguments[cursor..range.start]);
        out.push_str(&text);
        cursor = range.end;
    }
    out.push_str(&arguments[cursor..]);
    out
}

fn append_edits(
    arguments: &str,
    last: Option<Range<usize>>,
    appended: &[String],
) -> Vec<(Range<usize>, String)> {
    let close_indent = indent_before(arguments, arguments.len()).unwrap_or("");
    let nested_indent = format!("{}    ", close_indent);

    let Some(last) = last else {
        // Only comments between the parentheses
        return match arguments.rfind('\n') {
            Some(newline) => {
                let text: String = appended
                    .iter()
                    .map(|a| format!("{}{},\n", nested_indent, a))
                    .collect();
                vec![(newline + 1..newline + 1, text)]
            }
            None => vec![(arguments.len()..arguments.len(), appended.join(", "))],
        };
    };

    let mut trailing_comma = None;
    scan_code(&arguments[last.end..], |i, b| {
        if b.is_ascii_whitespace() {
            return ControlFlow::Continue(());
        }
        if b == b',' {
            trailing_comma = Some(last.end + i);
        }
        ControlFlow::Break(())
    });

    let after = trailing_comma.map(|c| c + 1).unwrap_or(last.end);
    let mut edits = Vec::new();

    match arguments[after..].find('\n').map(|n| after + n) {
        // One argument per line: new lines go after the last argument's
        // line, past any comment on it
        Some(line_end) => {
            let indent = indent_before(arguments, last.start)
                .map(str::to_string)
                .unwrap_or(nested_indent);
            if trailing_comma.is_none() {
                edits.push((last.end..last.end, ",".to_string()));
            }
            let mut text = appended
                .iter()
                .map(|a| format!("\n{}{}", indent, a))
                .collect::<Vec<_>>()
                .join(",");
            if trailing_comma.is_some() {
                text.push(',');
            }
            edits.push((line_end..line_end, text));
        }
        // The closing parenthesis shares the last argument's line
        None => {
            let text: String = appended.iter().map(|a| format!(", {}", a)).collect();
            let at = trailing_comma.unwrap_or(last.end);
            edits.push((at..at, text));
        }
    }

    edits
}

/// Byte ranges of the arguments in `arguments`, without surrounding
/// whitespace or comments. Empty arguments are dropped.
fn argument_spans(arguments: &str) -> Vec<Range<usize>> {
    let mut bounds = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    let scan = scan_code(arguments, |i, b| {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                bounds.push(start..i);
                start = i + 1;
            }
            _ => {}
        }
        ControlFlow::Continue(())
    });
    bounds.push(start..arguments.len());

    bounds
        .into_iter()
        .map(|range| trim_span(arguments, range, &scan.comments))
        .filter(|range| !range.is_empty())
        .collect()
}

fn trim_span(text: &str, mut range: Range<usize>, comments: &[Range<usize>]) -> Range<usize> {
    let bytes = text.as_bytes();

    loop {
        while range.start < range.end && bytes[range.start].is_ascii_whitespace() {
            range.start += 1;
        }
        match comments.iter().find(|c| c.start == range.start && c.start < range.end) {
            Some(c) => range.start = c.end.min(range.end),
            None => break,
        }
    }

    loop {
        while range.end > range.start && bytes[range.end - 1].is_ascii_whitespace() {
            range.end -= 1;
        }
        match comments.iter().find(|c| c.end == range.end && c.start >= range.start) {
            Some(c) => range.end = c.start,
            None => break,
        }
    }

    range
}

/// Indentation of the line holding `pos`, when only whitespace precedes
/// `pos` on that line.
fn indent_before(text: &str, pos: usize) -> Option<&str> {
    let line_start = text[..pos].rfind('\n')? + 1;
    let prefix = &text[line_start..pos];
    prefix
        .bytes()
        .all(|b| b == b' ' || b == b'\t')
        .then_some(prefix)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => chars.all(|c| c == '_' || c.is_alphanumeric()),
        _ => false,
    }
}

fn preceded_by_boundary(source: &str, index: usize) -> bool {
    match source[..index].chars().next_back() {
        Some(c) => !(c == '_' || c.is_alphanumeric()),
        None => true,
    }
}

/// Index of the bracket closing the `(` at `open`, and whether a comment was
/// crossed on the way. `None` when the brackets never balance or are
/// mismatched.
fn find_close(source: &str, open: usize) -> Option<(usize, bool)> {
    let mut stack: Vec<u8> = Vec::new();
    let mut close = None;
    let mut mismatched = false;

    let region = &source[open..];
    let scan = scan_code(region, |i, b| {
        match b {
            b'(' => stack.push(b')'),
            b'[' => stack.push(b']'),
            b'{' => stack.push(b'}'),
            b')' | b']' | b'}' => {
                if stack.pop() != Some(b) {
                    mismatched = true;
                    return ControlFlow::Break(());
                }
                if stack.is_empty() {
                    close = Some(open + i);
                    return ControlFlow::Break(());
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    });

    if mismatched {
        return None;
    }
    close.map(|c| (c, !scan.comments.is_empty()))
}

#[derive(Debug, Default)]
struct Scan {
    /// Comments passed, `#` up to the end of the line
    comments: Vec<Range<usize>>,
}

/// Visit every byte of `text` that is code, i.e. outside string literals and
/// comments, until `visit` breaks.
fn scan_code(text: &str, mut visit: impl FnMut(usize, u8) -> ControlFlow<()>) -> Scan {
    let bytes = text.as_bytes();
    let mut scan = Scan::default();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' | b'"' => {
                let triple = bytes[i..].starts_with(&[b, b, b]);
                let width = if triple { 3 } else { 1 };
                i += width;
                loop {
                    let Some(&c) = bytes.get(i) else {
                        return scan;
                    };
                    if c == b'\\' {
                        i += 2;
                    } else if c == b && (!triple || bytes[i..].starts_with(&[b, b, b])) {
                        i += width;
                        break;
                    } else if c == b'\n' && !triple {
                        i += 1;
                        break;
                    } else {
                        i += 1;
                    }
                }
            }
            b'#' => {
                let start = i;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                scan.comments.push(start..i);
            }
            _ => {
                if visit(i, b).is_break() {
                    return scan;
                }
                i += 1;
            }
        }
    }

    scan
}
