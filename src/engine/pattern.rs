// src/engine/pattern.rs

//! Search pattern derivation
//!
//! Authored search text becomes an anchored regular expression, and the add
//! payload becomes a replacement template. Replacement text may contain `$`,
//! which the regex engine would read as a group reference, so it is swapped
//! for a marker before substitution and restored once the file is done.

use crate::document::{Operation, Position, SearchClause};
use crate::error::Result;
use once_cell::sync::Lazy;
use regex::{NoExpand, Regex, RegexBuilder};

/// Stand-in for `$` inside replacement templates
pub const DOLLAR_MARKER: &str = "[%PACKAGE1%]";

/// Matches end of file, capturing the last newline and a trailing `?>`
///
/// The addition lands between the two, so it starts on its own line.
const END_PATTERN: &str = r"(\n)?(\?>)?\z";

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+").expect("whitespace run is a valid regex"));

/// A clause ready to run against file content
#[derive(Debug, Clone)]
pub struct CompiledClause {
    pub regex: Regex,
    /// Derived search pattern
    pub pattern: String,
    /// Replacement template (markers in place of `$`)
    pub template: String,
}

/// Replace `$` in replacement text with the marker
pub fn protect(text: &str) -> String {
    text.replace('$', DOLLAR_MARKER)
}

/// Turn markers back into `$`
pub fn restore(text: &str) -> String {
    text.replace(DOLLAR_MARKER, "$")
}

/// Escape literal search text, loosening whitespace runs when asked
pub fn literal_pattern(search: &str, loose_whitespace: bool) -> String {
    let escaped = regex::escape(search);
    if loose_whitespace {
        WHITESPACE_RUN
            .replace_all(&escaped, NoExpand(r"[ \t]+"))
            .into_owned()
    } else {
        escaped
    }
}

/// Derive the pattern and template for one clause
pub fn derive(clause: &SearchClause, undo: bool) -> (String, String) {
    let base = if clause.is_regex {
        clause.search.clone()
    } else {
        literal_pattern(&clause.search, clause.loose_whitespace)
    };
    let add = protect(&clause.add);

    match clause.position {
        Position::Replace => (base, add),
        Position::Before => (format!("({})", base), format!("{}${{1}}", add)),
        Position::After => (format!("({})", base), format!("${{1}}{}", add)),
        Position::End if undo => (base, String::new()),
        Position::End => (END_PATTERN.to_string(), format!("${{1}}{}${{2}}", add)),
    }
}

/// Derive and compile one clause
pub fn compile(clause: &SearchClause, undo: bool) -> Result<CompiledClause> {
    let (pattern, template) = derive(clause, undo);
    let regex = RegexBuilder::new(&pattern)
        .dot_matches_new_line(true)
        .build()?;
    Ok(CompiledClause {
        regex,
        pattern,
        template,
    })
}

/// Rewrite a non-regex clause so applying it reverses its forward effect
///
/// Returns `None` for regular expressions, which cannot be reversed. A
/// replacement with nothing to add only asserted its search text, so its
/// reverse asserts the same text and changes nothing.
pub fn reverse(clause: &SearchClause) -> Option<SearchClause> {
    if clause.is_regex {
        return None;
    }
    if clause.position == Position::Replace && clause.add.is_empty() {
        return Some(clause.clone());
    }

    let mut reversed = clause.clone();
    match clause.position {
        Position::Replace | Position::End => {
            reversed.search = clause.add.clone();
        }
        Position::Before => {
            reversed.position = Position::Replace;
            reversed.search = format!("{}{}", clause.add, clause.search);
        }
        Position::After => {
            reversed.position = Position::Replace;
            reversed.search = format!("{}{}", clause.search, clause.add);
        }
    }
    reversed.add = clause.search.clone();
    Some(reversed)
}

/// Clauses of an operation in execution order: replacements first
pub fn ordered_clauses(operation: &Operation) -> Vec<SearchClause> {
    let mut clauses = operation.searches.clone();
    clauses.sort_by_key(|c| c.position != Position::Replace);
    clauses
}
