// src/document/modification.rs

//! Typed modification model
//!
//! A modification document lists files to edit; every file carries ordered
//! operations, and every operation one `add` payload plus one or more search
//! clauses:
//!
//! ```xml
//! <modification>
//!   <file name="$sourcedir/Load.php" error="skip">
//!     <operation error="fatal">
//!       <search position="after" whitespace="loose"><![CDATA[...]]></search>
//!       <add><![CDATA[...]]></add>
//!     </operation>
//!   </file>
//! </modification>
//! ```

use super::Node;
use crate::error::{Error, Result};
use std::str::FromStr;

/// Root tag of a modification document
pub const ROOT_TAG: &str = "modification";

/// What to do when a target file does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingPolicy {
    /// Report the file as missing and fail the run
    #[default]
    Error,
    /// Treat the file as empty and create it
    Ignore,
    /// Skip the file silently
    Skip,
}

impl MissingPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            MissingPolicy::Error => "error",
            MissingPolicy::Ignore => "ignore",
            MissingPolicy::Skip => "skip",
        }
    }
}

impl FromStr for MissingPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "error" | "fatal" => Ok(MissingPolicy::Error),
            "ignore" => Ok(MissingPolicy::Ignore),
            "skip" => Ok(MissingPolicy::Skip),
            _ => Err(format!("Invalid file error policy: {}", s)),
        }
    }
}

/// What a failed (or successful) match means for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoMatchPolicy {
    /// A missing match fails the run
    #[default]
    Fatal,
    /// Match outcome never affects the run
    Ignore,
    /// The pattern must be absent; a match fails the run
    Required,
}

impl NoMatchPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            NoMatchPolicy::Fatal => "fatal",
            NoMatchPolicy::Ignore => "ignore",
            NoMatchPolicy::Required => "required",
        }
    }
}

impl FromStr for NoMatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fatal" => Ok(NoMatchPolicy::Fatal),
            "ignore" => Ok(NoMatchPolicy::Ignore),
            "required" => Ok(NoMatchPolicy::Required),
            _ => Err(format!("Invalid operation error policy: {}", s)),
        }
    }
}

/// Where the add payload goes relative to the match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    /// Add is inserted in front of the match
    Before,
    /// Add is inserted behind the match
    After,
    /// Add replaces the match
    #[default]
    Replace,
    /// Add is appended at end of file
    End,
}

impl Position {
    pub fn as_str(&self) -> &str {
        match self {
            Position::Before => "before",
            Position::After => "after",
            Position::Replace => "replace",
            Position::End => "end",
        }
    }
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "before" => Ok(Position::Before),
            "after" => Ok(Position::After),
            "replace" => Ok(Position::Replace),
            "end" => Ok(Position::End),
            _ => Err(format!("Invalid search position: {}", s)),
        }
    }
}

/// One matchable pattern of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchClause {
    pub search: String,
    pub add: String,
    pub position: Position,
    pub is_regex: bool,
    pub loose_whitespace: bool,
}

impl SearchClause {
    pub fn new(search: impl Into<String>, add: impl Into<String>, position: Position) -> Self {
        Self {
            search: search.into(),
            add: add.into(),
            position,
            is_regex: false,
            loose_whitespace: false,
        }
    }
}

/// One unit of change within a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub searches: Vec<SearchClause>,
    pub on_no_match: NoMatchPolicy,
}

/// All operations targeting one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Path as written in the document, before variable substitution
    pub path: String,
    pub on_missing: MissingPolicy,
    pub operations: Vec<Operation>,
}

/// A validated modification document
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModificationDocument {
    pub files: Vec<FileChange>,
}

impl ModificationDocument {
    /// Build the typed model from an instruction tree
    ///
    /// Unknown attribute values fall back to their defaults; missing
    /// structure (file name, search clauses) is a `MalformedDocument`.
    pub fn from_tree(root: &Node) -> Result<Self> {
        if root.name != ROOT_TAG {
            return Err(Error::MalformedDocument(format!(
                "expected <{}> root, found <{}>",
                ROOT_TAG, root.name
            )));
        }

        let mut files = Vec::new();
        for (index, file) in root.set("file").into_iter().enumerate() {
            files.push(Self::file_from(file, index)?);
        }

        Ok(Self { files })
    }

    /// Parse markup straight into a document
    pub fn from_xml(xml_content: &str) -> Result<Self> {
        Self::from_tree(&super::xml::parse(xml_content)?)
    }

    fn file_from(file: &Node, index: usize) -> Result<FileChange> {
        let path = file
            .fetch("@name")
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                Error::MalformedDocument(format!("file #{} has no name attribute", index + 1))
            })?;

        let on_missing = file
            .fetch("@error")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or_default();

        let mut operations = Vec::new();
        for operation in file.set("operation") {
            let on_no_match = operation
                .fetch("@error")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or_default();

            let add = operation.fetch("add").unwrap_or_default();

            let searches: Vec<SearchClause> = operation
                .set("search")
                .into_iter()
                .map(|search| SearchClause {
                    search: search.text.clone(),
                    add: add.clone(),
                    position: search
                        .fetch("@position")
                        .and_then(|v| v.trim().parse().ok())
                        .unwrap_or_default(),
                    is_regex: search.fetch("@regexp").is_some_and(|v| v.trim() == "true"),
                    loose_whitespace: search
                        .fetch("@whitespace")
                        .is_some_and(|v| v.trim() == "loose"),
                })
                .collect();

            if searches.is_empty() {
                return Err(Error::MalformedDocument(format!(
                    "operation in {} has no search clause",
                    path
                )));
            }

            operations.push(Operation {
                searches,
                on_no_match,
            });
        }

        Ok(FileChange {
            path,
            on_missing,
            operations,
        })
    }
}
