// src/engine/action.rs

//! Action log emitted while applying a modification document

use crate::error::Error;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Why a clause or file failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// A fatal clause found nothing
    PatternNotFound,
    /// A required-absent clause matched
    PatternForbidden,
    /// The clause cannot be reversed
    Irreversible,
    /// A regular expression failed to compile
    InvalidPattern,
    /// The file could not be read as text
    Unreadable,
    /// The file could not be written
    NotWritable,
}

/// One observable outcome of applying a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    Opened {
        filename: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        theme: Option<i64>,
    },
    Replace {
        filename: PathBuf,
        search: String,
        replace: String,
        search_original: String,
        replace_original: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        theme: Option<i64>,
    },
    Failure {
        filename: PathBuf,
        reason: FailureReason,
        search: String,
        search_original: String,
        replace_original: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        theme: Option<i64>,
    },
    Skipping {
        filename: PathBuf,
    },
    Missing {
        filename: PathBuf,
    },
    ChmodNeeded {
        filename: PathBuf,
        repaired: bool,
    },
    Saved {
        filename: PathBuf,
        sha256: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        theme: Option<i64>,
    },
    /// A package directory was copied into the tree
    Copied {
        filename: PathBuf,
    },
    /// A file or directory was deleted from the tree
    Removed {
        filename: PathBuf,
    },
    Result {
        status: bool,
    },
}

impl Action {
    /// Short type name, as used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Opened { .. } => "opened",
            Action::Replace { .. } => "replace",
            Action::Failure { .. } => "failure",
            Action::Skipping { .. } => "skipping",
            Action::Missing { .. } => "missing",
            Action::ChmodNeeded { .. } => "chmod-needed",
            Action::Saved { .. } => "saved",
            Action::Copied { .. } => "copied",
            Action::Removed { .. } => "removed",
            Action::Result { .. } => "result",
        }
    }

    pub fn filename(&self) -> Option<&Path> {
        match self {
            Action::Opened { filename, .. }
            | Action::Replace { filename, .. }
            | Action::Failure { filename, .. }
            | Action::Skipping { filename }
            | Action::Missing { filename }
            | Action::ChmodNeeded { filename, .. }
            | Action::Saved { filename, .. }
            | Action::Copied { filename }
            | Action::Removed { filename } => Some(filename),
            Action::Result { .. } => None,
        }
    }

    /// The error this action stands for, if any
    pub fn to_error(&self) -> Option<Error> {
        match self {
            Action::Missing { filename } => Some(Error::MissingFile(filename.clone())),
            Action::Failure {
                filename,
                reason: FailureReason::PatternNotFound,
                search_original,
                ..
            } => Some(Error::PatternNotFound {
                path: filename.clone(),
                pattern: search_original.clone(),
            }),
            Action::Failure {
                filename,
                reason: FailureReason::PatternForbidden,
                search_original,
                ..
            } => Some(Error::PatternForbidden {
                path: filename.clone(),
                pattern: search_original.clone(),
            }),
            Action::Failure {
                filename,
                reason: FailureReason::InvalidPattern,
                search_original,
                ..
            } => Some(Error::InvalidSearch {
                path: filename.clone(),
                pattern: search_original.clone(),
            }),
            Action::Failure {
                filename,
                reason: FailureReason::Irreversible,
                search_original,
                ..
            } => Some(Error::Irreversible {
                path: filename.clone(),
                pattern: search_original.clone(),
            }),
            Action::Failure {
                filename,
                reason: FailureReason::Unreadable,
                ..
            } => Some(Error::Unreadable(filename.clone())),
            Action::Failure {
                filename,
                reason: FailureReason::NotWritable,
                ..
            }
            | Action::ChmodNeeded {
                filename,
                repaired: false,
            } => Some(Error::NotWritable(filename.clone())),
            _ => None,
        }
    }
}

/// Ordered action log of one engine run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModificationReport {
    pub actions: Vec<Action>,
}

impl ModificationReport {
    /// Overall outcome carried by the terminal `result` action
    pub fn status(&self) -> bool {
        self.actions
            .iter()
            .rev()
            .find_map(|a| match a {
                Action::Result { status } => Some(*status),
                _ => None,
            })
            .unwrap_or(false)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Failure { .. } | Action::Missing { .. }))
    }

    /// Files written (or that would be written in a dry run)
    pub fn saved_files(&self) -> Vec<&Path> {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Saved { .. }))
            .filter_map(Action::filename)
            .collect()
    }

    /// Human-readable description of every failed step
    pub fn failed_steps(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter_map(Action::to_error)
            .map(|e| e.to_string())
            .collect()
    }

    /// Distinct theme ids that received fanned-out copies
    pub fn themes(&self) -> Vec<i64> {
        let mut themes: Vec<i64> = self
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Saved {
                    theme: Some(id), ..
                } => Some(*id),
                _ => None,
            })
            .collect();
        themes.sort_unstable();
        themes.dedup();
        themes
    }

    pub fn count(&self, kind: &str) -> usize {
        self.actions.iter().filter(|a| a.kind() == kind).count()
    }
}
