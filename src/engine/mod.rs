// src/engine/mod.rs

//! Modification engine
//!
//! Applies (or reverses) a `ModificationDocument` against real files. Each
//! FileChange is resolved, loaded, run through its operations, and written
//! back through `PackageFs`. Changes aimed at the default theme are mirrored
//! onto every other theme that already has the same file.
//!
//! Failures never abort sibling files: every outcome is recorded as an
//! `Action`, and the run ends with one `result` action carrying the overall
//! status.

pub mod action;
pub mod pattern;

pub use action::{Action, FailureReason, ModificationReport};

use crate::document::{
    FileChange, MissingPolicy, ModificationDocument, NoMatchPolicy, Operation, Position,
    SearchClause,
};
use crate::error::Result;
use crate::filesystem::{PackageFs, is_writable};
use crate::paths::PathVars;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Id of the default theme; fanned-out themes use other ids
pub const DEFAULT_THEME_ID: i64 = 1;

/// A theme tree that receives copies of default-theme changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeRoot {
    pub id: i64,
    pub path: PathBuf,
}

impl ThemeRoot {
    pub fn new(id: i64, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }

    /// Every theme directory below `vars.themes_dir` except the default one
    ///
    /// Ids follow directory name order, starting after the default theme.
    pub fn scan(vars: &PathVars) -> Result<Vec<ThemeRoot>> {
        if !vars.themes_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(&vars.themes_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() && *p != vars.theme_dir)
            .collect();
        dirs.sort();

        Ok(dirs
            .into_iter()
            .zip(DEFAULT_THEME_ID + 1..)
            .map(|(path, id)| ThemeRoot { id, path })
            .collect())
    }
}

/// Run-wide switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Reverse a previously applied document
    pub undo: bool,
    /// Compute everything, write nothing
    pub dry_run: bool,
    /// Copy each file to `<file>~` before overwriting it
    pub snapshot: bool,
}

/// Action log plus the running status of one `apply`
struct Run {
    actions: Vec<Action>,
    status: bool,
}

impl Run {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
            status: true,
        }
    }

    fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Record an action that fails the run
    fn fail(&mut self, action: Action) {
        self.status = false;
        self.actions.push(action);
    }

    fn finish(mut self) -> ModificationReport {
        self.actions.push(Action::Result {
            status: self.status,
        });
        ModificationReport {
            actions: self.actions,
        }
    }
}

/// Applies modification documents through one package session
pub struct ModificationEngine<'a> {
    fs: &'a mut PackageFs,
    vars: &'a PathVars,
    themes: Vec<ThemeRoot>,
    options: EngineOptions,
}

impl<'a> ModificationEngine<'a> {
    pub fn new(fs: &'a mut PackageFs, vars: &'a PathVars) -> Self {
        Self {
            fs,
            vars,
            themes: Vec::new(),
            options: EngineOptions::default(),
        }
    }

    /// Theme trees to fan default-theme changes out to
    pub fn with_themes(mut self, themes: Vec<ThemeRoot>) -> Self {
        self.themes = themes;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Apply `document`, returning the full action log
    ///
    /// Only path resolution errors abort the run, and they do so before any
    /// file is touched.
    pub fn apply(&mut self, document: &ModificationDocument) -> Result<ModificationReport> {
        let mut primaries = Vec::with_capacity(document.files.len());
        for change in &document.files {
            primaries.push((self.vars.resolve(&change.path)?, change));
        }

        info!(
            "Applying {} file change(s){}{}",
            primaries.len(),
            if self.options.undo { " in undo mode" } else { "" },
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        let mut run = Run::new();
        for (path, change) in &primaries {
            self.apply_file(&mut run, path, change, None);
        }

        let vars = self.vars;
        let explicit: HashSet<&PathBuf> = primaries.iter().map(|(p, _)| p).collect();
        let themes = self.themes.clone();
        for theme in themes.iter().filter(|t| t.path != vars.theme_dir) {
            for (path, change) in &primaries {
                let Ok(relative) = path.strip_prefix(&vars.theme_dir) else {
                    continue;
                };
                let target = theme.path.join(relative);
                if explicit.contains(&target) || !self.fs.exists(&target) {
                    continue;
                }
                debug!("Fanning {} out to theme {}", relative.display(), theme.id);
                self.apply_file(&mut run, &target, change, Some(theme.id));
            }
        }

        let report = run.finish();
        info!(
            "Modification finished: {} ({} replacement(s), {} failure(s))",
            if report.status() { "success" } else { "failed" },
            report.count("replace"),
            report.failures().count()
        );
        Ok(report)
    }

    fn apply_file(&mut self, run: &mut Run, path: &Path, change: &FileChange, theme: Option<i64>) {
        let filename = path.to_path_buf();
        let exists = self.fs.exists(path);

        let mut content = if exists {
            match self.fs.read_to_string(path) {
                Ok(content) => content.replace('\r', ""),
                Err(e) => {
                    warn!("Cannot read {}: {}", path.display(), e);
                    run.fail(Action::Failure {
                        filename,
                        reason: FailureReason::Unreadable,
                        search: String::new(),
                        search_original: String::new(),
                        replace_original: String::new(),
                        theme,
                    });
                    return;
                }
            }
        } else {
            match change.on_missing {
                MissingPolicy::Error => {
                    warn!("Missing file {}", path.display());
                    run.fail(Action::Missing { filename });
                    return;
                }
                MissingPolicy::Skip => {
                    debug!("Skipping missing file {}", path.display());
                    run.push(Action::Skipping { filename });
                    return;
                }
                MissingPolicy::Ignore => String::new(),
            }
        };

        run.push(Action::Opened {
            filename: filename.clone(),
            theme,
        });

        for operation in &change.operations {
            self.apply_operation(run, path, operation, &mut content, theme);
        }

        let content = pattern::restore(&content);

        if !self.ensure_writable(run, path, exists) {
            return;
        }

        if !self.options.dry_run {
            if self.options.snapshot && exists && path.exists() {
                if let Err(e) = self.fs.snapshot(path) {
                    warn!("Snapshot of {} failed: {}", path.display(), e);
                }
            }
            if let Err(e) = self.fs.write_file(path, content.as_bytes()) {
                warn!("Writing {} failed: {}", path.display(), e);
                run.fail(Action::Failure {
                    filename,
                    reason: FailureReason::NotWritable,
                    search: String::new(),
                    search_original: String::new(),
                    replace_original: String::new(),
                    theme,
                });
                return;
            }
        }

        run.push(Action::Saved {
            filename,
            sha256: format!("{:x}", Sha256::digest(content.as_bytes())),
            theme,
        });
    }

    /// Probe the target (or its nearest existing ancestor) and repair it
    ///
    /// Returns false when the file must not be written.
    fn ensure_writable(&mut self, run: &mut Run, path: &Path, exists: bool) -> bool {
        let probe = if exists && path.exists() {
            Some(path)
        } else {
            path.ancestors().skip(1).find(|p| p.exists())
        };
        if probe.is_some_and(is_writable) {
            return true;
        }

        let repaired = if self.options.dry_run {
            false
        } else if exists {
            self.fs.repair_permissions(path).unwrap_or(false)
        } else {
            path.parent()
                .map(|parent| self.fs.ensure_directory(parent).unwrap_or(false))
                .unwrap_or(false)
        };

        let action = Action::ChmodNeeded {
            filename: path.to_path_buf(),
            repaired,
        };
        if repaired {
            run.push(action);
        } else {
            warn!("{} is not writable", path.display());
            run.fail(action);
        }
        repaired || self.options.dry_run
    }

    fn apply_operation(
        &mut self,
        run: &mut Run,
        path: &Path,
        operation: &Operation,
        content: &mut String,
        theme: Option<i64>,
    ) {
        let undo = self.options.undo;
        let failure = |reason: FailureReason, search: String, clause: &SearchClause| {
            Action::Failure {
                filename: path.to_path_buf(),
                reason,
                search,
                search_original: clause.search.clone(),
                replace_original: clause.add.clone(),
                theme,
            }
        };

        if undo && operation.on_no_match == NoMatchPolicy::Required {
            debug!("Refusing to undo a required-absent operation in {}", path.display());
            for clause in &operation.searches {
                run.push(failure(FailureReason::Irreversible, clause.search.clone(), clause));
            }
            return;
        }

        let searches = if undo {
            let mut reversed = Vec::with_capacity(operation.searches.len());
            for clause in &operation.searches {
                match pattern::reverse(clause) {
                    Some(r) => reversed.push(r),
                    None => {
                        if operation.on_no_match == NoMatchPolicy::Fatal {
                            run.push(failure(
                                FailureReason::Irreversible,
                                clause.search.clone(),
                                clause,
                            ));
                        }
                        return;
                    }
                }
            }
            reversed
        } else {
            operation.searches.clone()
        };

        let ordered = pattern::ordered_clauses(&Operation {
            searches,
            on_no_match: operation.on_no_match,
        });

        for clause in &ordered {
            let compiled = match pattern::compile(clause, undo) {
                Ok(compiled) => compiled,
                Err(e) => {
                    warn!("Invalid search pattern in {}: {}", path.display(), e);
                    let (derived, _) = pattern::derive(clause, undo);
                    run.fail(failure(FailureReason::InvalidPattern, derived, clause));
                    continue;
                }
            };

            let matched = compiled.regex.is_match(content);
            match operation.on_no_match {
                NoMatchPolicy::Fatal if !matched => {
                    run.fail(failure(FailureReason::PatternNotFound, compiled.pattern, clause));
                    continue;
                }
                NoMatchPolicy::Required if matched => {
                    run.fail(failure(FailureReason::PatternForbidden, compiled.pattern, clause));
                    continue;
                }
                NoMatchPolicy::Required => continue,
                _ if !matched => continue,
                _ => {}
            }

            let undo_end = undo && clause.position == Position::End;
            if clause.add.is_empty() && !undo_end {
                continue;
            }

            *content = compiled
                .regex
                .replacen(content, 1, compiled.template.as_str())
                .into_owned();

            run.push(Action::Replace {
                filename: path.to_path_buf(),
                search: compiled.pattern,
                replace: compiled.template,
                search_original: clause.search.clone(),
                replace_original: clause.add.clone(),
                theme,
            });
        }
    }
}
