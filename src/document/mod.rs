// src/document/mod.rs

//! Instruction documents
//!
//! Package instructions arrive as a generic tag/attribute/text tree. This
//! module provides:
//! - `Node`: the tree itself, with path queries (`exists`, `fetch`, `set`)
//! - `xml`: a loader building the tree from markup
//! - `modification`: the typed modification model validated from a tree

pub mod modification;
pub mod xml;

pub use modification::{
    FileChange, MissingPolicy, ModificationDocument, NoMatchPolicy, Operation, Position,
    SearchClause,
};

/// One element of an instruction tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder helper used by loaders and tests
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Builder helper used by loaders and tests
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Builder helper used by loaders and tests
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether `path` resolves to at least one element or attribute
    pub fn exists(&self, path: &str) -> bool {
        match split_attribute(path) {
            (elements, Some(attr)) => self
                .set(elements)
                .iter()
                .any(|node| node.attr(attr).is_some()),
            (elements, None) => !self.set(elements).is_empty(),
        }
    }

    /// Text of the first element (or value of the attribute) at `path`
    ///
    /// Element text is returned verbatim, including surrounding whitespace.
    pub fn fetch(&self, path: &str) -> Option<String> {
        match split_attribute(path) {
            (elements, Some(attr)) => self
                .set(elements)
                .into_iter()
                .find_map(|node| node.attr(attr).map(str::to_string)),
            (elements, None) => self.set(elements).first().map(|node| node.text.clone()),
        }
    }

    /// Every element matching `path`, in document order
    ///
    /// Segments are separated by `/`; `.` refers to the current element.
    pub fn set(&self, path: &str) -> Vec<&Node> {
        let mut current = vec![self];

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == "." {
                continue;
            }
            current = current
                .into_iter()
                .flat_map(|node| node.children.iter().filter(|c| c.name == segment))
                .collect();
        }

        current
    }
}

/// Split `a/b/@attr` into (`a/b`, `attr`)
fn split_attribute(path: &str) -> (&str, Option<&str>) {
    match path.rsplit_once('@') {
        Some((elements, attr)) => (elements.trim_end_matches('/'), Some(attr)),
        None => (path, None),
    }
}
