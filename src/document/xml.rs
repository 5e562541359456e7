// src/document/xml.rs

//! Markup loader for instruction trees
//!
//! Builds a `Node` tree from XML. Text and CDATA content is kept verbatim
//! (no trimming) since search and add payloads are whitespace-sensitive.

use super::Node;
use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::path::Path;
use tracing::debug;

/// Parse markup into its root element
pub fn parse(xml_content: &str) -> Result<Node> {
    let mut reader = Reader::from_str(xml_content);
    reader.trim_text(false);

    let mut buf = Vec::new();
    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                stack.push(element_from(&e));
            }
            Ok(Event::Empty(e)) => {
                let node = element_from(&e);
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or_else(|| {
                    Error::MalformedDocument("unbalanced closing tag".to_string())
                })?;
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Text(e)) => {
                if let Some(current) = stack.last_mut() {
                    let text = e.unescape()?;
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::Xml(e)),
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(Error::MalformedDocument(format!(
            "unclosed element <{}>",
            stack.last().map(|n| n.name.as_str()).unwrap_or_default()
        )));
    }

    let root = root.ok_or_else(|| Error::MalformedDocument("document is empty".to_string()))?;
    debug!("Parsed document with root <{}>", root.name);
    Ok(root)
}

/// Read and parse a markup file
pub fn parse_file(path: &Path) -> Result<Node> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

fn element_from(e: &BytesStart) -> Node {
    let mut node = Node::new(String::from_utf8_lossy(e.name().as_ref()).to_string());
    for attr in e.attributes().filter_map(|a| a.ok()) {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map(|v| v.to_string())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).to_string());
        node.attributes.push((key, value));
    }
    node
}

fn attach(stack: &mut [Node], root: &mut Option<Node>, node: Node) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => {
            return Err(Error::MalformedDocument(
                "document has more than one root element".to_string(),
            ));
        }
    }
    Ok(())
}
