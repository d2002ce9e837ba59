//! Payload normalisation for recorded bodies.
//!
//! Bodies are re-serialised into a canonical indented form when they parse
//! as XML or JSON so that session files diff cleanly and compare
//! deterministically. Anything else passes through untouched. None of these
//! helpers fail: a parse error means the original text is returned.

use roxmltree::{Document, Node};
use serde::de::{Error as _, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

const INDENT: &str = "  ";
const XML_NS_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// Normalises `content` to canonical XML or JSON, or returns it unchanged.
pub fn format_payload(content: &str) -> String {
    if let Ok(doc) = Document::parse(content) {
        return render_document(&doc);
    }
    if is_json(content) {
        return try_format_json(content);
    }
    content.to_string()
}

pub fn is_xml(content: &str) -> bool {
    Document::parse(content).is_ok()
}

/// Indents `content` as XML, returning it verbatim when it does not parse.
pub fn try_format_xml(content: &str) -> String {
    match Document::parse(content) {
        Ok(doc) => render_document(&doc),
        Err(_) => content.to_string(),
    }
}

/// Cheap shape check: bracketed object or array after trimming.
pub fn is_json(content: &str) -> bool {
    let trimmed = content.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

/// Pretty-prints `content` keeping key order and number literals as
/// written. Objects with a repeated key are returned verbatim.
pub fn try_format_json(content: &str) -> String {
    if serde_json::from_str::<UniqueKeys>(content).is_err() {
        return content.to_string();
    }
    serde_json::from_str::<Value>(content)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| content.to_string())
}

/// Any JSON value in which no object repeats a key.
struct UniqueKeys;

impl<'de> Deserialize<'de> for UniqueKeys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(UniqueKeysVisitor)
    }
}

struct UniqueKeysVisitor;

impl<'de> Visitor<'de> for UniqueKeysVisitor {
    type Value = UniqueKeys;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value without repeated object keys")
    }

    fn visit_bool<E>(self, _: bool) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_i64<E>(self, _: i64) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_u64<E>(self, _: u64) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_f64<E>(self, _: f64) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_str<E>(self, _: &str) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_unit<E>(self) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<UniqueKeys, A::Error> {
        while seq.next_element::<UniqueKeys>()?.is_some() {}
        Ok(UniqueKeys)
    }

    // Arbitrary-precision numbers also arrive here, as a one-entry map.
    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<UniqueKeys, A::Error> {
        let mut seen = HashSet::new();
        while let Some(key) = map.next_key::<String>()? {
            if !seen.insert(key.clone()) {
                return Err(A::Error::custom(format!("duplicate key `{key}`")));
            }
            map.next_value::<UniqueKeys>()?;
        }
        Ok(UniqueKeys)
    }
}

fn render_document(doc: &Document<'_>) -> String {
    let mut lines = Vec::new();
    for child in doc.root().children() {
        if !child.is_text() {
            render_node(child, 0, &mut lines);
        }
    }
    lines.join("\n")
}

fn render_node(node: Node<'_, '_>, depth: usize, lines: &mut Vec<String>) {
    let indent = INDENT.repeat(depth);
    if node.is_element() {
        render_element(node, depth, lines);
    } else if node.is_text() {
        let text = node.text().unwrap_or_default().trim();
        if !text.is_empty() {
            lines.push(format!("{indent}{}", escape_text(text)));
        }
    } else if node.is_comment() {
        lines.push(format!("{indent}<!--{}-->", node.text().unwrap_or_default()));
    } else if let Some(pi) = node.pi() {
        match pi.value {
            Some(value) => lines.push(format!("{indent}<?{} {value}?>", pi.target)),
            None => lines.push(format!("{indent}<?{}?>", pi.target)),
        }
    }
}

fn render_element(node: Node<'_, '_>, depth: usize, lines: &mut Vec<String>) {
    let indent = INDENT.repeat(depth);
    let name = qualified_name(node, node.tag_name().namespace(), node.tag_name().name());
    let mut open = format!("{indent}<{name}");
    for (prefix, uri) in declared_namespaces(node) {
        match prefix {
            Some(prefix) => open.push_str(&format!(" xmlns:{prefix}=\"{}\"", escape_attr(uri))),
            None => open.push_str(&format!(" xmlns=\"{}\"", escape_attr(uri))),
        }
    }
    for attr in node.attributes() {
        let attr_name = match attr.namespace() {
            Some(uri) => qualified_name(node, Some(uri), attr.name()),
            None => attr.name().to_string(),
        };
        open.push_str(&format!(" {attr_name}=\"{}\"", escape_attr(attr.value())));
    }

    let has_children = node.has_children();
    if has_children && node.children().all(|child| child.is_text()) {
        let text: String = node.children().filter_map(|child| child.text()).collect();
        lines.push(format!("{open}>{}</{name}>", escape_text(&text)));
        return;
    }

    let significant: Vec<Node<'_, '_>> = node
        .children()
        .filter(|child| {
            !(child.is_text() && child.text().unwrap_or_default().trim().is_empty())
        })
        .collect();
    if significant.is_empty() {
        lines.push(format!("{open} />"));
        return;
    }

    lines.push(format!("{open}>"));
    for child in significant {
        render_node(child, depth + 1, lines);
    }
    lines.push(format!("{indent}</{name}>"));
}

fn qualified_name(node: Node<'_, '_>, namespace: Option<&str>, local: &str) -> String {
    let prefix = namespace.and_then(|uri| {
        if uri == XML_NS_URI {
            Some("xml")
        } else {
            node.lookup_prefix(uri)
        }
    });
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local.to_string(),
    }
}

/// Namespace bindings introduced on `node` itself rather than inherited.
fn declared_namespaces<'a>(node: Node<'a, '_>) -> Vec<(Option<&'a str>, &'a str)> {
    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|parent| parent.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    node.namespaces()
        .map(|ns| (ns.name(), ns.uri()))
        .filter(|(_, uri)| *uri != XML_NS_URI)
        .filter(|binding| !inherited.contains(binding))
        .collect()
}

// A raw `\r` would be folded into `\n` on the next parse.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            other => out.push(other),
        }
    }
    out
}

// Attribute-value normalisation turns raw tabs and line breaks into spaces.
fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            other => out.push(other),
        }
    }
    out
}
