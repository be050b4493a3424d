//! Proxy-endpoint flow document.
//!
//! The document keeps the full XML tree so untouched markup survives a
//! load/save cycle byte for byte. Flow lookups go through the normalization
//! helpers at the bottom of this file, which always yield conditional flows as
//! a sequence no matter how many `Flow` elements the source holds.
use super::xml::{self, Element, Node};
use crate::error::{AugmentError, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const ROOT_ELEMENT: &str = "ProxyEndpoint";
pub const PRE_FLOW: &str = "PreFlow";
pub const POST_FLOW: &str = "PostFlow";
const FLOWS: &str = "Flows";
const FLOW: &str = "Flow";
const STEP: &str = "Step";
const BOM: char = '\u{feff}';

/// Which flow an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlowRef {
    PreFlow,
    PostFlow,
    Conditional(String),
}

impl FlowRef {
    pub fn from_name(name: &str) -> Self {
        match name {
            PRE_FLOW => FlowRef::PreFlow,
            POST_FLOW => FlowRef::PostFlow,
            other => FlowRef::Conditional(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FlowRef::PreFlow => PRE_FLOW,
            FlowRef::PostFlow => POST_FLOW,
            FlowRef::Conditional(name) => name,
        }
    }
}

/// Serializes as the flow name.
impl serde::Serialize for FlowRef {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl fmt::Display for FlowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Processing direction of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn element_name(self) -> &'static str {
        match self {
            Direction::Request => "Request",
            Direction::Response => "Response",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

impl FromStr for Direction {
    type Err = AugmentError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "Request" => Ok(Direction::Request),
            "Response" => Ok(Direction::Response),
            _ => Err(AugmentError::InvalidDirection {
                value: value.to_string(),
            }),
        }
    }
}

/// A policy reference inside a flow direction.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Step {
    pub name: String,
    pub condition: Option<String>,
}

/// Snapshot of one flow's step sequences.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FlowEntry {
    pub name: String,
    pub condition: Option<String>,
    pub request: Vec<Step>,
    pub response: Vec<Step>,
}

impl FlowEntry {
    pub fn steps(&self, direction: Direction) -> &[Step] {
        match direction {
            Direction::Request => &self.request,
            Direction::Response => &self.response,
        }
    }

    pub fn step_names(&self, direction: Direction) -> Vec<&str> {
        self.steps(direction)
            .iter()
            .map(|step| step.name.as_str())
            .collect()
    }

    fn empty(name: &str) -> Self {
        FlowEntry {
            name: name.to_string(),
            condition: None,
            request: Vec::new(),
            response: Vec::new(),
        }
    }

    fn from_element(name: &str, element: &Element) -> Self {
        FlowEntry {
            name: name.to_string(),
            condition: child_text(element, "Condition"),
            request: steps_of(element, Direction::Request),
            response: steps_of(element, Direction::Response),
        }
    }
}

/// Whitespace style used when new elements are inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Layout {
    /// One indentation level; `None` for documents written without newlines.
    unit: Option<String>,
}

impl Layout {
    fn detect(root: &Element) -> Self {
        let unit = root.children.iter().find_map(|node| match node {
            Node::Text(raw) if raw.contains('\n') => raw
                .rsplit('\n')
                .next()
                .filter(|indent| indent.chars().all(char::is_whitespace))
                .map(str::to_string),
            _ => None,
        });
        Layout { unit }
    }

    /// Whitespace placed before a node at `depth` (root children are depth 1).
    pub(crate) fn separator(&self, depth: usize) -> Option<String> {
        self.unit
            .as_ref()
            .map(|unit| format!("\n{}", unit.repeat(depth)))
    }
}

/// Parsed proxy-endpoint configuration document.
#[derive(Debug, Clone)]
pub struct FlowDocument {
    origin: PathBuf,
    /// Source began with a UTF-8 byte order mark.
    bom: bool,
    prolog: Vec<Node>,
    root: Element,
    epilog: Vec<Node>,
    layout: Layout,
}

impl FlowDocument {
    /// Read and parse the document at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| AugmentError::Parse {
            path: path.to_path_buf(),
            reason: format!("read failed: {err}"),
        })?;
        let doc = Self::parse(&text, path)?;
        tracing::debug!(path = %path.display(), flows = doc.flow_names().len(), "loaded flow document");
        Ok(doc)
    }

    /// Parse document text; `origin` only labels errors.
    pub fn parse(text: &str, origin: impl Into<PathBuf>) -> Result<Self> {
        let origin = origin.into();
        let (bom, text) = match text.strip_prefix(BOM) {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let nodes = xml::parse(text).map_err(|reason| AugmentError::Parse {
            path: origin.clone(),
            reason,
        })?;
        let mut prolog = Vec::new();
        let mut root = None;
        let mut epilog = Vec::new();
        for node in nodes {
            match node {
                Node::Element(element) if root.is_none() => root = Some(element),
                other if root.is_none() => prolog.push(other),
                other => epilog.push(other),
            }
        }
        let Some(root) = root else {
            return Err(AugmentError::Parse {
                path: origin,
                reason: "document has no root element".to_string(),
            });
        };
        if root.name() != ROOT_ELEMENT {
            return Err(AugmentError::Schema {
                path: origin,
                reason: format!("expected <{ROOT_ELEMENT}> root, found <{}>", root.name()),
            });
        }
        check_flow_names(&root, &origin)?;
        let layout = Layout::detect(&root);
        Ok(FlowDocument {
            origin,
            bom,
            prolog,
            root,
            epilog,
            layout,
        })
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Serialize the document to its textual form.
    pub fn to_xml_string(&self) -> Result<String> {
        let body = xml::write_document(&self.prolog, &self.root, &self.epilog)
            .map_err(|err| AugmentError::io("serialize", &self.origin, err))?;
        if self.bom {
            Ok(format!("{BOM}{body}"))
        } else {
            Ok(body)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self.to_xml_string()?;
        fs::write(path, text).map_err(|err| AugmentError::io("write", path, err))?;
        tracing::debug!(path = %path.display(), "saved flow document");
        Ok(())
    }

    /// Conditional flow names in document order.
    pub fn flow_names(&self) -> Vec<String> {
        conditional_flows(&self.root)
            .filter_map(|flow| flow.attribute("name"))
            .collect()
    }

    /// Resolve `name` to `PreFlow`, `PostFlow` or a conditional flow.
    pub fn get_flow(&self, name: &str) -> Result<FlowEntry> {
        self.flow(&FlowRef::from_name(name))
    }

    pub fn flow(&self, flow: &FlowRef) -> Result<FlowEntry> {
        match flow {
            FlowRef::PreFlow | FlowRef::PostFlow => Ok(self
                .root
                .child(flow.name())
                .map(|element| FlowEntry::from_element(flow.name(), element))
                .unwrap_or_else(|| FlowEntry::empty(flow.name()))),
            FlowRef::Conditional(name) => conditional_flows(&self.root)
                .find(|element| element.attribute("name").as_deref() == Some(name.as_str()))
                .map(|element| FlowEntry::from_element(name, element))
                .ok_or_else(|| AugmentError::not_found("flow", name.clone())),
        }
    }

    pub(crate) fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Mutable flow element plus its nesting depth below the root.
    ///
    /// A missing `PreFlow`/`PostFlow` is created so injection always has a
    /// target.
    pub(crate) fn flow_mut(&mut self, flow: &FlowRef) -> Result<(&mut Element, usize)> {
        let layout = &self.layout;
        let root = &mut self.root;
        match flow {
            FlowRef::PreFlow | FlowRef::PostFlow => {
                let index = match root.child_index(flow.name()) {
                    Some(index) => index,
                    None => {
                        let before: &[&str] = if *flow == FlowRef::PreFlow {
                            &[POST_FLOW, FLOWS, "PostClientFlow", "HTTPProxyConnection", "RouteRule"]
                        } else {
                            &[FLOWS, "PostClientFlow", "HTTPProxyConnection", "RouteRule"]
                        };
                        let position = before.iter().find_map(|name| root.child_index(name));
                        let element = Element::with_attribute(flow.name(), "name", flow.name());
                        insert_element(root, position, element, 0, layout)
                    }
                };
                root.element_at_mut(index)
                    .map(|element| (element, 1))
                    .ok_or_else(|| AugmentError::not_found("flow", flow.name()))
            }
            FlowRef::Conditional(name) => conditional_flows_mut(root)
                .find(|element| element.attribute("name").as_deref() == Some(name.as_str()))
                .map(|element| (element, 2))
                .ok_or_else(|| AugmentError::not_found("flow", name.clone())),
        }
    }
}

/// Insert `child` into `parent` (which sits at `depth`) before the node at
/// `position`, or append when `position` is `None`. Returns the index of the
/// inserted element in `parent.children`.
pub(crate) fn insert_element(
    parent: &mut Element,
    position: Option<usize>,
    child: Element,
    depth: usize,
    layout: &Layout,
) -> usize {
    let Some(child_sep) = layout.separator(depth + 1) else {
        let index = position.unwrap_or(parent.children.len());
        parent.insert(index, Node::Element(child));
        return index;
    };
    if let Some(index) = position {
        let sep = match index.checked_sub(1).map(|prev| &parent.children[prev]) {
            Some(Node::Text(raw)) if raw.trim().is_empty() => raw.clone(),
            _ => child_sep,
        };
        parent.insert(index, Node::Text(sep));
        parent.insert(index, Node::Element(child));
        return index;
    }

    let closing = match parent.children.last() {
        Some(Node::Text(raw)) if raw.trim().is_empty() => {
            let raw = raw.clone();
            parent.children.pop();
            raw
        }
        _ => layout.separator(depth).unwrap_or_default(),
    };
    parent.push(Node::Text(child_sep));
    parent.push(Node::Element(child));
    let index = parent.children.len() - 1;
    parent.push(Node::Text(closing));
    index
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    element
        .child(name)
        .map(|child| child.text().trim().to_string())
        .filter(|text| !text.is_empty())
}

fn steps_of(flow: &Element, direction: Direction) -> Vec<Step> {
    let Some(chain) = flow.child(direction.element_name()) else {
        return Vec::new();
    };
    chain
        .child_elements()
        .filter(|element| element.name() == STEP)
        .map(|step| Step {
            name: child_text(step, "Name").unwrap_or_default(),
            condition: child_text(step, "Condition"),
        })
        .collect()
}

/// Conditional flows in document order, however many `Flows`/`Flow`
/// elements the source uses.
fn conditional_flows(root: &Element) -> impl Iterator<Item = &Element> {
    root.child_elements()
        .filter(|element| element.name() == FLOWS)
        .flat_map(|flows| flows.child_elements().filter(|element| element.name() == FLOW))
}

fn conditional_flows_mut(root: &mut Element) -> impl Iterator<Item = &mut Element> {
    root.child_elements_mut()
        .filter(|element| element.name() == FLOWS)
        .flat_map(|flows| {
            flows
                .child_elements_mut()
                .filter(|element| element.name() == FLOW)
        })
}

fn check_flow_names(root: &Element, origin: &Path) -> Result<()> {
    let mut seen = BTreeSet::new();
    for (idx, flow) in conditional_flows(root).enumerate() {
        let Some(name) = flow.attribute("name") else {
            return Err(AugmentError::Schema {
                path: origin.to_path_buf(),
                reason: format!("conditional flow #{} has no name attribute", idx + 1),
            });
        };
        if !seen.insert(name.clone()) {
            return Err(AugmentError::Schema {
                path: origin.to_path_buf(),
                reason: format!("duplicate conditional flow name '{name}'"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;
