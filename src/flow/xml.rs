//! Lossless XML tree.
//!
//! Every event quick-xml reports is kept with its raw (still escaped) text, so
//! writing an unmodified tree reproduces the source bytes. Only the flow
//! document code ever adds nodes.
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    Decl(String),
    PI(String),
    DocType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Element {
    /// Raw tag content between `<` and `>` (name plus attributes).
    raw: String,
    name_len: usize,
    self_closing: bool,
    pub(crate) children: Vec<Node>,
}

impl Element {
    pub(crate) fn new(name: &str) -> Self {
        Element {
            raw: name.to_string(),
            name_len: name.len(),
            self_closing: false,
            children: Vec::new(),
        }
    }

    pub(crate) fn with_attribute(name: &str, key: &str, value: &str) -> Self {
        let raw = format!("{name} {key}=\"{}\"", quick_xml::escape::escape(value));
        Element {
            raw,
            name_len: name.len(),
            self_closing: false,
            children: Vec::new(),
        }
    }

    fn from_start(start: &BytesStart<'_>, self_closing: bool) -> Result<Self, String> {
        let raw = std::str::from_utf8(start).map_err(|err| err.to_string())?;
        Ok(Element {
            raw: raw.to_string(),
            name_len: start.name().as_ref().len(),
            self_closing,
            children: Vec::new(),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.raw[..self.name_len]
    }

    /// Unescaped value of attribute `key`, if present and well formed.
    pub(crate) fn attribute(&self, key: &str) -> Option<String> {
        let start = BytesStart::from_content(self.raw.as_str(), self.name_len);
        let attr = start.try_get_attribute(key).ok()??;
        attr.unescape_value().ok().map(Cow::into_owned)
    }

    pub(crate) fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub(crate) fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub(crate) fn child(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|element| element.name() == name)
    }

    /// Index into `children` of the first element named `name`.
    pub(crate) fn child_index(&self, name: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|node| matches!(node, Node::Element(element) if element.name() == name))
    }

    pub(crate) fn element_at_mut(&mut self, index: usize) -> Option<&mut Element> {
        match self.children.get_mut(index) {
            Some(Node::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn first_element_index(&self) -> Option<usize> {
        self.children
            .iter()
            .position(|node| matches!(node, Node::Element(_)))
    }

    /// Unescaped text content of this element's direct text children.
    pub(crate) fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                Node::Text(raw) => match quick_xml::escape::unescape(raw) {
                    Ok(text) => out.push_str(&text),
                    Err(_) => out.push_str(raw),
                },
                Node::CData(raw) => out.push_str(raw),
                _ => {}
            }
        }
        out
    }

    pub(crate) fn push_text(&mut self, text: &str) {
        self.self_closing = false;
        self.children
            .push(Node::Text(quick_xml::escape::escape(text).into_owned()));
    }

    pub(crate) fn insert(&mut self, index: usize, node: Node) {
        self.self_closing = false;
        self.children.insert(index, node);
    }

    pub(crate) fn push(&mut self, node: Node) {
        self.self_closing = false;
        self.children.push(node);
    }

    fn write<W: std::io::Write>(&self, writer: &mut Writer<W>) -> std::io::Result<()> {
        let start = BytesStart::from_content(self.raw.as_str(), self.name_len);
        if self.self_closing && self.children.is_empty() {
            return write_event(writer, Event::Empty(start));
        }
        write_event(writer, Event::Start(start))?;
        for child in &self.children {
            child.write(writer)?;
        }
        write_event(writer, Event::End(BytesEnd::new(self.name())))
    }
}

impl Node {
    fn write<W: std::io::Write>(&self, writer: &mut Writer<W>) -> std::io::Result<()> {
        match self {
            Node::Element(element) => element.write(writer),
            Node::Text(raw) => write_event(writer, Event::Text(BytesText::from_escaped(raw.as_str()))),
            Node::CData(raw) => write_event(writer, Event::CData(BytesCData::new(raw.as_str()))),
            Node::Comment(raw) => {
                write_event(writer, Event::Comment(BytesText::from_escaped(raw.as_str())))
            }
            Node::Decl(raw) => write_event(
                writer,
                Event::Decl(BytesDecl::from_start(BytesStart::from_content(
                    raw.as_str(),
                    3,
                ))),
            ),
            Node::PI(raw) => write_event(writer, Event::PI(BytesPI::new(raw.as_str()))),
            Node::DocType(raw) => {
                write_event(writer, Event::DocType(BytesText::from_escaped(raw.as_str())))
            }
        }
    }
}

fn write_event<W: std::io::Write>(writer: &mut Writer<W>, event: Event<'_>) -> std::io::Result<()> {
    writer
        .write_event(event)
        .map_err(|err| std::io::Error::other(err.to_string()))
}

/// Parse `text` into top-level nodes. Errors carry the byte position.
pub(crate) fn parse(text: &str) -> Result<Vec<Node>, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut top = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    loop {
        let event = reader
            .read_event()
            .map_err(|err| format!("{err} at byte {}", reader.error_position()))?;
        let node = match event {
            Event::Start(start) => {
                stack.push(Element::from_start(&start, false)?);
                continue;
            }
            Event::End(end) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| format!("unexpected end tag at byte {}", reader.buffer_position()))?;
                if element.name().as_bytes() != end.name().as_ref() {
                    return Err(format!("mismatched end tag for <{}>", element.name()));
                }
                Node::Element(element)
            }
            Event::Empty(start) => Node::Element(Element::from_start(&start, true)?),
            Event::Text(text) => Node::Text(utf8(&text)?),
            Event::CData(data) => Node::CData(utf8(&data)?),
            Event::Comment(comment) => Node::Comment(utf8(&comment)?),
            Event::Decl(decl) => Node::Decl(utf8(&decl)?),
            Event::PI(pi) => Node::PI(utf8(&pi)?),
            Event::DocType(doctype) => Node::DocType(utf8(&doctype)?),
            Event::Eof => break,
        };
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => top.push(node),
        }
    }
    if let Some(open) = stack.last() {
        return Err(format!("unclosed element <{}>", open.name()));
    }
    Ok(top)
}

/// Serialize top-level nodes back to text.
#[cfg(test)]
pub(crate) fn write(nodes: &[Node]) -> std::io::Result<String> {
    let mut writer = Writer::new(Vec::new());
    for node in nodes {
        node.write(&mut writer)?;
    }
    into_string(writer)
}

/// Serialize a document split around its root element.
pub(crate) fn write_document(
    prolog: &[Node],
    root: &Element,
    epilog: &[Node],
) -> std::io::Result<String> {
    let mut writer = Writer::new(Vec::new());
    for node in prolog {
        node.write(&mut writer)?;
    }
    root.write(&mut writer)?;
    for node in epilog {
        node.write(&mut writer)?;
    }
    into_string(writer)
}

fn into_string(writer: Writer<Vec<u8>>) -> std::io::Result<String> {
    String::from_utf8(writer.into_inner())
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
}

fn utf8(bytes: &[u8]) -> Result<String, String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|err| err.to_string())
}
