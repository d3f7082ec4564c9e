//! # Capability Descriptors
//!
//! The in-memory shape of a remote object's interfaces, built from the
//! capability-description document returned by introspection.
//!
//! ## Philosophy
//!
//! - **Positional Signatures**: A method's signature is the concatenation of
//!   its `in` argument type codes in document order; `out` arguments never
//!   count towards what a caller passes.
//! - **Lenient Where Harmless**: Unknown elements (annotations, nested nodes'
//!   own children) are skipped, a missing `direction` means `in`, and an
//!   unknown property `access` is recorded as `None`.

use roxmltree::Document;
use roxmltree::Node;
use roxmltree::ParsingOptions;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The document is not well-formed XML.
    #[error("malformed capability document: {0}")]
    Xml(String),
    #[error("<{element}> element is missing its '{attribute}' attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("argument of '{member}' has unknown direction '{direction}'")]
    UnknownDirection { member: String, direction: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    /// Concatenated type codes of the `in` arguments.
    pub signature: String,
    pub arg_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "read" => Some(Access::Read),
            "write" => Some(Access::Write),
            "readwrite" => Some(Access::ReadWrite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub signature: String,
    pub access: Option<Access>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalDescriptor {
    pub name: String,
    pub signature: String,
    pub arg_count: usize,
}

/// Everything one interface element declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
    pub properties: Vec<PropertyDescriptor>,
    pub signals: Vec<SignalDescriptor>,
}

impl InterfaceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            properties: Vec::new(),
            signals: Vec::new(),
        }
    }

    pub fn has_properties(&self) -> bool {
        !self.properties.is_empty()
    }

    /// Looks up a method; with repeated names the last declaration wins.
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().rev().find(|m| m.name == name)
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDescriptor> {
        self.signals.iter().rev().find(|s| s.name == name)
    }
}

/// Parses a capability document into its interfaces, in document order.
///
/// Interfaces are collected from anywhere in the tree, including nested
/// `node` elements.
pub fn parse(document: &str) -> Result<Vec<InterfaceDescriptor>> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(document, options).map_err(|e| Error::Xml(e.to_string()))?;
    doc.descendants()
        .filter(|node| node.has_tag_name("interface"))
        .map(parse_interface)
        .collect()
}

fn parse_interface(node: Node) -> Result<InterfaceDescriptor> {
    let mut interface = InterfaceDescriptor::new(required(node, "interface", "name")?);
    for child in node.children().filter(|child| child.is_element()) {
        match child.tag_name().name() {
            "method" => interface.methods.push(parse_method(child)?),
            "property" => interface.properties.push(parse_property(child)?),
            "signal" => interface.signals.push(parse_signal(child)?),
            _ => {}
        }
    }
    Ok(interface)
}

fn parse_method(node: Node) -> Result<MethodDescriptor> {
    let name = required(node, "method", "name")?;
    let mut signature = String::new();
    let mut arg_count = 0;
    for arg in node.children().filter(|child| child.has_tag_name("arg")) {
        match arg.attribute("direction").unwrap_or("in") {
            "in" => {
                signature.push_str(required(arg, "arg", "type")?);
                arg_count += 1;
            }
            "out" => {}
            other => {
                return Err(Error::UnknownDirection {
                    member: name.to_string(),
                    direction: other.to_string(),
                });
            }
        }
    }
    Ok(MethodDescriptor {
        name: name.to_string(),
        signature,
        arg_count,
    })
}

fn parse_property(node: Node) -> Result<PropertyDescriptor> {
    Ok(PropertyDescriptor {
        name: required(node, "property", "name")?.to_string(),
        signature: node.attribute("type").unwrap_or_default().to_string(),
        access: node.attribute("access").and_then(Access::parse),
    })
}

fn parse_signal(node: Node) -> Result<SignalDescriptor> {
    let name = required(node, "signal", "name")?;
    let mut signature = String::new();
    let mut arg_count = 0;
    for arg in node.children().filter(|child| child.has_tag_name("arg")) {
        signature.push_str(required(arg, "arg", "type")?);
        arg_count += 1;
    }
    Ok(SignalDescriptor {
        name: name.to_string(),
        signature,
        arg_count,
    })
}

fn required<'a>(node: Node<'a, '_>, element: &'static str, attribute: &'static str) -> Result<&'a str> {
    node.attribute(attribute)
        .ok_or(Error::MissingAttribute { element, attribute })
}
