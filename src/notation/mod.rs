//! C4 architecture notation codec.
//!
//! Parses a Structurizr-style workspace description into a flat element
//! forest plus relationships, and renders the same shape back to text.
//!
//! ```text
//! workspace "Shop" "Online shop" {
//!     model {
//!         customer = person "Customer" "Buys things"
//!         shop = softwareSystem "Shop" "null" {
//!             web = container "Web App" "null"
//!         }
//!         customer -> shop "Uses"
//!     }
//! }
//! ```

mod lexer;
mod parser;
mod render;


pub use parser::parse;
pub use render::render;

use serde::{Deserialize, Serialize};

/// Kind of a C4 element, in containment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementKind {
    /// A human user of a system.
    Person,
    /// A top-level software system.
    SoftwareSystem,
    /// A deployable unit inside a software system.
    Container,
    /// A code-level component inside a container.
    Component,
}

impl ElementKind {
    /// Keyword used for this kind in the notation.
    pub fn keyword(&self) -> &'static str {
        match self {
            ElementKind::Person => "person",
            ElementKind::SoftwareSystem => "softwareSystem",
            ElementKind::Container => "container",
            ElementKind::Component => "component",
        }
    }

    /// Look up a kind by its notation keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "person" => Some(ElementKind::Person),
            "softwareSystem" => Some(ElementKind::SoftwareSystem),
            "container" => Some(ElementKind::Container),
            "component" => Some(ElementKind::Component),
            _ => None,
        }
    }

    /// The kind an element of this kind must be nested in, `None` for top level.
    pub fn required_parent(&self) -> Option<ElementKind> {
        match self {
            ElementKind::Person | ElementKind::SoftwareSystem => None,
            ElementKind::Container => Some(ElementKind::SoftwareSystem),
            ElementKind::Component => Some(ElementKind::Container),
        }
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementKind::Person => write!(f, "PERSON"),
            ElementKind::SoftwareSystem => write!(f, "SOFTWARE_SYSTEM"),
            ElementKind::Container => write!(f, "CONTAINER"),
            ElementKind::Component => write!(f, "COMPONENT"),
        }
    }
}

impl std::str::FromStr for ElementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PERSON" => Ok(ElementKind::Person),
            "SOFTWARE_SYSTEM" => Ok(ElementKind::SoftwareSystem),
            "CONTAINER" => Ok(ElementKind::Container),
            "COMPONENT" => Ok(ElementKind::Component),
            _ => Err(format!("Unknown element kind: {}", s)),
        }
    }
}

/// Workspace header values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceMeta {
    /// Workspace name.
    pub name: String,
    /// Optional workspace description.
    pub description: Option<String>,
}

/// One element of the model forest.
///
/// `id` and `parent_id` are opaque: identifiers from the text after a parse,
/// database ids before a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotationElement {
    /// Element id.
    pub id: String,
    /// Id of the enclosing element.
    pub parent_id: Option<String>,
    /// Element kind.
    pub kind: ElementKind,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
}

/// A directed relationship between two elements of the same model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotationRelationship {
    /// Id of the source element.
    pub source_id: String,
    /// Id of the destination element.
    pub destination_id: String,
    /// Optional description.
    pub description: Option<String>,
}

/// A whole workspace: header, elements in discovery order, relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotationModel {
    /// Workspace header.
    pub workspace: WorkspaceMeta,
    /// Elements, parents always before their children.
    pub elements: Vec<NotationElement>,
    /// Relationships in source order.
    pub relationships: Vec<NotationRelationship>,
}

/// Identifier used for an element in rendered text.
///
/// Every character that is not alphanumeric becomes a hyphen, so names that
/// differ only in punctuation share a token. `this` is reserved for the
/// enclosing element and gets a suffix.
pub fn display_token(name: &str) -> String {
    let token: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    match token.as_str() {
        "" => "unnamed".to_string(),
        "this" => "this-element".to_string(),
        _ => token,
    }
}
