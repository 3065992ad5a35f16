//! Error kinds of the import pipeline.
//!
//! Structural problems ([`ParseError`], [`TopologyError`]) abort the stage that hit
//! them. [`ConfigError`]s are mostly reported per joint and do not stop the import.
//! [`NotFoundError`] comes back from name lookups on a finished model.

use std::fmt;

use thiserror::Error;

/// The descriptor could not be turned into a model.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Malformed XML.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// The document is well-formed XML but does not follow the robot schema.
    #[error("robot description rejected: {0}")]
    Schema(String),

    /// Missing required element.
    #[error("missing required element: {element} in {context}")]
    MissingElement {
        /// The missing element name.
        element: &'static str,
        /// Where the element was expected.
        context: String,
    },

    /// Missing required attribute.
    #[error("missing required attribute: {attribute} on {element}")]
    MissingAttribute {
        /// The missing attribute name.
        attribute: &'static str,
        /// The element that should carry it.
        element: String,
    },

    /// Attribute present but unusable.
    #[error("invalid value for {attribute} on {element}: {message}")]
    InvalidAttribute {
        /// The attribute with the invalid value.
        attribute: &'static str,
        /// The element containing the attribute.
        element: String,
        /// Why the value was rejected.
        message: String,
    },

    /// Two `<link>` elements share a name.
    #[error("duplicate link name: {0}")]
    DuplicateLink(String),

    /// Two joints (tree or loop) share a name.
    #[error("duplicate joint name: {0}")]
    DuplicateJoint(String),

    /// An extension element points at a link that does not exist.
    #[error("{element} '{name}' references unknown link '{link}'")]
    UnknownLink {
        /// Element kind, e.g. `fixed_frame`.
        element: &'static str,
        /// Name of the referencing element.
        name: String,
        /// The missing link.
        link: String,
    },

    /// A mesh or texture reference whose syntax cannot be resolved.
    #[error("unresolvable asset reference '{0}'")]
    UnresolvableAssetRef(String),

    /// Reading the descriptor failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    /// Create a missing element error.
    pub fn missing_element(element: &'static str, context: impl Into<String>) -> Self {
        Self::MissingElement {
            element,
            context: context.into(),
        }
    }

    /// Create a missing attribute error.
    pub fn missing_attribute(attribute: &'static str, element: impl Into<String>) -> Self {
        Self::MissingAttribute {
            attribute,
            element: element.into(),
        }
    }

    /// Create an invalid attribute error.
    pub fn invalid_attribute(
        attribute: &'static str,
        element: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidAttribute {
            attribute,
            element: element.into(),
            message: message.into(),
        }
    }
}

/// The joint declarations do not describe a single rooted tree.
#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    /// No links at all.
    #[error("robot has no links")]
    EmptyRobot,

    /// Every link is the child of some joint.
    #[error("no root link found (all links are children of joints)")]
    NoRootLink,

    /// More than one link is never a child.
    #[error("multiple root links found: {0:?}")]
    MultipleRootLinks(Vec<String>),

    /// A joint names a link that does not exist.
    #[error("joint '{joint}' references undefined link '{link}'")]
    UndefinedLink {
        /// The offending joint.
        joint: String,
        /// The link name that did not resolve.
        link: String,
    },

    /// A link is the child of more than one tree joint.
    #[error("link '{link}' is claimed as child by joints {joints:?}")]
    MultipleParents {
        /// The contested link.
        link: String,
        /// Every joint claiming it.
        joints: Vec<String>,
    },

    /// Links the root cannot reach through tree joints (cycle or detached part).
    #[error("links unreachable from root '{root}': {links:?}")]
    Unreachable {
        /// The resolved root.
        root: String,
        /// Links outside the spanning tree.
        links: Vec<String>,
    },
}

/// A configuration value that cannot be applied.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A drive target type other than none/position/velocity.
    #[error("unknown drive target type '{value}' for joint '{joint}'")]
    UnknownDriveTarget {
        /// Joint the value was resolved for.
        joint: String,
        /// The raw configured value.
        value: String,
    },

    /// A numeric option outside its domain.
    #[error("invalid value for {parameter}: {message}")]
    InvalidParameter {
        /// Option name (joint-qualified for overrides).
        parameter: String,
        /// Why the value was rejected.
        message: String,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Reading the configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Create an invalid parameter error.
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

/// Which map a lookup went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Link,
    Joint,
    Material,
    Frame,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Link => "link",
            Self::Joint => "joint",
            Self::Material => "material",
            Self::Frame => "frame",
        };
        f.write_str(s)
    }
}

/// A by-name lookup missed.
#[derive(Debug, Error, PartialEq)]
#[error("{kind} '{name}' not found")]
pub struct NotFoundError {
    /// The map searched.
    pub kind: EntityKind,
    /// The name asked for.
    pub name: String,
}

impl NotFoundError {
    pub fn link(name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Link,
            name: name.into(),
        }
    }

    pub fn joint(name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Joint,
            name: name.into(),
        }
    }

    pub fn material(name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Material,
            name: name.into(),
        }
    }

    pub fn frame(name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Frame,
            name: name.into(),
        }
    }
}

/// Any failure of the import pipeline.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),
}

/// Result type for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;
