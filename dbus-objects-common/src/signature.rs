use std::fmt::{self, Display};

use bson::Bson;
use serde::{Deserialize, Serialize};

/// Abstract value kind, which maps onto a wire type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Auto,
    String,
    Number,
    Boolean,
    List,
    Map,
}

impl Kind {
    pub const ALL: [Kind; 6] = [
        Kind::Auto,
        Kind::String,
        Kind::Number,
        Kind::Boolean,
        Kind::List,
        Kind::Map,
    ];

    /// Parse a kind name. Unknown names degrade to [Kind::Auto]
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "string" => Kind::String,
            "number" => Kind::Number,
            "boolean" => Kind::Boolean,
            "list" | "array" => Kind::List,
            "map" | "object" => Kind::Map,
            _ => Kind::Auto,
        }
    }

    pub fn of_value(value: &Bson) -> Self {
        match value {
            Bson::String(_) => Kind::String,
            Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_) => Kind::Number,
            Bson::Boolean(_) => Kind::Boolean,
            Bson::Array(_) => Kind::List,
            Bson::Document(_) => Kind::Map,
            _ => Kind::Auto,
        }
    }
}

pub fn signature_of(kind: Kind) -> &'static str {
    match kind {
        Kind::Auto => "v",
        Kind::String => "s",
        Kind::Number => "d",
        Kind::Boolean => "b",
        Kind::List => "av",
        Kind::Map => "a{sv}",
    }
}

/// Type code with an optional name. Describes method arguments, property types and signal arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub signature: String,
    pub name: Option<String>,
}

impl FieldDescriptor {
    pub fn new(signature: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            signature: signature.into(),
            name: name.map(str::to_owned),
        }
    }
}

impl Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}: {}", name, self.signature),
            None => write!(f, "{}", self.signature),
        }
    }
}

pub fn describe_field(kind: Kind, name: Option<&str>) -> FieldDescriptor {
    FieldDescriptor::new(signature_of(kind), name)
}
