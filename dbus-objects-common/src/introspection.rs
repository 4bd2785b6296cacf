//! Introspection document data model.
//!
//! Only the subset of the introspection DTD the object layer produces is understood:
//! a `<node>` root with `<interface>` elements, each holding `<method>`, `<property>` and
//! `<signal>` children with `<arg>` grandchildren, and `<node name>` stubs for child objects.
//! Annotations and other elements are skipped.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

use serde::Deserialize;

use crate::{signature::FieldDescriptor, Error, Result};

pub const DOCTYPE: &str = r#"<!DOCTYPE node PUBLIC "-//freedesktop//DTD D-BUS Object Introspection 1.0//EN"
"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd">"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    fn parse(access: &str) -> Result<Self> {
        match access {
            "read" => Ok(Access::Read),
            "write" => Ok(Access::Write),
            "readwrite" => Ok(Access::ReadWrite),
            other => Err(Error::InvalidIntrospection(format!(
                "Unknown property access: {other}"
            ))),
        }
    }
}

impl Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::ReadWrite => "readwrite",
        };

        f.write_str(access)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodDescription {
    pub inputs: Vec<FieldDescriptor>,
    pub outputs: Vec<FieldDescriptor>,
}

impl MethodDescription {
    /// Joined input type signature
    pub fn input_signature(&self) -> String {
        self.inputs
            .iter()
            .map(|arg| arg.signature.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescription {
    pub field: FieldDescriptor,
    pub access: Access,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalDescription {
    pub args: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceDescription {
    pub methods: BTreeMap<String, MethodDescription>,
    pub properties: BTreeMap<String, PropertyDescription>,
    pub signals: BTreeMap<String, SignalDescription>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeDescription {
    pub name: Option<String>,
    pub interfaces: BTreeMap<String, InterfaceDescription>,
    pub children: Vec<String>,
}

#[derive(Deserialize)]
struct XmlNode {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "interface", default)]
    interfaces: Vec<XmlInterface>,
    #[serde(rename = "node", default)]
    nodes: Vec<XmlChildNode>,
}

#[derive(Deserialize)]
struct XmlChildNode {
    #[serde(rename = "@name", default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct XmlInterface {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "method", default)]
    methods: Vec<XmlMember>,
    #[serde(rename = "property", default)]
    properties: Vec<XmlProperty>,
    #[serde(rename = "signal", default)]
    signals: Vec<XmlMember>,
}

#[derive(Deserialize)]
struct XmlMember {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "arg", default)]
    args: Vec<XmlArg>,
}

#[derive(Deserialize)]
struct XmlArg {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@type")]
    signature: String,
    #[serde(rename = "@direction", default)]
    direction: Option<String>,
}

#[derive(Deserialize)]
struct XmlProperty {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@type")]
    signature: String,
    #[serde(rename = "@access")]
    access: String,
}

impl XmlArg {
    fn into_field(self) -> FieldDescriptor {
        FieldDescriptor {
            signature: self.signature,
            name: self.name,
        }
    }
}

/// Parse an introspection document
pub fn parse(xml: &str) -> Result<NodeDescription> {
    let node: XmlNode =
        quick_xml::de::from_str(xml).map_err(|e| Error::InvalidIntrospection(e.to_string()))?;

    let mut result = NodeDescription {
        name: node.name,
        interfaces: BTreeMap::new(),
        children: node.nodes.into_iter().filter_map(|node| node.name).collect(),
    };

    for interface in node.interfaces {
        let mut description = InterfaceDescription::default();

        for method in interface.methods {
            let mut method_description = MethodDescription::default();

            for arg in method.args {
                // Method args are inputs unless stated otherwise
                if arg.direction.as_deref() == Some("out") {
                    method_description.outputs.push(arg.into_field());
                } else {
                    method_description.inputs.push(arg.into_field());
                }
            }

            description.methods.insert(method.name, method_description);
        }

        for property in interface.properties {
            description.properties.insert(
                property.name.clone(),
                PropertyDescription {
                    field: FieldDescriptor::new(property.signature, Some(&property.name)),
                    access: Access::parse(&property.access)?,
                },
            );
        }

        for signal in interface.signals {
            description.signals.insert(
                signal.name,
                SignalDescription {
                    args: signal.args.into_iter().map(XmlArg::into_field).collect(),
                },
            );
        }

        result.interfaces.insert(interface.name, description);
    }

    Ok(result)
}
