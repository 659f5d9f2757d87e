// SPDX-License-Identifier: MIT OR Apache-2.0
//! XML graph format.
//!
//! Mirrors the binary layout element for element:
//!
//! ```xml
//! <graph type="TGRF" version="1">
//!   <nodes>
//!     <node id="0" type="scale" version="1" source="..." name="scale">
//!       <properties><property name="factor" kind="float" value="2"/></properties>
//!       <inputs><socket id="1" name="In" type="float" role="input"/></inputs>
//!       <outputs>...</outputs>
//!       <output-flows/>
//!     </node>
//!   </nodes>
//!   <master id="0"/>
//!   <entrypoints><entry id="0"/></entrypoints>
//!   <upstream><edge from-node="0" from-socket="1" to-node="2" to-socket="3"/></upstream>
//!   <downstream>...</downstream>
//! </graph>
//! ```

use super::{
    build_graph, capture_graph, EdgeRecord, GraphRecord, NodeRecord, PersistError, SocketRecord, FORMAT_VERSION,
    GRAPH_TAG,
};
use crate::graph::Graph;
use crate::node::NodeRegistry;
use crate::socket::SocketRole;
use crate::value::{Properties, Property, SocketType, Value};
use indexmap::IndexMap;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::str::FromStr;
use uuid::Uuid;

fn tag_text() -> String {
    String::from_utf8_lossy(&GRAPH_TAG.to_le_bytes()).into_owned()
}

// ----------------------------------------------------------------------
// Writing
// ----------------------------------------------------------------------

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn element(name: &str, attributes: &[(&str, &str)]) -> BytesStart<'static> {
        let mut start = BytesStart::new(name.to_string());
        for attribute in attributes {
            start.push_attribute(*attribute);
        }
        start
    }

    fn open(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), PersistError> {
        self.writer.write_event(Event::Start(Self::element(name, attributes)))?;
        Ok(())
    }

    fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), PersistError> {
        self.writer.write_event(Event::Empty(Self::element(name, attributes)))?;
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<(), PersistError> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn write_document(&mut self, graph: &GraphRecord) -> Result<(), PersistError> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let (tag, version) = (tag_text(), FORMAT_VERSION.to_string());
        self.open("graph", &[("type", tag.as_str()), ("version", version.as_str())])?;
        self.write_body(graph)?;
        self.close("graph")
    }

    fn write_body(&mut self, graph: &GraphRecord) -> Result<(), PersistError> {
        if graph.nodes.is_empty() {
            self.empty("nodes", &[])?;
        } else {
            self.open("nodes", &[])?;
            for node in &graph.nodes {
                self.write_node(node)?;
            }
            self.close("nodes")?;
        }

        if let Some(master) = graph.master {
            self.empty("master", &[("id", master.to_string().as_str())])?;
        }

        self.open("entrypoints", &[])?;
        for entry in &graph.entries {
            self.empty("entry", &[("id", entry.to_string().as_str())])?;
        }
        self.close("entrypoints")?;

        for (name, edges) in [("upstream", &graph.upstream), ("downstream", &graph.downstream)] {
            self.open(name, &[])?;
            for edge in edges {
                let ids = [edge.from_node, edge.from_socket, edge.to_node, edge.to_socket].map(|id| id.to_string());
                self.empty(
                    "edge",
                    &[
                        ("from-node", ids[0].as_str()),
                        ("from-socket", ids[1].as_str()),
                        ("to-node", ids[2].as_str()),
                        ("to-socket", ids[3].as_str()),
                    ],
                )?;
            }
            self.close(name)?;
        }
        Ok(())
    }

    fn write_node(&mut self, node: &NodeRecord) -> Result<(), PersistError> {
        let (id, version, source) = (
            node.id.to_string(),
            node.version.to_string(),
            node.source_id.to_string(),
        );
        self.open(
            "node",
            &[
                ("id", id.as_str()),
                ("type", node.type_name.as_str()),
                ("version", version.as_str()),
                ("source", source.as_str()),
                ("name", node.name.as_str()),
            ],
        )?;

        self.open("properties", &[])?;
        for (name, property) in &node.properties {
            let (kind, value) = property.to_text();
            self.empty(
                "property",
                &[("name", name.as_str()), ("kind", kind), ("value", value.as_str())],
            )?;
        }
        self.close("properties")?;

        if let Some(subgraph) = &node.subgraph {
            self.open("subgraph", &[])?;
            self.write_body(subgraph)?;
            self.close("subgraph")?;
        }

        for (name, sockets) in [
            ("inputs", &node.inputs),
            ("outputs", &node.outputs),
            ("output-flows", &node.output_flows),
        ] {
            self.open(name, &[])?;
            for socket in sockets {
                self.write_socket(socket)?;
            }
            self.close(name)?;
        }
        if let Some(socket) = &node.input_flow {
            self.open("input-flow", &[])?;
            self.write_socket(socket)?;
            self.close("input-flow")?;
        }
        self.close("node")
    }

    fn write_socket(&mut self, socket: &SocketRecord) -> Result<(), PersistError> {
        let id = socket.id.to_string();
        let mut attributes = vec![
            ("id", id.as_str()),
            ("name", socket.name.as_str()),
            ("type", socket.socket_type.name()),
            ("role", socket.role.name()),
        ];
        let value_type = socket.value.socket_type().name();
        let value = socket.value.to_text();
        if !socket.value.is_empty() {
            attributes.push(("value-type", value_type));
            attributes.push(("value", value.as_str()));
        }
        self.empty("socket", &attributes)
    }
}

// ----------------------------------------------------------------------
// Reading
// ----------------------------------------------------------------------

/// Minimal element tree; the format keeps all data in attributes
#[derive(Debug, Default)]
struct XmlElement {
    name: String,
    attributes: IndexMap<String, String>,
    children: Vec<XmlElement>,
}

impl XmlElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, PersistError> {
        let mut attributes = IndexMap::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value().map_err(quick_xml::Error::from)?.into_owned();
            attributes.insert(key, value);
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            children: Vec::new(),
        })
    }

    fn attr(&self, name: &str) -> Result<&str, PersistError> {
        self.attributes
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| PersistError::Malformed(format!("<{}> is missing '{}'", self.name, name)))
    }

    fn parse_attr<T: FromStr>(&self, name: &str) -> Result<T, PersistError> {
        let text = self.attr(name)?;
        text.parse()
            .map_err(|_| PersistError::Malformed(format!("<{}> has invalid '{}': {:?}", self.name, name, text)))
    }

    fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    fn children_of(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        self.child(name).into_iter().flat_map(|child| child.children.iter())
    }
}

fn parse_document(text: &str) -> Result<XmlElement, PersistError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root = None;
    loop {
        let finished = match reader.read_event()? {
            Event::Start(start) => {
                stack.push(XmlElement::from_start(&start)?);
                None
            }
            Event::Empty(start) => Some(XmlElement::from_start(&start)?),
            Event::End(_) => stack.pop(),
            Event::Eof => break,
            _ => None,
        };
        if let Some(element) = finished {
            match stack.last_mut() {
                Some(parent) => parent.children.push(element),
                None => root = Some(element),
            }
        }
    }

    if !stack.is_empty() {
        return Err(PersistError::Malformed("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| PersistError::Malformed("no root element".to_string()))
}

/// Keep the entries that parse; a bad entry is logged and skipped
fn readable<T>(
    what: &str,
    items: impl Iterator<Item = Result<T, PersistError>>,
) -> Vec<T> {
    items
        .filter_map(|item| match item {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::warn!("Skipping unreadable {}: {err}", what);
                None
            }
        })
        .collect()
}

fn read_graph(element: &XmlElement) -> GraphRecord {
    let nodes = readable(
        "node",
        element
            .children_of("nodes")
            .filter(|child| child.name == "node")
            .map(read_node),
    );

    let master = element.child("master").and_then(|master| match master.parse_attr("id") {
        Ok(id) => Some(id),
        Err(err) => {
            tracing::warn!("Ignoring unreadable master node: {err}");
            None
        }
    });
    let entries = readable(
        "entry point",
        element.children_of("entrypoints").map(|entry| entry.parse_attr("id")),
    );

    let edges = |name: &str| {
        readable(
            "edge",
            element.children_of(name).map(|edge| -> Result<EdgeRecord, PersistError> {
                Ok(EdgeRecord {
                    from_node: edge.parse_attr("from-node")?,
                    from_socket: edge.parse_attr("from-socket")?,
                    to_node: edge.parse_attr("to-node")?,
                    to_socket: edge.parse_attr("to-socket")?,
                })
            }),
        )
    };

    GraphRecord {
        nodes,
        master,
        entries,
        upstream: edges("upstream"),
        downstream: edges("downstream"),
    }
}

fn read_node(element: &XmlElement) -> Result<NodeRecord, PersistError> {
    let source = element.attr("source")?;
    let source_id = Uuid::parse_str(source)
        .map_err(|err| PersistError::Malformed(format!("invalid source id {source:?}: {err}")))?;

    let mut properties = Properties::new();
    for property in element.children_of("properties") {
        let name = property.attr("name")?;
        match Property::from_text(property.attr("kind")?, property.attr("value")?) {
            Some(value) => {
                properties.insert(name.to_string(), value);
            }
            None => tracing::warn!("Skipping unreadable property '{}'", name),
        }
    }

    let subgraph = element.child("subgraph").map(read_graph);
    let sockets = |name: &str| {
        element
            .children_of(name)
            .map(read_socket)
            .collect::<Result<Vec<_>, _>>()
    };
    let input_flow = match element.children_of("input-flow").next() {
        Some(socket) => Some(read_socket(socket)?),
        None => None,
    };

    Ok(NodeRecord {
        id: element.parse_attr("id")?,
        type_name: element.attr("type")?.to_string(),
        version: element.parse_attr("version")?,
        source_id,
        name: element.attr("name")?.to_string(),
        properties,
        subgraph,
        inputs: sockets("inputs")?,
        outputs: sockets("outputs")?,
        output_flows: sockets("output-flows")?,
        input_flow,
    })
}

fn read_socket(element: &XmlElement) -> Result<SocketRecord, PersistError> {
    let name = element.attr("name")?;
    let type_name = element.attr("type")?;
    let socket_type = SocketType::from_name(type_name)
        .ok_or_else(|| PersistError::Malformed(format!("unknown socket type {type_name:?}")))?;
    let role_name = element.attr("role")?;
    let role = SocketRole::from_name(role_name)
        .ok_or_else(|| PersistError::Malformed(format!("unknown socket role {role_name:?}")))?;

    let value = match (element.attributes.get("value-type"), element.attributes.get("value")) {
        (Some(kind), Some(text)) => SocketType::from_name(kind)
            .and_then(|ty| Value::from_text(ty, text))
            .unwrap_or_else(|| {
                tracing::warn!("Dropping unreadable value of socket '{}'", name);
                Value::Empty
            }),
        _ => Value::Empty,
    };

    Ok(SocketRecord {
        id: element.parse_attr("id")?,
        name: name.to_string(),
        socket_type,
        role,
        value,
    })
}

impl Graph {
    /// Write the graph as an XML document. Reassigns serialization ids first.
    pub fn to_xml(&mut self) -> Result<String, PersistError> {
        self.assign_ids();
        let record = capture_graph(self);
        let mut out = XmlOut::new();
        out.write_document(&record)?;
        String::from_utf8(out.writer.into_inner()).map_err(|err| PersistError::Malformed(err.to_string()))
    }

    /// Read a graph from an XML document, creating node kinds through `registry`
    pub fn from_xml(text: &str, registry: &NodeRegistry) -> Result<Graph, PersistError> {
        let root = parse_document(text)?;
        if root.name != "graph" || root.attr("type")? != tag_text() {
            return Err(PersistError::Malformed(format!("<{}> is not a graph document", root.name)));
        }
        let version: u16 = root.parse_attr("version")?;
        if version > FORMAT_VERSION {
            return Err(PersistError::UnsupportedVersion(version));
        }
        Ok(build_graph(read_graph(&root), registry))
    }
}
