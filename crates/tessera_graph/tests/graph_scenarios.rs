// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenarios over the public API.

use std::sync::mpsc;
use tessera_graph::nodes::flow::{Branch, EventEntry, PreviewOutput};
use tessera_graph::nodes::group::GroupNode;
use tessera_graph::nodes::math::{ColorConstant, FloatConstant, Mix, Scale};
use tessera_graph::{
    copy_nodes, create_standard_registry, paste_nodes, ExecParams, Graph, GraphEvent, GraphSettings, NodeKey,
    SocketRole, SocketType, Value,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn output(graph: &Graph, node: NodeKey, index: usize) -> tessera_graph::SocketKey {
    graph.node(node).unwrap().output(index).unwrap()
}

fn input(graph: &Graph, node: NodeKey, index: usize) -> tessera_graph::SocketKey {
    graph.node(node).unwrap().input(index).unwrap()
}

fn assert_tables_symmetric(graph: &Graph) {
    for edge in graph.edges() {
        assert!(graph.upstream_of(edge.to).any(|s| s == edge.from));
        assert!(graph.downstream_of(edge.from).any(|s| s == edge.to));
    }
    for (_, node) in graph.nodes() {
        for socket in node.inputs() {
            assert!(graph.upstream_of(*socket).count() <= 1);
        }
    }
}

#[test]
fn eviction_keeps_single_producer() {
    init_tracing();
    let (tx, rx) = mpsc::channel();
    let mut graph = Graph::new("eviction").with_event_sink(tx);
    let a = graph.add_node(FloatConstant::new(1.0));
    let d = graph.add_node(FloatConstant::new(2.0));
    let c = graph.add_node(Scale::new(1.0));

    let (a_x, d_y, c_in) = (output(&graph, a, 0), output(&graph, d, 0), input(&graph, c, 0));
    assert!(graph.connect(d_y, c_in));
    rx.try_iter().for_each(drop);

    assert!(graph.connect(a_x, c_in));
    assert_eq!(graph.upstream_of(c_in).collect::<Vec<_>>(), vec![a_x]);
    assert_eq!(graph.downstream_of(d_y).count(), 0);
    assert_eq!(
        rx.try_iter().collect::<Vec<_>>(),
        vec![
            GraphEvent::EdgeRemoved { from: d_y, to: c_in },
            GraphEvent::EdgeAdded { from: a_x, to: c_in },
        ]
    );
    assert_tables_symmetric(&graph);

    graph.evaluate(c, &ExecParams::default()).unwrap();
    assert_eq!(graph.socket(output(&graph, c, 0)).unwrap().value(), Value::Float(1.0));
}

#[test]
fn edits_keep_tables_symmetric() {
    let mut graph = Graph::default();
    let constants: Vec<_> = (0..4).map(|i| graph.add_node(FloatConstant::new(i as f32))).collect();
    let scales: Vec<_> = (0..4).map(|_| graph.add_node(Scale::new(2.0))).collect();

    for (i, from) in constants.iter().enumerate() {
        for (j, to) in scales.iter().enumerate() {
            if (i + j) % 2 == 0 {
                let (out, inp) = (output(&graph, *from, 0), input(&graph, *to, 0));
                graph.connect(out, inp);
            }
        }
        assert_tables_symmetric(&graph);
    }
    graph.remove_node(constants[2]);
    assert_tables_symmetric(&graph);
    let (out, inp) = (output(&graph, scales[0], 0), input(&graph, scales[1], 0));
    assert!(graph.connect(inp, out));
    graph.disconnect_all(scales[1]);
    assert_tables_symmetric(&graph);
}

#[test]
fn doubling_scenario() {
    let mut graph = Graph::default();
    let constant = graph.add_node(FloatConstant::new(3.0));
    let scale = graph.add_node(Scale::new(2.0));
    let (out, inp) = (output(&graph, constant, 0), input(&graph, scale, 0));
    assert!(graph.connect(out, inp));

    graph.evaluate(scale, &ExecParams::default()).unwrap();
    assert_eq!(graph.socket(output(&graph, scale, 0)).unwrap().value(), Value::Float(6.0));
}

#[test]
fn event_graph_follows_selected_branch() {
    let mut graph = Graph::default();
    let entry = graph.add_node(EventEntry);
    let condition = graph.add_node(FloatConstant::new(1.0));
    let branch = graph.add_node(Branch);
    let yes = graph.add_node(PreviewOutput);
    let no = graph.add_node(PreviewOutput);

    let flow = |graph: &Graph, node: NodeKey, index: usize| graph.node(node).unwrap().output_flow(index).unwrap();
    let exec = |graph: &Graph, node: NodeKey| graph.node(node).unwrap().input_flow().unwrap();
    let pairs = [
        (flow(&graph, entry, 0), exec(&graph, branch)),
        (output(&graph, condition, 0), input(&graph, branch, 0)),
        (flow(&graph, branch, 0), exec(&graph, yes)),
        (flow(&graph, branch, 1), exec(&graph, no)),
    ];
    for (from, to) in pairs {
        assert!(graph.connect(from, to));
    }
    graph.add_entry_node(entry);

    graph.run_entry_points(&ExecParams::default()).unwrap();
    assert!(graph.node(yes).unwrap().last_execution().is_some());
    assert_eq!(graph.node(no).unwrap().last_execution(), None);
    assert_eq!(
        graph.node(branch).unwrap().selected_exit(),
        Some(flow(&graph, branch, 0))
    );
}

fn texture_graph() -> (Graph, NodeKey) {
    let mut graph = Graph::new("texture");
    let red = graph.add_node(ColorConstant::new([1.0, 0.0, 0.0, 1.0]));
    let blue = graph.add_node(ColorConstant::new([0.0, 0.0, 1.0, 1.0]));
    let amount = graph.add_node(FloatConstant::new(0.25));
    let mix = graph.add_node(Mix);
    let preview = graph.add_node(PreviewOutput);
    for (from, to) in [
        (output(&graph, red, 0), input(&graph, mix, 0)),
        (output(&graph, blue, 0), input(&graph, mix, 1)),
        (output(&graph, amount, 0), input(&graph, mix, 2)),
        (output(&graph, mix, 0), input(&graph, preview, 0)),
    ] {
        assert!(graph.connect(from, to));
    }
    graph.set_master_node(Some(preview));
    (graph, preview)
}

fn assert_same_structure(original: &Graph, loaded: &Graph) {
    assert_eq!(loaded.node_count(), original.node_count());
    assert_eq!(loaded.edge_count(), original.edge_count());
    for edge in original.edges() {
        let from = original.socket(edge.from).unwrap();
        let to = original.socket(edge.to).unwrap();
        let from_node = original.node(from.node()).unwrap();
        let to_node = original.node(to.node()).unwrap();

        let loaded_from = loaded.find_by_source_id(from_node.source_id()).unwrap();
        let loaded_to = loaded.find_by_source_id(to_node.source_id()).unwrap();
        let from_socket = loaded
            .node(loaded_from)
            .unwrap()
            .socket_at(from_node.socket_index(edge.from).unwrap())
            .unwrap();
        let to_socket = loaded
            .node(loaded_to)
            .unwrap()
            .socket_at(to_node.socket_index(edge.to).unwrap())
            .unwrap();

        assert!(loaded.connected(from_socket, to_socket));
        assert_eq!(loaded.socket(from_socket).unwrap().role(), from.role());
        assert_eq!(loaded.socket(to_socket).unwrap().role(), to.role());
        assert_eq!(loaded.socket(to_socket).unwrap().name(), to.name());
    }
}

#[test]
fn binary_and_xml_round_trip() {
    init_tracing();
    let registry = create_standard_registry();
    let (mut graph, preview) = texture_graph();

    let bytes = graph.to_bytes().unwrap();
    let from_binary = Graph::from_bytes(&bytes, &registry).unwrap();
    assert_same_structure(&graph, &from_binary);

    let text = graph.to_xml().unwrap();
    let mut from_xml = Graph::from_xml(&text, &registry).unwrap();
    assert_same_structure(&graph, &from_xml);

    let preview_id = graph.node(preview).unwrap().source_id();
    let loaded_preview = from_xml.find_by_source_id(preview_id).unwrap();
    assert_eq!(from_xml.master_node(), Some(loaded_preview));

    from_xml.evaluate(loaded_preview, &ExecParams::default()).unwrap();
    let result = output(&from_xml, loaded_preview, 0);
    assert_eq!(
        from_xml.socket(result).unwrap().value(),
        Value::Color([0.75, 0.0, 0.25, 1.0])
    );
}

#[test]
fn pasted_group_evaluates_independently() {
    let registry = create_standard_registry();
    let mut inner = Graph::new("double");
    let scale = inner.add_node(Scale::new(2.0));
    let scale_id = inner.node(scale).unwrap().source_id();
    let group = GroupNode::new(inner)
        .with_input("In", SocketType::Float, scale_id, 0)
        .with_output("Out", SocketType::Float, scale_id, 0);

    let mut graph = Graph::default();
    let constant = graph.add_node(FloatConstant::new(4.0));
    let group = graph.add_node(group);
    let (out, inp) = (output(&graph, constant, 0), input(&graph, group, 0));
    assert!(graph.connect(out, inp));

    let clipboard = copy_nodes(&mut graph, &[constant, group]).unwrap();
    let pasted = paste_nodes(&mut graph, &clipboard, &registry).unwrap();
    assert_eq!(pasted.len(), 2);
    assert_eq!(graph.edge_count(), 2);

    // Retune the pasted constant; the original chain is unaffected
    graph
        .node_mut(pasted[0])
        .unwrap()
        .kind_mut()
        .set_property("value", &tessera_graph::Property::Value(Value::Float(10.0)));
    let params = ExecParams::default();
    graph.evaluate(group, &params).unwrap();
    graph.evaluate(pasted[1], &params).unwrap();

    assert_eq!(graph.socket(output(&graph, group, 0)).unwrap().value(), Value::Float(8.0));
    assert_eq!(graph.socket(output(&graph, pasted[1], 0)).unwrap().value(), Value::Float(20.0));
    assert_eq!(
        graph.socket(input(&graph, pasted[1], 0)).unwrap().role(),
        SocketRole::Input
    );
}

#[test]
fn settings_file_round_trip() {
    let mut settings = GraphSettings::default();
    settings.max_loop_iterations = 32;
    settings.default_params.resolution = [512, 512];

    let path = std::env::temp_dir().join(format!("tessera-settings-{}.ron", std::process::id()));
    settings.save(&path).unwrap();
    let loaded = GraphSettings::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, settings);

    let graph = Graph::default().with_settings(loaded);
    assert_eq!(graph.settings().max_loop_iterations, 32);
}
