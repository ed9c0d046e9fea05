//! Property-based invariants over graph construction, templates and frames.

use proptest::prelude::*;
use qgraph_core::{
    build_graph, execute_with, ConnectorRegistry, ExecutionOptions, Frame, GraphConfigError,
    JoinContext, JoinKind, MemoryConnector, QueryGraph, QueryNode, QueryTemplate, SourceKind,
    Value,
};
use std::collections::HashMap;
use std::sync::Arc;

fn memory_node(name: &str, query: &str, response: Frame) -> QueryNode {
    let connector = Arc::new(
        MemoryConnector::new(format!("{name}_conn"), SourceKind::Sql).with_fallback(response),
    );
    QueryNode::new(name, QueryTemplate::parse(query).unwrap(), connector)
}

fn chain_graph(names: &[String]) -> QueryGraph {
    let mut graph = QueryGraph::new(ConnectorRegistry::new());
    for name in names {
        let frame = Frame::from_columns(vec![("k", vec![Value::Int(1)])]).unwrap();
        graph.add_node(memory_node(name, "SELECT 1", frame)).unwrap();
    }
    for pair in names.windows(2) {
        graph
            .attach_child(
                &pair[0],
                &pair[1],
                JoinContext::new(JoinKind::Left, vec![("k".into(), "k".into())]),
            )
            .unwrap();
    }
    graph.resolve_root().unwrap();
    graph
}

proptest! {
    /// §1 — the node names of a built graph equal the names declared in the
    /// document.
    #[test]
    fn built_graph_preserves_declared_node_names(
        names in prop::collection::hash_set("[a-z][a-z0-9_]{2,7}", 1..5)
    ) {
        let names: Vec<String> = names.into_iter().collect();
        let mut doc = String::from("CONNECT\n    m <- Postgres(db_name='x')\nRETRIEVE\n");
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                doc.push_str("    ---\n");
            }
            doc.push_str("    QUERY |\n        SELECT 1;\n    USING m\n    AS ");
            doc.push_str(name);
            doc.push('\n');
        }
        if names.len() > 1 {
            doc.push_str("JOIN\n");
            for pair in names.windows(2) {
                doc.push_str(&format!("    LEFT ({}[k] ==> {}[k])\n", pair[0], pair[1]));
            }
        }

        let graph = build_graph(&doc).unwrap();
        let mut declared: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut built: Vec<&str> = graph.node_names();
        declared.sort_unstable();
        built.sort_unstable();
        prop_assert_eq!(declared, built);
        prop_assert_eq!(&graph.root().unwrap().name, &names[0]);
    }

    /// §2 — attaching a node under any of its own descendants is a cycle and
    /// leaves the graph unchanged.
    #[test]
    fn attaching_under_a_descendant_is_rejected(
        depth in 2usize..6,
        seed in any::<u64>(),
    ) {
        let names: Vec<String> = (0..depth).map(|i| format!("n{i}")).collect();
        let mut graph = chain_graph(&names);
        let target = 1 + (seed as usize) % (depth - 1);

        let err = graph
            .attach_child(
                &names[target],
                &names[0],
                JoinContext::new(JoinKind::Left, vec![("k".into(), "k".into())]),
            )
            .unwrap_err();
        let is_cycle_err = matches!(err, GraphConfigError::Cycle { .. });
        prop_assert!(is_cycle_err);
        prop_assert!(graph.node(&names[0]).unwrap().parent().is_none());
        prop_assert!(graph.node(&names[target]).unwrap().children().is_empty());
    }

    /// §3 — a template without `{{ }}` has no dependent parameters and its
    /// rendering ignores any frame passed in.
    #[test]
    fn literal_templates_ignore_frames(
        text in "[a-zA-Z0-9 ,.=<>*()-]{0,40}"
    ) {
        let template = QueryTemplate::parse(&text).unwrap();
        prop_assert!(!template.has_dependent_parameters());

        let frame = Frame::from_columns(vec![("x", vec![Value::Int(1)])]).unwrap();
        let params = HashMap::new();
        let with_frame = template.render(SourceKind::Sql, &params, Some(&frame)).unwrap();
        let without = template.render(SourceKind::Sql, &params, None).unwrap();
        prop_assert_eq!(&with_frame, &without);
        prop_assert_eq!(with_frame, text);
    }

    /// §4 — commenting a `{% %}` token out renders the same as removing it.
    #[test]
    fn commented_parameter_equals_removed_parameter(
        prefix in "[a-zA-Z0-9 ,.=<>*()-]{0,20}",
        suffix in "[a-zA-Z0-9 ,.=<>*()-]{0,20}",
        name in "[a-z]{1,6}",
        value in any::<i64>(),
    ) {
        let token = format!("{{% {name}|value:int %}}");
        let with_param = QueryTemplate::parse(&format!("{prefix}{token}{suffix}")).unwrap();
        let commented = QueryTemplate::parse(&format!("{prefix}{{# {token} #}}{suffix}")).unwrap();
        let removed = QueryTemplate::parse(&format!("{prefix}{suffix}")).unwrap();

        let mut params = HashMap::new();
        params.insert(name.clone(), Value::Int(value));

        let rendered = with_param.render(SourceKind::Sql, &params, None).unwrap();
        prop_assert_eq!(rendered, format!("{prefix}{value}{suffix}"));

        let commented_out = commented.render(SourceKind::Sql, &params, None).unwrap();
        let removed_out = removed.render(SourceKind::Sql, &params, None).unwrap();
        prop_assert_eq!(commented_out, removed_out);

        // with the token commented out, the parameter is not required at all
        let no_params = HashMap::new();
        prop_assert!(commented.render(SourceKind::Sql, &no_params, None).is_ok());
    }

    /// §5 — rename there-and-back and double select are identities.
    #[test]
    fn rename_and_select_idempotence(
        rows in prop::collection::vec(any::<i64>(), 0..6),
        column_count in 1usize..4,
    ) {
        let mut columns = Vec::new();
        for c in 0..column_count {
            let values: Vec<Value> = rows.iter().map(|&v| Value::Int(v + c as i64)).collect();
            columns.push((format!("c{c}"), values));
        }
        let frame = Frame::from_columns(columns).unwrap();

        let mut there = indexmap::IndexMap::new();
        there.insert("c0".to_string(), "swapped".to_string());
        let mut back = indexmap::IndexMap::new();
        back.insert("swapped".to_string(), "c0".to_string());

        let mut renamed = frame.clone();
        renamed.rename(&there).unwrap();
        renamed.rename(&back).unwrap();
        prop_assert_eq!(&renamed, &frame);

        let selection: Vec<String> = (0..column_count).rev().map(|c| format!("c{c}")).collect();
        let once = frame.select(&selection).unwrap();
        let twice = once.select(&selection).unwrap();
        prop_assert_eq!(once, twice);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// §7 — the final frame is independent of wavefront interleaving.
    #[test]
    fn parallel_execution_is_deterministic(
        child_count in 1usize..4,
        values in prop::collection::vec(1i64..100, 3),
    ) {
        let build = || {
            let mut graph = QueryGraph::new(ConnectorRegistry::new());
            let root_frame =
                Frame::from_columns(vec![("k", vec![Value::Int(1), Value::Int(2)])]).unwrap();
            graph.add_node(memory_node("root", "SELECT root", root_frame)).unwrap();
            for c in 0..child_count {
                let child_frame = Frame::from_columns(vec![
                    ("k", vec![Value::Int(1), Value::Int(2)]),
                    (
                        format!("v{c}").as_str(),
                        vec![
                            Value::Int(values[c % values.len()]),
                            Value::Int(values[(c + 1) % values.len()]),
                        ],
                    ),
                ])
                .unwrap();
                let name = format!("child{c}");
                graph
                    .add_node(memory_node(&name, "SELECT child", child_frame))
                    .unwrap();
                graph
                    .attach_child(
                        "root",
                        &name,
                        JoinContext::new(JoinKind::Left, vec![("k".into(), "k".into())]),
                    )
                    .unwrap();
            }
            graph.resolve_root().unwrap();
            graph
        };

        let params = HashMap::new();
        let mut first = build();
        let mut second = build();
        let mut sequential = build();
        let a = execute_with(&mut first, &params, ExecutionOptions::parallel()).unwrap();
        let b = execute_with(&mut second, &params, ExecutionOptions::parallel()).unwrap();
        let c = execute_with(&mut sequential, &params, ExecutionOptions::sequential()).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(&a, &c);
    }
}
