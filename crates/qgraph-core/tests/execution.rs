//! Graph execution scenarios: rendering, retrieval, folding, failure handling.

use qgraph_core::{
    build_graph_with, execute, execute_with, CancelToken, DriverCatalog, Error, ExecutionOptions,
    Frame, GraphConfigError, MemoryConnector, SourceKind, Stage, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Int(v)).collect()
}

fn strs(values: &[&str]) -> Vec<Value> {
    values.iter().map(|&v| Value::from(v)).collect()
}

fn frame(cols: Vec<(&str, Vec<Value>)>) -> Frame {
    Frame::from_columns(cols).unwrap()
}

fn catalog_with(driver: &str, connector: Arc<MemoryConnector>) -> DriverCatalog {
    let mut catalog = DriverCatalog::default();
    catalog.register_instance(driver, connector);
    catalog
}

#[test]
fn independent_parameter_renders_into_the_query() {
    let conn = Arc::new(
        MemoryConnector::new("pg", SourceKind::Sql)
            .with_fallback(frame(vec![("id", ints(&[1, 2, 3]))])),
    );
    let doc = r#"
CONNECT
    pg <- Sql(db_name='app')
RETRIEVE
    QUERY |
        SELECT * FROM T WHERE id IN {% ids|value_list:int %};
    USING pg
    AS n
"#;
    let mut catalog = DriverCatalog::default();
    catalog.register_instance("Sql", conn.clone());
    let mut graph = build_graph_with(doc, &catalog).unwrap();

    let mut params = HashMap::new();
    params.insert("ids".to_string(), Value::list([1i64, 2, 3]));
    execute(&mut graph, &params).unwrap();

    assert_eq!(conn.queries(), vec!["SELECT * FROM T WHERE id IN (1,2,3)"]);
}

#[test]
fn dependent_parameter_derives_from_the_parent_frame() {
    let parent_conn = Arc::new(
        MemoryConnector::new("pg", SourceKind::Sql)
            .with_fallback(frame(vec![("Title", strs(&["a", "b"]))])),
    );
    let child_conn = Arc::new(MemoryConnector::new("pg2", SourceKind::Sql).with_fallback(frame(
        vec![("name", strs(&["a", "b"])), ("plays", ints(&[10, 20]))],
    )));
    let doc = r#"
CONNECT
    pg <- Sql(db_name='app')
    pg2 <- Tracks(db_name='app')
RETRIEVE
    QUERY |
        SELECT * FROM "Album";
    USING pg
    AS p
    ---
    QUERY |
        SELECT * FROM T WHERE name IN {{ Title|value_list:str }};
    USING pg2
    AS c
JOIN
    LEFT (p[Title] ==> c[name])
"#;
    let mut catalog = catalog_with("Sql", parent_conn);
    catalog.register_instance("Tracks", child_conn.clone());
    let mut graph = build_graph_with(doc, &catalog).unwrap();

    let result = execute(&mut graph, &HashMap::new()).unwrap();

    assert_eq!(
        child_conn.queries(),
        vec!["SELECT * FROM T WHERE name IN ('a','b')"]
    );
    // left join keeps both parent rows, pulling the child's columns alongside
    assert_eq!(result.column("Title").unwrap(), &strs(&["a", "b"])[..]);
    assert_eq!(result.column("plays").unwrap(), &ints(&[10, 20])[..]);
}

#[test]
fn fields_projection_applies_before_manipulations() {
    let conn = Arc::new(MemoryConnector::new("m", SourceKind::Document).with_fallback(frame(
        vec![
            ("album", strs(&["x"])),
            ("noise", ints(&[9])),
        ],
    )));
    let doc = r#"
CONNECT
    mongo <- Docs(host='h')
RETRIEVE
    QUERY |
        {'tags': {'$in': {% tags|value_list:str %}}};
    FIELDS album
    USING mongo
    AS n
"#;
    let catalog = catalog_with("Docs", conn);
    let mut graph = build_graph_with(doc, &catalog).unwrap();
    let mut params = HashMap::new();
    params.insert("tags".to_string(), Value::list(["jazz"]));
    let result = execute(&mut graph, &params).unwrap();
    assert_eq!(result.names(), vec!["album"]);
}

#[test]
fn manipulations_run_between_retrieval_and_fold() {
    let parent_conn = Arc::new(
        MemoryConnector::new("a", SourceKind::Sql)
            .with_fallback(frame(vec![("k", ints(&[1, 2]))])),
    );
    let child_conn = Arc::new(MemoryConnector::new("b", SourceKind::Sql).with_fallback(frame(
        vec![("k", ints(&[1, 1, 2])), ("v", ints(&[5, 7, 100]))],
    )));
    let doc = r#"
CONNECT
    a <- Sql(db_name='x')
    b <- Child(db_name='y')
RETRIEVE
    QUERY |
        SELECT * FROM parent;
    USING a
    AS p
    ---
    QUERY |
        SELECT * FROM child;
    USING b
    THEN |
        group_by(k) >> summarize(total = sum(v));
    AS c
JOIN
    INNER (p[k] ==> c[k])
"#;
    let mut catalog = catalog_with("Sql", parent_conn);
    catalog.register_instance("Child", child_conn);
    let mut graph = build_graph_with(doc, &catalog).unwrap();
    let result = execute(&mut graph, &HashMap::new()).unwrap();
    assert_eq!(result.column("k").unwrap(), &ints(&[1, 2])[..]);
    assert_eq!(result.column("total").unwrap(), &ints(&[12, 100])[..]);
}

#[test]
fn fold_order_is_reverse_topological() {
    // root with declared children a then b; a has a grandchild. Column order
    // of the folded result records the join sequence: b first, then the fully
    // folded a subtree.
    let root_conn = Arc::new(
        MemoryConnector::new("root", SourceKind::Sql)
            .with_fallback(frame(vec![("k", ints(&[1])), ("r", strs(&["root"]))])),
    );
    let a_conn = Arc::new(
        MemoryConnector::new("a", SourceKind::Sql)
            .with_fallback(frame(vec![("k", ints(&[1])), ("av", strs(&["a"]))])),
    );
    let b_conn = Arc::new(
        MemoryConnector::new("b", SourceKind::Sql)
            .with_fallback(frame(vec![("k", ints(&[1])), ("bv", strs(&["b"]))])),
    );
    let g_conn = Arc::new(
        MemoryConnector::new("g", SourceKind::Sql)
            .with_fallback(frame(vec![("k", ints(&[1])), ("gv", strs(&["g"]))])),
    );
    let doc = r#"
CONNECT
    root_c <- RootDb(x='1')
    a_c <- ADb(x='1')
    b_c <- BDb(x='1')
    g_c <- GDb(x='1')
RETRIEVE
    QUERY |
        SELECT root;
    USING root_c
    AS root
    ---
    QUERY |
        SELECT a;
    USING a_c
    AS a
    ---
    QUERY |
        SELECT b;
    USING b_c
    AS b
    ---
    QUERY |
        SELECT g;
    USING g_c
    AS g
JOIN
    LEFT (root[k] ==> a[k])
    LEFT (root[k] ==> b[k])
    LEFT (a[k] ==> g[k])
"#;
    let mut catalog = catalog_with("RootDb", root_conn);
    catalog.register_instance("ADb", a_conn);
    catalog.register_instance("BDb", b_conn);
    catalog.register_instance("GDb", g_conn);
    let mut graph = build_graph_with(doc, &catalog).unwrap();
    let result = execute(&mut graph, &HashMap::new()).unwrap();
    // reverse of [root, a, g, b]: b folds into root first, then g into a,
    // then the folded a into root
    assert_eq!(result.names(), vec!["k", "r", "bv", "av", "gv"]);
}

#[test]
fn failure_cancels_siblings_and_skips_the_fold() {
    let root_conn = Arc::new(
        MemoryConnector::new("root", SourceKind::Sql)
            .with_fallback(frame(vec![("k", ints(&[1]))])),
    );
    let ok_conn = Arc::new(
        MemoryConnector::new("ok", SourceKind::Sql)
            .with_fallback(frame(vec![("k", ints(&[1]))])),
    );
    // no response configured: this node's retrieval fails
    let bad_conn = Arc::new(MemoryConnector::new("bad", SourceKind::Sql));
    let doc = r#"
CONNECT
    root_c <- RootDb(x='1')
    ok_c <- OkDb(x='1')
    bad_c <- BadDb(x='1')
RETRIEVE
    QUERY |
        SELECT root;
    USING root_c
    AS root
    ---
    QUERY |
        SELECT ok;
    USING ok_c
    AS ok
    ---
    QUERY |
        SELECT bad;
    USING bad_c
    AS bad
JOIN
    LEFT (root[k] ==> ok[k])
    LEFT (root[k] ==> bad[k])
"#;
    let mut catalog = catalog_with("RootDb", root_conn);
    catalog.register_instance("OkDb", ok_conn);
    catalog.register_instance("BadDb", bad_conn);
    let mut graph = build_graph_with(doc, &catalog).unwrap();

    let err = execute(&mut graph, &HashMap::new()).unwrap_err();
    match &err {
        Error::Node { node, stage, .. } => {
            assert_eq!(node, "bad");
            assert_eq!(*stage, Stage::Retrieve);
        }
        other => panic!("unexpected error: {other}"),
    }
    // no partial fold: nothing is marked executed
    assert!(!graph.node("root").unwrap().executed);
    assert!(graph.node("root").unwrap().frame.is_none());
}

#[test]
fn parallel_and_sequential_execution_agree() {
    let root_conn = Arc::new(
        MemoryConnector::new("root", SourceKind::Sql)
            .with_fallback(frame(vec![("k", ints(&[1, 2]))])),
    );
    let c1 = Arc::new(MemoryConnector::new("c1", SourceKind::Sql).with_fallback(frame(vec![
        ("k", ints(&[1, 2])),
        ("x", ints(&[10, 20])),
    ])));
    let c2 = Arc::new(MemoryConnector::new("c2", SourceKind::Sql).with_fallback(frame(vec![
        ("k", ints(&[2, 1])),
        ("y", strs(&["two", "one"])),
    ])));
    let doc = r#"
CONNECT
    root_c <- RootDb(x='1')
    c1_c <- C1Db(x='1')
    c2_c <- C2Db(x='1')
RETRIEVE
    QUERY |
        SELECT root;
    USING root_c
    AS root
    ---
    QUERY |
        SELECT c1;
    USING c1_c
    AS c1
    ---
    QUERY |
        SELECT c2;
    USING c2_c
    AS c2
JOIN
    LEFT (root[k] ==> c1[k])
    LEFT (root[k] ==> c2[k])
"#;
    let mut catalog = catalog_with("RootDb", root_conn);
    catalog.register_instance("C1Db", c1);
    catalog.register_instance("C2Db", c2);

    let mut parallel_graph = build_graph_with(doc, &catalog).unwrap();
    let parallel = execute_with(
        &mut parallel_graph,
        &HashMap::new(),
        ExecutionOptions::parallel(),
    )
    .unwrap();

    let mut sequential_graph = build_graph_with(doc, &catalog).unwrap();
    let sequential = execute_with(
        &mut sequential_graph,
        &HashMap::new(),
        ExecutionOptions::sequential(),
    )
    .unwrap();

    assert_eq!(parallel, sequential);
}

#[test]
fn re_execution_resets_node_state() {
    let conn = Arc::new(
        MemoryConnector::new("m", SourceKind::Sql)
            .with_fallback(frame(vec![("a", ints(&[1]))])),
    );
    let doc = r#"
CONNECT
    m <- Db(x='1')
RETRIEVE
    QUERY |
        SELECT 1;
    USING m
    AS n
"#;
    let catalog = catalog_with("Db", conn.clone());
    let mut graph = build_graph_with(doc, &catalog).unwrap();
    execute(&mut graph, &HashMap::new()).unwrap();
    execute(&mut graph, &HashMap::new()).unwrap();
    assert_eq!(conn.queries().len(), 2);
    assert!(graph.node("n").unwrap().executed);
}

#[test]
fn cancellation_token_stops_the_run() {
    let conn = Arc::new(
        MemoryConnector::new("m", SourceKind::Sql)
            .with_fallback(frame(vec![("a", ints(&[1]))])),
    );
    let doc = r#"
CONNECT
    m <- Db(x='1')
RETRIEVE
    QUERY |
        SELECT 1;
    USING m
    AS n
"#;
    let catalog = catalog_with("Db", conn.clone());
    let mut graph = build_graph_with(doc, &catalog).unwrap();
    let token = CancelToken::new();
    token.cancel();
    let err = execute_with(
        &mut graph,
        &HashMap::new(),
        ExecutionOptions::parallel().with_cancel(token),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(conn.queries().is_empty());
}

#[test]
fn expired_deadline_is_reported() {
    let conn = Arc::new(
        MemoryConnector::new("m", SourceKind::Sql)
            .with_fallback(frame(vec![("a", ints(&[1]))])),
    );
    let doc = r#"
CONNECT
    m <- Db(x='1')
RETRIEVE
    QUERY |
        SELECT 1;
    USING m
    AS n
"#;
    let catalog = catalog_with("Db", conn);
    let mut graph = build_graph_with(doc, &catalog).unwrap();
    let deadline = Instant::now() - Duration::from_millis(1);
    let err = execute_with(
        &mut graph,
        &HashMap::new(),
        ExecutionOptions::parallel().with_deadline(deadline),
    )
    .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
}

#[test]
fn default_catalog_stub_reports_missing_backend() {
    let doc = r#"
CONNECT
    pg <- Postgres(db_name='app')
RETRIEVE
    QUERY |
        SELECT 1;
    USING pg
    AS n
"#;
    let mut graph = qgraph_core::build_graph(doc).unwrap();
    let err = execute(&mut graph, &HashMap::new()).unwrap_err();
    match err.root_cause() {
        Error::Connector(_) => {}
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_independent_parameter_fails_before_any_retrieval() {
    let conn = Arc::new(
        MemoryConnector::new("m", SourceKind::Sql)
            .with_fallback(frame(vec![("a", ints(&[1]))])),
    );
    let doc = r#"
CONNECT
    m <- Db(x='1')
RETRIEVE
    QUERY |
        SELECT * FROM t WHERE id IN {% ids|value_list:int %};
    USING m
    AS n
"#;
    let catalog = catalog_with("Db", conn.clone());
    let mut graph = build_graph_with(doc, &catalog).unwrap();
    let err = execute(&mut graph, &HashMap::new()).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        Error::Template(qgraph_core::TemplateError::IndependentParameter(_))
    ));
    assert!(conn.queries().is_empty());
}

#[test]
fn unknown_driver_fails_graph_construction() {
    let doc = r#"
CONNECT
    x <- Voltdb(db_name='app')
RETRIEVE
    QUERY |
        SELECT 1;
    USING x
    AS n
"#;
    let err = qgraph_core::build_graph(doc).unwrap_err();
    assert!(matches!(
        err,
        Error::GraphConfig(GraphConfigError::UnknownDriver(_))
    ));
}

#[test]
fn outer_join_keeps_rows_from_both_sides() {
    let parent_conn = Arc::new(
        MemoryConnector::new("p", SourceKind::Sql)
            .with_fallback(frame(vec![("k", ints(&[1, 2]))])),
    );
    let child_conn = Arc::new(MemoryConnector::new("c", SourceKind::Sql).with_fallback(frame(
        vec![("k", ints(&[2, 3])), ("v", strs(&["two", "three"]))],
    )));
    let doc = r#"
CONNECT
    p_c <- PDb(x='1')
    c_c <- CDb(x='1')
RETRIEVE
    QUERY |
        SELECT p;
    USING p_c
    AS p
    ---
    QUERY |
        SELECT c;
    USING c_c
    AS c
JOIN
    OUTER (p[k] ==> c[k])
"#;
    let mut catalog = catalog_with("PDb", parent_conn);
    catalog.register_instance("CDb", child_conn);
    let mut graph = build_graph_with(doc, &catalog).unwrap();
    let result = execute(&mut graph, &HashMap::new()).unwrap();
    assert_eq!(result.column("k").unwrap(), &ints(&[1, 2, 3])[..]);
    assert_eq!(
        result.column("v").unwrap(),
        &[Value::Null, Value::from("two"), Value::from("three")][..]
    );
}
