use async_trait::async_trait;
use bson::{Bson, bson, doc};
use nexus_expr::expressions::variables::ROOT;
use nexus_expr::expressions::{MemoryRegistry, RuntimeKind};
use nexus_expr::platform::{RequestProvider, ScriptRuntime};
use nexus_expr::{AccessContext, Engine, ExprError, Principal, Result, Value};
use std::sync::Arc;

fn ac() -> AccessContext {
    AccessContext::new("acme", Principal::new("p1", "alice"))
}

async fn eval(engine: &Engine, raw: Bson, root: Bson) -> Result<Value> {
    engine.evaluate(ac(), raw, [(ROOT, Value::from(root))]).await
}

#[tokio::test]
async fn literal_keeps_operator_lookalikes() {
    let engine = Engine::default();
    let out = eval(&engine, bson!({ "$literal": { "$add": [1, 2] } }), bson!({})).await.unwrap();
    assert_eq!(out, Value::from(doc! { "$add": [1, 2] }));
    let out = eval(&engine, bson!({ "$literal": "$a" }), bson!({ "a": 1 })).await.unwrap();
    assert_eq!(out, Value::from("$a"));
}

#[tokio::test]
async fn join_concatenates_with_a_separator() {
    let engine = Engine::default();
    let out = eval(&engine, bson!({ "$join": ["$tags", ", "] }), bson!({ "tags": ["a", null, 3] })).await.unwrap();
    assert_eq!(out, Value::from("a, , 3"));
}

#[tokio::test]
async fn as_switches_principal_for_the_inner_expression() {
    let engine = Engine::default();
    let out = eval(
        &engine,
        bson!({
            "outer": "$$CONTEXT.principal.name",
            "inner": { "$as": { "input": { "principal": { "_id": "p9", "name": "bob" }, "grant": "update" }, "in": {
                "name": "$$CONTEXT.principal.name",
                "grant": "$$CONTEXT.grant"
            } } }
        }),
        bson!({}),
    )
    .await
    .unwrap();
    assert_eq!(out, Value::from(doc! { "outer": "alice", "inner": { "name": "bob", "grant": "update" } }));
    let err = eval(&engine, bson!({ "$as": { "input": null, "in": 1 } }), bson!({})).await.unwrap_err();
    assert_eq!(err.code(), "invalidArgument");
}

#[tokio::test]
async fn expression_runs_inline_and_named_definitions() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert("acme", RuntimeKind::Expression, "c_area", bson!({ "$multiply": ["$w", "$h"] }));
    let engine = Engine::builder().registry(registry).build();
    let named = eval(&engine, bson!({ "$expression": { "as": { "w": "$a", "h": 3 }, "in": "c_area" } }), bson!({ "a": 2 }))
        .await
        .unwrap();
    assert_eq!(named, Value::Int(6));
    let inline = eval(&engine, bson!({ "$expression": { "as": "$inner", "in": "$v" } }), bson!({ "inner": { "v": 7 } }))
        .await
        .unwrap();
    assert_eq!(inline, Value::Int(7));
    let bare = eval(&engine, bson!({ "$expression": "c_area" }), bson!({ "w": 4, "h": 5 })).await.unwrap();
    assert_eq!(bare, Value::Int(20));
}

#[tokio::test]
async fn let_binds_in_order() {
    let engine = Engine::default();
    let out = eval(
        &engine,
        bson!({ "$let": { "vars": { "a": "$x", "b": { "$add": ["$$a", 1] } }, "in": { "$multiply": ["$$a", "$$b"] } } }),
        bson!({ "x": 3 }),
    )
    .await
    .unwrap();
    assert_eq!(out, Value::Int(12));
}

#[tokio::test]
async fn undefined_user_variables_fail_to_parse() {
    let engine = Engine::default();
    let err = eval(&engine, bson!({ "a": "$$nope" }), bson!({})).await.unwrap_err();
    assert_eq!(err.code(), "invalidArgument.query");
    assert_eq!(err.path(), Some("a"));
}

struct Echo;

#[async_trait]
impl ScriptRuntime for Echo {
    async fn run(&self, ac: &AccessContext, source: &str, arguments: Vec<Value>) -> Result<Value> {
        if source.contains("throw") {
            return Err(ExprError::script("boom"));
        }
        let mut out = vec![Value::from(ac.principal().id)];
        out.extend(arguments);
        Ok(Value::Array(out))
    }

    async fn environment(&self, _ac: &AccessContext) -> Result<Value> {
        Ok(Value::from(doc! { "api": { "version": 2 } }))
    }
}

struct Request;

#[async_trait]
impl RequestProvider for Request {
    async fn request(&self, _ac: &AccessContext) -> Result<Value> {
        Ok(Value::from(doc! { "method": "GET", "path": "/x" }))
    }
}

#[tokio::test]
async fn scripts_and_requests_come_from_the_host() {
    let engine = Engine::builder().script_runtime(Arc::new(Echo)).request_provider(Arc::new(Request)).build();
    let out = eval(
        &engine,
        bson!({
            "fn": { "$function": { "body": "return args", "args": ["$a", 2] } },
            "version": "$$SCRIPT.api.version",
            "method": "$$REQUEST.method"
        }),
        bson!({ "a": 1 }),
    )
    .await
    .unwrap();
    assert_eq!(out, Value::from(doc! { "fn": ["p1", 1, 2], "version": 2, "method": "GET" }));
    let err = eval(&engine, bson!({ "x": { "$function": { "body": "throw 1" } } }), bson!({})).await.unwrap_err();
    assert_eq!(err.code(), "script");
    assert_eq!(err.path(), Some("x"));
}

#[tokio::test]
async fn missing_host_capabilities_read_as_undefined() {
    let engine = Engine::default();
    let out = eval(&engine, bson!({ "s": "$$SCRIPT", "r": "$$REQUEST.path", "k": 1 }), bson!({})).await.unwrap();
    assert_eq!(out, Value::from(doc! { "k": 1 }));
}

#[tokio::test]
async fn self_referencing_runtime_expressions_stop_at_the_depth_limit() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert("acme", RuntimeKind::Expression, "c_loop", bson!({ "$expression": "c_loop" }));
    let engine = Engine::builder().registry(registry).build();
    let err = tokio::spawn(async move { eval(&engine, bson!({ "$expression": "c_loop" }), bson!({})).await })
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code(), "invalidArgument.query");
    assert!(err.reason().contains("Maximum expression depth (100) exceeded"));
    assert_eq!(err.path(), Some("c_loop"));
}

#[tokio::test]
async fn runtime_expressions_report_under_the_operator_path() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert("acme", RuntimeKind::Expression, "c_half", bson!({ "$divide": ["$v", "$zero"] }));
    let engine = Engine::builder().registry(registry).build();
    let err = eval(&engine, bson!({ "x": { "$expression": { "as": { "v": 1, "zero": 0 }, "in": "c_half" } } }), bson!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalidArgument");
    assert_eq!(err.path(), Some("x"));
}
