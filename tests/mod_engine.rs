use bson::{bson, doc};
use nexus_expr::expressions::variables::ROOT;
use nexus_expr::expressions::{Definition, EvalOptions, ExpressionCache, RuntimeKind};
use nexus_expr::utils::devlog::{drain_benches, enable_thread_sink};
use nexus_expr::{AccessContext, Engine, EngineConfig, Principal, Value};
use std::io::Write;

fn ac() -> AccessContext {
    AccessContext::new("acme", Principal::new("p1", "alice"))
}

#[test]
fn config_file_then_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nexus-expr.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "max_expression_depth = 7\nexpression_cache_capacity = 3").unwrap();
    let cfg = EngineConfig::load(Some(&path)).unwrap();
    assert_eq!(cfg.max_expression_depth, 7);
    assert_eq!(cfg.expression_cache_capacity, 3);
    assert_eq!(cfg.slow_evaluation_ms, EngineConfig::default().slow_evaluation_ms);

    let mut cfg = EngineConfig::default();
    // SAFETY: no other test reads this variable.
    unsafe { std::env::set_var("NEXUS_EXPR_SLOW_MS", "25") };
    cfg.apply_env();
    unsafe { std::env::remove_var("NEXUS_EXPR_SLOW_MS") };
    assert_eq!(cfg.slow_evaluation_ms, 25);
}

#[tokio::test]
async fn depth_limit_applies_to_parsing() {
    let engine = Engine::builder().config(EngineConfig { max_expression_depth: 3, ..EngineConfig::default() }).build();
    let ok = engine.evaluate(ac(), bson!({ "a": { "b": 1 } }), [(ROOT, Value::Null)]).await.unwrap();
    assert_eq!(ok, Value::from(doc! { "a": { "b": 1 } }));
    let err = engine.evaluate(ac(), bson!({ "a": { "b": { "c": 1 } } }), [(ROOT, Value::Null)]).await.unwrap_err();
    assert!(err.reason().contains("Maximum expression depth (3) exceeded"));
    assert_eq!(err.path(), Some("a.b.c"));
}

#[tokio::test]
async fn compiled_trees_are_cached_by_content() {
    let _g = enable_thread_sink();
    let engine = Engine::default();
    for _ in 0..3 {
        let out = engine.evaluate(ac(), bson!({ "$add": ["$a", 1] }), [(ROOT, Value::from(doc! { "a": 1 }))]).await.unwrap();
        assert_eq!(out, Value::Int(2));
    }
    let m = engine.cache().metrics();
    assert_eq!((m.misses, m.hits, m.inserts), (1, 2, 1));
    let lookups = drain_benches("expression_cache");
    assert_eq!(lookups.iter().filter(|r| r["op"] == "hit").count(), 2);
    assert!(lookups.iter().all(|r| r["key"].as_str().unwrap().starts_with("shared.expression.")));
}

#[tokio::test]
async fn stage_completion_is_benched() {
    let _g = enable_thread_sink();
    let engine = Engine::default();
    let cursor =
        engine.run_pipeline(ac(), bson!([{ "$match": true }]), Value::from(bson!([1, 2, 3]))).await.unwrap();
    assert_eq!(cursor.collect().await.unwrap().len(), 3);
    let stages = drain_benches("stage");
    assert_eq!(stages.len(), 1);
    assert_eq!(stages[0]["stage"], "$match");
    assert_eq!(stages[0]["pulled"], 3);
}

#[tokio::test]
async fn contexts_record_stats_per_path() {
    let engine = Engine::default();
    let ec = engine
        .create_context(ac(), RuntimeKind::Expression, Definition::from(bson!({ "a": "$x", "b": { "$add": [1, 2] } })))
        .await
        .unwrap();
    ec.set_variable(ROOT, Value::from(doc! { "x": 1 })).unwrap();
    ec.evaluate(EvalOptions::default()).await.unwrap();
    ec.evaluate(EvalOptions::default()).await.unwrap();
    assert_eq!(ec.stats("").unwrap().count, 2);
    assert_eq!(ec.stats("b").unwrap().count, 2);
    let json = ec.to_json();
    assert!(json.get_document("evaluations").unwrap().contains_key("a"));
}

#[tokio::test]
async fn failed_evaluations_are_counted() {
    let engine = Engine::default();
    let ec = engine
        .create_context(ac(), RuntimeKind::Expression, bson!({ "x": { "$divide": [1, "$zero"] } }))
        .await
        .unwrap();
    ec.set_variable(ROOT, Value::from(doc! { "zero": 0 })).unwrap();
    for _ in 0..2 {
        let err = ec.evaluate(EvalOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), "invalidArgument");
        assert_eq!(err.path(), Some("x"));
    }
    assert_eq!(ec.stats("x").unwrap().count, 2);
    assert_eq!(ec.stats("").unwrap().count, 2);
}

#[test]
fn logging_writes_rolling_files() {
    let dir = tempfile::tempdir().unwrap();
    nexus_expr::logger::configure_logging(Some(dir.path()), Some("debug"), Some(2), false).unwrap();
    log::info!("engine test line");
    assert!(dir.path().join("app.log").exists());
}
