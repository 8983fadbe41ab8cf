use bson::{Bson, bson, doc};
use nexus_expr::{AccessContext, Engine, Principal, Value};

fn ac() -> AccessContext {
    AccessContext::new("acme", Principal::new("p1", "alice"))
}

async fn run(pipeline: Bson, input: Bson) -> Vec<Value> {
    let engine = Engine::default();
    let cursor = engine.run_pipeline(ac(), pipeline, Value::from(input)).await.unwrap();
    cursor.collect().await.unwrap()
}

fn values(raw: Bson) -> Vec<Value> {
    Value::from(raw).into_array()
}

#[tokio::test]
async fn match_project_and_set() {
    let out = run(
        bson!([
            { "$match": { "$gte": ["$n", 2] } },
            { "$project": { "n": "$n", "double": { "$multiply": ["$n", 2] }, "gone": "$missing" } },
            { "$set": { "tag": { "$concat": ["n", "-", "x"] } } }
        ]),
        bson!([{ "n": 1 }, { "n": 2 }, { "n": 3 }]),
    )
    .await;
    assert_eq!(
        out,
        values(bson!([
            { "n": 2, "double": 4, "tag": "n-x" },
            { "n": 3, "double": 6, "tag": "n-x" }
        ]))
    );
}

#[tokio::test]
async fn unset_removes_paths() {
    let out = run(bson!([{ "$unset": ["a", "b.c"] }]), bson!([{ "a": 1, "b": { "c": 2, "d": 3 }, "e": 4 }])).await;
    assert_eq!(out, values(bson!([{ "b": { "d": 3 }, "e": 4 }])));
}

#[tokio::test]
async fn skip_limit_and_count() {
    let input = bson!([1, 2, 3, 4, 5]);
    assert_eq!(run(bson!([{ "$skip": 1 }, { "$limit": 2 }]), input.clone()).await, values(bson!([2, 3])));
    assert_eq!(run(bson!([{ "$skip": 10 }]), input.clone()).await, Vec::<Value>::new());
    assert_eq!(run(bson!([{ "$count": "total" }]), input).await, values(bson!([{ "total": 5 }])));
    assert_eq!(run(bson!([{ "$count": "total" }]), bson!([])).await, values(bson!([{ "total": 0 }])));
}

#[tokio::test]
async fn unwind_short_and_long_forms() {
    let input = bson!([
        { "_id": 1, "t": ["a", "b"] },
        { "_id": 2, "t": [] },
        { "_id": 3, "t": null },
        { "_id": 4 },
        { "_id": 5, "t": "s" }
    ]);
    let short = run(bson!([{ "$unwind": "$t" }]), input.clone()).await;
    assert_eq!(
        short,
        values(bson!([
            { "_id": 1, "t": "a" },
            { "_id": 1, "t": "b" },
            { "_id": 5, "t": "s" }
        ]))
    );
    let long = run(
        bson!([{ "$unwind": { "path": "$t", "includeArrayIndex": "i", "preserveNullAndEmptyArrays": true } }]),
        input,
    )
    .await;
    assert_eq!(
        long,
        values(bson!([
            { "_id": 1, "t": "a", "i": 0 },
            { "_id": 1, "t": "b", "i": 1 },
            { "_id": 2, "i": null },
            { "_id": 3, "t": null, "i": null },
            { "_id": 4, "i": null },
            { "_id": 5, "t": "s", "i": null }
        ]))
    );
}

#[tokio::test]
async fn group_by_expression_and_fields() {
    let input = bson!([
        { "k": "a", "v": 1, "c": "x" },
        { "k": "b", "v": 2, "c": "x" },
        { "k": "a", "v": 3, "c": "y" }
    ]);
    let by_key = run(
        bson!([{ "$group": {
            "_id": "$k",
            "n": { "$count": {} },
            "total": { "$sum": "$v" },
            "avg": { "$avg": "$v" },
            "vs": { "$push": "$v" },
            "first": { "$first": "$c" },
            "max": { "$max": "$v" }
        } }]),
        input.clone(),
    )
    .await;
    assert_eq!(
        by_key,
        values(bson!([
            { "_id": "a", "n": 2, "total": 4, "avg": 2.0, "vs": [1, 3], "first": "x", "max": 3 },
            { "_id": "b", "n": 1, "total": 2, "avg": 2.0, "vs": [2], "first": "x", "max": 2 }
        ]))
    );
    let by_fields = run(bson!([{ "$group": { "_id": { "c": "$c" }, "keys": { "$addToSet": "$k" } } }]), input.clone()).await;
    assert_eq!(
        by_fields,
        values(bson!([
            { "_id": { "c": "x" }, "keys": ["a", "b"] },
            { "_id": { "c": "y" }, "keys": ["a"] }
        ]))
    );
    let all = run(bson!([{ "$group": { "_id": null, "total": { "$sum": "$v" } } }]), input).await;
    assert_eq!(all, values(bson!([{ "_id": null, "total": 6 }])));
}

#[tokio::test]
async fn transform_phases_share_variables() {
    let out = run(
        bson!([{ "$transform": {
            "vars": { "n": 0 },
            "before": { "in": { "start": true } },
            "each": {
                "set": { "n": { "$add": ["$$n", 1] } },
                "in": { "$mergeObjects": ["$$ROOT", { "i": "$$n" }] }
            },
            "after": { "in": { "count": "$$n" } }
        } }]),
        bson!([{ "a": "x" }, { "a": "y" }]),
    )
    .await;
    assert_eq!(
        out,
        values(bson!([
            { "start": true },
            { "a": "x", "i": 1 },
            { "a": "y", "i": 2 },
            { "count": 2 }
        ]))
    );
}

#[tokio::test]
async fn transform_can_drop_items() {
    let out = run(
        bson!([{ "$transform": { "each": { "in": { "$cond": [{ "$gt": ["$v", 1] }, "$$ROOT", "$$REMOVE"] } } } }]),
        bson!([{ "v": 1 }, { "v": 2 }]),
    )
    .await;
    assert_eq!(out, values(bson!([{ "v": 2 }])));
}

#[tokio::test]
async fn stages_see_their_cursors() {
    let out = run(bson!([{ "$project": { "pos": "$$CURSOR.position" } }]), bson!([{ "a": 1 }, { "a": 2 }])).await;
    assert_eq!(out, values(bson!([{ "pos": 1 }, { "pos": 2 }])));
}

#[tokio::test]
async fn scalars_and_null_inputs() {
    assert_eq!(run(bson!([{ "$limit": 5 }]), bson!(null)).await, Vec::<Value>::new());
    assert_eq!(run(bson!([{ "$limit": 5 }]), bson!({ "a": 1 })).await, vec![Value::from(doc! { "a": 1 })]);
}
