use bson::{Bson, bson, doc};
use nexus_expr::pather::Pather;
use nexus_expr::{AccessContext, Engine, Principal, Value};
use proptest::prelude::*;

fn run(pipeline: Bson, input: Vec<Bson>) -> Vec<Value> {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let engine = Engine::default();
        let ac = AccessContext::new("acme", Principal::new("p1", "alice"));
        let cursor = engine.run_pipeline(ac, pipeline, Value::from(Bson::Array(input))).await.unwrap();
        cursor.collect().await.unwrap()
    })
}

fn numbers(v: &[i64]) -> Vec<Bson> {
    v.iter().map(|n| Bson::Int64(*n)).collect()
}

proptest! {
    #[test]
    fn prop_skip_then_limit_is_a_window(v in proptest::collection::vec(any::<i64>(), 0..40), skip in 1i64..50, limit in 1i64..50) {
        let out = run(bson!([{ "$skip": skip }, { "$limit": limit }]), numbers(&v));
        let expected: Vec<Value> = v.iter().skip(skip as usize).take(limit as usize).map(|n| Value::from(Bson::Int64(*n))).collect();
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn prop_count_matches_input_length(v in proptest::collection::vec(any::<i64>(), 0..40)) {
        let out = run(bson!([{ "$count": "n" }]), numbers(&v));
        prop_assert_eq!(out.len(), 1);
        let n = Pather::expression().read(&out[0], "n").as_i64();
        prop_assert_eq!(n, Some(v.len() as i64));
    }

    #[test]
    fn prop_match_is_idempotent(v in proptest::collection::vec(-20i64..20, 0..40)) {
        let once = run(bson!([{ "$match": { "$gt": ["$$ROOT", 0] } }]), numbers(&v));
        let twice = run(
            bson!([{ "$match": { "$gt": ["$$ROOT", 0] } }, { "$match": { "$gt": ["$$ROOT", 0] } }]),
            numbers(&v),
        );
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.len(), v.iter().filter(|n| **n > 0).count());
    }

    #[test]
    fn prop_unwind_yields_one_row_per_element(lens in proptest::collection::vec(0usize..5, 0..15)) {
        let input: Vec<Bson> = lens
            .iter()
            .enumerate()
            .map(|(i, len)| Bson::Document(doc! { "_id": i as i64, "t": (0..*len as i64).collect::<Vec<_>>() }))
            .collect();
        let out = run(bson!([{ "$unwind": "$t" }]), input);
        prop_assert_eq!(out.len(), lens.iter().sum::<usize>());
    }

    #[test]
    fn prop_group_partitions_the_input(keys in proptest::collection::vec(0i64..5, 0..40)) {
        let input: Vec<Bson> = keys.iter().map(|k| Bson::Document(doc! { "k": *k })).collect();
        let out = run(bson!([{ "$group": { "_id": "$k", "n": { "$sum": 1 } } }]), input);
        let pather = Pather::expression();
        let mut distinct = keys.clone();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert_eq!(out.len(), distinct.len());
        let total: i64 = out.iter().filter_map(|g| pather.read(g, "n").as_i64()).sum();
        prop_assert_eq!(total, keys.len() as i64);
    }

    #[test]
    fn prop_pather_never_follows_filtered_segments(key in prop::sample::select(vec!["__proto__", "constructor", "prototype"]), n in any::<i32>()) {
        let pather = Pather::legacy();
        let obj = Value::from(doc! { key: { "x": n }, "ok": n });
        prop_assert!(pather.read(&obj, key).is_undefined());
        let nested = format!("{key}.x");
        prop_assert!(pather.read(&obj, &nested).is_undefined());
        prop_assert_eq!(pather.read(&obj, "ok"), Value::from(Bson::Int32(n)));
    }
}
