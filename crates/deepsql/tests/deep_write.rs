//! End-to-end deep writes through a session over the in-memory executor.

mod common;

use common::{MemoryExecutor, cyclic, nodes, obj, order_items, planner, runtime, shop, unwrap_outcome};
use deepsql::{
    Cx, DeepConfig, DeepPlanner, DeepSession, Filter, Operation, OperationKind, SequentialGenerator,
    SessionPlan, Statement, Value, WriteStrategy,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

fn nested_order() -> serde_json::Value {
    json!({
        "ID": 1,
        "note": "rush",
        "shipping": {"city": "Oslo", "zip": "0150"},
        "invoice": {"total": 40},
        "items": [
            {"qty": 2, "parts": [{"name": "bolt"}, {"name": "nut"}]},
            {"qty": 1}
        ],
        "comments": [{"text": "fragile"}]
    })
}

#[test]
fn nested_insert_reads_back() {
    let rt = runtime();
    let cx = Cx::for_testing();
    let session = DeepSession::new(MemoryExecutor::new(), planner(shop()));

    let result = rt.block_on(async { unwrap_outcome(session.insert(&cx, "Orders", &nested_order()).await) });
    assert_eq!(result.rows, 1);
    assert_eq!(result.touched("Orders"), 1);
    assert_eq!(result.touched("Items"), 2);
    assert_eq!(result.touched("Parts"), 2);
    assert_eq!(result.touched("Comments"), 1);
    assert_eq!(result.touched("Invoices"), 1);

    // invoice, two items, two parts, one comment
    let keys: HashSet<String> = result
        .generated_keys()
        .iter()
        .map(|k| k.value.to_string())
        .collect();
    assert_eq!(result.generated_keys().len(), 6);
    assert_eq!(keys.len(), 6);

    let filter = Filter::eq("ID", 1);
    let orders = rt.block_on(async { unwrap_outcome(session.read(&cx, "Orders", Some(&filter)).await) });
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order["note"], json!("rush"));
    assert_eq!(order["shipping"], json!({"city": "Oslo", "zip": "0150"}));
    assert_eq!(order["invoice"]["total"], json!(40));
    assert_eq!(order["invoice"]["ID"], order["invoice_ID"]);

    let items = order["items"].as_array().expect("items array");
    assert_eq!(items.len(), 2);
    let first = items
        .iter()
        .find(|i| i["qty"] == json!(2))
        .expect("item with parts");
    let parts = first["parts"].as_array().expect("parts array");
    assert_eq!(parts.len(), 2);
    assert!(parts.iter().all(|p| p["item_ID"] == first["ID"]));
    let second = items.iter().find(|i| i["qty"] == json!(1)).expect("second item");
    assert_eq!(second["parts"], json!([]));

    assert_eq!(order["comments"][0]["text"], json!("fragile"));
    assert_eq!(order["comments"][0]["kind"], json!("order"));
    assert_eq!(order["comments"][0]["owner_ID"], json!(1));
}

#[test]
fn foreign_keys_come_from_every_origin() {
    let rt = runtime();
    let cx = Cx::for_testing();
    let executor = MemoryExecutor::new();
    let session = DeepSession::new(executor.clone(), planner(shop()));
    rt.block_on(async { unwrap_outcome(session.insert(&cx, "Orders", &nested_order()).await) });

    // managed backlink
    let items = executor.json_rows("Items");
    assert!(items.iter().all(|i| i["order_ID"] == json!(1)));

    // explicit equality
    let item_ids: HashSet<String> = items.iter().map(|i| i["ID"].to_string()).collect();
    for part in executor.json_rows("Parts") {
        assert!(item_ids.contains(&part["item_ID"].to_string()));
    }

    // equality plus literal
    let comments = executor.json_rows("Comments");
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0]["owner_ID"], json!(1));
    assert_eq!(comments[0]["kind"], json!("order"));

    // managed to-one composition fills the parent
    let orders = executor.json_rows("Orders");
    let invoices = executor.json_rows("Invoices");
    assert_eq!(orders[0]["invoice_ID"], invoices[0]["ID"]);
}

#[test]
fn client_keys_are_kept() {
    let rt = runtime();
    let cx = Cx::for_testing();
    let executor = MemoryExecutor::new();
    let session = DeepSession::new(executor.clone(), planner(order_items()));
    let id = "6f1c2d3e-4a5b-4c6d-8e7f-0123456789ab";

    let result = rt.block_on(async {
        unwrap_outcome(
            session
                .insert(&cx, "Order", &json!({"id": 7, "items": [{"id": id, "qty": 1}]}))
                .await,
        )
    });
    assert!(result.generated_keys().is_empty());
    assert_eq!(executor.json_rows("OrderItem")[0]["id"], json!(id));
    assert_eq!(executor.json_rows("OrderItem")[0]["order_id"], json!(7));
}

#[test]
fn upsert_replaces_children() {
    let rt = runtime();
    let cx = Cx::for_testing();
    let executor = MemoryExecutor::new();
    let session = DeepSession::new(executor.clone(), planner(order_items()));

    rt.block_on(async {
        unwrap_outcome(
            session
                .insert(&cx, "Order", &json!({"id": 1, "items": [{"qty": 5}, {"qty": 6}]}))
                .await,
        )
    });
    let before = executor.json_rows("OrderItem");
    assert_eq!(before.len(), 2);
    let kept = before
        .iter()
        .find(|i| i["qty"] == json!(5))
        .expect("first item")["id"]
        .clone();

    let result = rt.block_on(async {
        unwrap_outcome(
            session
                .upsert(&cx, "Order", &json!({"id": 1, "items": [{"id": kept, "qty": 9}]}))
                .await,
        )
    });
    assert_eq!(result.rows, 1);

    let after = executor.json_rows("OrderItem");
    assert_eq!(after.len(), 1);
    assert_eq!(after[0]["id"], kept);
    assert_eq!(after[0]["qty"], json!(9));
    assert_eq!(after[0]["order_id"], json!(1));
}

#[test]
fn orphans_are_scoped_to_their_parent() {
    let rt = runtime();
    let cx = Cx::for_testing();
    let executor = MemoryExecutor::new();
    let session = DeepSession::new(executor.clone(), planner(order_items()));

    rt.block_on(async {
        unwrap_outcome(
            session
                .insert(
                    &cx,
                    "Order",
                    &json!([
                        {"id": 1, "items": [{"qty": 1}, {"qty": 2}]},
                        {"id": 2, "items": [{"qty": 3}]}
                    ]),
                )
                .await,
        )
    });

    let result = rt.block_on(async {
        unwrap_outcome(session.upsert(&cx, "Order", &json!({"id": 1, "items": []})).await)
    });
    assert_eq!(result.touched("OrderItem"), 2);

    let left = executor.json_rows("OrderItem");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0]["order_id"], json!(2));
    assert_eq!(left[0]["qty"], json!(3));
}

#[test]
fn upsert_without_the_composition_keeps_children() {
    let rt = runtime();
    let cx = Cx::for_testing();
    let executor = MemoryExecutor::new();
    let session = DeepSession::new(executor.clone(), planner(order_items()));

    rt.block_on(async {
        unwrap_outcome(
            session
                .insert(&cx, "Order", &json!({"id": 1, "items": [{"qty": 1}]}))
                .await,
        )
    });
    rt.block_on(async { unwrap_outcome(session.upsert(&cx, "Order", &json!({"id": 1})).await) });
    assert_eq!(executor.json_rows("OrderItem").len(), 1);
}

#[test]
fn update_is_planned_as_upsert() {
    let rt = runtime();
    let cx = Cx::for_testing();
    let executor = MemoryExecutor::new();
    let session = DeepSession::new(executor.clone(), planner(order_items()));

    rt.block_on(async {
        unwrap_outcome(
            session
                .insert(&cx, "Order", &json!({"id": 1, "items": [{"qty": 1}, {"qty": 2}]}))
                .await,
        )
    });
    let result = rt.block_on(async {
        unwrap_outcome(
            session
                .update(&cx, "Order", Filter::eq("id", 1), obj(json!({"items": [{"qty": 4}]})))
                .await,
        )
    });
    assert_eq!(result.rows, 1);

    let items = executor.json_rows("OrderItem");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["qty"], json!(4));
    assert_eq!(items[0]["order_id"], json!(1));
}

#[test]
fn hierarchy_is_written_to_the_depth_limit() {
    let rt = runtime();
    let cx = Cx::for_testing();
    let executor = MemoryExecutor::new();
    let session = DeepSession::new(executor.clone(), planner(nodes()));
    let payload = json!({
        "ID": 1, "name": "root",
        "children": [{"ID": 2, "children": [{"ID": 3, "children": [{"ID": 4, "children": [{"ID": 5}]}]}]}]
    });

    rt.block_on(async { unwrap_outcome(session.insert(&cx, "Nodes", &payload).await) });

    let mut ids: Vec<i64> = executor
        .json_rows("Nodes")
        .iter()
        .filter_map(|n| n["ID"].as_i64())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    let four = executor
        .json_rows("Nodes")
        .into_iter()
        .find(|n| n["ID"] == json!(4))
        .expect("deepest written node");
    assert_eq!(four["parent_ID"], json!(3));
}

#[test]
fn mutual_compositions_are_written_to_the_depth_limit() {
    let rt = runtime();
    let cx = Cx::for_testing();
    let executor = MemoryExecutor::new();
    let session = DeepSession::new(executor.clone(), planner(cyclic()));
    let payload = json!({
        "ID": 1,
        "bs": [{"ID": 10, "as_": [{"ID": 2, "bs": [{"ID": 11, "as_": [{"ID": 3,
            "bs": [{"ID": 12, "as_": [{"ID": 4, "bs": [{"ID": 13}]}]}]}]}]}]}]
    });

    rt.block_on(async { unwrap_outcome(session.insert(&cx, "A", &payload).await) });

    let ids = |table: &str| {
        let mut ids: Vec<i64> = executor
            .json_rows(table)
            .iter()
            .filter_map(|r| r["ID"].as_i64())
            .collect();
        ids.sort_unstable();
        ids
    };
    assert_eq!(ids("A"), vec![1, 2, 3, 4]);
    assert_eq!(ids("B"), vec![10, 11, 12]);

    let four = executor
        .json_rows("A")
        .into_iter()
        .find(|r| r["ID"] == json!(4))
        .expect("deepest written A");
    assert_eq!(four["b_ID"], json!(12));
    let twelve = executor
        .json_rows("B")
        .into_iter()
        .find(|r| r["ID"] == json!(12))
        .expect("deepest written B");
    assert_eq!(twelve["a_ID"], json!(3));
}

#[test]
fn flat_entities_are_written_generically() {
    let rt = runtime();
    let cx = Cx::for_testing();
    let executor = MemoryExecutor::new();
    let session = DeepSession::new(executor.clone(), planner(shop()));

    let result = rt.block_on(async {
        unwrap_outcome(
            session
                .insert(&cx, "Parts", &json!({"ID": "00000000-0000-4000-8000-000000000001", "name": "gear"}))
                .await,
        )
    });
    assert_eq!(result.rows, 1);
    assert_eq!(executor.executed().len(), 1);

    let positional = Operation::positional(
        OperationKind::Upsert,
        "Invoices",
        vec!["ID".into(), "total".into()],
        vec![vec![json!("00000000-0000-4000-8000-000000000002"), json!(12)]],
    );
    let mut ctx = session.request_context();
    let plan = session.plan(&positional, &mut ctx).expect("positional plan");
    let SessionPlan::Generic { statements, rows } = &plan else {
        panic!("expected a generic plan, got {plan:?}");
    };
    assert_eq!(*rows, 1);
    let Statement::Insert(insert) = &statements[0] else {
        panic!("expected an insert");
    };
    assert_eq!(insert.upsert_keys.as_deref(), Some(&["ID".to_string()][..]));
}

#[test]
fn projections_cannot_be_written() {
    let rt = runtime();
    let cx = Cx::for_testing();
    let executor = MemoryExecutor::new();
    let session = DeepSession::new(executor.clone(), planner(shop()));

    let outcome = rt.block_on(session.insert(&cx, "OrderHeaders", &json!({"ID": 1, "remark": "x"})));
    let deepsql::Outcome::Err(err) = outcome else {
        panic!("expected an error");
    };
    assert!(matches!(err, deepsql::Error::Schema(_)));
    assert!(executor.executed().is_empty());
}

#[test]
fn plans_are_cached_per_entity_and_kind() {
    let session = DeepSession::new(MemoryExecutor::new(), planner(shop()));
    let op = Operation::from_json(OperationKind::Insert, "Orders", &nested_order()).expect("payload");

    let mut ctx = session.request_context();
    let first = session.plan(&op, &mut ctx).expect("first plan");
    let second = session.plan(&op, &mut ctx).expect("second plan");
    let (SessionPlan::Deep(first), SessionPlan::Deep(second)) = (&first, &second) else {
        panic!("expected deep plans");
    };
    let (Some(a), Some(b)) = (first.flat_plan(), second.flat_plan()) else {
        panic!("expected flattening plans");
    };
    assert!(Arc::ptr_eq(a, b));
    // each bind generated its own keys
    assert_eq!(ctx.generated_keys().len(), 12);

    let upsert = Operation::from_json(OperationKind::Upsert, "Orders", &nested_order()).expect("payload");
    let third = session.plan(&upsert, &mut ctx).expect("upsert plan");
    let SessionPlan::Deep(third) = &third else {
        panic!("expected a deep plan");
    };
    assert!(!Arc::ptr_eq(a, third.flat_plan().expect("flattening plan")));
}

fn run_both(payloads: &[(OperationKind, serde_json::Value)]) -> (MemoryExecutor, MemoryExecutor) {
    let rt = runtime();
    let cx = Cx::for_testing();
    let flat = MemoryExecutor::new();
    let block = MemoryExecutor::single_block();
    let flat_session = DeepSession::new(flat.clone(), planner(shop()))
        .with_generator(Arc::new(SequentialGenerator::new()));
    let block_session = DeepSession::new(block.clone(), planner(shop()))
        .with_generator(Arc::new(SequentialGenerator::new()));

    let checker = DeepSession::new(MemoryExecutor::single_block(), planner(shop()));

    for (kind, payload) in payloads {
        let op = Operation::from_json(*kind, "Orders", payload).expect("payload");
        let mut ctx = checker.request_context();
        let SessionPlan::Deep(plan) = checker.plan(&op, &mut ctx).expect("block plan") else {
            panic!("expected a deep plan");
        };
        assert_eq!(plan.strategy(), Some(WriteStrategy::SingleBlock));

        let a = rt.block_on(async { unwrap_outcome(flat_session.run(&cx, &op).await) });
        let b = rt.block_on(async { unwrap_outcome(block_session.run(&cx, &op).await) });
        assert_eq!(a.rows, b.rows);
    }
    (flat, block)
}

#[test]
fn strategies_leave_identical_tables() {
    let (flat, block) = run_both(&[
        (OperationKind::Insert, nested_order()),
        (
            OperationKind::Upsert,
            json!({"ID": 1, "note": "calm", "items": [{"qty": 3}], "comments": []}),
        ),
    ]);
    assert_eq!(flat.tables(), block.tables());
    assert_eq!(flat.rows("Items").len(), 1);
    assert!(flat.rows("Comments").is_empty());
    assert_eq!(flat.rows("Orders")[0].get("note"), Some(&Value::Text("calm".into())));
}

#[test]
fn forced_flattening_ignores_block_support() {
    let planner = Arc::new(
        DeepPlanner::new(
            Arc::new(shop()),
            DeepConfig::default().strategy(WriteStrategy::Flatten),
        )
        .expect("valid config"),
    );
    let session = DeepSession::new(MemoryExecutor::single_block(), planner);
    let op = Operation::from_json(OperationKind::Insert, "Orders", &nested_order()).expect("payload");
    let mut ctx = session.request_context();
    let SessionPlan::Deep(plan) = session.plan(&op, &mut ctx).expect("plan") else {
        panic!("expected a deep plan");
    };
    assert_eq!(plan.strategy(), Some(WriteStrategy::Flatten));
}
