mod common;

use common::{assert_converged, deliver, edit, A, B};
use json_crdt_core::json_crdt::extensions::{ExtApi, ExtNode, Extension, Extensions};
use json_crdt_core::json_crdt_patch::schema::{s, NodeBuilder};
use json_crdt_core::{ApiError, Model, PatchBuilder};
use serde_json::{json, Value};

/// Grow-only counter: one entry per session, the view is their sum.
struct Counter;

const COUNTER: u8 = 0;

impl Extension for Counter {
    fn id(&self) -> u8 {
        COUNTER
    }

    fn name(&self) -> &str {
        "cnt"
    }

    fn schema(&self, init: &Value) -> Box<dyn NodeBuilder> {
        match init.as_i64() {
            Some(n) if n != 0 => s::obj(vec![("0", s::con(json!(n)))]),
            _ => s::obj(vec![]),
        }
    }

    fn view(&self, model: &Model, node: &ExtNode) -> Value {
        match model.value_view(node.data) {
            Value::Object(map) => json!(map.values().filter_map(Value::as_i64).sum::<i64>()),
            _ => json!(0),
        }
    }
}

fn inc(mut handle: ExtApi<'_, '_>, by: i64) -> Result<(), ApiError> {
    let key = handle.api.model.sid().to_string();
    let current = handle.api.model.value_view(handle.node.data)[key.as_str()]
        .as_i64()
        .unwrap_or(0);
    handle.api.obj_set(handle.node.data, &[(key.as_str(), json!(current + by))])
}

fn registry() -> Extensions {
    let mut exts = Extensions::new();
    exts.register(Box::new(Counter));
    exts
}

#[test]
fn counters_merge_across_replicas() {
    let exts = registry();
    let mut a = Model::new(A);
    let mut builder = PatchBuilder::from_clock_vector(&a.clock);
    let counter = Counter.new_node(&json!(5)).build(&mut builder).unwrap();
    let doc = builder.obj().unwrap();
    builder.ins_obj(doc, vec![("visits".to_owned(), counter)]).unwrap();
    builder.root(doc).unwrap();
    a.apply_patch(&builder.flush()).unwrap();
    assert_eq!(exts.view(&a), json!({"visits": 5}));

    let mut b = a.fork(Some(B));
    let pa = edit(&mut a, |api| {
        inc(exts.api(api, counter).unwrap(), 2).unwrap();
        inc(exts.api(api, counter).unwrap(), 1).unwrap();
    });
    let pb = edit(&mut b, |api| inc(exts.api(api, counter).unwrap(), 10).unwrap());

    deliver(&mut a, &[pb]);
    deliver(&mut b, &[pa]);
    assert_converged(&[&a, &b]);
    assert_eq!(exts.view(&a), json!({"visits": 18}));
    assert_eq!(exts.view(&b), exts.view(&a));
}

#[test]
fn unregistered_extension_renders_raw() {
    let mut a = Model::new(A);
    let mut builder = PatchBuilder::from_clock_vector(&a.clock);
    let counter = Counter.new_node(&json!(null)).build(&mut builder).unwrap();
    builder.root(counter).unwrap();
    a.apply_patch(&builder.flush()).unwrap();

    let empty = Extensions::new();
    assert!(empty.node(&a, counter).is_none());
    assert_eq!(empty.view(&a), a.view());
    assert_eq!(
        a.view(),
        json!([[COUNTER, A % 256, counter.time % 256], {}])
    );
    assert_eq!(registry().view(&a), json!(0));
}
