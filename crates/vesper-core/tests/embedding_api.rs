//! Embedding-API and quantified-invariant tests (spec §8) that exercise
//! `State` directly rather than through a script: push/to round-trips,
//! pin/unpin handle stability across a GC cycle, table key dedup, the
//! `#t` border property, and `gc_collect` idempotence.

use vesper_core::{execute, stdlib, RuntimeOptions, State, Value};

#[test]
fn push_to_round_trip_integer_boolean_string() {
    let mut state = State::new(RuntimeOptions::default());

    state.push_integer(42);
    assert_eq!(state.to_integer(-1), Some(42));
    state.pop(1);

    state.push_bool(true);
    assert!(state.to_bool(-1));
    state.pop(1);

    state.push_string("hello").unwrap();
    assert_eq!(state.to_string_value(-1).as_deref(), Some("hello"));
    state.pop(1);
}

#[test]
fn push_to_round_trip_float_within_precision() {
    let mut state = State::new(RuntimeOptions::default());
    state.push_float(3.5);
    assert_eq!(state.to_float(-1), Some(3.5));
}

#[test]
fn pin_unpin_survives_a_gc_cycle() {
    let mut state = State::new(RuntimeOptions::default());
    stdlib::open_libs(&mut state).unwrap();

    let tag_key = Value::String(intern(&mut state, "tag"));
    let id = state.push_table().unwrap();
    state.raw_set(-1, tag_key, Value::Integer(7)).unwrap();
    let handle = state.pin_top();

    // Allocate a lot of unrelated garbage and force full cycles; the pinned
    // table must survive since `mark_roots` walks the pinned-values table.
    for _ in 0..500 {
        state.push_table().unwrap();
        state.pop(1);
    }
    state.gc_collect();
    state.gc_collect();

    state.pinned_push(handle).unwrap();
    assert!(matches!(state.get(-1), Value::Table(t) if t == id));
    let tag = state.raw_get(-1, tag_key).unwrap();
    assert!(matches!(tag, Value::Integer(7)));
    state.unpin(handle);
}

fn intern(state: &mut State, s: &str) -> vesper_core::gc::pool::StringId {
    state.heap.alloc_string(vesper_core::value::string::LuaStr::new(s)).unwrap()
}

#[test]
fn gc_collect_twice_is_idempotent_for_observable_state() {
    let mut state = State::new(RuntimeOptions::default());
    stdlib::open_libs(&mut state).unwrap();
    for _ in 0..50 {
        state.push_table().unwrap();
        state.pop(1);
    }
    state.gc_collect();
    let once = state.heap.total_bytes();
    state.gc_collect();
    let twice = state.heap.total_bytes();
    assert_eq!(once, twice);
}

#[test]
fn table_keys_that_compare_equal_never_coexist() {
    let mut state = State::new(RuntimeOptions::default());
    state.push_table().unwrap();
    state.raw_set(-1, Value::Integer(3), Value::Integer(100)).unwrap();
    // A float key with no fractional part aliases the integer key (spec
    // §4.1 "Table key canonicalization" / DESIGN.md open-question #2).
    state.raw_set(-1, Value::Float(3.0), Value::Integer(200)).unwrap();
    let v = state.raw_get(-1, Value::Integer(3)).unwrap();
    assert!(matches!(v, Value::Integer(200)));
    assert_eq!(state.table_len(-1).unwrap(), 0);
}

#[test]
fn table_length_border_with_dense_prefix() {
    let mut state = State::new(RuntimeOptions::default());
    state.push_table().unwrap();
    for i in 0..5 {
        state.raw_set(-1, Value::Integer(i), Value::Integer(i * 10)).unwrap();
    }
    assert_eq!(state.table_len(-1).unwrap(), 5);
}

#[test]
fn nan_is_not_equal_to_itself() {
    let results = execute("return (0.0 / 0.0) == (0.0 / 0.0);").expect("chunk should run");
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Value::Boolean(false)));
}

#[test]
fn compile_run_recompile_run_is_deterministic() {
    let source = "function sq(n) { return n * n; } return sq(6) + sq(7);";
    let first = execute(source).expect("first run");
    let second = execute(source).expect("second run");
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert!(matches!(first[0], Value::Integer(85)));
    assert!(matches!(second[0], Value::Integer(85)));
}

#[test]
fn pcall_restores_stack_on_failure() {
    let mut state = State::new(RuntimeOptions::default());
    stdlib::open_libs(&mut state).unwrap();
    let before = state.top();
    let results = vesper_core::execute_with_vm(
        &mut state,
        r#"
        function bad() {
            return nil + 1;
        }
        let ok = pcall(bad);
        return ok;
        "#,
    )
    .expect("pcall should swallow the inner error");
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Value::Boolean(false)));
    assert_eq!(state.top(), before);
}
