//! Property-based invariant tests for param coercion and the set/get value flow.
//!
//! 1. Int coercion clamps into the configured range.
//! 2. Coercion is idempotent.
//! 3. A plain param returns what was set, coerced, from `get_value`.
//! 4. `get_value` without a getter neither changes the value nor notifies.
//! 5. With a setter returning a value, that value (coerced) wins.
//! 6. With a setter returning nothing and a getter, the getter's value wins and it runs once.
//! 7. Every `set_value` notifies exactly once.
//! 8. A failing setter leaves the param un-highlighted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use proptest::prelude::*;

use puzzle_backend::param::{Param, ParamConfig, ParamKind};
use puzzle_backend::Value;

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Int),
        (-1e12f64..1e12).prop_map(Value::Float),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(|v| Value::Text(v.to_string())),
    ]
}

fn count_changes(param: &Param) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    param.changed().connect(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    count
}

proptest! {
    #[test]
    fn int_coercion_clamps(v in any::<i64>(), a in -1000i64..1000, b in -1000i64..1000) {
        let (min, max) = (a.min(b), a.max(b));
        let kind = ParamKind::Int { min, max };
        let coerced = kind.coerce(&Value::Int(v)).unwrap();
        prop_assert_eq!(coerced, Value::Int(v.clamp(min, max)));
    }

    #[test]
    fn coercion_is_idempotent(v in value_strategy()) {
        for kind in [ParamKind::int(), ParamKind::float(), ParamKind::Text, ParamKind::Bool] {
            // numeric text such as "42" is not a bool
            if let Ok(once) = kind.coerce(&v) {
                let twice = kind.coerce(&once).unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }

    #[test]
    fn plain_param_round_trip(v in value_strategy()) {
        let param = Param::new("x", ParamConfig::float(0.));
        let changes = count_changes(&param);
        let set = param.set_value(Some(v.clone())).unwrap();
        prop_assert_eq!(set.clone(), ParamKind::float().coerce(&v).unwrap());
        prop_assert_eq!(param.get_value().unwrap(), Some(set.clone()));
        prop_assert_eq!(param.get_value().unwrap(), Some(set));
        prop_assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn setter_return_wins(v in -1000i64..1000, offset in -10i64..10) {
        let param = Param::new("x", ParamConfig::int(0));
        param.attach_setter(move |v| Ok(Some(Value::Int(v.as_int().unwrap_or(0) + offset))));
        let changes = count_changes(&param);
        param.set(v).unwrap();
        prop_assert_eq!(param.value(), Some(Value::Int(v + offset)));
        prop_assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn getter_fallback_runs_once(v in -1000i64..1000) {
        let device = Arc::new(Mutex::new(0i64));
        let reads = Arc::new(AtomicUsize::new(0));
        let param = Param::new("x", ParamConfig::int(0));
        let d = device.clone();
        param.attach_setter(move |v| {
            *d.lock() = v.as_int().unwrap_or(0) * 2;
            Ok(None)
        });
        let (d, r) = (device.clone(), reads.clone());
        param.attach_getter(move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(*d.lock()))
        });
        let changes = count_changes(&param);
        param.set(v).unwrap();
        prop_assert_eq!(param.value(), Some(Value::Int(2 * v)));
        prop_assert_eq!(reads.load(Ordering::SeqCst), 1);
        prop_assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_setter_releases_highlight(v in value_strategy()) {
        let param = Param::new("x", ParamConfig::text(""));
        param.attach_setter(|_| Err(anyhow!("device offline")));
        let changes = count_changes(&param);
        prop_assert!(param.set_value(Some(v)).is_err());
        prop_assert!(!param.is_highlighted());
        prop_assert_eq!(param.value(), None);
        prop_assert_eq!(changes.load(Ordering::SeqCst), 0);
    }
}
