//! Prop Diff Engine: decides, per attribute key, whether an update applies a
//! new value, disowns a dropped one, or does nothing.
//!
//! Keys are visited in a deterministic order: the next map's keys in
//! declaration order, then keys only present in the previous map.  A `null`
//! value is treated the same as an absent key.  Values are compared
//! structurally, so a re-declared object with equal contents is a no-op.

use hertz_types::PropMap;
use serde_json::Value;

use crate::peripheral::PropHandlers;

/// What an update does with one attribute key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropAction {
    Apply,
    Disown,
    None,
}

/// One entry of an attribute diff.
#[derive(Debug, Clone, PartialEq)]
pub struct PropDiff {
    pub key: String,
    pub prev: Option<Value>,
    pub next: Option<Value>,
    pub action: PropAction,
}

fn defined<'a>(props: &'a PropMap, key: &str) -> Option<&'a Value> {
    props.get(key).filter(|value| !value.is_null())
}

/// Diff `prev` against `next` for a peripheral with the given handler table.
///
/// `first_apply` forces every defined key with an apply handler to be
/// applied even if it equals the previous value.
pub fn diff_props<P>(
    prev: &PropMap,
    next: &PropMap,
    first_apply: bool,
    handlers: &PropHandlers<P>,
) -> Vec<PropDiff> {
    let keys = next
        .keys()
        .chain(prev.keys().filter(|key| !next.contains_key(key.as_str())));

    keys.map(|key| {
        let prev_value = defined(prev, key);
        let next_value = defined(next, key);

        let action = match (prev_value, next_value) {
            (_, Some(n)) if handlers.has_apply(key) && (first_apply || prev_value != Some(n)) => {
                PropAction::Apply
            }
            (Some(_), None) if handlers.has_disown(key) => PropAction::Disown,
            _ => PropAction::None,
        };

        PropDiff {
            key: key.clone(),
            prev: prev_value.cloned(),
            next: next_value.cloned(),
            action,
        }
    })
    .collect()
}
