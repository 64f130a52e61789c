//! Deep merge of an override tree onto a base tree.
//!
//! Mappings merge key by key in the override's order. Directive keys change
//! the behavior for the fields they name:
//!
//! - `<replace_x>: {field: value}` sets `field` verbatim, no recursion.
//! - `<extend(s,e)..._x>: {field: items}` appends `items` to the inherited
//!   list, optionally rebuilding the inherited list from slices first.
//! - `field: <remove>` drops `field`.
//!
//! Lists made entirely of `--flag` strings merge flag by flag against an
//! inherited flag list; any other list, and any scalar, replaces the base.

use serde_json::{Map, Value};

use crate::directive::{parse_directive, Directive, DirectiveKind, SliceRange, REMOVE};
use crate::error::RecipeError;

const FLAG_PREFIX: &str = "--";

pub fn merge(base: &Value, overlay: &Value) -> Result<Value, RecipeError> {
    match overlay {
        Value::Object(entries) => merge_mapping(base, entries),
        Value::Array(items) => Ok(merge_sequence(base, items)),
        scalar => Ok(scalar.clone()),
    }
}

fn merge_mapping(base: &Value, entries: &Map<String, Value>) -> Result<Value, RecipeError> {
    let mut merged = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    for (key, value) in entries {
        match parse_directive(key)? {
            Some(Directive {
                kind: DirectiveKind::Replace,
                ..
            }) => apply_replace(&mut merged, key, value)?,
            Some(Directive {
                kind: DirectiveKind::Extend,
                slices,
                ..
            }) => apply_extend(&mut merged, key, &slices, value)?,
            Some(Directive {
                kind: DirectiveKind::RepeatLast,
                ..
            }) => return Err(RecipeError::MisplacedRepeatLast(key.clone())),
            None if value.as_str() == Some(REMOVE) => {
                merged.retain(|existing, _| existing != key);
            }
            None => {
                let next = merge(merged.get(key).unwrap_or(&Value::Null), value)?;
                merged.insert(key.clone(), next);
            }
        }
    }

    Ok(Value::Object(merged))
}

fn apply_replace(
    merged: &mut Map<String, Value>,
    directive: &str,
    value: &Value,
) -> Result<(), RecipeError> {
    let fields = value
        .as_object()
        .ok_or_else(|| RecipeError::DirectiveNotMapping {
            directive: directive.to_string(),
            action: "replace",
        })?;
    for (field, replacement) in fields {
        merged.insert(field.clone(), replacement.clone());
    }
    Ok(())
}

fn apply_extend(
    merged: &mut Map<String, Value>,
    directive: &str,
    slices: &[SliceRange],
    value: &Value,
) -> Result<(), RecipeError> {
    let fields = value
        .as_object()
        .ok_or_else(|| RecipeError::DirectiveNotMapping {
            directive: directive.to_string(),
            action: "extend",
        })?;

    for (field, additions) in fields {
        let additions = match additions {
            Value::Array(items) => items.clone(),
            single => vec![single.clone()],
        };
        let extended = match merged.get(field) {
            None | Some(Value::Null) => additions,
            Some(Value::Array(existing)) => {
                let mut rebuilt: Vec<Value> = if slices.is_empty() {
                    existing.clone()
                } else {
                    slices
                        .iter()
                        .flat_map(|slice| slice.apply(existing).iter().cloned())
                        .collect()
                };
                rebuilt.extend(additions);
                rebuilt
            }
            Some(_) => {
                return Err(RecipeError::ExtendNonList {
                    directive: directive.to_string(),
                    field: field.clone(),
                })
            }
        };
        merged.insert(field.clone(), Value::Array(extended));
    }
    Ok(())
}

fn merge_sequence(base: &Value, items: &[Value]) -> Value {
    match base {
        Value::Array(existing) if is_flag_list(items) => Value::Array(merge_flags(existing, items)),
        _ => Value::Array(items.to_vec()),
    }
}

fn is_flag_list(items: &[Value]) -> bool {
    !items.is_empty()
        && items
            .iter()
            .all(|item| item.as_str().is_some_and(|s| s.starts_with(FLAG_PREFIX)))
}

/// `--name=value` replaces the first inherited flag with the same `--name=`
/// prefix (or is appended); a bare `--flag` is appended unless already present.
fn merge_flags(existing: &[Value], flags: &[Value]) -> Vec<Value> {
    let mut merged = existing.to_vec();
    for flag in flags.iter().filter_map(Value::as_str) {
        match flag.split_once('=') {
            Some((name, _)) => {
                let prefix = format!("{}=", name);
                let slot = merged
                    .iter_mut()
                    .find(|item| item.as_str().is_some_and(|s| s.starts_with(&prefix)));
                match slot {
                    Some(slot) => *slot = Value::String(flag.to_string()),
                    None => merged.push(Value::String(flag.to_string())),
                }
            }
            None => {
                if !merged.iter().any(|item| item.as_str() == Some(flag)) {
                    merged.push(Value::String(flag.to_string()));
                }
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_step() -> Value {
        json!({
            "run": {
                "binpacks": ["a.bin", "b.bin", "c.bin", "d.bin"],
                "other_options": ["--lr=0.1", "--gamma=0.9", "--ft_optimize"]
            }
        })
    }

    fn merged_run(overlay: Value) -> Value {
        let merged = merge(&base_step(), &overlay).expect("merge");
        merged["run"].clone()
    }

    #[test]
    fn extend_without_slices_appends() {
        let run = merged_run(json!({"run": {"<extend_bp>": {"binpacks": ["e.bin"]}}}));
        assert_eq!(
            run["binpacks"],
            json!(["a.bin", "b.bin", "c.bin", "d.bin", "e.bin"])
        );
    }

    #[test]
    fn extend_with_slices_narrows_inherited_list() {
        let from_two = merged_run(json!({"run": {"<extend(2,)>": {"binpacks": ["e.bin"]}}}));
        assert_eq!(from_two["binpacks"], json!(["c.bin", "d.bin", "e.bin"]));

        let drop_last = merged_run(json!({"run": {"<extend(,-1)>": {"binpacks": ["e.bin"]}}}));
        assert_eq!(
            drop_last["binpacks"],
            json!(["a.bin", "b.bin", "c.bin", "e.bin"])
        );

        let middle = merged_run(json!({"run": {"<extend(1,3)>": {"binpacks": ["e.bin"]}}}));
        assert_eq!(middle["binpacks"], json!(["b.bin", "c.bin", "e.bin"]));
    }

    #[test]
    fn extend_slices_concatenate_without_sorting_or_dedup() {
        let run = merged_run(json!({"run": {"<extend(2,)(0,2)(1,2)_x>": {"binpacks": []}}}));
        assert_eq!(
            run["binpacks"],
            json!(["c.bin", "d.bin", "a.bin", "b.bin", "b.bin"])
        );
    }

    #[test]
    fn extend_creates_missing_or_null_fields_and_wraps_scalars() {
        let run = merged_run(json!({"run": {"<extend>": {"new_list": ["a", "b"]}}}));
        assert_eq!(run["new_list"], json!(["a", "b"]));

        let base = json!({"run": {"binpacks": null}});
        let merged = merge(&base, &json!({"run": {"<extend>": {"binpacks": "x.bin"}}}))
            .expect("merge");
        assert_eq!(merged["run"]["binpacks"], json!(["x.bin"]));
    }

    #[test]
    fn extend_on_scalar_field_is_rejected() {
        let base = json!({"run": {"max_epochs": 400}});
        let err = merge(&base, &json!({"run": {"<extend_rs>": {"max_epochs": [450]}}}))
            .expect_err("scalar extend must fail");
        match err {
            RecipeError::ExtendNonList { directive, field } => {
                assert_eq!(directive, "<extend_rs>");
                assert_eq!(field, "max_epochs");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn same_kind_directives_are_cumulative_in_order() {
        let run = merged_run(json!({"run": {
            "<extend_1>": {"binpacks": ["e.bin"]},
            "<extend(1,)_2>": {"binpacks": ["f.bin"]},
        }}));
        assert_eq!(
            run["binpacks"],
            json!(["b.bin", "c.bin", "d.bin", "e.bin", "f.bin"])
        );
    }

    #[test]
    fn flag_lists_merge_by_name() {
        let run = merged_run(json!({"run": {"other_options": ["--lr=0.01", "--new-flag"]}}));
        assert_eq!(
            run["other_options"],
            json!(["--lr=0.01", "--gamma=0.9", "--ft_optimize", "--new-flag"])
        );

        let again = merged_run(json!({"run": {"other_options": ["--ft_optimize"]}}));
        assert_eq!(
            again["other_options"],
            json!(["--lr=0.1", "--gamma=0.9", "--ft_optimize"])
        );
    }

    #[test]
    fn non_flag_lists_replace_the_base() {
        let run = merged_run(json!({"run": {"binpacks": ["z.bin"]}}));
        assert_eq!(run["binpacks"], json!(["z.bin"]));

        let mixed = merged_run(json!({"run": {"other_options": ["--lr=0.2", "plain"]}}));
        assert_eq!(mixed["other_options"], json!(["--lr=0.2", "plain"]));

        let empty = merged_run(json!({"run": {"other_options": []}}));
        assert_eq!(empty["other_options"], json!([]));
    }

    #[test]
    fn replace_discards_inherited_value() {
        let run = merged_run(json!({"run": {"<replace_opts>": {"other_options": ["--lr=0.5"]}}}));
        assert_eq!(run["other_options"], json!(["--lr=0.5"]));
        assert_eq!(run["binpacks"], base_step()["run"]["binpacks"]);
    }

    #[test]
    fn replace_requires_a_mapping() {
        let err = merge(&base_step(), &json!({"run": {"<replace>": ["--lr=0.5"]}}))
            .expect_err("list payload must fail");
        assert!(matches!(
            err,
            RecipeError::DirectiveNotMapping { action: "replace", .. }
        ));
    }

    #[test]
    fn remove_drops_keys_and_tolerates_absent_ones() {
        let run = merged_run(json!({"run": {"binpacks": "<remove>", "never_there": "<remove>"}}));
        let run = run.as_object().expect("run mapping");
        assert!(!run.contains_key("binpacks"));
        assert!(!run.contains_key("never_there"));
        assert!(run.contains_key("other_options"));
    }

    #[test]
    fn scalars_and_type_mismatches_take_the_override() {
        let base = json!({"run": {"max_epochs": 400, "resume": {"mode": "none"}}});
        let merged = merge(&base, &json!({"run": {"max_epochs": 450, "resume": "previous_model"}}))
            .expect("merge");
        assert_eq!(merged["run"]["max_epochs"], json!(450));
        assert_eq!(merged["run"]["resume"], json!("previous_model"));
        assert_eq!(merge(&json!([1, 2]), &json!(3)).expect("merge"), json!(3));
    }

    #[test]
    fn directives_apply_under_new_keys() {
        let merged = merge(
            &json!({}),
            &json!({"convert": {"<extend>": {"checkpoint2nnue": "--features=HalfKAv2_hm"}}}),
        )
        .expect("merge");
        assert_eq!(
            merged["convert"]["checkpoint2nnue"],
            json!(["--features=HalfKAv2_hm"])
        );
    }

    #[test]
    fn repeat_last_inside_an_override_is_rejected() {
        let err = merge(&base_step(), &json!({"run": {"<repeat_last>": {}}}))
            .expect_err("must fail");
        assert!(matches!(err, RecipeError::MisplacedRepeatLast(_)));
    }

    #[test]
    fn inputs_are_left_untouched() {
        let base = base_step();
        let overlay = json!({"run": {"<extend>": {"binpacks": ["e.bin"]}, "other_options": "<remove>"}});
        let before = (base.clone(), overlay.clone());
        let _ = merge(&base, &overlay).expect("merge");
        assert_eq!((base, overlay), before);
    }
}
