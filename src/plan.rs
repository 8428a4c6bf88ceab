//! Schema-driven planning shared by every resource.
//!
//! - create: configured values are kept, computed-only attributes are
//!   unknown (`null`) until apply
//! - update: configurable attributes are diffed; a change to a `force_new`
//!   attribute requires replacement; optional+computed attributes left unset
//!   keep their prior value
//! - delete: the planned state is `null`

use serde_json::{Map, Value};

use crate::schema::Schema;
use crate::types::{AttributeChange, PlanResult};

/// Plan a resource change from its schema.
///
/// `stable_computed` names computed attributes whose prior value survives an
/// in-place update. Every other computed-only attribute becomes unknown when
/// anything changes.
pub fn plan_resource(
    schema: &Schema,
    stable_computed: &[&str],
    prior_state: Option<&Value>,
    proposed_state: &Value,
) -> PlanResult {
    let prior = prior_state.filter(|v| !v.is_null());
    match (prior, proposed_state) {
        (Some(prior), Value::Null) => plan_delete(schema, prior),
        (None, proposed) => plan_create(schema, proposed),
        (Some(prior), proposed) => plan_update(schema, stable_computed, prior, proposed),
    }
}

fn sorted_attribute_names(schema: &Schema) -> Vec<&String> {
    let mut names: Vec<&String> = schema.block.attributes.keys().collect();
    names.sort();
    names
}

fn field<'a>(value: &'a Value, name: &str) -> &'a Value {
    value.get(name).unwrap_or(&Value::Null)
}

fn plan_create(schema: &Schema, proposed: &Value) -> PlanResult {
    let mut planned = Map::new();
    let mut changes = Vec::new();

    for name in sorted_attribute_names(schema) {
        let attr = &schema.block.attributes[name];
        let value = if attr.flags.is_computed_only() {
            Value::Null
        } else {
            field(proposed, name).clone()
        };

        if value.is_null() {
            if attr.flags.computed {
                changes.push(AttributeChange::new(name.as_str(), None, None));
            }
        } else {
            changes.push(AttributeChange::added(name.as_str(), value.clone()));
        }
        planned.insert(name.clone(), value);
    }

    PlanResult::with_changes(Value::Object(planned), changes, false)
}

fn plan_update(
    schema: &Schema,
    stable_computed: &[&str],
    prior: &Value,
    proposed: &Value,
) -> PlanResult {
    let mut planned = Map::new();
    let mut changes = Vec::new();
    let mut requires_replace = false;

    for name in sorted_attribute_names(schema) {
        let attr = &schema.block.attributes[name];
        if attr.flags.is_computed_only() {
            continue;
        }

        let before = field(prior, name);
        let mut after = field(proposed, name).clone();
        if after.is_null() && attr.flags.computed {
            after = before.clone();
        }

        if &after != before {
            if attr.force_new {
                requires_replace = true;
            }
            changes.push(AttributeChange::new(
                name.as_str(),
                Some(before.clone()).filter(|v| !v.is_null()),
                Some(after.clone()).filter(|v| !v.is_null()),
            ));
        }
        planned.insert(name.clone(), after);
    }

    let changed = !changes.is_empty();
    for name in sorted_attribute_names(schema) {
        let attr = &schema.block.attributes[name];
        if !attr.flags.is_computed_only() {
            continue;
        }
        let keep = !changed || (!requires_replace && stable_computed.contains(&name.as_str()));
        let value = if keep {
            field(prior, name).clone()
        } else {
            Value::Null
        };
        if !keep && !field(prior, name).is_null() {
            changes.push(AttributeChange::new(
                name.as_str(),
                Some(field(prior, name).clone()),
                None,
            ));
        }
        planned.insert(name.clone(), value);
    }

    PlanResult::with_changes(Value::Object(planned), changes, requires_replace)
}

fn plan_delete(schema: &Schema, prior: &Value) -> PlanResult {
    let changes = sorted_attribute_names(schema)
        .into_iter()
        .filter_map(|name| {
            let before = field(prior, name);
            (!before.is_null()).then(|| AttributeChange::removed(name.as_str(), before.clone()))
        })
        .collect();
    PlanResult::with_changes(Value::Null, changes, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    fn random_string_schema() -> Schema {
        Schema::v0()
            .with_attribute("project_id", Attribute::required_string().with_force_new())
            .with_attribute("namespace", Attribute::required_string().with_force_new())
            .with_attribute("suffix", Attribute::required_string().with_force_new())
            .with_attribute("type", Attribute::required_string())
            .with_attribute("length", Attribute::required_int64())
            .with_attribute("secret_id", Attribute::computed_string())
            .with_attribute("value", Attribute::computed_string().sensitive())
    }

    fn prior() -> Value {
        json!({
            "project_id": "p", "namespace": "acme", "suffix": "-pw",
            "type": "password", "length": 12,
            "secret_id": "acme-pw", "value": "hash"
        })
    }

    #[test]
    fn test_plan_create_marks_computed_unknown() {
        let proposed = json!({
            "project_id": "p", "namespace": "acme", "suffix": "-pw",
            "type": "password", "length": 12, "secret_id": "ignored"
        });
        let plan = plan_resource(&random_string_schema(), &["secret_id"], None, &proposed);

        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["namespace"], "acme");
        assert!(plan.planned_state["secret_id"].is_null());
        assert!(plan.planned_state["value"].is_null());
        assert!(plan.changes.iter().any(|c| c.path == "value" && c.after.is_none()));
        assert!(plan.changes.iter().any(|c| c.path == "length"));
    }

    #[test]
    fn test_plan_update_no_changes_keeps_state() {
        let mut proposed = prior();
        proposed["value"] = Value::Null;
        let plan = plan_resource(&random_string_schema(), &["secret_id"], Some(&prior()), &proposed);

        assert!(plan.is_no_op());
        assert_eq!(plan.planned_state["value"], "hash");
        assert_eq!(plan.planned_state["secret_id"], "acme-pw");
    }

    #[test]
    fn test_plan_update_in_place() {
        let mut proposed = prior();
        proposed["length"] = json!(20);
        let plan = plan_resource(&random_string_schema(), &["secret_id"], Some(&prior()), &proposed);

        assert!(!plan.requires_replace);
        assert!(plan.changes.iter().any(|c| c.path == "length"));
        assert_eq!(plan.planned_state["secret_id"], "acme-pw");
        assert!(plan.planned_state["value"].is_null());
    }

    #[test]
    fn test_plan_force_new_requires_replace() {
        let mut proposed = prior();
        proposed["namespace"] = json!("beta");
        let plan = plan_resource(&random_string_schema(), &["secret_id"], Some(&prior()), &proposed);

        assert!(plan.requires_replace);
        assert!(plan.planned_state["secret_id"].is_null());
    }

    #[test]
    fn test_optional_computed_keeps_prior_when_unset() {
        let schema = Schema::v0()
            .with_attribute("namespace", Attribute::required_string().with_force_new())
            .with_attribute("hmac_key", Attribute::optional_computed_string().sensitive());
        let prior = json!({"namespace": "acme", "hmac_key": "abcd"});

        let plan = plan_resource(&schema, &[], Some(&prior), &json!({"namespace": "acme"}));
        assert!(plan.is_no_op());
        assert_eq!(plan.planned_state["hmac_key"], "abcd");

        let plan = plan_resource(
            &schema,
            &[],
            Some(&prior),
            &json!({"namespace": "acme", "hmac_key": "ef01"}),
        );
        assert!(!plan.requires_replace);
        assert_eq!(plan.changes.len(), 1);
    }

    #[test]
    fn test_plan_delete() {
        let plan = plan_resource(&random_string_schema(), &[], Some(&prior()), &Value::Null);
        assert!(plan.planned_state.is_null());
        assert!(plan.changes.iter().all(|c| c.after.is_none()));
        assert_eq!(plan.changes.len(), 7);
    }
}
