//! Builds a normalized contract from a raw resource definition.
//!
//! Total over well-formed input: a missing key field is synthesized, duplicate
//! API names keep the first declaration, and every other rule is a pure
//! computation over the definition's flags.

use crate::contract::model::*;
use crate::contract::types::{FieldDefinition, RelationDefinition, ResourceDefinition};
use std::collections::{BTreeSet, HashMap, HashSet};

const DEFAULT_MAX_PAGE_SIZE: u32 = 200;

pub fn build(definition: &ResourceDefinition) -> ResourceContract {
    let key_name = definition.key_field.name.as_str();
    let key_type = definition.key_field.type_;

    let mut seen: HashSet<String> = HashSet::new();
    let mut fields: Vec<FieldContract> = Vec::with_capacity(definition.fields.len());
    for raw in &definition.fields {
        let field = normalize_field(raw, key_name);
        if !seen.insert(field.api_name.to_ascii_lowercase()) {
            continue;
        }
        fields.push(field);
    }

    // A definition may describe the key implicitly; make sure the contract never does.
    if !fields.iter().any(|f| f.is_key) {
        seen.insert(key_name.to_ascii_lowercase());
        fields.insert(0, synthesized_key(key_name, key_type));
    }
    let key_api_name = fields
        .iter()
        .find(|f| f.is_key)
        .map(|f| f.api_name.clone())
        .unwrap_or_else(|| key_name.to_string());

    let mut relations: Vec<RelationContract> = Vec::with_capacity(definition.relations.len());
    for raw in &definition.relations {
        let relation = normalize_relation(raw);
        if !seen.insert(relation.api_name.to_ascii_lowercase()) {
            continue;
        }
        relations.push(relation);
    }

    let distinct = |pred: &dyn Fn(&FieldContract) -> bool| -> BTreeSet<String> {
        fields.iter().filter(|f| pred(f)).map(|f| f.api_name.clone()).collect()
    };
    let query = QueryContract {
        max_page_size: definition.max_page_size.unwrap_or(DEFAULT_MAX_PAGE_SIZE).max(1),
        filterable: distinct(&|f| f.filterable),
        sortable: distinct(&|f| f.sortable),
        searchable: distinct(&|f| f.searchable),
        default_sort: definition.default_sort.clone(),
    };
    let read = ReadContract {
        expandable: relations.iter().filter(|r| r.expandable).map(|r| r.api_name.clone()).collect(),
        max_expand_depth: definition.max_expand_depth.unwrap_or(1).max(1),
        default_expanded: relations
            .iter()
            .filter(|r| r.expandable && r.default_expanded)
            .map(|r| r.api_name.clone())
            .collect(),
    };

    let read_fields: BTreeSet<String> = distinct(&|f| f.in_read);
    let create_fields: BTreeSet<String> = distinct(&|f| f.in_create);
    let update_fields: BTreeSet<String> = distinct(&|f| f.in_update);
    let immutable_fields: BTreeSet<String> = distinct(&|f| f.immutable);
    let writable_relations: BTreeSet<String> = relations
        .iter()
        .filter(|r| r.write != RelationWriteMode::Disabled)
        .map(|r| r.write_field.clone())
        .collect();
    let mut required_on_create: BTreeSet<String> = fields
        .iter()
        .filter(|f| f.in_create && f.rules.required == Some(true))
        .map(|f| f.api_name.clone())
        .collect();
    required_on_create.extend(
        relations
            .iter()
            .filter(|r| r.write != RelationWriteMode::Disabled && r.required_on_create)
            .map(|r| r.write_field.clone()),
    );

    let concurrency = fields.iter().find(|f| f.is_concurrency_token).map(|f| ConcurrencyContract {
        mode: ConcurrencyMode::Optimistic,
        token_field: f.api_name.clone(),
        required_on_update: definition.require_concurrency_token,
    });

    let enabled = |op: Operation| -> bool {
        definition.operations.as_ref().map(|ops| ops.contains(&op)).unwrap_or(true)
    };

    let mut operations = HashMap::new();
    operations.insert(
        Operation::List,
        OperationContract {
            enabled: enabled(Operation::List),
            input: BTreeSet::new(),
            output: read_fields.clone(),
            required_on_create: BTreeSet::new(),
            immutable: BTreeSet::new(),
            concurrency: None,
        },
    );
    operations.insert(
        Operation::Get,
        OperationContract {
            enabled: enabled(Operation::Get),
            input: BTreeSet::new(),
            output: read_fields.union(&read.expandable).cloned().collect(),
            required_on_create: BTreeSet::new(),
            immutable: BTreeSet::new(),
            concurrency: None,
        },
    );
    operations.insert(
        Operation::Create,
        OperationContract {
            enabled: enabled(Operation::Create),
            input: create_fields.union(&writable_relations).cloned().collect(),
            output: read_fields.clone(),
            required_on_create,
            immutable: BTreeSet::new(),
            concurrency: None,
        },
    );
    let mut update_input: BTreeSet<String> = update_fields.union(&writable_relations).cloned().collect();
    if let Some(cc) = &concurrency {
        // The token is immutable but may be echoed back for the compare.
        update_input.insert(cc.token_field.clone());
    }
    operations.insert(
        Operation::Update,
        OperationContract {
            enabled: enabled(Operation::Update),
            input: update_input,
            output: read_fields,
            required_on_create: BTreeSet::new(),
            immutable: immutable_fields,
            concurrency,
        },
    );
    operations.insert(
        Operation::Delete,
        OperationContract {
            enabled: enabled(Operation::Delete),
            input: BTreeSet::new(),
            output: BTreeSet::new(),
            required_on_create: BTreeSet::new(),
            immutable: BTreeSet::new(),
            concurrency: None,
        },
    );

    let policies = Operation::ALL
        .iter()
        .map(|&op| {
            let name = definition
                .policies
                .get(&op)
                .cloned()
                .unwrap_or_else(|| format!("{}.{}", definition.route, op.verb()));
            (op, name)
        })
        .collect();

    ResourceContract {
        key: definition.key.clone(),
        route: definition.route.clone(),
        backend: definition.backend,
        key_field: key_api_name,
        key_type,
        query,
        read,
        fields,
        relations,
        operations,
        policies,
    }
}

fn normalize_field(raw: &FieldDefinition, key_name: &str) -> FieldContract {
    let api_name = raw.api_name.clone().unwrap_or_else(|| raw.name.clone());
    let is_key = api_name.eq_ignore_ascii_case(key_name);
    let computed = raw.computed.is_some();
    let hidden = raw.hidden;
    let immutable = raw.immutable || is_key;
    FieldContract {
        name: raw.name.clone(),
        api_name,
        field_type: raw.type_,
        nullable: raw.nullable && !is_key,
        in_read: raw.in_read && !hidden,
        in_create: raw.in_create && !hidden && !computed,
        in_update: raw.in_update && !hidden && !computed && !immutable,
        filterable: raw.filterable && !hidden,
        sortable: raw.sortable && !hidden,
        searchable: raw.searchable && !hidden,
        hidden,
        immutable,
        computed: raw.computed.clone(),
        is_key,
        is_concurrency_token: raw.concurrency_token,
        default: raw.default.clone(),
        rules: raw.validation.clone(),
    }
}

fn synthesized_key(name: &str, key_type: FieldType) -> FieldContract {
    FieldContract {
        name: name.to_string(),
        api_name: name.to_string(),
        field_type: key_type,
        nullable: false,
        in_read: true,
        in_create: false,
        in_update: false,
        filterable: false,
        sortable: false,
        searchable: false,
        hidden: false,
        immutable: true,
        computed: None,
        is_key: true,
        is_concurrency_token: false,
        default: None,
        rules: Default::default(),
    }
}

fn normalize_relation(raw: &RelationDefinition) -> RelationContract {
    let api_name = raw.api_name.clone().unwrap_or_else(|| raw.name.clone());
    let write_field = raw
        .write_field
        .clone()
        .or_else(|| raw.foreign_key.clone())
        .unwrap_or_else(|| match raw.kind {
            RelationKind::ToOne => format!("{}_id", api_name),
            RelationKind::ToMany => format!("{}_ids", api_name),
        });
    RelationContract {
        name: raw.name.clone(),
        api_name,
        kind: raw.kind,
        target: raw.target.clone(),
        expandable: raw.expandable,
        default_expanded: raw.default_expanded,
        write: raw.write,
        write_field,
        required_on_create: raw.required_on_create,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::types::{KeyDefinition, ValidationRule};

    fn field(name: &str, type_: FieldType) -> FieldDefinition {
        FieldDefinition {
            name: name.to_string(),
            api_name: None,
            type_,
            nullable: true,
            in_read: true,
            in_create: true,
            in_update: true,
            filterable: false,
            sortable: false,
            searchable: false,
            hidden: false,
            immutable: false,
            computed: None,
            concurrency_token: false,
            default: None,
            validation: ValidationRule::default(),
        }
    }

    fn definition(fields: Vec<FieldDefinition>) -> ResourceDefinition {
        ResourceDefinition {
            key: "tasks".into(),
            route: "tasks".into(),
            backend: BackendKind::Dynamic,
            key_field: KeyDefinition { name: "id".into(), type_: FieldType::Guid },
            max_page_size: None,
            max_expand_depth: None,
            default_sort: None,
            operations: None,
            require_concurrency_token: true,
            fields,
            relations: Vec::new(),
            policies: HashMap::new(),
        }
    }

    #[test]
    fn hidden_is_a_hard_deny() {
        let mut f = field("secret", FieldType::String);
        f.hidden = true;
        f.filterable = true;
        f.sortable = true;
        let contract = build(&definition(vec![field("title", FieldType::String), f]));
        let secret = contract.field("secret").unwrap();
        assert!(!secret.in_read && !secret.in_create && !secret.in_update);
        assert!(!secret.filterable && !secret.sortable);
        assert!(!contract.query.filterable.contains("secret"));
    }

    #[test]
    fn immutable_drops_out_of_update_shape() {
        let mut f = field("slug", FieldType::String);
        f.immutable = true;
        let contract = build(&definition(vec![f]));
        let update = contract.operation(Operation::Update).unwrap();
        assert!(!update.input.contains("slug"));
        assert!(update.immutable.contains("slug"));
    }

    #[test]
    fn key_is_synthesized_when_absent_and_forced_immutable_when_declared() {
        let contract = build(&definition(vec![field("title", FieldType::String)]));
        let key = contract.key_field_contract();
        assert_eq!(key.api_name, "id");
        assert!(key.immutable && key.in_read && !key.in_create);

        let mut declared = definition(vec![field("id", FieldType::Guid)]);
        declared.fields[0].immutable = false;
        let contract = build(&declared);
        assert!(contract.key_field_contract().immutable);
        assert!(contract.key_field_contract().in_create);
    }

    #[test]
    fn concurrency_token_lands_on_update_only() {
        let mut token = field("version", FieldType::String);
        token.concurrency_token = true;
        token.immutable = true;
        let contract = build(&definition(vec![field("title", FieldType::String), token]));
        let update = contract.operation(Operation::Update).unwrap();
        let cc = update.concurrency.as_ref().unwrap();
        assert_eq!(cc.token_field, "version");
        assert!(cc.required_on_update);
        // Echoing the token in an update payload is allowed.
        assert!(update.input.contains("version"));
        assert!(contract.operation(Operation::Create).unwrap().concurrency.is_none());
    }

    #[test]
    fn default_policies_follow_route_and_verb() {
        let contract = build(&definition(vec![field("title", FieldType::String)]));
        assert_eq!(contract.policies[&Operation::List], "tasks.list");
        assert_eq!(contract.policies[&Operation::Delete], "tasks.delete");
    }

    #[test]
    fn duplicate_api_names_keep_the_first_declaration() {
        let mut dup = field("Title", FieldType::Int32);
        dup.api_name = Some("TITLE".into());
        let contract = build(&definition(vec![field("title", FieldType::String), dup]));
        assert_eq!(contract.fields.iter().filter(|f| f.api_name.eq_ignore_ascii_case("title")).count(), 1);
        assert_eq!(contract.field("title").unwrap().field_type, FieldType::String);
    }

    #[test]
    fn disabled_operations_are_recorded() {
        let mut def = definition(vec![field("title", FieldType::String)]);
        def.operations = Some(vec![Operation::List, Operation::Get]);
        let contract = build(&def);
        assert!(contract.operation(Operation::List).unwrap().enabled);
        assert!(!contract.operation(Operation::Create).unwrap().enabled);
    }
}
