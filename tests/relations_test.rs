//! Relation loading against a scripted backend that records every statement
//! and replays queued result sets.

use async_trait::async_trait;
use mapped_query::prelude::*;
use mapped_query::{Keys, QueryResult};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Default)]
struct ScriptedBackend {
    statements: Vec<String>,
    results: VecDeque<QueryResult>,
}

impl ScriptedBackend {
    fn with_results(results: Vec<QueryResult>) -> Self {
        Self {
            statements: Vec::new(),
            results: results.into(),
        }
    }
}

#[async_trait]
impl DatabaseBackend for ScriptedBackend {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.statements.push(sql.to_string());
        Ok(1)
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        self.statements.push(sql.to_string());
        Ok(self.results.pop_front().unwrap_or_default())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

fn row(values: Value) -> QueryRow {
    match values {
        Value::Object(map) => QueryRow::from(map),
        other => panic!("row fixture must be an object, got {}", other),
    }
}

fn rows(values: Vec<Value>) -> QueryResult {
    values.into_iter().map(row).collect()
}

fn department() -> EntityType {
    EntityType::new("department", "test_departments").maps(NameMap::from_iter([
        ("DPCODE", "code"),
        ("DPDIV", "division"),
        ("DPNAME", "name"),
    ]))
}

fn category() -> EntityType {
    EntityType::new("category", "test_categories").maps(NameMap::from_iter([
        ("CTCODE", "code"),
        ("CTDEPT", "department_code"),
        ("CTDIV", "division"),
        ("CTNAME", "name"),
    ]))
}

fn item() -> EntityType {
    EntityType::new("item", "test_items").maps(NameMap::from_iter([
        ("ICITEM", "item_number"),
        ("ICCATG", "category_code"),
        ("ICDESC", "description"),
    ]))
}

fn schema() -> Arc<Schema> {
    let mut unassigned = Map::new();
    unassigned.insert("name".to_string(), json!("Unassigned"));
    let mut no_item = Map::new();
    no_item.insert("description".to_string(), json!("none"));

    Schema::builder()
        .entity(department())
        .entity(category())
        .entity(item())
        .relation(
            RelationDef::has_many(
                "department",
                "categories",
                "category",
                ["department_code", "division"],
            )
            .local_key(["code", "division"]),
        )
        .relation(
            RelationDef::belongs_to(
                "category",
                "department",
                "department",
                ["department_code", "division"],
            )
            .owner_key(["code", "division"])
            .with_default(unassigned),
        )
        .relation(RelationDef::belongs_to("item", "category", "category", "category_code").owner_key("code"))
        .relation(
            RelationDef::has_many_through(
                "department",
                "items",
                "item",
                "category",
                ["department_code", "division"],
                Keys::from("category_code"),
            )
            .local_key(["code", "division"])
            .second_local_key("code"),
        )
        .relation(
            RelationDef::has_one(
                "department",
                "first_category",
                "category",
                ["department_code", "division"],
            )
            .local_key(["code", "division"]),
        )
        .relation(
            RelationDef::has_one_through(
                "department",
                "first_item",
                "item",
                "category",
                ["department_code", "division"],
                Keys::from("category_code"),
            )
            .local_key(["code", "division"])
            .second_local_key("code")
            .with_default(no_item),
        )
        .build()
        .unwrap()
}

fn codes(entities: &[Entity], column: &str) -> Vec<Value> {
    entities
        .iter()
        .map(|e| e.get(column).unwrap_or(Value::Null))
        .collect()
}

#[tokio::test]
async fn test_eager_composite_keys_match_exactly() {
    let _ = env_logger::builder().is_test(true).try_init();
    let schema = schema();
    let mut backend = ScriptedBackend::with_results(vec![
        rows(vec![
            json!({"DPCODE": "ELEC", "DPDIV": 1, "DPNAME": "Electronics"}),
            json!({"DPCODE": "ELEC", "DPDIV": 2, "DPNAME": "Electronics East"}),
        ]),
        rows(vec![
            json!({"CTCODE": "C1", "CTDEPT": "ELEC", "CTDIV": "1", "CTNAME": "Radios"}),
            json!({"CTCODE": "C2", "CTDEPT": "ELEC", "CTDIV": "2", "CTNAME": "Phones"}),
            json!({"CTCODE": "C3", "CTDEPT": "ELEC", "CTDIV": "1", "CTNAME": "Cables"}),
        ]),
    ]);

    let departments = schema
        .query("department")
        .unwrap()
        .with("categories")
        .get(&mut backend)
        .await
        .unwrap();

    assert_eq!(backend.statements.len(), 2);
    assert_eq!(
        backend.statements[1],
        "SELECT test_categories.CTCODE, test_categories.CTDEPT, test_categories.CTDIV, test_categories.CTNAME \
         FROM test_categories \
         WHERE ((test_categories.CTDEPT = 'ELEC' AND test_categories.CTDIV = 1) \
         OR (test_categories.CTDEPT = 'ELEC' AND test_categories.CTDIV = 2))"
    );

    let first = departments[0].relation("categories").unwrap().as_many();
    let second = departments[1].relation("categories").unwrap().as_many();
    assert_eq!(codes(first, "code"), vec![json!("C1"), json!("C3")]);
    assert_eq!(codes(second, "code"), vec![json!("C2")]);
}

#[tokio::test]
async fn test_eager_keys_are_deduplicated_and_single_keys_use_in() {
    let schema = schema();
    let mut backend = ScriptedBackend::with_results(vec![
        rows(vec![
            json!({"ICITEM": "I1", "ICCATG": "C1"}),
            json!({"ICITEM": "I2", "ICCATG": "C2"}),
            json!({"ICITEM": "I3", "ICCATG": "C1"}),
            json!({"ICITEM": "I4", "ICCATG": null}),
        ]),
        rows(vec![
            json!({"CTCODE": "C1", "CTNAME": "Radios"}),
            json!({"CTCODE": "C2", "CTNAME": "Phones"}),
        ]),
    ]);

    let items = schema
        .query("item")
        .unwrap()
        .with("category")
        .get(&mut backend)
        .await
        .unwrap();

    assert!(backend.statements[1].ends_with("WHERE test_categories.CTCODE IN ('C1', 'C2')"));

    let names: Vec<Value> = items
        .iter()
        .map(|i| {
            i.relation("category")
                .and_then(Related::as_one)
                .and_then(|c| c.get("name"))
                .unwrap_or(Value::Null)
        })
        .collect();
    assert_eq!(
        names,
        vec![json!("Radios"), json!("Phones"), json!("Radios"), Value::Null]
    );
}

#[tokio::test]
async fn test_eager_without_complete_keys_issues_no_query() {
    let schema = schema();
    let mut backend = ScriptedBackend::with_results(vec![rows(vec![
        json!({"CTCODE": "C1", "CTDEPT": "ELEC", "CTDIV": null}),
        json!({"CTCODE": "C2", "CTDEPT": null, "CTDIV": 1}),
    ])]);

    let categories = schema
        .query("category")
        .unwrap()
        .with("department")
        .get(&mut backend)
        .await
        .unwrap();

    assert_eq!(backend.statements.len(), 1);
    for category in &categories {
        let department = category.relation("department").and_then(Related::as_one).unwrap();
        assert!(!department.exists());
        assert_eq!(department.get("name"), Some(json!("Unassigned")));
    }
}

#[tokio::test]
async fn test_lazy_to_one_with_null_key_returns_default_without_query() {
    let schema = schema();
    let mut backend = ScriptedBackend::default();

    let category_type = Arc::clone(schema.entity("category").unwrap());
    let mut category = category_type.new_entity();
    category.fill([("code", json!("C1")), ("department_code", json!("ELEC")), ("division", Value::Null)]);

    let related = schema.related(&category, "department", &mut backend).await.unwrap();
    assert!(backend.statements.is_empty());
    assert_eq!(related.as_one().and_then(|d| d.get("name")), Some(json!("Unassigned")));
}

#[tokio::test]
async fn test_lazy_to_one_takes_first_match() {
    let schema = schema();
    let mut backend = ScriptedBackend::with_results(vec![rows(vec![json!({
        "DPCODE": "ELEC", "DPDIV": 1, "DPNAME": "Electronics"
    })])]);

    let category_type = Arc::clone(schema.entity("category").unwrap());
    let mut category = category_type.new_entity();
    category.fill([("department_code", json!("ELEC")), ("division", json!(1))]);

    schema.load(&mut category, "department", &mut backend).await.unwrap();

    assert_eq!(
        backend.statements,
        vec![
            "SELECT test_departments.DPCODE, test_departments.DPDIV, test_departments.DPNAME \
             FROM test_departments \
             WHERE (test_departments.DPCODE = 'ELEC' AND test_departments.DPDIV = 1) LIMIT 1"
        ]
    );
    let department = category.relation("department").and_then(Related::as_one).unwrap();
    assert!(department.exists());
    assert_eq!(department.get("name"), Some(json!("Electronics")));
}

#[tokio::test]
async fn test_through_results_match_far_parent_by_alias() {
    let schema = schema();
    let mut backend = ScriptedBackend::with_results(vec![
        rows(vec![
            json!({"DPCODE": "ELEC", "DPDIV": 1}),
            json!({"DPCODE": "ELEC", "DPDIV": 2}),
        ]),
        rows(vec![
            // Same item reached through both divisions; the engine folded the
            // aliases to upper case.
            json!({"ICITEM": "I1", "ICCATG": "C1", "THROUGHKEY_CTDEPT": "ELEC", "THROUGHKEY_CTDIV": 1}),
            json!({"ICITEM": "I1", "ICCATG": "C1", "THROUGHKEY_CTDEPT": "ELEC", "THROUGHKEY_CTDIV": 2}),
            json!({"ICITEM": "I2", "ICCATG": "C1", "throughkey_ctdept": "ELEC", "throughkey_ctdiv": 2}),
        ]),
    ]);

    let departments = schema
        .query("department")
        .unwrap()
        .with("items")
        .get(&mut backend)
        .await
        .unwrap();

    let sql = &backend.statements[1];
    assert!(sql.contains(
        "test_categories.CTDEPT AS throughkey_CTDEPT, test_categories.CTDIV AS throughkey_CTDIV"
    ));
    assert!(sql.contains("INNER JOIN test_categories ON (test_items.ICCATG = test_categories.CTCODE)"));
    assert!(sql.contains(
        "((test_categories.CTDEPT = 'ELEC' AND test_categories.CTDIV = 1) \
         OR (test_categories.CTDEPT = 'ELEC' AND test_categories.CTDIV = 2))"
    ));

    let first = departments[0].relation("items").unwrap().as_many();
    let second = departments[1].relation("items").unwrap().as_many();
    assert_eq!(codes(first, "item_number"), vec![json!("I1")]);
    assert_eq!(codes(second, "item_number"), vec![json!("I1"), json!("I2")]);

    for item in first.iter().chain(second) {
        assert!(item
            .raw_attributes()
            .keys()
            .all(|k| !k.to_ascii_lowercase().starts_with("throughkey_")));
    }
}

#[tokio::test]
async fn test_nested_eager_loads() {
    let schema = schema();
    let mut backend = ScriptedBackend::with_results(vec![
        rows(vec![json!({"ICITEM": "I1", "ICCATG": "C1"})]),
        rows(vec![json!({"CTCODE": "C1", "CTDEPT": "ELEC", "CTDIV": 1})]),
        rows(vec![json!({"DPCODE": "ELEC", "DPDIV": 1, "DPNAME": "Electronics"})]),
    ]);

    let items = schema
        .query("item")
        .unwrap()
        .with("category.department")
        .get(&mut backend)
        .await
        .unwrap();

    assert_eq!(backend.statements.len(), 3);
    let output = items[0].to_json();
    assert_eq!(output["category"]["department"]["name"], json!("Electronics"));
}

#[tokio::test]
async fn test_aliases_come_back_in_caller_case() {
    let schema = schema();
    let mut backend = ScriptedBackend::with_results(vec![rows(vec![json!({
        "ITEMNO": "I1", "ICDESC": "Radio"
    })])]);

    let items = schema
        .query("item")
        .unwrap()
        .select(&["item_number as itemNo", "description"])
        .get(&mut backend)
        .await
        .unwrap();

    assert_eq!(backend.statements[0], "SELECT ICITEM AS itemNo, ICDESC FROM test_items");
    assert_eq!(items[0].get("itemNo"), Some(json!("I1")));
    assert!(items[0].get_raw("ITEMNO").is_none());
    assert_eq!(items[0].get("description"), Some(json!("Radio")));
}

#[tokio::test]
async fn test_where_has_correlates_composite_keys() {
    let schema = schema();
    let sql = schema
        .query("department")
        .unwrap()
        .where_has("categories")
        .to_sql()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT test_departments.DPCODE, test_departments.DPDIV, test_departments.DPNAME \
         FROM test_departments \
         WHERE EXISTS (SELECT * FROM test_categories \
         WHERE (test_categories.CTDEPT = test_departments.DPCODE \
         AND test_categories.CTDIV = test_departments.DPDIV))"
    );

    let sql = schema
        .query("department")
        .unwrap()
        .where_doesnt_have("items")
        .to_sql()
        .unwrap();
    assert!(sql.contains("NOT EXISTS (SELECT * FROM test_items INNER JOIN test_categories"));
    assert!(sql.contains("test_categories.CTDEPT = test_departments.DPCODE"));
}

#[tokio::test]
async fn test_extension_projection_with_auto_select_and_select_all() {
    let schema = Schema::builder()
        .entity(
            item().extension(
                Extension::new("test_item_extensions")
                    .join_on("EXITEM", "ICITEM")
                    .map("EXNOTE", "note"),
            ),
        )
        .build()
        .unwrap();

    let mapped = schema
        .query("item")
        .unwrap()
        .with_extensions(None)
        .to_sql()
        .unwrap();
    assert_eq!(
        mapped,
        "SELECT test_items.ICITEM, test_items.ICCATG, test_items.ICDESC, test_item_extensions.EXNOTE \
         FROM test_items \
         LEFT JOIN test_item_extensions ON test_item_extensions.EXITEM = test_items.ICITEM"
    );

    let all = schema
        .query("item")
        .unwrap()
        .select_all()
        .with_extensions(None)
        .to_sql()
        .unwrap();
    assert_eq!(
        all,
        "SELECT test_items.*, test_item_extensions.* FROM test_items \
         LEFT JOIN test_item_extensions ON test_item_extensions.EXITEM = test_items.ICITEM"
    );
}

#[tokio::test]
async fn test_save_round_trip_through_backend() {
    let schema = schema();
    let mut backend = ScriptedBackend::with_results(vec![rows(vec![json!({
        "ICITEM": "I1", "ICCATG": "C1", "ICDESC": "Radio"
    })])]);

    let mut item = schema
        .query("item")
        .unwrap()
        .where_eq("item_number", "I1")
        .first(&mut backend)
        .await
        .unwrap()
        .unwrap();
    item.set("description", "Clock radio");
    assert!(item.save(&mut backend).await.unwrap());

    assert_eq!(
        backend.statements[1],
        "UPDATE test_items SET ICDESC = 'Clock radio' \
         WHERE (ICITEM = 'I1' AND ICCATG = 'C1' AND ICDESC = 'Radio') FETCH FIRST 1 ROW ONLY"
    );
}

#[tokio::test]
async fn test_lazy_through_to_one_with_null_key_returns_default_without_query() {
    let schema = schema();
    let mut backend = ScriptedBackend::default();

    let department_type = Arc::clone(schema.entity("department").unwrap());
    let mut department = department_type.new_entity();
    department.fill([("code", json!("ELEC")), ("division", Value::Null)]);

    let related = schema.related(&department, "first_item", &mut backend).await.unwrap();
    assert!(backend.statements.is_empty());
    let item = related.as_one().unwrap();
    assert!(!item.exists());
    assert_eq!(item.get("description"), Some(json!("none")));
}

#[tokio::test]
async fn test_eager_through_to_one_takes_first_match_per_far_parent() {
    let schema = schema();
    let mut backend = ScriptedBackend::with_results(vec![
        rows(vec![
            json!({"DPCODE": "ELEC", "DPDIV": 1}),
            json!({"DPCODE": "ELEC", "DPDIV": 2}),
            json!({"DPCODE": "TOYS", "DPDIV": 1}),
        ]),
        rows(vec![
            json!({"ICITEM": "I1", "ICCATG": "C9", "THROUGHKEY_CTDEPT": "ELEC", "THROUGHKEY_CTDIV": 2}),
            json!({"ICITEM": "I2", "ICCATG": "C1", "THROUGHKEY_CTDEPT": "ELEC", "THROUGHKEY_CTDIV": "1"}),
            json!({"ICITEM": "I3", "ICCATG": "C1", "THROUGHKEY_CTDEPT": "ELEC", "THROUGHKEY_CTDIV": 1}),
        ]),
    ]);

    let departments = schema
        .query("department")
        .unwrap()
        .with("first_item")
        .get(&mut backend)
        .await
        .unwrap();

    assert_eq!(backend.statements.len(), 2);
    assert!(backend.statements[1].contains(
        "test_categories.CTDEPT AS throughkey_CTDEPT, test_categories.CTDIV AS throughkey_CTDIV"
    ));
    assert!(!backend.statements[1].contains("LIMIT"));

    let first_items: Vec<Value> = departments
        .iter()
        .map(|d| {
            d.relation("first_item")
                .and_then(Related::as_one)
                .and_then(|i| i.get("item_number"))
                .unwrap_or(Value::Null)
        })
        .collect();
    assert_eq!(first_items, vec![json!("I2"), json!("I1"), Value::Null]);

    let fallback = departments[2].relation("first_item").and_then(Related::as_one).unwrap();
    assert_eq!(fallback.get("description"), Some(json!("none")));

    let matched = departments[0].relation("first_item").and_then(Related::as_one).unwrap();
    assert!(matched
        .raw_attributes()
        .keys()
        .all(|k| !k.to_ascii_lowercase().starts_with("throughkey_")));
}

#[tokio::test]
async fn test_eager_has_one_takes_first_match() {
    let schema = schema();
    let mut backend = ScriptedBackend::with_results(vec![
        rows(vec![
            json!({"DPCODE": "ELEC", "DPDIV": 1}),
            json!({"DPCODE": "TOYS", "DPDIV": 1}),
            json!({"DPCODE": "GARD", "DPDIV": 1}),
        ]),
        rows(vec![
            json!({"CTCODE": "C1", "CTDEPT": "ELEC", "CTDIV": 1}),
            json!({"CTCODE": "C2", "CTDEPT": "ELEC", "CTDIV": 1}),
            json!({"CTCODE": "C3", "CTDEPT": "TOYS", "CTDIV": "1"}),
        ]),
    ]);

    let departments = schema
        .query("department")
        .unwrap()
        .with("first_category")
        .get(&mut backend)
        .await
        .unwrap();

    assert_eq!(
        backend.statements[1],
        "SELECT test_categories.CTCODE, test_categories.CTDEPT, test_categories.CTDIV, test_categories.CTNAME \
         FROM test_categories \
         WHERE ((test_categories.CTDEPT = 'ELEC' AND test_categories.CTDIV = 1) \
         OR (test_categories.CTDEPT = 'TOYS' AND test_categories.CTDIV = 1) \
         OR (test_categories.CTDEPT = 'GARD' AND test_categories.CTDIV = 1))"
    );

    let first: Vec<Value> = departments
        .iter()
        .map(|d| {
            d.relation("first_category")
                .and_then(Related::as_one)
                .and_then(|c| c.get("code"))
                .unwrap_or(Value::Null)
        })
        .collect();
    assert_eq!(first, vec![json!("C1"), json!("C3"), Value::Null]);
    assert!(departments[2]
        .relation("first_category")
        .and_then(Related::as_one)
        .is_none());
}

#[tokio::test]
async fn test_save_after_extension_join_writes_base_columns_only() {
    let schema = Schema::builder()
        .entity(
            item().extension(
                Extension::new("test_item_extensions")
                    .join_on("EXITEM", "ICITEM")
                    .map("EXNOTE", "note"),
            ),
        )
        .build()
        .unwrap();
    let mut backend = ScriptedBackend::with_results(vec![rows(vec![json!({
        "ICITEM": "I1", "ICCATG": "C1", "ICDESC": "Radio", "EXNOTE": "fragile"
    })])]);

    let mut item = schema
        .query("item")
        .unwrap()
        .with_extensions(None)
        .first(&mut backend)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.get("note"), Some(json!("fragile")));

    item.set("description", "Clock");
    item.set("note", "boxed");
    assert!(item.save(&mut backend).await.unwrap());

    assert_eq!(
        backend.statements[1],
        "UPDATE test_items SET ICDESC = 'Clock' \
         WHERE (ICITEM = 'I1' AND ICCATG = 'C1' AND ICDESC = 'Radio') FETCH FIRST 1 ROW ONLY"
    );
}

#[tokio::test]
async fn test_save_after_aliased_select_skips_alias() {
    let schema = schema();
    let mut backend = ScriptedBackend::with_results(vec![rows(vec![json!({
        "ITEMNO": "I1", "ICDESC": "Radio"
    })])]);

    let mut item = schema
        .query("item")
        .unwrap()
        .select(&["item_number as itemNo", "description"])
        .first(&mut backend)
        .await
        .unwrap()
        .unwrap();
    item.set("description", "Clock");
    item.set("itemNo", "I9");
    assert!(item.save(&mut backend).await.unwrap());

    assert_eq!(
        backend.statements[1],
        "UPDATE test_items SET ICDESC = 'Clock' WHERE ICDESC = 'Radio' FETCH FIRST 1 ROW ONLY"
    );
}
