use std::collections::BTreeMap;

use netmodel::{BuildStep, ItemIndex, ItemKey, ModelError, NetworkModel, Reducer, TableId};
use serde_json::{Map, Value, json};

fn static_table(model: &mut NetworkModel, name: &str, data: Value) -> TableId {
    let class_id = model.add_static_table(name, data, Vec::<String>::new()).unwrap();
    model.class(&class_id).unwrap().table_id().clone()
}

fn people(model: &mut NetworkModel) -> TableId {
    static_table(
        model,
        "people",
        json!([
            {"name": "Ada", "city": "Oslo", "age": 36, "tags": "math,code"},
            {"name": "Bo", "city": "Bergen", "age": 25, "tags": "art"},
            {"name": "Cy", "city": "Oslo", "age": 41, "tags": "code,chess,art"},
            {"name": "Di", "city": "Tromsø", "age": 30, "tags": "math"}
        ]),
    )
}

fn keys(model: &mut NetworkModel, table_id: &TableId) -> Vec<ItemKey> {
    model.collect_items(table_id, None).unwrap().ready().unwrap()
}

fn indexes(model: &mut NetworkModel, table_id: &TableId) -> Vec<String> {
    keys(model, table_id)
        .into_iter()
        .map(|key| model.item(key).unwrap().index.to_string())
        .collect()
}

fn rows(model: &mut NetworkModel, table_id: &TableId) -> Vec<Map<String, Value>> {
    keys(model, table_id)
        .into_iter()
        .map(|key| model.item(key).unwrap().row.clone())
        .collect()
}

#[test]
fn test_static_tables_index_by_position_and_key() {
    let mut model = NetworkModel::new("m");
    let list = static_table(&mut model, "list", json!([{"a": 1}, 7]));
    assert_eq!(indexes(&mut model, &list), vec!["0", "1"]);
    assert_eq!(rows(&mut model, &list)[1], json!({"value": 7}).as_object().cloned().unwrap());

    let dict = static_table(&mut model, "dict", json!({"no": {"name": "Norway"}, "se": {"name": "Sweden"}}));
    assert_eq!(indexes(&mut model, &dict), vec!["no", "se"]);
    assert_eq!(model.table(&dict).unwrap().type_tag(), "StaticDictTable");
}

#[test]
fn test_promote_groups_distinct_values_in_first_seen_order() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let cities = model.promote(&people, "city").unwrap();

    assert_eq!(indexes(&mut model, &cities), vec!["Oslo", "Bergen", "Tromsø"]);
    let oslo = model.get_item(&cities, &ItemIndex::from("Oslo")).unwrap().ready().unwrap().unwrap();
    let linked: Vec<String> = model
        .item(oslo)
        .unwrap()
        .connected_in(&people)
        .iter()
        .map(|key| model.item(*key).unwrap().row["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(linked, vec!["Ada", "Cy"]);
    assert_eq!(model.item(oslo).unwrap().row, json!({"city": "Oslo"}).as_object().cloned().unwrap());
}

#[test]
fn test_aggregate_links_every_contributing_row() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let mut reducers = BTreeMap::new();
    reducers.insert("count".to_string(), Reducer::Count);
    reducers.insert(
        "total_age".to_string(),
        Reducer::Sum {
            attribute: "age".to_string(),
        },
    );
    reducers.insert(
        "names".to_string(),
        Reducer::Collect {
            attribute: "name".to_string(),
        },
    );
    let groups = model.aggregate(&people, "city", reducers).unwrap();

    let group_keys = keys(&mut model, &groups);
    assert_eq!(group_keys.len(), 3);
    let total_links: usize = group_keys
        .iter()
        .map(|key| model.item(*key).unwrap().connected_in(&people).len())
        .sum();
    assert_eq!(total_links, 4);

    let oslo = model.item(group_keys[0]).unwrap();
    assert_eq!(oslo.row["count"], json!(2));
    assert_eq!(oslo.row["total_age"], json!(77));
    assert_eq!(oslo.row["names"], json!(["Ada", "Cy"]));
    assert_eq!(oslo.connected_in(&people).len(), 2);
}

#[test]
fn test_derivations_are_idempotent() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);

    let promoted = model.promote(&people, "city").unwrap();
    assert_eq!(model.promote(&people, "city").unwrap(), promoted);
    assert_ne!(model.promote(&people, "name").unwrap(), promoted);

    let expanded = model.expand(&people, "tags", None).unwrap();
    assert_eq!(model.expand(&people, "tags", Some(",")).unwrap(), expanded);
    assert_ne!(model.expand(&people, "tags", Some(";")).unwrap(), expanded);

    let counted: BTreeMap<String, Reducer> = [("n".to_string(), Reducer::Count)].into_iter().collect();
    let aggregated = model.aggregate(&people, "city", counted.clone()).unwrap();
    assert_eq!(model.aggregate(&people, "city", counted).unwrap(), aggregated);
    assert_ne!(model.aggregate(&people, "city", BTreeMap::new()).unwrap(), aggregated);

    let facets = model.closed_facet(&people, "city", &[json!("Oslo")]).unwrap();
    assert_eq!(model.closed_facet(&people, "city", &[json!("Oslo")]).unwrap(), facets);

    let transposed = model.closed_transpose(&people, &[ItemIndex::from("1")]).unwrap();
    assert_eq!(model.closed_transpose(&people, &[ItemIndex::from("1")]).unwrap(), transposed);

    let duplicate = model.duplicate(&people).unwrap();
    assert_eq!(model.duplicate(&people).unwrap(), duplicate);

    let tables_before = model.table_ids().len();
    model.promote(&people, "city").unwrap();
    assert_eq!(model.table_ids().len(), tables_before);
}

#[test]
fn test_connect_is_idempotent_in_any_parent_order() {
    let mut model = NetworkModel::new("m");
    let a = static_table(&mut model, "a", json!([{"x": 0}]));
    let b = static_table(&mut model, "b", json!([{"y": 0}]));
    let joined = model.connect(&a, &[b.clone()]).unwrap();
    assert_eq!(model.connect(&b, &[a.clone()]).unwrap(), joined);
    assert_eq!(model.parent_tables(&joined).unwrap(), vec![a, b]);
}

#[test]
fn test_expand_splits_each_value_and_links_its_parent() {
    let mut model = NetworkModel::new("m");
    let source = static_table(&mut model, "source", json!([{"letters": "a,b,c"}]));
    let expanded = model.expand(&source, "letters", Some(",")).unwrap();

    let parent = keys(&mut model, &source)[0];
    let children = keys(&mut model, &expanded);
    assert_eq!(children.len(), 3);
    let values: Vec<&Value> = children.iter().map(|key| &model.item(*key).unwrap().row["letters"]).collect();
    assert_eq!(values, vec![&json!("a"), &json!("b"), &json!("c")]);
    for key in &children {
        let child = model.item(*key).unwrap();
        assert_eq!(child.connected_in(&source), &[parent]);
        assert_eq!(child.parent_index(), Some(&ItemIndex::from("0")));
    }
}

#[test]
fn test_expand_numbers_children_across_parents() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let tags = model.expand(&people, "tags", None).unwrap();

    assert_eq!(indexes(&mut model, &tags), vec!["0", "1", "2", "3", "4", "5", "6"]);
    let chess = keys(&mut model, &tags)[4];
    let item = model.item(chess).unwrap();
    assert_eq!(item.row["tags"], json!("chess"));
    assert_eq!(item.parent_index(), Some(&ItemIndex::from("2")));
}

#[test]
fn test_unroll_flattens_arrays() {
    let mut model = NetworkModel::new("m");
    let owners = static_table(
        &mut model,
        "owners",
        json!([
            {"name": "Ada", "pets": [{"kind": "cat"}, {"kind": "dog"}]},
            {"name": "Bo", "pets": []},
            {"name": "Cy", "pets": "none"},
            {"name": "Di", "pets": ["fish"]}
        ]),
    );
    let pets = model.unroll(&owners, "pets").unwrap();
    assert_eq!(
        rows(&mut model, &pets),
        vec![
            json!({"kind": "cat"}).as_object().cloned().unwrap(),
            json!({"kind": "dog"}).as_object().cloned().unwrap(),
            json!({"pets": "fish"}).as_object().cloned().unwrap(),
        ]
    );
    let fish = keys(&mut model, &pets)[2];
    assert_eq!(model.item(fish).unwrap().parent_index(), Some(&ItemIndex::from("3")));
}

#[test]
fn test_faceted_rows_keep_parent_index() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let facets = model.closed_facet(&people, "city", &[json!("Oslo"), json!("Bergen")]).unwrap();
    assert_eq!(facets.len(), 2);
    assert_eq!(indexes(&mut model, &facets[0]), vec!["0", "2"]);
    assert_eq!(indexes(&mut model, &facets[1]), vec!["1"]);
    assert_eq!(model.table_name(&facets[0]).unwrap(), "[city=Oslo]");
}

#[test]
fn test_open_facet_yields_each_value_once_and_reuses_closed_facets() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let closed = model.closed_facet(&people, "city", &[json!("Bergen")]).unwrap();

    let mut cursor = model.open_facet(&people, "city", None).unwrap();
    let mut opened = Vec::new();
    loop {
        match cursor.next(&mut model).unwrap() {
            BuildStep::Item(table_id) => opened.push(table_id),
            BuildStep::Exhausted => break,
            BuildStep::Cancelled => panic!("facet discovery was cancelled"),
        }
    }
    assert_eq!(opened.len(), 3);
    assert_eq!(opened[1], closed[0]);
    let names: Vec<String> = opened.iter().map(|id| model.table_name(id).unwrap()).collect();
    assert_eq!(names, vec!["[city=Oslo]", "[city=Bergen]", "[city=Tromsø]"]);
}

#[test]
fn test_transpose_turns_attributes_into_rows() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let transposed = model.closed_transpose(&people, &[ItemIndex::from("1")]).unwrap();
    let table = &transposed[0];

    let mut attributes = indexes(&mut model, table);
    attributes.sort();
    assert_eq!(attributes, vec!["age", "city", "name", "tags"]);
    let age = model.get_item(table, &ItemIndex::from("age")).unwrap().ready().unwrap().unwrap();
    assert_eq!(model.item(age).unwrap().row["value"], json!(25));
    assert_eq!(model.table_name(table).unwrap(), "ᵀ1");

    let missing = model.closed_transpose(&people, &[ItemIndex::from("99")]).unwrap();
    assert_eq!(model.count_rows(&missing[0]).unwrap(), 0);
}

#[test]
fn test_open_transpose_visits_every_row() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let mut cursor = model.open_transpose(&people, Some(2)).unwrap();
    let mut tables = Vec::new();
    while let BuildStep::Item(table_id) = cursor.next(&mut model).unwrap() {
        tables.push(table_id);
    }
    assert_eq!(tables.len(), 2);
    assert_eq!(
        model.closed_transpose(&people, &[ItemIndex::from("0"), ItemIndex::from("1")]).unwrap(),
        tables
    );
}

#[test]
fn test_connect_joins_equal_sized_tables_row_by_row() {
    let mut model = NetworkModel::new("m");
    let a = static_table(&mut model, "a", json!([{"x": 0}, {"x": 1}, {"x": 2}]));
    let b = static_table(&mut model, "b", json!([{"y": 0}, {"y": 1}, {"y": 2}]));
    let joined = model.connect(&a, &[b.clone()]).unwrap();

    let joined_keys = keys(&mut model, &joined);
    assert_eq!(joined_keys.len(), 3);
    for (i, key) in joined_keys.iter().enumerate() {
        let item = model.item(*key).unwrap();
        assert_eq!(item.index, ItemIndex::from(i));
        for (parent, attribute) in [(&a, "x"), (&b, "y")] {
            let linked = item.connected_in(parent);
            assert_eq!(linked.len(), 1);
            assert_eq!(model.item(linked[0]).unwrap().row[attribute], json!(i));
        }
    }
}

#[test]
fn test_connect_skips_keys_missing_from_other_parents() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let towns = static_table(
        &mut model,
        "towns",
        json!([{"city": "Bergen", "pop": 285}, {"city": "Oslo", "pop": 700}]),
    );
    let by_city = model.promote(&people, "city").unwrap();
    let town_by_city = model.promote(&towns, "city").unwrap();
    let joined = model.connect(&by_city, &[town_by_city]).unwrap();

    assert_eq!(indexes(&mut model, &joined), vec!["Oslo", "Bergen"]);
    assert_eq!(model.table_name(&joined).unwrap(), "people.city⨯towns.city");
}

#[test]
fn test_parent_child_links_expanded_rows_back() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let tags = model.expand(&people, "tags", None).unwrap();
    let joined = model.connect_parent_child(&people, &tags).unwrap();

    let joined_keys = keys(&mut model, &joined);
    assert_eq!(joined_keys.len(), 7);
    let fifth = model.item(joined_keys[4]).unwrap();
    let person = fifth.connected_in(&people)[0];
    let tag = fifth.connected_in(&tags)[0];
    assert_eq!(model.item(person).unwrap().row["name"], json!("Cy"));
    assert_eq!(model.item(tag).unwrap().row["tags"], json!("chess"));

    let unrelated = model.promote(&people, "city").unwrap();
    assert!(matches!(
        model.connect_parent_child(&unrelated, &tags),
        Err(ModelError::ContractViolation(_))
    ));
}

#[test]
fn test_duplicate_rewraps_rows_with_the_same_links() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let cities = model.promote(&people, "city").unwrap();
    let copy = model.duplicate(&cities).unwrap();

    assert_eq!(indexes(&mut model, &copy), indexes(&mut model, &cities));
    let original = keys(&mut model, &cities)[0];
    let dup = keys(&mut model, &copy)[0];
    assert_ne!(original, dup);
    let dup_item = model.item(dup).unwrap();
    assert_eq!(dup_item.connected_in(&cities), &[original]);
    assert_eq!(dup_item.connected_in(&people).len(), 2);
    assert_eq!(model.item(original).unwrap().duplicates(), &[dup]);
    assert_eq!(model.table_name(&copy).unwrap(), "people.city*");
}

#[test]
fn test_rebuilt_duplicate_replaces_its_registration() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let cities = model.promote(&people, "city").unwrap();
    let copy = model.duplicate(&cities).unwrap();
    let original = keys(&mut model, &cities)[0];

    for _ in 0..5 {
        model.reset_table(&copy).unwrap();
        let dup = keys(&mut model, &copy)[0];
        assert_eq!(model.item(original).unwrap().duplicates(), &[dup]);
    }
}

#[test]
fn test_table_names_follow_lineage() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let cities = model.promote(&people, "city").unwrap();
    let sums = model.aggregate(&people, "city", BTreeMap::new()).unwrap();
    let tags = model.expand(&people, "tags", None).unwrap();

    assert_eq!(model.table_name(&people).unwrap(), "people");
    assert_eq!(model.table_name(&cities).unwrap(), "people.city");
    assert_eq!(model.table_name(&sums).unwrap(), "people.Σcity");
    assert_eq!(model.table_name(&tags).unwrap(), "people.tags↤");
}

#[test]
fn test_delete_refuses_tables_in_use() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    let cities = model.promote(&people, "city").unwrap();

    let err = model.delete_table(&people, false).unwrap_err();
    assert!(err.is_in_use());
    assert!(model.table(&people).is_ok());

    let _ = model.promote(&cities, "city").unwrap();
    assert!(model.delete_table(&cities, false).unwrap_err().is_in_use());
    assert!(model.table(&cities).is_ok());

    model.delete_table(&cities, true).unwrap();
    assert!(matches!(model.table(&cities), Err(ModelError::NotFound(_))));
    assert!(model.derived_tables(&people).unwrap().is_empty());
}

#[test]
fn test_derivations_require_an_attribute() {
    let mut model = NetworkModel::new("m");
    let people = people(&mut model);
    assert!(matches!(model.promote(&people, ""), Err(ModelError::ContractViolation(_))));
    assert!(matches!(
        model.expand(&people, "tags", Some("")),
        Err(ModelError::ContractViolation(_))
    ));
    assert!(matches!(
        model.promote(&TableId::from("nope"), "city"),
        Err(ModelError::NotFound(_))
    ));
}
