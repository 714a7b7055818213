use std::collections::BTreeSet;

use netmodel::{
    ClassId, ClassSpec, InstanceQuery, ItemIndex, ItemKey, ModelError, NetworkModel, TableId,
};
use serde_json::{Value, json};

fn people_nodes(model: &mut NetworkModel) -> ClassId {
    let people = model
        .add_static_table(
            "people",
            json!([
                {"name": "Ada", "city": "Oslo", "tags": "math,code"},
                {"name": "Bo", "city": "Bergen", "tags": "art"},
                {"name": "Cy", "city": "Oslo", "tags": "code,chess"},
                {"name": "Di", "city": "Tromsø", "tags": "math"}
            ]),
            ["name", "city", "tags"],
        )
        .unwrap();
    model.interpret_as_nodes(&people).unwrap()
}

fn city_nodes(model: &mut NetworkModel) -> ClassId {
    let cities = model
        .add_static_table(
            "cities",
            json!([{"city": "Oslo", "pop": 700}, {"city": "Bergen", "pop": 285}]),
            ["city", "pop"],
        )
        .unwrap();
    model.interpret_as_nodes(&cities).unwrap()
}

/// Trips between people, joined through `from`/`to` and `name`.
fn trips_between(model: &mut NetworkModel, people: &ClassId) -> ClassId {
    let trips = model
        .add_static_table(
            "trips",
            json!([
                {"from": "Ada", "to": "Bo", "km": 5},
                {"from": "Cy", "to": "Ada", "km": 3},
                {"from": "Di", "to": "Zed", "km": 9}
            ]),
            ["from", "to", "km"],
        )
        .unwrap();
    let trips = model.interpret_as_edges(&trips).unwrap();
    model.connect_source(&trips, people, Some("name"), Some("from")).unwrap();
    model.connect_target(&trips, people, Some("name"), Some("to")).unwrap();
    trips
}

fn visits_between(model: &mut NetworkModel, people: &ClassId, cities: &ClassId) -> ClassId {
    let visits = model
        .add_static_table(
            "visits",
            json!([{"who": "Ada", "where": "Oslo"}, {"who": "Bo", "where": "Bergen"}]),
            ["who", "where"],
        )
        .unwrap();
    let visits = model.interpret_as_edges(&visits).unwrap();
    model.connect_source(&visits, people, Some("name"), Some("who")).unwrap();
    model.connect_target(&visits, cities, Some("city"), Some("where")).unwrap();
    visits
}

fn table_of(model: &NetworkModel, class_id: &ClassId) -> TableId {
    model.class(class_id).unwrap().table_id().clone()
}

fn item_at(model: &mut NetworkModel, class_id: &ClassId, index: &str) -> ItemKey {
    let table_id = table_of(model, class_id);
    model
        .get_item(&table_id, &ItemIndex::from(index))
        .unwrap()
        .ready()
        .unwrap()
        .unwrap()
}

fn attribute_of(model: &NetworkModel, keys: &[ItemKey], attribute: &str) -> Vec<Value> {
    keys.iter()
        .map(|key| model.item(*key).unwrap().row[attribute].clone())
        .collect()
}

fn everything() -> InstanceQuery {
    InstanceQuery::default()
}

#[test]
fn test_static_table_gets_a_named_generic_class() {
    let mut model = NetworkModel::new("m");
    let class_id = model
        .add_static_table("people", json!([{"name": "Ada"}]), ["name"])
        .unwrap();
    assert_eq!(model.class(&class_id).unwrap().type_tag(), "GenericClass");
    assert_eq!(model.class_name(&class_id).unwrap(), "people");
    assert_eq!(model.find_class("people").unwrap(), Some(class_id.clone()));
    assert_eq!(model.find_class("nobody").unwrap(), None);

    let same = model.interpret_as_nodes(&class_id).unwrap();
    assert_eq!(same, class_id);
    assert_eq!(model.class(&class_id).unwrap().type_tag(), "NodeClass");
    assert_eq!(model.variable_name(&class_id).unwrap(), "node_People");

    model.set_class_name(&class_id, Some("humans")).unwrap();
    assert_eq!(model.class_name(&class_id).unwrap(), "humans");
    model.set_class_name(&class_id, None).unwrap();
    assert_eq!(model.class_name(&class_id).unwrap(), "people");
}

#[test]
fn test_second_class_on_a_table_gets_a_duplicate() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let table_id = table_of(&model, &people);

    let other = model.create_class(ClassSpec::node(table_id.clone())).unwrap();
    let other_table = table_of(&model, &other);
    assert_ne!(other_table, table_id);
    assert_eq!(model.table(&other_table).unwrap().type_tag(), "DuplicatedTable");
    assert_eq!(model.parent_tables(&other_table).unwrap(), vec![table_id]);
}

#[test]
fn test_node_promote_creates_connected_node_class() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let cities = model.class_promote(&people, "city").unwrap();

    let edges = model.edge_class_ids(&people).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(model.edge_class_ids(&cities).unwrap(), edges);
    let edge = &edges[0];
    let links = model.edge_links(edge).unwrap();
    assert_eq!(links.source_class_id.as_ref(), Some(&people));
    assert_eq!(links.target_class_id.as_ref(), Some(&cities));
    assert_eq!(model.class_name(edge).unwrap(), "people — people.city");

    let ada = item_at(&mut model, &people, "0");
    let ada_edges = model.instance_edges(ada, &everything()).unwrap().ready().unwrap();
    assert_eq!(ada_edges.len(), 1);
    assert_eq!(model.item(ada_edges[0]).unwrap().index, ItemIndex::from("Oslo"));

    let sources = model.instance_source_nodes(ada_edges[0], &everything()).unwrap().ready().unwrap();
    assert_eq!(attribute_of(&model, &sources, "name"), vec![json!("Ada"), json!("Cy")]);
    let targets = model.instance_target_nodes(ada_edges[0], &everything()).unwrap().ready().unwrap();
    assert_eq!(attribute_of(&model, &targets, "city"), vec![json!("Oslo")]);

    let neighbors = model.instance_neighbor_nodes(ada, &everything()).unwrap().ready().unwrap();
    assert_eq!(neighbors.len(), 2);
    assert!(neighbors.contains(&targets[0]));
    assert!(neighbors.contains(&sources[1]));
}

#[test]
fn test_edge_ends_follow_join_chains() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let trips = trips_between(&mut model, &people);

    let links = model.edge_links(&trips).unwrap().clone();
    assert_eq!(links.source_table_ids.len(), 3);
    assert_eq!(links.target_table_ids.len(), 3);
    assert_eq!(model.edge_class_ids(&people).unwrap(), vec![trips.clone()]);

    let first = item_at(&mut model, &trips, "0");
    let sources = model.instance_source_nodes(first, &everything()).unwrap().ready().unwrap();
    let targets = model.instance_target_nodes(first, &everything()).unwrap().ready().unwrap();
    assert_eq!(attribute_of(&model, &sources, "name"), vec![json!("Ada")]);
    assert_eq!(attribute_of(&model, &targets, "name"), vec![json!("Bo")]);

    let dangling = item_at(&mut model, &trips, "2");
    let nowhere = model.instance_target_nodes(dangling, &everything()).unwrap().ready().unwrap();
    assert!(nowhere.is_empty());

    let ends = model.instance_neighbors(first, &everything()).unwrap().ready().unwrap();
    assert_eq!(attribute_of(&model, &ends, "name"), vec![json!("Ada"), json!("Bo")]);
}

#[test]
fn test_node_instances_reach_edges_on_both_roles() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let _trips = trips_between(&mut model, &people);

    let ada = item_at(&mut model, &people, "0");
    let edges = model.instance_edges(ada, &everything()).unwrap().ready().unwrap();
    assert_eq!(attribute_of(&model, &edges, "km"), vec![json!(5), json!(3)]);

    let limited = model.instance_edges(ada, &InstanceQuery::limit(1)).unwrap().ready().unwrap();
    assert_eq!(limited.len(), 1);

    let neighbors = model.instance_neighbor_nodes(ada, &everything()).unwrap().ready().unwrap();
    assert_eq!(attribute_of(&model, &neighbors, "name"), vec![json!("Bo"), json!("Cy")]);

    let only_other = InstanceQuery {
        class_ids: Some(vec![ClassId::from("elsewhere")]),
        limit: None,
    };
    assert!(model.instance_edges(ada, &only_other).unwrap().ready().unwrap().is_empty());
    assert_eq!(model.item_class(ada), Some(people.clone()));
    assert_eq!(model.instance_id(ada).unwrap().export_id(), format!("{people}_0"));
}

#[test]
fn test_disconnect_source_clears_the_end_and_the_mirror() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let cities = city_nodes(&mut model);
    let visits = visits_between(&mut model, &people, &cities);
    assert!(model.edge_class_ids(&people).unwrap().contains(&visits));

    model.disconnect_source(&visits).unwrap();
    let links = model.edge_links(&visits).unwrap();
    assert_eq!(links.source_class_id, None);
    assert!(links.source_table_ids.is_empty());
    assert_eq!(links.target_class_id.as_ref(), Some(&cities));
    assert!(!model.edge_class_ids(&people).unwrap().contains(&visits));
    assert!(model.edge_class_ids(&cities).unwrap().contains(&visits));

    let first = item_at(&mut model, &visits, "0");
    assert!(model.instance_source_nodes(first, &everything()).unwrap().ready().unwrap().is_empty());
}

#[test]
fn test_connecting_an_end_again_replaces_it() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let cities = city_nodes(&mut model);
    let visits = visits_between(&mut model, &people, &cities);

    model.connect_source(&visits, &cities, Some("city"), Some("where")).unwrap();
    let links = model.edge_links(&visits).unwrap();
    assert_eq!(links.source_class_id.as_ref(), Some(&cities));
    assert!(!model.edge_class_ids(&people).unwrap().contains(&visits));
}

#[test]
fn test_failed_connect_leaves_both_classes_untouched() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let cities = city_nodes(&mut model);
    let visits = visits_between(&mut model, &people, &cities);
    let links = model.edge_links(&visits).unwrap().clone();
    let people_edges = model.edge_class_ids(&people).unwrap();
    let city_edges = model.edge_class_ids(&cities).unwrap();
    let tables = model.table_ids();

    let result = model.connect_source(&visits, &cities, Some(""), Some("where"));
    assert!(matches!(result, Err(ModelError::ContractViolation(_))));
    let result = model.connect_source(&visits, &cities, Some("city"), Some(""));
    assert!(matches!(result, Err(ModelError::ContractViolation(_))));

    assert_eq!(model.edge_links(&visits).unwrap(), &links);
    assert_eq!(model.edge_class_ids(&people).unwrap(), people_edges);
    assert_eq!(model.edge_class_ids(&cities).unwrap(), city_edges);
    assert_eq!(model.table_ids(), tables);
}

#[test]
fn test_toggle_direction_cycle() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let cities = city_nodes(&mut model);
    let visits = visits_between(&mut model, &people, &cities);
    let original = model.edge_links(&visits).unwrap().clone();
    assert!(!original.directed);

    model.toggle_direction(&visits, Some(true)).unwrap();
    model.toggle_direction(&visits, Some(false)).unwrap();
    assert_eq!(model.edge_links(&visits).unwrap(), &original);

    model.toggle_direction(&visits, None).unwrap();
    let directed = model.edge_links(&visits).unwrap().clone();
    assert!(directed.directed);
    assert_eq!(directed.source_class_id, original.source_class_id);
    assert_eq!(model.class_name(&visits).unwrap(), "people → cities");

    model.toggle_direction(&visits, None).unwrap();
    let swapped = model.edge_links(&visits).unwrap().clone();
    assert!(swapped.directed && swapped.swapped_direction);
    assert_eq!(swapped.source_class_id, original.target_class_id);
    assert_eq!(swapped.target_class_id, original.source_class_id);
    assert_eq!(swapped.source_table_ids, original.target_table_ids);
    assert_eq!(swapped.target_table_ids, original.source_table_ids);

    model.toggle_direction(&visits, Some(true)).unwrap();
    assert_eq!(model.edge_links(&visits).unwrap(), &swapped);

    model.toggle_direction(&visits, None).unwrap();
    assert_eq!(model.edge_links(&visits).unwrap(), &original);
}

#[test]
fn test_node_with_two_edges_collapses_into_an_edge() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let cities = city_nodes(&mut model);
    let visits = model
        .add_static_table(
            "visits",
            json!([{"who": "Ada", "where": "Oslo"}, {"who": "Bo", "where": "Bergen"}]),
            ["who", "where"],
        )
        .unwrap();
    let visits = model.interpret_as_nodes(&visits).unwrap();
    model.connect_to_node_class(&people, &visits, Some("name"), Some("who")).unwrap();
    model.connect_to_node_class(&visits, &cities, Some("where"), Some("city")).unwrap();

    let same = model.interpret_as_edges(&visits).unwrap();
    assert_eq!(same, visits);
    let links = model.edge_links(&visits).unwrap().clone();
    assert_eq!(links.source_class_id.as_ref(), Some(&people));
    assert_eq!(links.target_class_id.as_ref(), Some(&cities));
    assert_eq!(links.source_table_ids.len(), 3);
    assert!(model.edge_class_ids(&people).unwrap().contains(&visits));

    let first = item_at(&mut model, &visits, "0");
    let who = model.instance_source_nodes(first, &everything()).unwrap().ready().unwrap();
    let place = model.instance_target_nodes(first, &everything()).unwrap().ready().unwrap();
    assert_eq!(attribute_of(&model, &who, "name"), vec![json!("Ada")]);
    assert_eq!(attribute_of(&model, &place, "city"), vec![json!("Oslo")]);
}

#[test]
fn test_node_with_a_self_loop_collapses_into_an_open_edge() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let trips = trips_between(&mut model, &people);

    assert_eq!(model.interpret_as_edges(&people).unwrap(), people);
    let links = model.edge_links(&people).unwrap();
    assert_eq!(links.source_class_id, None);
    assert_eq!(links.target_class_id, None);
    let trip_links = model.edge_links(&trips).unwrap();
    assert_eq!(trip_links.source_class_id, None);
    assert_eq!(trip_links.target_class_id, None);
}

#[test]
fn test_self_loop_leaves_one_end_of_the_collapsed_edge_open() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let cities = city_nodes(&mut model);
    trips_between(&mut model, &people);
    let visits = visits_between(&mut model, &people, &cities);

    model.interpret_as_edges(&people).unwrap();
    let links = model.edge_links(&people).unwrap().clone();
    let ends: Vec<Option<ClassId>> = vec![links.source_class_id, links.target_class_id];
    assert!(ends.contains(&None));
    assert!(ends.contains(&Some(cities.clone())));
    assert!(model.edge_class_ids(&cities).unwrap().contains(&people));
    assert!(model.edge_links(&visits).unwrap().source_class_id.is_none());
}

#[test]
fn test_edge_reinterpreted_as_nodes_splits_into_two_edges() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let cities = city_nodes(&mut model);
    let visits = visits_between(&mut model, &people, &cities);

    let same = model.interpret_as_nodes(&visits).unwrap();
    assert_eq!(same, visits);
    let new_edges = model.edge_class_ids(&visits).unwrap();
    assert_eq!(new_edges.len(), 2);

    let mut ends = BTreeSet::new();
    for edge in &new_edges {
        let links = model.edge_links(edge).unwrap();
        ends.insert((links.source_class_id.clone(), links.target_class_id.clone()));
    }
    let expected: BTreeSet<_> = [
        (Some(people.clone()), Some(visits.clone())),
        (Some(visits.clone()), Some(cities.clone())),
    ]
    .into_iter()
    .collect();
    assert_eq!(ends, expected);

    let first = item_at(&mut model, &visits, "0");
    let neighbors = model.instance_neighbor_nodes(first, &everything()).unwrap().ready().unwrap();
    assert_eq!(neighbors.len(), 2);
    let people_table = table_of(&model, &people);
    let cities_table = table_of(&model, &cities);
    for key in &neighbors {
        let table = model.item(*key).unwrap().table_id().clone();
        assert!(table == people_table || table == cities_table);
    }
}

#[test]
fn test_facets_of_an_edge_class_keep_its_ends() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let trips = trips_between(&mut model, &people);

    let facets = model.class_closed_facet(&trips, "from", &[json!("Ada"), json!("Cy")]).unwrap();
    assert_eq!(facets.len(), 2);
    for facet in &facets {
        let links = model.edge_links(facet).unwrap();
        assert_eq!(links.source_class_id.as_ref(), Some(&people));
        assert_eq!(links.target_class_id.as_ref(), Some(&people));
        assert_eq!(links.source_table_ids[0], table_of(&model, &trips));
        assert!(model.edge_class_ids(&people).unwrap().contains(facet));
    }

    let from_cy = item_at(&mut model, &facets[1], "1");
    let sources = model.instance_source_nodes(from_cy, &everything()).unwrap().ready().unwrap();
    let targets = model.instance_target_nodes(from_cy, &everything()).unwrap().ready().unwrap();
    assert_eq!(attribute_of(&model, &sources, "name"), vec![json!("Cy")]);
    assert_eq!(attribute_of(&model, &targets, "name"), vec![json!("Ada")]);
}

#[test]
fn test_open_facet_on_a_class() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let classes = model.class_open_facet(&people, "city", None).unwrap().ready().unwrap();
    let names: Vec<String> = classes.iter().map(|id| model.class_name(id).unwrap()).collect();
    assert_eq!(names, vec!["[city=Oslo]", "[city=Bergen]", "[city=Tromsø]"]);
    for class_id in &classes {
        assert_eq!(model.class(class_id).unwrap().type_tag(), "NodeClass");
    }
}

#[test]
fn test_transposed_classes_keep_the_kind() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let classes = model
        .class_closed_transpose(&people, &[ItemIndex::from("0"), ItemIndex::from("3")])
        .unwrap();
    assert_eq!(classes.len(), 2);
    let table = table_of(&model, &classes[1]);
    assert_eq!(model.count_rows(&table).unwrap(), 3);

    let opened = model.class_open_transpose(&people, Some(1)).unwrap().ready().unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(model.class(&opened[0]).unwrap().type_tag(), "NodeClass");
}

#[test]
fn test_node_expand_adds_child_class_with_parent_child_edge() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let tags = model.class_expand(&people, "tags", None).unwrap();

    let edges = model.edge_class_ids(&tags).unwrap();
    assert_eq!(edges.len(), 1);
    let edge_table = table_of(&model, &edges[0]);
    assert_eq!(model.table(&edge_table).unwrap().type_tag(), "ParentChildTable");

    let ada = item_at(&mut model, &people, "0");
    let children = model.instance_neighbor_nodes(ada, &everything()).unwrap().ready().unwrap();
    assert_eq!(attribute_of(&model, &children, "tags"), vec![json!("math"), json!("code")]);
}

#[test]
fn test_generic_derivations_stay_unconnected() {
    let mut model = NetworkModel::new("m");
    let plain = model
        .add_static_table("plain", json!([{"k": "a", "xs": [1, 2]}]), ["k", "xs"])
        .unwrap();
    let promoted = model.class_promote(&plain, "k").unwrap();
    let unrolled = model.class_unroll(&plain, "xs").unwrap();
    for class_id in [&promoted, &unrolled] {
        assert_eq!(model.class(class_id).unwrap().type_tag(), "GenericClass");
    }
    assert_eq!(model.class_ids().len(), 3);
    assert!(matches!(model.edge_class_ids(&plain), Err(ModelError::ContractViolation(_))));
}

#[test]
fn test_project_new_edge_across_a_path() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let cities = city_nodes(&mut model);
    let lives = model.connect_to_node_class(&people, &cities, Some("city"), Some("city")).unwrap();

    let projected = model.project_new_edge(&people, &[lives.clone(), cities.clone()]).unwrap();
    let links = model.edge_links(&projected).unwrap().clone();
    assert_eq!(links.source_class_id.as_ref(), Some(&people));
    assert_eq!(links.target_class_id.as_ref(), Some(&cities));
    assert_eq!(links.source_table_ids.len(), 1);
    assert_eq!(links.target_table_ids.len(), 1);

    let ada = item_at(&mut model, &people, "0");
    let neighbors = model.instance_neighbor_nodes(ada, &everything()).unwrap().ready().unwrap();
    let cities_table = table_of(&model, &cities);
    let reached: Vec<ItemKey> = neighbors
        .into_iter()
        .filter(|key| model.item(*key).unwrap().table_id() == &cities_table)
        .collect();
    assert_eq!(attribute_of(&model, &reached, "pop"), vec![json!(700)]);

    assert!(matches!(
        model.project_new_edge(&people, &[cities.clone()]),
        Err(ModelError::ContractViolation(_))
    ));
}

#[test]
fn test_delete_class_collects_unreachable_tables() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let cities = model.class_promote(&people, "city").unwrap();
    let edge = model.edge_class_ids(&people).unwrap()[0].clone();
    assert_eq!(model.table_ids().len(), 3);

    model.delete_class(&cities).unwrap();
    assert!(matches!(model.class(&cities), Err(ModelError::NotFound(_))));
    assert_eq!(model.edge_links(&edge).unwrap().target_class_id, None);

    model.delete_class(&edge).unwrap();
    assert!(model.edge_class_ids(&people).unwrap().is_empty());
    assert_eq!(model.table_ids(), vec![table_of(&model, &people)]);
}

#[test]
fn test_class_annotations_and_labels() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    let ada = item_at(&mut model, &people, "0");
    assert_eq!(model.item_label(ada).unwrap(), "0");

    model.set_class_annotation(&people, "labelAttr", json!("name")).unwrap();
    assert_eq!(model.item_label(ada).unwrap(), "Ada");
    model.delete_class_annotation(&people, "labelAttr").unwrap();
    assert!(model.class(&people).unwrap().annotations().is_empty());
}

#[test]
fn test_edge_operations_reject_node_classes() {
    let mut model = NetworkModel::new("m");
    let people = people_nodes(&mut model);
    assert!(matches!(
        model.toggle_direction(&people, None),
        Err(ModelError::ContractViolation(_))
    ));
    assert!(matches!(
        model.connect_source(&people, &people, None, None),
        Err(ModelError::ContractViolation(_))
    ));
}
