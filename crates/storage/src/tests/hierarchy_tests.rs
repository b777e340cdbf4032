use super::*;

fn node(id: i64, name: &str, parent_id: Option<i64>, order_index: i64) -> TreeNode {
    TreeNode {
        id,
        name: name.to_string(),
        parent_id,
        order_index,
    }
}

//        1
//      /   \
//     2     3
//    / \     \
//   4   5     6
fn sample_arena() -> TreeArena {
    TreeArena::from_nodes(vec![
        node(5, "e", Some(2), 1),
        node(1, "a", None, 0),
        node(3, "c", Some(1), 1),
        node(2, "b", Some(1), 0),
        node(4, "d", Some(2), 0),
        node(6, "b", Some(3), 0),
    ])
}

#[test]
fn children_follow_order_index() {
    let arena = sample_arena();
    assert_eq!(arena.roots(), &[1]);
    assert_eq!(arena.children(1), &[2, 3]);
    assert_eq!(arena.children(2), &[4, 5]);
    assert!(arena.children(4).is_empty());
    assert!(arena.is_leaf(6));
    assert!(!arena.is_leaf(3));
}

#[test]
fn subtree_includes_every_descendant_and_nothing_else() {
    let arena = sample_arena();
    assert_eq!(arena.subtree(2), vec![2, 4, 5]);
    assert_eq!(arena.subtree(1), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(arena.descendants(3), vec![6]);
    assert!(arena.subtree(99).is_empty());
}

#[test]
fn ancestors_run_from_root_to_node() {
    let arena = sample_arena();
    assert_eq!(arena.ancestors(5), Some(vec![1, 2, 5]));
    assert_eq!(arena.ancestors(1), Some(vec![1]));
    assert_eq!(arena.ancestors(42), None);
}

#[test]
fn find_by_name_returns_first_in_display_order() {
    let arena = sample_arena();
    assert_eq!(arena.find_by_name("b"), Some(2));
    assert_eq!(arena.find_by_name("missing"), None);
}

#[test]
fn preorder_reports_depth() {
    let arena = sample_arena();
    assert_eq!(
        arena.preorder(),
        vec![(1, 0), (2, 1), (4, 2), (5, 2), (3, 1), (6, 2)]
    );
}

#[test]
fn cycles_do_not_hang_closure_queries() {
    let arena = TreeArena::from_nodes(vec![node(1, "a", Some(2), 0), node(2, "b", Some(1), 0)]);
    assert_eq!(arena.subtree(1), vec![1, 2]);
    assert_eq!(arena.ancestors(1), Some(vec![2, 1]));
}

#[tokio::test]
async fn model_insert_assigns_sibling_order() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let building = storage.insert_model("Building", None).await.expect("root");
    let floor = storage
        .insert_model("Floor", Some(building))
        .await
        .expect("floor");
    let wing = storage
        .insert_model("Wing", Some(building))
        .await
        .expect("wing");

    assert_eq!(
        storage.model_children(building).await.expect("children"),
        vec![floor, wing]
    );
    let wing_node = storage.get_model(wing).await.expect("get").expect("exists");
    assert_eq!(wing_node.order_index, 1);
    assert_eq!(wing_node.parent_id, Some(building));
}

#[tokio::test]
async fn model_insert_under_missing_parent_is_not_found() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let err = storage
        .insert_model("Orphan", Some(ModelId(404)))
        .await
        .expect_err("parent is missing");
    let exception = err.downcast_ref::<ApiException>().expect("typed error");
    assert_eq!(exception.code, ErrorCode::NotFound);
    assert!(storage
        .list_model_hierarchy()
        .await
        .expect("hierarchy")
        .is_empty());
}

#[tokio::test]
async fn model_insert_rejects_blank_names() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let err = storage.insert_model("  ", None).await.expect_err("blank");
    let exception = err.downcast_ref::<ApiException>().expect("typed error");
    assert_eq!(exception.code, ErrorCode::ValidationFailed);
}

#[tokio::test]
async fn model_hierarchy_lists_paths_and_ancestors() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let building = storage.insert_model("Building", None).await.expect("root");
    let floor = storage
        .insert_model("Floor", Some(building))
        .await
        .expect("floor");
    let shop = storage
        .insert_model("Commercial", Some(floor))
        .await
        .expect("shop");

    let hierarchy = storage.list_model_hierarchy().await.expect("hierarchy");
    let paths: Vec<(&str, usize)> = hierarchy
        .iter()
        .map(|e| (e.path.as_str(), e.depth))
        .collect();
    assert_eq!(
        paths,
        vec![
            ("Building", 0),
            ("Building/Floor", 1),
            ("Building/Floor/Commercial", 2)
        ]
    );
    assert_eq!(
        storage.model_ancestors(shop).await.expect("ancestors"),
        vec![building, floor, shop]
    );
    assert_eq!(
        storage.model_subtree(floor).await.expect("subtree"),
        vec![floor, shop]
    );
}

#[tokio::test]
async fn model_lookup_by_unknown_name_is_no_match() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.insert_model("Floor", None).await.expect("floor");
    assert_eq!(
        storage.find_model_by_name("Roof").await.expect("lookup"),
        None
    );
}
