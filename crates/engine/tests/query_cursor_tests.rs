//! Query execution, smart queries and cursor paging

use proptest::prelude::*;
use serde_json::{json, Value};
use soupstore_core::{IndexSpec, Order, QuerySpec, SoupError, SOUP_ENTRY_ID};
use soupstore_engine::SoupStore;

// ============================================================================
// Test Helpers
// ============================================================================

fn people() -> SoupStore {
    let store = SoupStore::ephemeral().unwrap();
    store
        .register_soup("people", &[IndexSpec::string("lastName")])
        .unwrap();
    for name in ["Doe", "Jackson", "Watson"] {
        store.create("people", json!({"lastName": name})).unwrap();
    }
    store
}

fn last_names(docs: &[Value]) -> Vec<String> {
    docs.iter()
        .map(|d| d["lastName"].as_str().unwrap().to_string())
        .collect()
}

fn numbers(n: usize) -> SoupStore {
    let store = SoupStore::ephemeral().unwrap();
    store
        .register_soup("numbers", &[IndexSpec::integer("n"), IndexSpec::floating("score")])
        .unwrap();
    for i in 0..n {
        store
            .create("numbers", json!({"n": i as i64, "score": i as f64 / 2.0}))
            .unwrap();
    }
    store
}

// ============================================================================
// Soup-scoped queries
// ============================================================================

#[test]
fn test_exact_query() {
    let store = people();
    let spec = QuerySpec::exact("lastName", "Jackson", 10).unwrap();
    let docs = store.query("people", &spec, 0).unwrap();
    assert_eq!(last_names(&docs), vec!["Jackson"]);
}

#[test]
fn test_range_query_ascending_and_descending() {
    let store = people();
    let asc = QuerySpec::range(
        "lastName",
        Some(json!("Jackson")),
        Some(json!("Watson")),
        Order::Ascending,
        10,
    )
    .unwrap();
    assert_eq!(
        last_names(&store.query("people", &asc, 0).unwrap()),
        vec!["Jackson", "Watson"]
    );

    let desc = QuerySpec::range(
        "lastName",
        Some(json!("Jackson")),
        Some(json!("Watson")),
        Order::Descending,
        10,
    )
    .unwrap();
    assert_eq!(
        last_names(&store.query("people", &desc, 0).unwrap()),
        vec!["Watson", "Jackson"]
    );
}

#[test]
fn test_open_ended_range() {
    let store = people();
    let from = QuerySpec::range("lastName", Some(json!("E")), None, Order::Ascending, 10).unwrap();
    assert_eq!(
        last_names(&store.query("people", &from, 0).unwrap()),
        vec!["Jackson", "Watson"]
    );
    let until = QuerySpec::range("lastName", None, Some(json!("K")), Order::Ascending, 10).unwrap();
    assert_eq!(
        last_names(&store.query("people", &until, 0).unwrap()),
        vec!["Doe", "Jackson"]
    );
}

#[test]
fn test_like_query() {
    let store = people();
    let spec = QuerySpec::like("lastName", "%son", Order::Ascending, 10).unwrap();
    assert_eq!(
        last_names(&store.query("people", &spec, 0).unwrap()),
        vec!["Jackson", "Watson"]
    );
}

#[test]
fn test_query_on_reserved_path() {
    let store = people();
    let spec = QuerySpec::all(SOUP_ENTRY_ID, Order::Descending, 10).unwrap();
    assert_eq!(
        last_names(&store.query("people", &spec, 0).unwrap()),
        vec!["Watson", "Jackson", "Doe"]
    );
}

#[test]
fn test_query_unindexed_path_fails() {
    let store = people();
    let spec = QuerySpec::exact("firstName", "John", 10).unwrap();
    let err = store.query("people", &spec, 0).unwrap_err();
    assert!(matches!(err, SoupError::PathNotIndexed { .. }));
    assert!(err.is_schema_error());
}

#[test]
fn test_smart_spec_rejected_by_soup_scoped_entry_points() {
    let store = people();
    let spec = QuerySpec::smart("select {people:lastName} from {people}", 10).unwrap();
    assert!(matches!(
        store.query("people", &spec, 0),
        Err(SoupError::InvalidQuery { .. })
    ));
    assert!(matches!(
        store.open_cursor("people", &spec),
        Err(SoupError::InvalidQuery { .. })
    ));
    let exact = QuerySpec::exact("lastName", "Doe", 10).unwrap();
    assert!(matches!(
        store.smart_query(&exact, 0),
        Err(SoupError::InvalidQuery { .. })
    ));
}

#[test]
fn test_integer_and_floating_columns_order_numerically() {
    let store = numbers(12);
    let spec = QuerySpec::range("n", Some(json!(2)), Some(json!(10)), Order::Ascending, 100).unwrap();
    let ns: Vec<i64> = store
        .query("numbers", &spec, 0)
        .unwrap()
        .iter()
        .map(|d| d["n"].as_i64().unwrap())
        .collect();
    assert_eq!(ns, (2..=10).collect::<Vec<_>>());

    let spec = QuerySpec::range("score", Some(json!(4.5)), None, Order::Descending, 100).unwrap();
    let scores: Vec<f64> = store
        .query("numbers", &spec, 0)
        .unwrap()
        .iter()
        .map(|d| d["score"].as_f64().unwrap())
        .collect();
    assert_eq!(scores, vec![5.5, 5.0, 4.5]);
}

#[test]
fn test_non_numeric_range_bound_matches_nothing() {
    let store = numbers(5);
    for (begin, end) in [(None, Some(json!("abc"))), (Some(json!("abc")), None)] {
        let spec = QuerySpec::range("n", begin, end, Order::Ascending, 10).unwrap();
        assert_eq!(store.count_query("numbers", &spec).unwrap(), 0);
        assert!(store.query("numbers", &spec, 0).unwrap().is_empty());
    }
    let exact = QuerySpec::exact("n", "abc", 10).unwrap();
    assert_eq!(store.count_query("numbers", &exact).unwrap(), 0);

    // Numeric strings still coerce
    let spec = QuerySpec::range("n", None, Some(json!("2")), Order::Ascending, 10).unwrap();
    assert_eq!(store.count_query("numbers", &spec).unwrap(), 3);
}

#[test]
fn test_page_past_end_is_empty() {
    let store = numbers(3);
    let spec = QuerySpec::all("n", Order::Ascending, 2).unwrap();
    assert!(store.query("numbers", &spec, usize::MAX).unwrap().is_empty());
}

#[test]
fn test_parse_query_spec_uses_configured_page_size() {
    let store = people();
    let spec = store
        .parse_query_spec(r#"{"queryType":"exact","indexPath":"lastName","matchKey":"Doe"}"#)
        .unwrap();
    assert_eq!(spec.page_size, 10);
    assert_eq!(last_names(&store.query("people", &spec, 0).unwrap()), vec!["Doe"]);
}

// ============================================================================
// Smart queries
// ============================================================================

#[test]
fn test_smart_query_aggregate() {
    let store = SoupStore::ephemeral().unwrap();
    store
        .register_soup(
            "employees",
            &[IndexSpec::string("dept"), IndexSpec::integer("salary")],
        )
        .unwrap();
    for (dept, salary) in [("eng", 100), ("eng", 150), ("ops", 80)] {
        store
            .create("employees", json!({"dept": dept, "salary": salary}))
            .unwrap();
    }

    let spec = QuerySpec::smart(
        "select {employees:dept}, sum({employees:salary}) from {employees} \
         group by {employees:dept} order by {employees:dept}",
        10,
    )
    .unwrap();
    let rows = store.smart_query(&spec, 0).unwrap();
    assert_eq!(rows, vec![json!(["eng", 250]), json!(["ops", 80])]);
    assert_eq!(store.count_smart_query(&spec).unwrap(), 2);
}

#[test]
fn test_smart_query_returns_raw_documents() {
    let store = people();
    let spec = QuerySpec::smart(
        "select {people:_soup}, {people:_soupEntryId} from {people} \
         where {people:lastName} = 'Watson'",
        10,
    )
    .unwrap();
    let rows = store.smart_query(&spec, 0).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0]["lastName"], json!("Watson"));
    assert_eq!(rows[0][1], rows[0][0][SOUP_ENTRY_ID]);
}

#[test]
fn test_smart_query_scalar_aliased_as_soup() {
    let store = people();
    let spec = QuerySpec::smart(
        "select {people:lastName} as soup from {people} order by {people:lastName}",
        10,
    )
    .unwrap();
    let rows = store.smart_query(&spec, 0).unwrap();
    assert_eq!(
        rows,
        vec![json!(["Doe"]), json!(["Jackson"]), json!(["Watson"])]
    );
}

#[test]
fn test_smart_query_join_across_soups() {
    let store = people();
    store
        .register_soup("pets", &[IndexSpec::string("owner"), IndexSpec::string("name")])
        .unwrap();
    store
        .create("pets", json!({"owner": "Doe", "name": "Rex"}))
        .unwrap();
    let spec = QuerySpec::smart(
        "select {pets:name}, {people:lastName} from {pets}, {people} \
         where {pets:owner} = {people:lastName}",
        10,
    )
    .unwrap();
    assert_eq!(store.smart_query(&spec, 0).unwrap(), vec![json!(["Rex", "Doe"])]);
}

#[test]
fn test_smart_query_unknown_soup() {
    let store = people();
    let spec = QuerySpec::smart("select * from {ghost}", 10).unwrap();
    assert!(matches!(
        store.smart_query(&spec, 0),
        Err(SoupError::SoupNotFound { .. })
    ));
}

// ============================================================================
// Cursors
// ============================================================================

#[test]
fn test_cursor_pages_cover_result_exactly() {
    let store = numbers(23);
    let spec = QuerySpec::all("n", Order::Ascending, 5).unwrap();
    let cursor = store.open_cursor("numbers", &spec).unwrap();
    assert_eq!(cursor.total_entries, 23);
    assert_eq!(cursor.total_pages, 5);
    assert_eq!(cursor.current_page_index, 0);

    let mut seen = Vec::new();
    for page in 0..cursor.total_pages {
        let moved = store.move_cursor_to_page(cursor.cursor_id, page).unwrap();
        assert_eq!(moved.current_page_index, page);
        seen.extend(
            moved
                .current_page_ordered_entries
                .iter()
                .map(|d| d["n"].as_i64().unwrap()),
        );
    }
    assert_eq!(seen, (0..23).collect::<Vec<_>>());
    store.close_cursor(cursor.cursor_id).unwrap();
}

#[test]
fn test_cursor_clamps_page_index() {
    let store = numbers(7);
    let spec = QuerySpec::all("n", Order::Ascending, 3).unwrap();
    let cursor = store.open_cursor("numbers", &spec).unwrap();
    let moved = store.move_cursor_to_page(cursor.cursor_id, 99).unwrap();
    assert_eq!(moved.current_page_index, 2);
    assert_eq!(moved.current_page_ordered_entries.len(), 1);
}

#[test]
fn test_cursor_totals_frozen_at_creation() {
    let store = numbers(4);
    let spec = QuerySpec::all("n", Order::Ascending, 2).unwrap();
    let cursor = store.open_cursor("numbers", &spec).unwrap();
    assert_eq!(cursor.total_entries, 4);

    for i in 4..10 {
        store.create("numbers", json!({"n": i})).unwrap();
    }
    let moved = store.move_cursor_to_page(cursor.cursor_id, 1).unwrap();
    assert_eq!(moved.total_entries, 4);
    assert_eq!(moved.total_pages, 2);
    // Pages beyond the frozen range are unreachable
    let clamped = store.move_cursor_to_page(cursor.cursor_id, 4).unwrap();
    assert_eq!(clamped.current_page_index, 1);
}

#[test]
fn test_cursors_are_independent() {
    let store = numbers(10);
    let spec = QuerySpec::all("n", Order::Ascending, 2).unwrap();
    let a = store.open_cursor("numbers", &spec).unwrap();
    let b = store.open_cursor("numbers", &spec).unwrap();
    assert_ne!(a.cursor_id, b.cursor_id);
    assert_eq!(store.live_cursor_count(), 2);

    store.move_cursor_to_page(a.cursor_id, 3).unwrap();
    let b_now = store.move_cursor_to_page(b.cursor_id, 0).unwrap();
    assert_eq!(b_now.current_page_ordered_entries[0]["n"], json!(0));

    store.close_cursor(a.cursor_id).unwrap();
    assert_eq!(store.live_cursor_count(), 1);
    assert!(matches!(
        store.move_cursor_to_page(a.cursor_id, 0),
        Err(SoupError::InvalidCursor { .. })
    ));
}

#[test]
fn test_empty_cursor() {
    let store = numbers(0);
    let spec = QuerySpec::all("n", Order::Ascending, 5).unwrap();
    let cursor = store.open_cursor("numbers", &spec).unwrap();
    assert_eq!(cursor.total_entries, 0);
    assert_eq!(cursor.total_pages, 0);
    assert!(cursor.current_page_ordered_entries.is_empty());
    let moved = store.move_cursor_to_page(cursor.cursor_id, 3).unwrap();
    assert_eq!(moved.current_page_index, 0);
}

#[test]
fn test_smart_cursor() {
    let store = numbers(9);
    let spec = QuerySpec::smart(
        "select {numbers:n} from {numbers} where {numbers:n} % 2 = 0 order by {numbers:n}",
        2,
    )
    .unwrap();
    let cursor = store.open_smart_cursor(&spec).unwrap();
    assert_eq!(cursor.total_entries, 5);
    assert_eq!(cursor.total_pages, 3);
    assert!(cursor.soup().is_none());
    let last = store.move_cursor_to_page(cursor.cursor_id, 2).unwrap();
    assert_eq!(last.current_page_ordered_entries, vec![json!([8])]);
}

#[test]
fn test_cursor_wire_form() {
    let store = people();
    let spec = QuerySpec::exact("lastName", "Doe", 4).unwrap();
    let cursor = store.open_cursor("people", &spec).unwrap();
    let wire = cursor.to_json().unwrap();
    assert_eq!(wire["cursorId"], json!(cursor.cursor_id));
    assert_eq!(wire["pageSize"], json!(4));
    assert_eq!(wire["totalEntries"], json!(1));
    assert_eq!(wire["totalPages"], json!(1));
    assert_eq!(wire["currentPageIndex"], json!(0));
    assert_eq!(
        wire["currentPageOrderedEntries"][0]["lastName"],
        json!("Doe")
    );
}

// ============================================================================
// Paging property
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_pages_reproduce_ordered_result(n in 0usize..40, page_size in 1usize..9) {
        let store = numbers(n);
        let spec = QuerySpec::all("n", Order::Descending, page_size).unwrap();
        let cursor = store.open_cursor("numbers", &spec).unwrap();
        prop_assert_eq!(cursor.total_pages, (n + page_size - 1) / page_size);

        let mut seen = Vec::new();
        for page in 0..cursor.total_pages {
            let moved = store.move_cursor_to_page(cursor.cursor_id, page).unwrap();
            seen.extend(moved.current_page_ordered_entries.iter().map(|d| d["n"].as_i64().unwrap()));
        }
        let expected: Vec<i64> = (0..n as i64).rev().collect();
        prop_assert_eq!(seen, expected);
    }
}
