// Query plan rewriting (spec §8 scenario 3): boolean connective
// canonicalization, chunk/subchunk templating, and order-by-on-merge policy.

use qserv_rs::query::{materialize_for_subchunk, parse_select, plan};

#[test]
fn boolean_connectives_are_canonicalized_and_table_is_templated() {
    let sql = "SELECT objectId FROM Object WHERE ra > 1 && decl < 2";
    let stmt = parse_select(sql).unwrap();
    let result = plan(&stmt, sql);

    assert!(result.chunk_template.contains(" AND "));
    assert!(result.chunk_template.contains("Object_%CC%_%S"));
}

#[test]
fn subchunk_template_materializes_per_chunk() {
    let sql = "SELECT objectId FROM Object WHERE ra > 1 && decl < 2";
    let stmt = parse_select(sql).unwrap();
    let result = plan(&stmt, sql);

    let fragment = result.chunk_template.replace("%CC%", "7");
    let materialized = materialize_for_subchunk(&fragment, 3);
    assert!(materialized.contains("Object_7_3"));
    assert!(!materialized.contains('%'));
}

#[test]
fn order_by_survives_merge_only_with_limit() {
    let sql = "SELECT objectId FROM Object ORDER BY objectId LIMIT 10";
    let stmt = parse_select(sql).unwrap();
    let result = plan(&stmt, sql);
    assert!(result.keep_order_by_on_merge);

    let sql_no_limit = "SELECT objectId FROM Object ORDER BY objectId";
    let stmt_no_limit = parse_select(sql_no_limit).unwrap();
    let result_no_limit = plan(&stmt_no_limit, sql_no_limit);
    assert!(!result_no_limit.keep_order_by_on_merge);
}
