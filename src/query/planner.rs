// Query plan construction (C10 step 5): a small ordered sequence of
// rewrite plugins applied to a parsed `SelectStatement`, following the
// teacher's `execution::planner` pattern of a pipeline of transforms over
// a statement rather than one monolithic rewrite pass.

use crate::query::parser::SelectStatement;

/// A per-chunk SQL template with the `%S` subchunk placeholder still in
/// place, plus the merge-side query the czar runs over collected rows.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub chunk_template: String,
    pub merge_sql: Option<String>,
    pub keep_order_by_on_merge: bool,
}

/// Canonicalizes `&&`/`||` to `AND`/`OR` (Open Question 1: only these two
/// connectives are rewritten; `!=` is left untouched).
fn canonicalize_operators(sql: &str) -> String {
    sql.replace("&&", " AND ").replace("||", " OR ")
}

/// Rewrites the qualified table name in `sql` to the chunk/sub-chunk
/// templated form used on the wire to workers (spec §4.10 step 5a).
fn rewrite_chunk_template(sql: &str, table: &str) -> String {
    let templated = format!("{table}_%CC%_%S");
    sql.replacen(table, &templated, 1)
}

fn is_aggregate(select_item: &str) -> bool {
    let upper = select_item.to_uppercase();
    ["COUNT(", "SUM(", "AVG(", "MIN(", "MAX("]
        .iter()
        .any(|f| upper.contains(f))
}

/// Output of `split_aggregates`: the per-chunk query with any `AVG`
/// projections expanded into partial sum/count pairs, and the czar-side
/// merge query that recombines them.
struct AggregateSplit {
    chunk_sql: String,
    merge_sql: String,
}

/// Splits aggregate projections into a per-worker partial form and a
/// per-czar merge form (spec §4.10 step 5b). Non-aggregate statements pass
/// through with `merge_sql = None` — the merger simply concatenates rows.
///
/// `COUNT`/`SUM`/`MIN`/`MAX` each chunk computes the real partial value, so
/// merging is just `SUM`/`MIN`/`MAX` over the partials. `AVG` can't work that
/// way: averaging per-chunk averages is only correct when every chunk holds
/// the same row count. Instead each chunk projects `SUM(x)`/`COUNT(x)` and
/// the merge recombines them as `SUM(partial_sum)/SUM(partial_count)`.
fn split_aggregates(stmt: &SelectStatement, chunk_sql: &str) -> Option<AggregateSplit> {
    if !stmt.select_list.iter().any(|c| is_aggregate(c)) {
        return None;
    }

    let mut chunk_sql = chunk_sql.to_string();
    let mut merge_columns = Vec::with_capacity(stmt.select_list.len());

    for (i, c) in stmt.select_list.iter().enumerate() {
        let upper = c.to_uppercase();
        if upper.starts_with("COUNT(") || upper.starts_with("SUM(") {
            merge_columns.push(format!("SUM({c})"));
        } else if upper.starts_with("AVG(") && c.ends_with(')') {
            let inner = &c[4..c.len() - 1];
            let sum_alias = format!("qserv_avg_sum_{i}");
            let count_alias = format!("qserv_avg_count_{i}");
            chunk_sql = chunk_sql.replacen(c, &format!("SUM({inner}) AS {sum_alias}, COUNT({inner}) AS {count_alias}"), 1);
            merge_columns.push(format!("SUM({sum_alias})/SUM({count_alias})"));
        } else if upper.starts_with("MIN(") {
            merge_columns.push(format!("MIN({c})"));
        } else if upper.starts_with("MAX(") {
            merge_columns.push(format!("MAX({c})"));
        } else {
            merge_columns.push(c.clone());
        }
    }

    Some(AggregateSplit {
        chunk_sql,
        merge_sql: format!("SELECT {} FROM merge_table", merge_columns.join(", ")),
    })
}

/// Decides whether `ORDER BY` survives on the merge query and whether the
/// parallel per-chunk queries keep it at all (spec §4.10 step 5c): a merge
/// step is always forced once chunks fan out across workers; `ORDER BY`
/// stays on the merge only when a `LIMIT` is present, otherwise it is
/// stripped from both the parallel and merge queries.
fn order_by_policy(stmt: &SelectStatement) -> (bool, bool) {
    let has_order_by = !stmt.order_by.is_empty();
    let keep_on_merge = has_order_by && stmt.limit.is_some();
    let keep_on_parallel = false;
    (keep_on_parallel, keep_on_merge)
}

/// Runs the plugin pipeline against one recognized `SELECT`, producing the
/// per-chunk template and (if needed) a merge-side query.
pub fn plan(stmt: &SelectStatement, raw_sql: &str) -> QueryPlan {
    let canonicalized = canonicalize_operators(raw_sql);
    let templated = rewrite_chunk_template(&canonicalized, &stmt.from_table);
    let (chunk_template, merge_sql) = match split_aggregates(stmt, &templated) {
        Some(split) => (split.chunk_sql, Some(split.merge_sql)),
        None => (templated, None),
    };
    let (_keep_parallel, keep_merge) = order_by_policy(stmt);

    QueryPlan { chunk_template, merge_sql, keep_order_by_on_merge: keep_merge }
}

/// Substitutes one subchunk id into a `%S`-templated fragment (spec §4.10
/// step 6, §4.11 step 1). A template with no placeholder is returned
/// unchanged.
pub fn materialize_for_subchunk(template: &str, subchunk: u64) -> String {
    template.replace("%S", &subchunk.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_select;

    #[test]
    fn canonicalizes_boolean_connectives_only() {
        let sql = "SELECT a FROM t WHERE a > 1 && b < 2 || c != 3";
        let canon = canonicalize_operators(sql);
        assert!(canon.contains("AND"));
        assert!(canon.contains("OR"));
        assert!(canon.contains("!="));
    }

    #[test]
    fn non_aggregate_select_has_no_merge_query() {
        let stmt = parse_select("SELECT a, b FROM t").unwrap();
        let plan = plan(&stmt, "SELECT a, b FROM t");
        assert!(plan.merge_sql.is_none());
    }

    #[test]
    fn aggregate_select_produces_merge_query() {
        let stmt = parse_select("SELECT COUNT(a) FROM t").unwrap();
        let plan = plan(&stmt, "SELECT COUNT(a) FROM t");
        assert!(plan.merge_sql.is_some());
        assert!(plan.merge_sql.unwrap().contains("SUM(COUNT(a))"));
    }

    #[test]
    fn avg_is_split_into_weighted_sum_and_count_not_nested() {
        let stmt = parse_select("SELECT AVG(a) FROM t").unwrap();
        let plan = plan(&stmt, "SELECT AVG(a) FROM t");

        // The per-chunk query must project real partials, not AVG itself.
        assert!(plan.chunk_template.contains("SUM(a) AS qserv_avg_sum_0"));
        assert!(plan.chunk_template.contains("COUNT(a) AS qserv_avg_count_0"));
        assert!(!plan.chunk_template.to_uppercase().contains("AVG("));

        // The merge formula recombines the partials, never nests AVG(AVG(_)).
        let merge_sql = plan.merge_sql.unwrap();
        assert!(merge_sql.contains("SUM(qserv_avg_sum_0)/SUM(qserv_avg_count_0)"));
        assert!(!merge_sql.to_uppercase().contains("AVG("));
    }

    #[test]
    fn order_by_kept_on_merge_only_with_limit() {
        let stmt = parse_select("SELECT a FROM t ORDER BY a LIMIT 5").unwrap();
        let plan = plan(&stmt, "SELECT a FROM t ORDER BY a LIMIT 5");
        assert!(plan.keep_order_by_on_merge);

        let stmt_no_limit = parse_select("SELECT a FROM t ORDER BY a").unwrap();
        let plan_no_limit = plan(&stmt_no_limit, "SELECT a FROM t ORDER BY a");
        assert!(!plan_no_limit.keep_order_by_on_merge);
    }

    #[test]
    fn subchunk_placeholder_is_substituted() {
        let out = materialize_for_subchunk("select * from t_1_%S", 7);
        assert_eq!(out, "select * from t_1_7");
    }
}
