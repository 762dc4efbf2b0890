// SELECT parsing into an internal representation (C10 step 2), grounded on
// the teacher's `parser::SqlParser` (GenericDialect + `sqlparser::Parser`).
// Rejects identifiers starting with an underscore, functions in `ORDER BY`,
// and `UNION JOIN` (spec §4.10 step 2).

use sqlparser::ast::{Expr, GroupByExpr, Query, Select, SelectItem, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlEngine;

use crate::error::{DbError, ParseError, Result};

/// One `ORDER BY` reference, resolved to a name that must match an
/// unqualified, non-expression `SELECT` item or an alias (spec §4.10 step 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByColumn {
    pub name: String,
    pub ascending: bool,
}

/// The statement tree produced by parsing one user `SELECT` (spec §4.10
/// step 2: `SelectList`, optional `WhereClause`, `OrderBy`, `GroupBy`,
/// `Having`, `Limit`).
#[derive(Debug, Clone)]
pub struct SelectStatement {
    pub select_list: Vec<String>,
    pub from_table: String,
    pub has_where: bool,
    pub group_by: Vec<String>,
    pub has_having: bool,
    pub order_by: Vec<OrderByColumn>,
    pub limit: Option<u64>,
}

/// Parses one SQL statement, expecting it to be a `SELECT`.
pub fn parse_select(sql: &str) -> Result<SelectStatement> {
    let dialect = GenericDialect {};
    let statements =
        SqlEngine::parse_sql(&dialect, sql).map_err(|e| DbError::Parse(ParseError::Syntax(e.to_string())))?;

    if statements.len() != 1 {
        return Err(DbError::Parse(ParseError::Syntax(
            "expected exactly one statement".to_string(),
        )));
    }

    let query = match statements.into_iter().next().unwrap() {
        Statement::Query(query) => query,
        _ => return Err(DbError::Parse(ParseError::Unsupported("only SELECT is supported".to_string()))),
    };

    let select = match *query.body.clone() {
        SetExpr::Select(select) => *select,
        SetExpr::SetOperation { .. } => {
            return Err(DbError::Parse(ParseError::Unsupported("UNION JOIN is not supported".to_string())))
        }
        _ => return Err(DbError::Parse(ParseError::Unsupported("unsupported query body".to_string()))),
    };

    reject_union_join(&select)?;

    let from_table = extract_table_name(&select)?;
    reject_underscore(&from_table)?;

    let select_list = extract_select_list(&select)?;
    for column in &select_list {
        reject_underscore(column)?;
    }

    let group_by = match &select.group_by {
        GroupByExpr::Expressions(exprs, _) => exprs.iter().map(|e| e.to_string()).collect(),
        GroupByExpr::All(_) => Vec::new(),
    };

    let order_by = extract_order_by(&query)?;
    let limit = extract_limit(&query);

    Ok(SelectStatement {
        select_list,
        from_table,
        has_where: select.selection.is_some(),
        group_by,
        has_having: select.having.is_some(),
        order_by,
        limit,
    })
}

fn reject_union_join(select: &Select) -> Result<()> {
    for twj in &select.from {
        for join in &twj.joins {
            let text = format!("{:?}", join.join_operator);
            if text.to_uppercase().contains("UNION") {
                return Err(DbError::Parse(ParseError::Unsupported("UNION JOIN is not supported".to_string())));
            }
        }
    }
    Ok(())
}

fn extract_table_name(select: &Select) -> Result<String> {
    let first = select
        .from
        .first()
        .ok_or_else(|| DbError::Parse(ParseError::Syntax("missing FROM clause".to_string())))?;
    match &first.relation {
        sqlparser::ast::TableFactor::Table { name, .. } => Ok(name.to_string()),
        _ => Err(DbError::Parse(ParseError::Unsupported("unsupported FROM clause".to_string()))),
    }
}

fn extract_select_list(select: &Select) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => out.push(ident.value.clone()),
            SelectItem::UnnamedExpr(expr) => out.push(expr.to_string()),
            SelectItem::ExprWithAlias { alias, .. } => out.push(alias.value.clone()),
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => out.push("*".to_string()),
        }
    }
    Ok(out)
}

fn extract_order_by(query: &Query) -> Result<Vec<OrderByColumn>> {
    let mut out = Vec::new();
    if let Some(order_by) = &query.order_by {
        for item in &order_by.exprs {
            if matches!(item.expr, Expr::Function(_)) {
                return Err(DbError::Parse(ParseError::Unsupported(
                    "functions in ORDER BY are not supported".to_string(),
                )));
            }
            out.push(OrderByColumn { name: item.expr.to_string(), ascending: item.asc.unwrap_or(true) });
        }
    }
    Ok(out)
}

fn extract_limit(query: &Query) -> Option<u64> {
    match &query.limit {
        Some(Expr::Value(value)) => value.to_string().trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn reject_underscore(name: &str) -> Result<()> {
    let leaf = name.rsplit('.').next().unwrap_or(name);
    if leaf.starts_with('_') {
        return Err(DbError::Parse(ParseError::Syntax(format!(
            "identifiers may not start with an underscore: {name}"
        ))));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_select() {
        let stmt = parse_select("SELECT a, b FROM t WHERE a > 1 ORDER BY a LIMIT 10").unwrap();
        assert_eq!(stmt.from_table, "t");
        assert_eq!(stmt.select_list, vec!["a", "b"]);
        assert!(stmt.has_where);
        assert_eq!(stmt.limit, Some(10));
        assert_eq!(stmt.order_by[0].name, "a");
    }

    #[test]
    fn rejects_underscore_prefixed_table() {
        assert!(parse_select("SELECT a FROM _t").is_err());
    }

    #[test]
    fn rejects_underscore_prefixed_column() {
        assert!(parse_select("SELECT _a FROM t").is_err());
    }

    #[test]
    fn rejects_function_in_order_by() {
        assert!(parse_select("SELECT a FROM t ORDER BY UPPER(a)").is_err());
    }
}
