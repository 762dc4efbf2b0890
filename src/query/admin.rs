// Recognition of administrative SQL statements (spec §6): a set of
// case-insensitive token patterns tried in order before falling back to the
// full `SELECT` parser. Grounded on the teacher's `parser::SqlParser`
// front-door dispatch, generalized from "is this a SELECT" to the larger
// admin vocabulary this system recognizes.

use regex::Regex;

use crate::error::{DbError, ParseError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillTarget {
    Query,
    Connection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminStatement {
    Select { sql: String },
    SubmitSelect { sql: String },
    DropDatabase { name: String },
    DropTable { database: Option<String>, table: String },
    FlushChunksCache { database: Option<String> },
    ShowProcessList { full: bool },
    Kill { target: KillTarget, id: u64 },
    Cancel { id: u64 },
}

/// Recognizes one statement, trying admin patterns before treating it as a
/// plain `SELECT`. Returns an error only when nothing at all matches.
pub fn recognize(raw: &str) -> Result<AdminStatement> {
    let trimmed = raw.trim().trim_end_matches(';').trim();

    if let Some(sql) = strip_prefix_ci(trimmed, "SUBMIT") {
        let sql = sql.trim();
        if strip_prefix_ci(sql, "SELECT").is_some() {
            return Ok(AdminStatement::SubmitSelect { sql: sql.to_string() });
        }
        return Err(DbError::Parse(ParseError::Unsupported("SUBMIT requires a SELECT".to_string())));
    }

    if let Some(rest) = strip_prefix_ci(trimmed, "DROP") {
        return parse_drop(rest.trim());
    }

    if let Some(rest) = strip_prefix_ci(trimmed, "FLUSH") {
        return parse_flush(rest.trim());
    }

    if let Some(rest) = strip_prefix_ci(trimmed, "SHOW") {
        return parse_show(rest.trim());
    }

    if let Some(rest) = strip_prefix_ci(trimmed, "KILL") {
        return parse_kill(rest.trim());
    }

    if let Some(rest) = strip_prefix_ci(trimmed, "CANCEL") {
        let id: u64 = rest
            .trim()
            .parse()
            .map_err(|_| DbError::Parse(ParseError::Syntax("CANCEL requires a numeric request id".to_string())))?;
        return Ok(AdminStatement::Cancel { id });
    }

    if strip_prefix_ci(trimmed, "SELECT").is_some() {
        return Ok(AdminStatement::Select { sql: trimmed.to_string() });
    }

    Err(DbError::Parse(ParseError::Syntax(format!("unrecognized statement: {trimmed}"))))
}

fn parse_drop(rest: &str) -> Result<AdminStatement> {
    if let Some(rest) = strip_prefix_ci(rest, "DATABASE").or_else(|| strip_prefix_ci(rest, "SCHEMA")) {
        let name = parse_identifier(rest.trim())?;
        return Ok(AdminStatement::DropDatabase { name });
    }

    if let Some(rest) = strip_prefix_ci(rest, "TABLE") {
        let rest = rest.trim();
        return match rest.split_once('.') {
            Some((db, table)) => Ok(AdminStatement::DropTable {
                database: Some(parse_identifier(db.trim())?),
                table: parse_identifier(table.trim())?,
            }),
            None => Ok(AdminStatement::DropTable { database: None, table: parse_identifier(rest)? }),
        };
    }

    Err(DbError::Parse(ParseError::Syntax("expected DROP DATABASE|SCHEMA|TABLE".to_string())))
}

fn parse_flush(rest: &str) -> Result<AdminStatement> {
    let rest = strip_prefix_ci(rest, "QSERV_CHUNKS_CACHE")
        .ok_or_else(|| DbError::Parse(ParseError::Syntax("expected FLUSH QSERV_CHUNKS_CACHE".to_string())))?;
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(AdminStatement::FlushChunksCache { database: None });
    }
    let db_clause = strip_prefix_ci(rest, "FOR")
        .ok_or_else(|| DbError::Parse(ParseError::Syntax("expected FOR <database>".to_string())))?;
    Ok(AdminStatement::FlushChunksCache { database: Some(parse_identifier(db_clause.trim())?) })
}

fn parse_show(rest: &str) -> Result<AdminStatement> {
    let (full, rest) = match strip_prefix_ci(rest, "FULL") {
        Some(r) => (true, r.trim()),
        None => (false, rest),
    };
    if strip_prefix_ci(rest, "PROCESSLIST").is_some() {
        return Ok(AdminStatement::ShowProcessList { full });
    }
    Err(DbError::Parse(ParseError::Syntax("expected SHOW [FULL] PROCESSLIST".to_string())))
}

fn parse_kill(rest: &str) -> Result<AdminStatement> {
    let (target, rest) = if let Some(r) = strip_prefix_ci(rest, "QUERY") {
        (KillTarget::Query, r)
    } else if let Some(r) = strip_prefix_ci(rest, "CONNECTION") {
        (KillTarget::Connection, r)
    } else {
        (KillTarget::Connection, rest)
    };
    let id: u64 = rest
        .trim()
        .parse()
        .map_err(|_| DbError::Parse(ParseError::Syntax("KILL requires a numeric id".to_string())))?;
    Ok(AdminStatement::Kill { target, id })
}

fn strip_prefix_ci<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    if s.len() < keyword.len() {
        return None;
    }
    let (head, tail) = s.split_at(keyword.len());
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    if tail.is_empty() || tail.starts_with(char::is_whitespace) {
        Some(tail)
    } else {
        None
    }
}

/// Accepts a bare, backtick-quoted, or double-quoted identifier; rejects
/// single-quoted names and names starting with `_` (spec §6).
fn parse_identifier(raw: &str) -> Result<String> {
    let raw = raw.trim();

    if let Some(stripped) = raw.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        return reject_underscore(stripped);
    }
    if let Some(stripped) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return reject_underscore(stripped);
    }
    if raw.starts_with('\'') {
        return Err(DbError::Parse(ParseError::Syntax("single-quoted identifiers are rejected".to_string())));
    }

    let bare = Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap();
    if !bare.is_match(raw) {
        return Err(DbError::Parse(ParseError::Syntax(format!("invalid identifier: {raw}"))));
    }
    reject_underscore(raw)
}

fn reject_underscore(name: &str) -> Result<String> {
    if name.starts_with('_') {
        return Err(DbError::Parse(ParseError::Syntax(format!("identifiers may not start with an underscore: {name}"))));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_plain_select() {
        assert!(matches!(recognize("select * from t").unwrap(), AdminStatement::Select { .. }));
    }

    #[test]
    fn recognizes_submit_select() {
        assert!(matches!(recognize("SUBMIT SELECT * FROM t").unwrap(), AdminStatement::SubmitSelect { .. }));
    }

    #[test]
    fn drop_table_with_backtick_identifiers() {
        let stmt = recognize("DROP TABLE `DB`.`TABLE` ").unwrap();
        assert_eq!(stmt, AdminStatement::DropTable { database: Some("DB".to_string()), table: "TABLE".to_string() });
    }

    #[test]
    fn drop_table_with_single_quoted_identifiers_is_rejected() {
        assert!(recognize("DROP TABLE 'DB'.'TABLE'").is_err());
    }

    #[test]
    fn cancel_parses_numeric_id() {
        assert_eq!(recognize("CANCEL 102").unwrap(), AdminStatement::Cancel { id: 102 });
    }

    #[test]
    fn flush_chunks_cache_with_database() {
        let stmt = recognize("FLUSH QSERV_CHUNKS_CACHE FOR mydb").unwrap();
        assert_eq!(stmt, AdminStatement::FlushChunksCache { database: Some("mydb".to_string()) });
    }

    #[test]
    fn show_full_processlist() {
        assert_eq!(recognize("SHOW FULL PROCESSLIST").unwrap(), AdminStatement::ShowProcessList { full: true });
    }

    #[test]
    fn kill_query_parses_target_and_id() {
        assert_eq!(recognize("KILL QUERY 55").unwrap(), AdminStatement::Kill { target: KillTarget::Query, id: 55 });
    }

    #[test]
    fn underscore_prefixed_identifier_rejected() {
        assert!(recognize("DROP DATABASE _secret").is_err());
    }
}
