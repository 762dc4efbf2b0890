// End-to-end admin statement recognition (spec §8 scenario 1).

use qserv_rs::query::{recognize, AdminStatement, KillTarget};

#[test]
fn submit_select_is_stripped_to_its_select() {
    let stmt = recognize("SUBMIT\tSELECT 1").unwrap();
    match stmt {
        AdminStatement::SubmitSelect { sql } => assert_eq!(sql, "SELECT 1"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn drop_table_with_backtick_identifiers_recognized() {
    let stmt = recognize("DROP TABLE `DB`.`TABLE` ").unwrap();
    assert_eq!(stmt, AdminStatement::DropTable { database: Some("DB".to_string()), table: "TABLE".to_string() });
}

#[test]
fn drop_table_with_single_quoted_identifiers_is_not_recognized_as_drop_table() {
    assert!(recognize("DROP TABLE 'DB'.'TABLE'").is_err());
}

#[test]
fn kill_query_recognized_with_id() {
    let stmt = recognize("KILL QUERY 100").unwrap();
    assert_eq!(stmt, AdminStatement::Kill { target: KillTarget::Query, id: 100 });
}

#[test]
fn cancel_recognized_with_id() {
    let stmt = recognize("CANCEL 102").unwrap();
    assert_eq!(stmt, AdminStatement::Cancel { id: 102 });
}
