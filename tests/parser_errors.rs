// Parser rejection scenarios (spec §8 scenario 2).

use qserv_rs::query::parse_select;

#[test]
fn functions_in_order_by_are_rejected() {
    let err = parse_select(
        "SELECT objectId, iE1_SG, ABS(iE1_SG) FROM Object WHERE iE1_SG between -0.1 and 0.1 ORDER BY ABS(iE1_SG)",
    )
    .unwrap_err();
    assert!(format!("{err}").to_lowercase().contains("order by"));
}

#[test]
fn underscore_prefixed_identifiers_are_rejected() {
    let err = parse_select("SELECT count(*) AS n, AVG(ra_PS), _chunkId FROM Object GROUP BY _chunkId").unwrap_err();
    assert!(format!("{err}").contains("underscore"));
}

#[test]
fn union_join_is_rejected() {
    let err = parse_select("SELECT s1.foo FROM Source s1 UNION JOIN Source s2 WHERE s1.bar = s2.bar").unwrap_err();
    let message = format!("{err}").to_lowercase();
    assert!(message.contains("union") || message.contains("unsupported") || message.contains("syntax"));
}
