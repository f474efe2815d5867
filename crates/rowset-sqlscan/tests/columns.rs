use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rowset_sqlscan::ColumnTextScanner;

#[test]
fn keywords_and_literals_are_not_columns() {
    assert_eq!(
        ColumnTextScanner::columns("region = 'West' AND amount BETWEEN 10 AND 2.5e3 OR flag IS NOT NULL"),
        vec!["region", "amount", "flag"]
    );
}

#[test]
fn functions_and_parameters_are_skipped() {
    assert_eq!(
        ColumnTextScanner::columns("UPPER (name) = :name AND total > ? AND owner = @user AND id::text <> ''"),
        vec!["name", "total", "owner", "id"]
    );
}

#[test]
fn quoted_and_dotted_names() {
    assert_eq!(
        ColumnTextScanner::columns("s.region = [Order Date] OR \"select\" = t.amount. "),
        vec!["s.region", "Order Date", "select", "t.amount"]
    );
}

#[test]
fn duplicates_keep_first_position() {
    assert_eq!(
        ColumnTextScanner::columns("b + a * b -- a trailing note\n + c"),
        vec!["b", "a", "c"]
    );
}

#[test]
fn empty_and_punctuation_only_input() {
    assert!(ColumnTextScanner::columns("").is_empty());
    assert!(ColumnTextScanner::columns("( ) , = 1 'x' []").is_empty());
}

proptest! {
    #[test]
    fn never_panics_and_spans_are_in_bounds(text in "\\PC{0,80}") {
        for col in ColumnTextScanner::new(&text) {
            prop_assert!(col.span.end <= text.len());
            prop_assert!(text.get(col.span.clone()).is_some());
        }
    }
}
