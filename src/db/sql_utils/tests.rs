use super::*;

#[test]
fn test_quote_identifier() {
    assert_eq!(quote_identifier("table"), "`table`".to_string());
    assert_eq!(quote_identifier("table`name"), "`table\\`name`".to_string());
}

#[test]
fn test_qualified_table_name() {
    assert_eq!(qualified_table_name("db", "users"), "`db`.`users`");
    assert_eq!(qualified_table_name("", "users"), "`users`");
}

#[test]
fn test_build_projection_query_keeps_column_order() {
    let columns = vec!["name".to_string(), "id".to_string()];
    assert_eq!(
        build_projection_query("db", "users", &columns, None),
        "SELECT `name`, `id` FROM `db`.`users`"
    );
    assert_eq!(
        build_projection_query("db", "users", &columns, Some(100)),
        "SELECT `name`, `id` FROM `db`.`users` LIMIT 100"
    );
}

#[test]
fn test_build_insert_query() {
    let columns = vec!["id".to_string(), "email".to_string()];
    assert_eq!(
        build_insert_query("db", "users", &columns),
        "INSERT INTO `db`.`users` (`id`, `email`) FORMAT JSONEachRow"
    );
}
