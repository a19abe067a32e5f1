// =====================================================
// SQL UTILITIES MODULE
// ClickHouse identifier quoting and query text builders
// =====================================================

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

pub fn qualified_table_name(database: &str, table: &str) -> String {
    if database.trim().is_empty() {
        return quote_identifier(table);
    }
    format!("{}.{}", quote_identifier(database), quote_identifier(table))
}

pub fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| quote_identifier(column))
        .collect::<Vec<String>>()
        .join(", ")
}

/// Projection over the selected columns in the requested order. No row cap
/// unless a limit is given.
pub fn build_projection_query(
    database: &str,
    table: &str,
    columns: &[String],
    limit: Option<usize>,
) -> String {
    let mut query = format!(
        "SELECT {} FROM {}",
        column_list(columns),
        qualified_table_name(database, table)
    );
    if let Some(limit) = limit {
        query.push_str(&format!(" LIMIT {}", limit));
    }
    query
}

pub fn build_insert_query(database: &str, table: &str, columns: &[String]) -> String {
    format!(
        "INSERT INTO {} ({}) FORMAT JSONEachRow",
        qualified_table_name(database, table),
        column_list(columns)
    )
}

#[cfg(test)]
mod tests;
