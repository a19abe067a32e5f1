use crate::data_transfer::reader::RowStream;
use crate::db_types::{Row, Value};
use crate::error::TransferError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Routes one flat-file column into one target table column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMappingRule {
    pub source_column: String,
    pub target_column: String,
}

impl ColumnMappingRule {
    pub fn new(source_column: impl Into<String>, target_column: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_column: target_column.into(),
        }
    }
}

pub fn validate_mapping_rules(rules: &[ColumnMappingRule]) -> Result<(), TransferError> {
    let mut targets = HashSet::new();
    for (index, rule) in rules.iter().enumerate() {
        if rule.source_column.trim().is_empty() {
            return Err(TransferError::validation(format!(
                "Mapping rule {} has an empty sourceColumn",
                index + 1
            )));
        }
        if rule.target_column.trim().is_empty() {
            return Err(TransferError::validation(format!(
                "Mapping rule {} has an empty targetColumn",
                index + 1
            )));
        }
        if !targets.insert(rule.target_column.as_str()) {
            return Err(TransferError::validation(format!(
                "Mapping rule {} maps a second column onto '{}'",
                index + 1,
                rule.target_column
            )));
        }
    }
    Ok(())
}

pub fn check_source_columns(
    rules: &[ColumnMappingRule],
    available: &[String],
) -> Result<(), TransferError> {
    for rule in rules {
        if !available.iter().any(|column| column == &rule.source_column) {
            return Err(TransferError::schema(format!(
                "Mapped column '{}' is not present in the flat-file header",
                rule.source_column
            )));
        }
    }
    Ok(())
}

pub fn apply_mapping(rules: &[ColumnMappingRule], row: &Row) -> Row {
    rules
        .iter()
        .map(|rule| {
            let value = row.get(&rule.source_column).cloned().unwrap_or(Value::Null);
            (rule.target_column.clone(), value)
        })
        .collect()
}

/// Renames and projects rows from an inner stream according to the rules.
pub struct MappedRowStream {
    inner: Box<dyn RowStream>,
    rules: Vec<ColumnMappingRule>,
    columns: Vec<String>,
}

impl MappedRowStream {
    /// Empty `rules` passes the inner stream through untouched.
    pub fn wrap(
        inner: Box<dyn RowStream>,
        rules: Vec<ColumnMappingRule>,
    ) -> Result<Box<dyn RowStream>, TransferError> {
        if rules.is_empty() {
            return Ok(inner);
        }
        validate_mapping_rules(&rules)?;
        check_source_columns(&rules, inner.columns())?;
        let columns = rules.iter().map(|rule| rule.target_column.clone()).collect();
        Ok(Box::new(MappedRowStream {
            inner,
            rules,
            columns,
        }))
    }
}

#[async_trait]
impl RowStream for MappedRowStream {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>, TransferError> {
        let batch = self.inner.next_batch(max_rows).await?;
        Ok(batch.map(|rows| {
            rows.iter()
                .map(|row| apply_mapping(&self.rules, row))
                .collect()
        }))
    }

    fn estimated_total(&self) -> Option<u64> {
        self.inner.estimated_total()
    }
}
