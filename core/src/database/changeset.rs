use std::collections::{HashMap, HashSet};

use crate::database::{
    column_spec::ColumnSpec,
    sql_type_wrapper::{SqlValue, StorageKey},
};

/// One entity's partial update, addressed by primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub primary_key: SqlValue,
    pub values: HashMap<String, SqlValue>,
}

impl Record {
    pub fn new(primary_key: impl Into<SqlValue>) -> Self {
        Record { primary_key: primary_key.into(), values: HashMap::new() }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }
}

/// The batch a caller submits: which columns change, for which records.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub pk_spec: ColumnSpec,
    pub columns: Vec<ColumnSpec>,
    pub records: Vec<Record>,
}

impl ChangeSet {
    pub fn new(pk_spec: ColumnSpec, columns: Vec<ColumnSpec>, records: Vec<Record>) -> Self {
        ChangeSet { pk_spec, columns, records }
    }

    pub fn validate(self) -> Result<ValidatedChangeSet, ValidationError> {
        validate(self.pk_spec, self.columns, self.records)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UnsupportedReason {
    #[error("expression values can not be batched, update this record on its own")]
    Expression,

    #[error("column is not part of the change set")]
    UnknownColumn,

    #[error("column is listed more than once")]
    DuplicateColumn,

    #[error("record {pk} has no value for this column")]
    MissingValue { pk: String },

    #[error("primary key must not be null")]
    NullPrimaryKey,

    #[error("the primary key column can not be updated")]
    PrimaryKeyColumn,

    #[error("record {pk} sets NULL on a non-nullable column")]
    NullNotAllowed { pk: String },

    #[error("batch size must be greater than zero")]
    InvalidBatchSize,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no columns to update")]
    NoColumns,

    #[error("primary key {pk} appears more than once in the change set")]
    DuplicateKey { pk: String },

    #[error("unsupported value for column \"{column}\": {reason}")]
    UnsupportedValue { column: String, reason: UnsupportedReason },
}

fn unsupported(column: &str, reason: UnsupportedReason) -> ValidationError {
    ValidationError::UnsupportedValue { column: column.to_string(), reason }
}

/// A validated row: the key plus one value per change set column, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub primary_key: SqlValue,
    pub values: Vec<SqlValue>,
}

/// A change set that passed [`validate`]. Rows are dense and ordered like
/// `columns`, so nothing downstream has to look values up by name again.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedChangeSet {
    pk_spec: ColumnSpec,
    columns: Vec<ColumnSpec>,
    rows: Vec<Row>,
}

impl ValidatedChangeSet {
    pub fn pk_spec(&self) -> &ColumnSpec {
        &self.pk_spec
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Keeps only the columns at `indexes`, in that order.
    pub fn project(&self, indexes: &[usize]) -> ValidatedChangeSet {
        ValidatedChangeSet {
            pk_spec: self.pk_spec.clone(),
            columns: indexes.iter().map(|i| self.columns[*i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| Row {
                    primary_key: row.primary_key.clone(),
                    values: indexes.iter().map(|i| row.values[*i].clone()).collect(),
                })
                .collect(),
        }
    }

    /// Keeps only the rows at `indexes`.
    pub fn select_rows(&self, indexes: &[usize]) -> ValidatedChangeSet {
        ValidatedChangeSet {
            pk_spec: self.pk_spec.clone(),
            columns: self.columns.clone(),
            rows: indexes.iter().map(|i| self.rows[*i].clone()).collect(),
        }
    }

    /// Splits into consecutive pieces of at most `size` rows.
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = ValidatedChangeSet> + '_ {
        self.rows.chunks(size.max(1)).map(|rows| ValidatedChangeSet {
            pk_spec: self.pk_spec.clone(),
            columns: self.columns.clone(),
            rows: rows.to_vec(),
        })
    }
}

/// Checks a change set before anything is compiled or sent.
///
/// Fails on the first problem found; records are scanned once and a repeated
/// primary key stops the scan immediately.
pub fn validate(
    pk_spec: ColumnSpec,
    columns: Vec<ColumnSpec>,
    records: Vec<Record>,
) -> Result<ValidatedChangeSet, ValidationError> {
    if columns.is_empty() {
        return Err(ValidationError::NoColumns);
    }

    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        if column.name == pk_spec.name {
            return Err(unsupported(&column.name, UnsupportedReason::PrimaryKeyColumn));
        }
        if positions.insert(column.name.as_str(), index).is_some() {
            return Err(unsupported(&column.name, UnsupportedReason::DuplicateColumn));
        }
    }

    let mut seen: HashSet<StorageKey> = HashSet::with_capacity(records.len());
    for record in &records {
        match &record.primary_key {
            SqlValue::Null => {
                return Err(unsupported(&pk_spec.name, UnsupportedReason::NullPrimaryKey))
            }
            SqlValue::Expression(_) => {
                return Err(unsupported(&pk_spec.name, UnsupportedReason::Expression))
            }
            _ => {}
        }

        if !seen.insert(StorageKey(vec![&record.primary_key])) {
            return Err(ValidationError::DuplicateKey { pk: record.primary_key.to_string() });
        }

        for (name, value) in &record.values {
            if !positions.contains_key(name.as_str()) {
                let reason = if *name == pk_spec.name {
                    UnsupportedReason::PrimaryKeyColumn
                } else {
                    UnsupportedReason::UnknownColumn
                };
                return Err(unsupported(name, reason));
            }
            if value.is_expression() {
                return Err(unsupported(name, UnsupportedReason::Expression));
            }
        }

        for column in &columns {
            match record.values.get(&column.name) {
                None => {
                    return Err(unsupported(
                        &column.name,
                        UnsupportedReason::MissingValue { pk: record.primary_key.to_string() },
                    ))
                }
                Some(SqlValue::Null) if !column.nullable => {
                    return Err(unsupported(
                        &column.name,
                        UnsupportedReason::NullNotAllowed { pk: record.primary_key.to_string() },
                    ))
                }
                Some(_) => {}
            }
        }
    }

    let rows = records
        .into_iter()
        .map(|mut record| Row {
            values: columns
                .iter()
                .map(|column| record.values.remove(&column.name).unwrap_or(SqlValue::Null))
                .collect(),
            primary_key: record.primary_key,
        })
        .collect();

    Ok(ValidatedChangeSet { pk_spec, columns, rows })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::*;
    use crate::database::column_spec::LogicalType;

    fn pk() -> ColumnSpec {
        ColumnSpec::new("id", LogicalType::BigInt)
    }

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("a", LogicalType::Integer),
            ColumnSpec::new("b", LogicalType::Text).with_null(true),
        ]
    }

    #[test]
    fn test_validate_orders_values_like_columns() {
        let records = vec![Record::new(1i64).set("b", "x").set("a", 10)];
        let validated = validate(pk(), columns(), records).unwrap();
        assert_eq!(validated.rows()[0].values, vec![SqlValue::I32(10), SqlValue::from("x")]);
    }

    #[test]
    fn test_empty_records_are_a_no_op() {
        let validated = validate(pk(), columns(), vec![]).unwrap();
        assert!(validated.is_empty());
    }

    #[test]
    fn test_no_columns() {
        assert_eq!(
            validate(pk(), vec![], vec![Record::new(1i64)]),
            Err(ValidationError::NoColumns)
        );
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let records = vec![
            Record::new(1i64).set("a", 1).set("b", "x"),
            Record::new(2i64).set("a", 2).set("b", "y"),
            Record::new(1i32).set("a", 3).set("b", "z"),
        ];
        assert_eq!(
            validate(pk(), columns(), records),
            Err(ValidationError::DuplicateKey { pk: "1".to_string() })
        );

        let numeric = ColumnSpec::new(
            "id",
            LogicalType::Numeric { precision: Some(10), scale: Some(2) },
        );
        let records = vec![
            Record::new(Decimal::from_str("1.0").unwrap()).set("a", 1).set("b", "x"),
            Record::new(Decimal::from_str("1.00").unwrap()).set("a", 2).set("b", "y"),
        ];
        assert!(matches!(
            validate(numeric, columns(), records),
            Err(ValidationError::DuplicateKey { .. })
        ));

        let float = ColumnSpec::new("id", LogicalType::Double);
        let records = vec![
            Record::new(0.0f64).set("a", 1).set("b", "x"),
            Record::new(-0.0f64).set("a", 2).set("b", "y"),
        ];
        assert!(matches!(
            validate(float, columns(), records),
            Err(ValidationError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_out_of_schema_column_is_rejected() {
        let records = vec![Record::new(1i64).set("a", 1).set("b", "x").set("c", 5)];
        assert_eq!(
            validate(pk(), columns(), records),
            Err(ValidationError::UnsupportedValue {
                column: "c".to_string(),
                reason: UnsupportedReason::UnknownColumn
            })
        );
    }

    #[test]
    fn test_expression_is_rejected() {
        let records = vec![Record::new(1i64)
            .set("a", SqlValue::Expression("\"a\" + 1".to_string()))
            .set("b", "x")];
        assert!(matches!(
            validate(pk(), columns(), records),
            Err(ValidationError::UnsupportedValue { reason: UnsupportedReason::Expression, .. })
        ));
    }

    #[test]
    fn test_key_problems() {
        let null_pk = vec![Record::new(SqlValue::Null).set("a", 1).set("b", "x")];
        assert!(matches!(
            validate(pk(), columns(), null_pk),
            Err(ValidationError::UnsupportedValue { reason: UnsupportedReason::NullPrimaryKey, .. })
        ));

        let mut with_pk = columns();
        with_pk.push(pk());
        assert!(matches!(
            validate(pk(), with_pk, vec![]),
            Err(ValidationError::UnsupportedValue {
                reason: UnsupportedReason::PrimaryKeyColumn,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_and_null_values() {
        let missing = vec![Record::new(1i64).set("b", "x")];
        assert!(matches!(
            validate(pk(), columns(), missing),
            Err(ValidationError::UnsupportedValue { reason: UnsupportedReason::MissingValue { .. }, .. })
        ));

        let null_a = vec![Record::new(1i64).set("a", SqlValue::Null).set("b", "x")];
        assert!(matches!(
            validate(pk(), columns(), null_a),
            Err(ValidationError::UnsupportedValue { reason: UnsupportedReason::NullNotAllowed { .. }, .. })
        ));

        let null_b = vec![Record::new(1i64).set("a", 1).set("b", SqlValue::Null)];
        assert!(validate(pk(), columns(), null_b).is_ok());
    }

    #[test]
    fn test_project_and_chunks() {
        let records = (0..5i64).map(|i| Record::new(i).set("a", i as i32).set("b", "x")).collect();
        let validated = validate(pk(), columns(), records).unwrap();

        let only_b = validated.project(&[1]);
        assert_eq!(only_b.columns().len(), 1);
        assert_eq!(only_b.rows()[3].values, vec![SqlValue::from("x")]);

        let sizes: Vec<_> = validated.chunks(2).map(|chunk| chunk.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }
}
