//! Staged updates: binary `COPY` into a temporary table, then one
//! `UPDATE ... FROM` per physical table.

use std::borrow::Cow;

use bytes::Bytes;
use futures::pin_mut;
use tokio_postgres::{binary_copy::BinaryCopyInWriter, Error as PgError, Transaction};
use tracing::{debug, error, info};

use crate::{
    database::{
        batch_operations::{build_staging_update, CompiledStatement},
        changeset::ValidatedChangeSet,
        column_spec::ColumnSpec,
        dialect::Dialect,
        encoder::{EncodeError, EncoderRegistry, Target, Token},
        executor::{BatchPlan, ExecutionError, RowCountPolicy, UpdateReport},
        layout::{KeySource, TargetLayout},
        postgres::client::{execute_statements, PgType, PostgresClient, PostgresError, ToSql},
        sql_type_wrapper::Parameter,
    },
    helpers::generate_random_id,
};

/// Arrival order of a staged record, used to correlate rows across tables.
const SEQUENCE_COLUMN: &str = "__sequence_no";
const LINK_COLUMN: &str = "__link";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// `ANALYZE` the staging table when more records than this are loaded.
    pub analyze_threshold: usize,
    pub row_count_policy: RowCountPolicy,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions { analyze_threshold: 100, row_count_policy: RowCountPolicy::default() }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BulkLoadError {
    #[error("{0}")]
    Encode(#[from] EncodeError),

    #[error("{0}")]
    Connection(#[from] PostgresError),

    #[error("table \"{table}\" can not be staged: {reason}")]
    UnsupportedLayout { table: String, reason: String },

    #[error("Could not load staging table {staging}: {source}")]
    Staging { staging: String, source: PgError },

    #[error("Staging table {staging} received {loaded} rows, expected {expected}")]
    IncompleteCopy { staging: String, loaded: u64, expected: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum CopyUpdateError {
    #[error("{0}")]
    Load(#[from] BulkLoadError),

    #[error("{0}")]
    Execute(#[from] ExecutionError),
}

fn quote(name: &str) -> String {
    Dialect::Postgres.quote_identifier(name)
}

pub(crate) fn staging_table_name(table_name: &str, random_id: &str) -> String {
    let base: String = table_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(40)
        .collect::<String>()
        .to_lowercase();
    format!("temp_fu_{}_{}", base, random_id.to_lowercase())
}

/// Declared type of a staging column.
pub(crate) fn staging_type(spec: &ColumnSpec) -> Result<String, EncodeError> {
    spec.cast_for(Dialect::Postgres).map(Cow::into_owned).ok_or_else(|| {
        EncodeError::UnsupportedType {
            column: spec.name.clone(),
            logical_type: spec.logical_type.to_string(),
            dialect: Dialect::Postgres,
            target: Target::Binary,
        }
    })
}

pub(crate) fn create_staging_sql(
    staging: &str,
    pk_spec: &ColumnSpec,
    columns: &[ColumnSpec],
) -> Result<String, EncodeError> {
    let mut definitions = Vec::with_capacity(columns.len() + 2);
    definitions.push(format!("{} {}", quote(&pk_spec.name), staging_type(pk_spec)?));
    for column in columns {
        definitions.push(format!("{} {}", quote(&column.name), staging_type(column)?));
    }
    definitions.push(format!("{} bigint", quote(SEQUENCE_COLUMN)));

    Ok(format!(
        "CREATE TEMPORARY TABLE {} ({}) ON COMMIT DROP",
        quote(staging),
        definitions.join(", ")
    ))
}

fn copy_sql(staging: &str, pk_spec: &ColumnSpec, columns: &[ColumnSpec]) -> String {
    let mut names = Vec::with_capacity(columns.len() + 2);
    names.push(quote(&pk_spec.name));
    names.extend(columns.iter().map(|column| quote(&column.name)));
    names.push(quote(SEQUENCE_COLUMN));

    format!("COPY {} ({}) FROM STDIN WITH (FORMAT binary)", quote(staging), names.join(", "))
}

/// Maps every staged record to the key its row has in a table linked
/// through `link_column` of the root table.
pub(crate) fn create_link_sql(
    links: &str,
    staging: &str,
    staging_key: &str,
    root_table: &str,
    root_key: &str,
    link_column: &str,
) -> String {
    format!(
        "CREATE TEMPORARY TABLE {links} ON COMMIT DROP AS SELECT s.{seq}, r.{link_column} AS {link} FROM {staging} AS s JOIN {root} AS r ON r.{root_key} = s.{staging_key}",
        links = quote(links),
        seq = quote(SEQUENCE_COLUMN),
        link_column = quote(link_column),
        link = quote(LINK_COLUMN),
        staging = quote(staging),
        root = Dialect::Postgres.quote_table(root_table),
        root_key = quote(root_key),
        staging_key = quote(staging_key),
    )
}

fn binary_field(token: Token, spec: &ColumnSpec) -> Result<Parameter, EncodeError> {
    match token {
        Token::Binary(bytes) => Ok(Parameter::Binary(bytes)),
        _ => Err(EncodeError::UnsupportedType {
            column: spec.name.clone(),
            logical_type: spec.logical_type.to_string(),
            dialect: Dialect::Postgres,
            target: Target::Binary,
        }),
    }
}

fn copy_type(spec: &ColumnSpec) -> PgType {
    // only used for the writer's type check, which encoded parameters always pass
    spec.logical_type.pg_type().unwrap_or(PgType::TEXT)
}

/// Encodes the staging rows: key, changed columns, then the sequence number.
pub(crate) fn encode_staging_rows(
    changes: &ValidatedChangeSet,
    encoders: &EncoderRegistry,
) -> Result<Vec<Vec<Parameter>>, EncodeError> {
    let pk_spec = changes.pk_spec();
    let mut payload = Vec::with_capacity(changes.len());

    for (sequence_no, row) in changes.rows().iter().enumerate() {
        let mut fields = Vec::with_capacity(row.values.len() + 2);
        let key = encoders.encode_pk(&row.primary_key, pk_spec, Dialect::Postgres, Target::Binary)?;
        fields.push(binary_field(key, pk_spec)?);

        for (value, spec) in row.values.iter().zip(changes.columns()) {
            let token = encoders.encode(value, spec, Dialect::Postgres, Target::Binary)?;
            fields.push(binary_field(token, spec)?);
        }

        let sequence_no = sequence_no as i64;
        fields.push(Parameter::Binary(Some(Bytes::copy_from_slice(&sequence_no.to_be_bytes()))));
        payload.push(fields);
    }

    Ok(payload)
}

/// Staging rows received by `COPY` must match the payload one to one.
fn check_loaded(staging: &str, loaded: u64, expected: u64) -> Result<(), BulkLoadError> {
    if loaded != expected {
        error!("Staging table {} received {} rows, expected {}", staging, loaded, expected);
        return Err(BulkLoadError::IncompleteCopy { staging: staging.to_string(), loaded, expected });
    }
    Ok(())
}

/// The SQL of one staged update, in execution order: create and fill the
/// staging table, build link tables, run one update per physical table,
/// drop every staging relation.
#[derive(Debug, Clone)]
pub(crate) struct StagedPlan {
    pub staging: String,
    pub create: String,
    pub copy: String,
    pub column_types: Vec<PgType>,
    pub analyze: Option<String>,
    pub links: Vec<String>,
    pub updates: BatchPlan,
    pub drop: String,
}

impl StagedPlan {
    pub fn new(
        layout: &TargetLayout,
        changes: &ValidatedChangeSet,
        random_id: &str,
        analyze_threshold: usize,
    ) -> Result<Self, BulkLoadError> {
        let root = layout.root();
        if let KeySource::Via { column } = &root.key_source {
            return Err(BulkLoadError::UnsupportedLayout {
                table: root.name.clone(),
                reason: format!("the root table can not be keyed through \"{}\"", column),
            });
        }

        let pk_spec = changes.pk_spec();
        let staging = staging_table_name(&root.name, random_id);
        let create = create_staging_sql(&staging, pk_spec, changes.columns())?;
        let copy = copy_sql(&staging, pk_spec, changes.columns());

        let mut column_types = Vec::with_capacity(changes.columns().len() + 2);
        column_types.push(copy_type(pk_spec));
        column_types.extend(changes.columns().iter().map(copy_type));
        column_types.push(PgType::INT8);

        let analyze = (changes.len() > analyze_threshold)
            .then(|| format!("ANALYZE {} ({})", quote(&staging), quote(&pk_spec.name)));

        let mut staged_tables = vec![staging.clone()];
        let mut links = Vec::new();
        let mut statements = Vec::new();

        for part in layout.split(changes) {
            let columns: Vec<&str> = part
                .column_indexes
                .iter()
                .map(|i| changes.columns()[*i].name.as_str())
                .collect();

            let text = match &part.table.key_source {
                KeySource::Shared => build_staging_update(
                    &part.table.name,
                    &part.table.key_column,
                    &staging,
                    &pk_spec.name,
                    &columns,
                    None,
                ),
                KeySource::Via { column } => {
                    let link_table = format!("{}_link_{}", staging, staged_tables.len());
                    links.push(create_link_sql(
                        &link_table,
                        &staging,
                        &pk_spec.name,
                        &root.name,
                        &root.key_column,
                        column,
                    ));
                    let text = build_staging_update(
                        &part.table.name,
                        &part.table.key_column,
                        &staging,
                        LINK_COLUMN,
                        &columns,
                        Some((&link_table, SEQUENCE_COLUMN)),
                    );
                    staged_tables.push(link_table);
                    text
                }
            };

            statements.push(CompiledStatement {
                table: part.table.name.clone(),
                text,
                parameters: Vec::new(),
                expected_rows: changes.len() as u64,
            });
        }

        let drop = format!(
            "DROP TABLE IF EXISTS {}",
            staged_tables.iter().map(|name| quote(name)).collect::<Vec<_>>().join(", ")
        );

        Ok(StagedPlan {
            staging,
            create,
            copy,
            column_types,
            analyze,
            links,
            updates: BatchPlan::new(statements, changes.len()),
            drop,
        })
    }

    fn staging_failed(&self, source: PgError) -> BulkLoadError {
        error!("Error loading staging table {}: {}", self.staging, source);
        BulkLoadError::Staging { staging: self.staging.clone(), source }
    }

    /// Creates and fills the staging table and builds the link tables.
    async fn load(
        &self,
        transaction: &Transaction<'_>,
        payload: &[Vec<Parameter>],
    ) -> Result<(), BulkLoadError> {
        debug!("Creating staging table: {}", self.create);
        transaction.batch_execute(&self.create).await.map_err(|e| self.staging_failed(e))?;

        let sink = transaction.copy_in(self.copy.as_str()).await.map_err(|e| self.staging_failed(e))?;
        let writer = BinaryCopyInWriter::new(sink, &self.column_types);
        pin_mut!(writer);

        for fields in payload {
            let row: Vec<&(dyn ToSql + Sync)> =
                fields.iter().map(|field| field as &(dyn ToSql + Sync)).collect();
            writer.as_mut().write(&row).await.map_err(|e| self.staging_failed(e))?;
        }

        let loaded = writer.finish().await.map_err(|e| self.staging_failed(e))?;
        check_loaded(&self.staging, loaded, payload.len() as u64)?;

        if let Some(analyze) = &self.analyze {
            transaction.batch_execute(analyze).await.map_err(|e| self.staging_failed(e))?;
        }

        // keys are linked before any table is updated
        for link in &self.links {
            debug!("Creating link table: {}", link);
            transaction.batch_execute(link).await.map_err(|e| self.staging_failed(e))?;
        }

        Ok(())
    }
}

impl PostgresClient {
    /// Updates through a staging table loaded with binary `COPY`.
    ///
    /// Everything runs in one transaction; the staging tables are dropped
    /// before commit and on rollback they never existed.
    pub async fn copy_update(
        &self,
        layout: &TargetLayout,
        changes: &ValidatedChangeSet,
        encoders: &EncoderRegistry,
        options: &CopyOptions,
    ) -> Result<UpdateReport, CopyUpdateError> {
        if changes.is_empty() {
            return Ok(UpdateReport::default());
        }

        let plan = StagedPlan::new(layout, changes, &generate_random_id(8), options.analyze_threshold)?;
        let payload = encode_staging_rows(changes, encoders).map_err(BulkLoadError::Encode)?;

        let mut conn = self.pooled().await.map_err(BulkLoadError::Connection)?;
        // dropped without commit means rolled back, temporary tables included
        let transaction = conn.transaction().await.map_err(|e| plan.staging_failed(e))?;

        plan.load(&transaction, &payload).await?;
        let affected =
            execute_statements(&transaction, &plan.updates.statements, options.row_count_policy)
                .await?;

        transaction.batch_execute(&plan.drop).await.map_err(|e| plan.staging_failed(e))?;
        transaction
            .commit()
            .await
            .map_err(|e| ExecutionError::from(PostgresError::Query(e)))?;

        let report = plan.updates.report(&affected);
        info!(
            "Staged update of {} records across {} tables affected {} rows",
            changes.len(),
            report.statements,
            report.rows_affected
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use tokio_postgres::types::FromSql;

    use super::*;
    use crate::database::{
        changeset::{validate, ChangeSet, Record},
        column_spec::LogicalType,
        layout::PhysicalTable,
        postgres::client::tests::{rank_table, ranks, test_client},
        sql_type_wrapper::SqlValue,
    };

    fn employee_changes(records: Vec<Record>) -> ValidatedChangeSet {
        ChangeSet::new(
            ColumnSpec::new("id", LogicalType::BigInt),
            vec![
                ColumnSpec::new("rank", LogicalType::Integer),
                ColumnSpec::new("city", LogicalType::Text),
            ],
            records,
        )
        .validate()
        .unwrap()
    }

    fn employee_layout(employee: &str, address: &str) -> TargetLayout {
        TargetLayout::single(employee, "id")
            .with_parent(PhysicalTable::via(address, "id", "address_id", ["city"]))
    }

    #[test]
    fn test_staged_plan_links_before_updating() {
        let changes = employee_changes(vec![
            Record::new(1i64).set("rank", 3).set("city", "Oslo"),
            Record::new(2i64).set("rank", 4).set("city", "Lima"),
        ]);
        let plan = StagedPlan::new(&employee_layout("employee", "address"), &changes, "X1", 1).unwrap();

        assert_eq!(plan.staging, "temp_fu_employee_x1");
        assert_eq!(
            plan.copy,
            "COPY \"temp_fu_employee_x1\" (\"id\", \"rank\", \"city\", \"__sequence_no\") FROM STDIN WITH (FORMAT binary)"
        );
        assert_eq!(plan.column_types, vec![PgType::INT8, PgType::INT4, PgType::TEXT, PgType::INT8]);
        assert_eq!(
            plan.analyze.as_deref(),
            Some("ANALYZE \"temp_fu_employee_x1\" (\"id\")")
        );

        assert_eq!(plan.links.len(), 1);
        assert!(plan.links[0].starts_with("CREATE TEMPORARY TABLE \"temp_fu_employee_x1_link_1\""));

        let statements = &plan.updates.statements;
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].table, "employee");
        assert!(statements[0].text.starts_with("UPDATE \"employee\"\nSET \"rank\" = \"d\".\"rank\""));
        assert_eq!(statements[1].table, "address");
        assert!(statements[1].text.contains("JOIN \"temp_fu_employee_x1_link_1\" AS \"l\""));
        assert!(statements.iter().all(|statement| statement.expected_rows == 2));

        assert_eq!(
            plan.drop,
            "DROP TABLE IF EXISTS \"temp_fu_employee_x1\", \"temp_fu_employee_x1_link_1\""
        );
    }

    #[test]
    fn test_staged_plan_reports_the_largest_table() {
        let changes = employee_changes(vec![
            Record::new(1i64).set("rank", 3).set("city", "Oslo"),
            Record::new(2i64).set("rank", 4).set("city", "Lima"),
        ]);
        let plan =
            StagedPlan::new(&employee_layout("employee", "address"), &changes, "x", 100).unwrap();
        assert_eq!(plan.analyze, None);

        // one employee has no address row
        let report = plan.updates.report(&[2, 1]);
        assert_eq!(report.rows_affected, 2);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].table, "address");
    }

    #[test]
    fn test_root_keyed_through_a_link_is_rejected() {
        let layout = TargetLayout::new(PhysicalTable::via("employee", "id", "person_id", Vec::<String>::new()));
        let changes = employee_changes(vec![Record::new(1i64).set("rank", 3).set("city", "Oslo")]);
        assert!(matches!(
            StagedPlan::new(&layout, &changes, "x", 100),
            Err(BulkLoadError::UnsupportedLayout { .. })
        ));
    }

    #[test]
    fn test_short_copy_is_an_error() {
        assert!(check_loaded("temp_fu_t_x", 3, 3).is_ok());
        assert!(matches!(
            check_loaded("temp_fu_t_x", 2, 3),
            Err(BulkLoadError::IncompleteCopy { loaded: 2, expected: 3, .. })
        ));
    }

    async fn staging_tables_left(client: &PostgresClient, root: &str) -> i64 {
        let conn = client.pooled().await.unwrap();
        conn.query_one(
            "SELECT count(*) FROM pg_class WHERE relname LIKE $1",
            &[&format!("temp_fu_{}%", root)],
        )
        .await
        .unwrap()
        .get(0)
    }

    fn rank_changes(records: Vec<Record>) -> ValidatedChangeSet {
        ChangeSet::new(
            ColumnSpec::new("id", LogicalType::BigInt),
            vec![ColumnSpec::new("rank", LogicalType::Integer)],
            records,
        )
        .validate()
        .unwrap()
    }

    #[tokio::test]
    async fn test_copy_update_row_count_policies() {
        let Some(client) = test_client().await else { return };
        let table = rank_table(&client, "fu_copy").await;
        let layout = TargetLayout::single(table.as_str(), "id");
        let changes =
            rank_changes(vec![Record::new(1i64).set("rank", 7), Record::new(9i64).set("rank", 7)]);

        let report = client
            .copy_update(&layout, &changes, &EncoderRegistry::new(), &CopyOptions::default())
            .await
            .unwrap();
        assert_eq!(report.rows_affected, 1);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(ranks(&client, &table).await, vec![(1, Some(7)), (2, Some(0))]);

        let strict = CopyOptions { row_count_policy: RowCountPolicy::Fail, ..Default::default() };
        let changes =
            rank_changes(vec![Record::new(2i64).set("rank", 8), Record::new(9i64).set("rank", 8)]);
        let result = client.copy_update(&layout, &changes, &EncoderRegistry::new(), &strict).await;
        assert!(matches!(
            result,
            Err(CopyUpdateError::Execute(ExecutionError::RowCountMismatch { expected: 2, affected: 1, .. }))
        ));
        assert_eq!(ranks(&client, &table).await, vec![(1, Some(7)), (2, Some(0))]);
        assert_eq!(staging_tables_left(&client, &table).await, 0);

        client.batch_execute(&format!("DROP TABLE {}", table)).await.unwrap();
    }

    #[tokio::test]
    async fn test_copy_update_follows_links_and_rolls_back() {
        let Some(client) = test_client().await else { return };
        let suffix = generate_random_id(8).to_lowercase();
        let employee = format!("fu_employee_{}", suffix);
        let address = format!("fu_address_{}", suffix);
        client
            .batch_execute(&format!(
                "CREATE TABLE {address} (id bigint PRIMARY KEY, city text CHECK (city <> 'Nowhere'));
                 CREATE TABLE {employee} (id bigint PRIMARY KEY, rank integer, address_id bigint);
                 INSERT INTO {address} VALUES (10, 'a'), (20, 'b');
                 INSERT INTO {employee} VALUES (1, 0, 20), (2, 0, 10);"
            ))
            .await
            .unwrap();
        let layout = employee_layout(&employee, &address);

        let changes = employee_changes(vec![
            Record::new(1i64).set("rank", 3).set("city", "Oslo"),
            Record::new(2i64).set("rank", 4).set("city", "Lima"),
        ]);
        let report = client
            .copy_update(&layout, &changes, &EncoderRegistry::new(), &CopyOptions::default())
            .await
            .unwrap();
        assert_eq!(report.rows_affected, 2);
        assert!(report.mismatches.is_empty());

        let conn = client.pooled().await.unwrap();
        let cities: Vec<(i64, String)> = conn
            .query(format!("SELECT id, city FROM {} ORDER BY id", address).as_str(), &[])
            .await
            .unwrap()
            .iter()
            .map(|row| (row.get(0), row.get(1)))
            .collect();
        assert_eq!(cities, vec![(10, "Lima".to_string()), (20, "Oslo".to_string())]);
        drop(conn);

        // the address update fails after the employee update ran
        let changes = employee_changes(vec![Record::new(1i64).set("rank", 9).set("city", "Nowhere")]);
        let result = client
            .copy_update(&layout, &changes, &EncoderRegistry::new(), &CopyOptions::default())
            .await;
        assert!(matches!(result, Err(CopyUpdateError::Execute(ExecutionError::Postgres(_)))));
        assert_eq!(staging_tables_left(&client, &employee).await, 0);

        let conn = client.pooled().await.unwrap();
        let rank: Option<i32> = conn
            .query_one(format!("SELECT rank FROM {} WHERE id = 1", employee).as_str(), &[])
            .await
            .unwrap()
            .get(0);
        assert_eq!(rank, Some(3));
        drop(conn);

        client.batch_execute(&format!("DROP TABLE {}, {}", employee, address)).await.unwrap();
    }

    #[test]
    fn test_staging_table_name_is_a_safe_identifier() {
        assert_eq!(staging_table_name("public.Orders", "AbC123"), "temp_fu_publicorders_abc123");
    }

    #[test]
    fn test_create_staging_sql_normalises_serials() {
        let sql = create_staging_sql(
            "temp_fu_t_x",
            &ColumnSpec::new("id", LogicalType::Integer).with_cast("serial"),
            &[
                ColumnSpec::new("tags", LogicalType::array_of(LogicalType::Text)).with_null(true),
                ColumnSpec::new("price", LogicalType::Numeric { precision: Some(10), scale: Some(2) }),
            ],
        )
        .unwrap();

        assert_eq!(
            sql,
            "CREATE TEMPORARY TABLE \"temp_fu_t_x\" (\"id\" integer, \"tags\" text[], \"price\" numeric(10,2), \"__sequence_no\" bigint) ON COMMIT DROP"
        );
    }

    #[test]
    fn test_link_sql_correlates_by_sequence() {
        let sql = create_link_sql("s_link_1", "s", "id", "employee", "id", "address_id");
        assert_eq!(
            sql,
            "CREATE TEMPORARY TABLE \"s_link_1\" ON COMMIT DROP AS SELECT s.\"__sequence_no\", r.\"address_id\" AS \"__link\" FROM \"s\" AS s JOIN \"employee\" AS r ON r.\"id\" = s.\"id\""
        );

        let update = build_staging_update(
            "address",
            "id",
            "s",
            LINK_COLUMN,
            &["street"],
            Some(("s_link_1", SEQUENCE_COLUMN)),
        );
        assert!(update.contains("JOIN \"s_link_1\" AS \"l\" ON \"l\".\"__sequence_no\" = \"d\".\"__sequence_no\""));
        assert!(update.ends_with("WHERE \"address\".\"id\" = \"l\".\"__link\""));
    }

    #[test]
    fn test_staging_rows_carry_sequence_and_true_nulls() {
        let changes = validate(
            ColumnSpec::new("id", LogicalType::BigInt),
            vec![ColumnSpec::new("tags", LogicalType::array_of(LogicalType::Text)).with_null(true)],
            vec![
                Record::new(7i64).set("tags", SqlValue::Null),
                Record::new(8i64).set("tags", SqlValue::array([Some("a"), None])),
            ],
        )
        .unwrap();

        let payload = encode_staging_rows(&changes, &EncoderRegistry::new()).unwrap();
        assert_eq!(payload.len(), 2);
        assert_eq!(payload[0][1], Parameter::Binary(None));

        let Parameter::Binary(Some(sequence)) = &payload[1][2] else {
            panic!("sequence number must be binary");
        };
        assert_eq!(i64::from_sql(&PgType::INT8, sequence).unwrap(), 1);

        let Parameter::Binary(Some(tags)) = &payload[1][1] else {
            panic!("array must be binary");
        };
        let decoded = Vec::<Option<String>>::from_sql(&PgType::TEXT_ARRAY, tags).unwrap();
        assert_eq!(decoded, vec![Some("a".to_string()), None]);
    }
}
