//! SQL text builders for the update shapes.
//!
//! Builders only assemble text. Every value cell arrives already rendered
//! (literal, placeholder, cast), and placeholders are numbered in the order
//! the builder emits them, so callers render cells in that same order.

use crate::database::dialect::Dialect;

/// Alias of the derived source table, `c` when the target itself is called `d`.
#[inline]
pub fn source_alias(table_name: &str) -> &'static str {
    if unqualified(table_name) == "d" {
        "c"
    } else {
        "d"
    }
}

/// Alias of the correlation table joined in staged updates.
pub fn link_alias(table_name: &str) -> &'static str {
    if unqualified(table_name) == "l" {
        "m"
    } else {
        "l"
    }
}

/// `schema.table` -> `table`, without identifier quotes.
fn unqualified(table_name: &str) -> &str {
    let name = match table_name.rsplit_once('.') {
        Some((_, table)) if !table.is_empty() => table,
        _ => table_name,
    };
    name.trim_matches('"')
}

/// Wraps a rendered cell in `CAST(cell AS sql_type)`.
pub fn build_cast(cell: &str, sql_type: &str) -> String {
    format!("CAST({} AS {})", cell, sql_type)
}

fn join_quoted(dialect: Dialect, names: &[&str]) -> String {
    names.iter().map(|name| dialect.quote_identifier(name)).collect::<Vec<_>>().join(", ")
}

fn build_values_rows(rows: &[Vec<String>]) -> String {
    rows.iter().map(|row| format!("({})", row.join(", "))).collect::<Vec<_>>().join(",\n    ")
}

/// Builds a values-join update for `dialect`.
///
/// # Arguments
/// * `table_name` - Target table, possibly `schema.table`
/// * `key_column` - Key column of the target table
/// * `columns` - Updated columns, in the order of the row cells after the key
/// * `rows` - Rendered rows, key cell first
/// * `in_list` - Rendered key cells for the trailing `IN` filter (SQLite legacy only)
pub fn build_values_join_update(
    dialect: Dialect,
    table_name: &str,
    key_column: &str,
    columns: &[&str],
    rows: &[Vec<String>],
    in_list: &[String],
) -> String {
    match dialect {
        Dialect::Sqlite => build_sqlite_values_update(table_name, key_column, columns, rows),
        Dialect::SqliteLegacy => {
            build_sqlite_legacy_update(table_name, key_column, columns, rows, in_list)
        }
        Dialect::MySql => build_mysql_union_update(table_name, key_column, columns, rows),
        Dialect::Postgres | Dialect::Ansi => {
            build_postgres_values_update(dialect, table_name, key_column, columns, rows)
        }
    }
}

/// `UPDATE t SET c = d.c FROM (VALUES ...) AS d (pk, c) WHERE t.pk = d.pk`
fn build_postgres_values_update(
    dialect: Dialect,
    table_name: &str,
    key_column: &str,
    columns: &[&str],
    rows: &[Vec<String>],
) -> String {
    let table = dialect.quote_table(table_name);
    let alias = dialect.quote_identifier(source_alias(table_name));
    let key = dialect.quote_identifier(key_column);

    let set_clauses = columns
        .iter()
        .map(|col| {
            let col = dialect.quote_identifier(col);
            format!("{} = {}.{}", col, alias, col)
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut alias_columns = Vec::with_capacity(columns.len() + 1);
    alias_columns.push(key_column);
    alias_columns.extend_from_slice(columns);

    format!(
        "UPDATE {table}\nSET {set_clauses}\nFROM (VALUES\n    {values}\n) AS {alias} ({alias_columns})\nWHERE {table}.{key} = {alias}.{key}",
        values = build_values_rows(rows),
        alias_columns = join_quoted(dialect, &alias_columns),
    )
}

/// SQLite names the columns of a bare VALUES table `column1`, `column2`, ...
fn build_sqlite_values_update(
    table_name: &str,
    key_column: &str,
    columns: &[&str],
    rows: &[Vec<String>],
) -> String {
    let dialect = Dialect::Sqlite;
    let table = dialect.quote_table(table_name);
    let alias = dialect.quote_identifier(source_alias(table_name));

    let set_clauses = columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{} = {}.column{}", dialect.quote_identifier(col), alias, i + 2))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "UPDATE {table}\nSET {set_clauses}\nFROM (VALUES\n    {values}\n) AS {alias}\nWHERE {table}.{key} = {alias}.column1",
        values = build_values_rows(rows),
        key = dialect.quote_identifier(key_column),
    )
}

/// SQLite without `UPDATE ... FROM`: a CTE plus a row-value assignment.
fn build_sqlite_legacy_update(
    table_name: &str,
    key_column: &str,
    columns: &[&str],
    rows: &[Vec<String>],
    in_list: &[String],
) -> String {
    let dialect = Dialect::SqliteLegacy;
    let table = dialect.quote_table(table_name);
    let alias = dialect.quote_identifier(source_alias(table_name));
    let key = dialect.quote_identifier(key_column);

    let mut cte_columns = Vec::with_capacity(columns.len() + 1);
    cte_columns.push(key_column);
    cte_columns.extend_from_slice(columns);

    let quoted_columns = join_quoted(dialect, columns);

    format!(
        "WITH {alias} ({cte_columns}) AS (VALUES\n    {values}\n)\nUPDATE {table}\nSET ({quoted_columns}) = (SELECT {quoted_columns} FROM {alias} WHERE {alias}.{key} = {table}.{key})\nWHERE {table}.{key} IN ({in_list})",
        cte_columns = join_quoted(dialect, &cte_columns),
        values = build_values_rows(rows),
        in_list = in_list.join(", "),
    )
}

/// MySQL multi-table update against a `UNION ALL` derived table. Only the
/// first SELECT names its columns.
fn build_mysql_union_update(
    table_name: &str,
    key_column: &str,
    columns: &[&str],
    rows: &[Vec<String>],
) -> String {
    let dialect = Dialect::MySql;
    let table = dialect.quote_table(table_name);
    let alias = dialect.quote_identifier(source_alias(table_name));
    let key = dialect.quote_identifier(key_column);

    let mut names = Vec::with_capacity(columns.len() + 1);
    names.push(key_column);
    names.extend_from_slice(columns);

    let selects = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let cells = if i == 0 {
                row.iter()
                    .zip(&names)
                    .map(|(cell, name)| format!("{} AS {}", cell, dialect.quote_identifier(name)))
                    .collect::<Vec<_>>()
                    .join(", ")
            } else {
                row.join(", ")
            };
            format!("SELECT {}", cells)
        })
        .collect::<Vec<_>>()
        .join("\n    UNION ALL ");

    let set_clauses = columns
        .iter()
        .map(|col| {
            let col = dialect.quote_identifier(col);
            format!("{}.{} = {}.{}", table, col, alias, col)
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "UPDATE {table}, (\n    {selects}\n) AS {alias}\nSET {set_clauses}\nWHERE {table}.{key} = {alias}.{key}"
    )
}

/// One column's `CASE` arms: `(key cell, value cell)` per record.
pub struct CaseColumn<'a> {
    pub name: &'a str,
    pub arms: Vec<(String, String)>,
}

/// Builds `UPDATE t SET c = CASE pk WHEN k THEN v ... ELSE c END WHERE pk IN (...)`.
pub fn build_case_update(
    dialect: Dialect,
    table_name: &str,
    key_column: &str,
    case_columns: &[CaseColumn],
    in_list: &[String],
) -> String {
    let table = dialect.quote_table(table_name);
    let key = dialect.quote_identifier(key_column);

    let set_clauses = case_columns
        .iter()
        .map(|column| {
            let col = dialect.quote_identifier(column.name);
            let arms = column
                .arms
                .iter()
                .map(|(key_cell, value_cell)| format!("WHEN {} THEN {}", key_cell, value_cell))
                .collect::<Vec<_>>()
                .join(" ");
            format!("{col} = CASE {key} {arms} ELSE {col} END")
        })
        .collect::<Vec<_>>()
        .join(",\n    ");

    format!(
        "UPDATE {table}\nSET {set_clauses}\nWHERE {key} IN ({in_list})",
        in_list = in_list.join(", ")
    )
}

/// Builds `UPDATE t SET a = v, ... WHERE pk IN (...)` for records sharing values.
pub fn build_in_list_update(
    dialect: Dialect,
    table_name: &str,
    key_column: &str,
    assignments: &[(&str, String)],
    in_list: &[String],
) -> String {
    let table = dialect.quote_table(table_name);

    let set_clauses = assignments
        .iter()
        .map(|(col, cell)| format!("{} = {}", dialect.quote_identifier(col), cell))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "UPDATE {table}\nSET {set_clauses}\nWHERE {key} IN ({in_list})",
        key = dialect.quote_identifier(key_column),
        in_list = in_list.join(", ")
    )
}

/// Builds the final statement of a staged update.
///
/// # Arguments
/// * `table_name` - Target table
/// * `key_column` - Key column of the target table
/// * `staging` - Staging table name
/// * `staging_key` - Staging column matched against `key_column`
/// * `columns` - Columns copied from the staging table
/// * `link_table` - Correlation table carrying propagated keys, joined on `sequence_column`
pub fn build_staging_update(
    table_name: &str,
    key_column: &str,
    staging: &str,
    staging_key: &str,
    columns: &[&str],
    link_table: Option<(&str, &str)>,
) -> String {
    let dialect = Dialect::Postgres;
    let table = dialect.quote_table(table_name);
    let key = dialect.quote_identifier(key_column);
    let alias = dialect.quote_identifier(source_alias(table_name));

    let set_clauses = columns
        .iter()
        .map(|col| {
            let col = dialect.quote_identifier(col);
            format!("{} = {}.{}", col, alias, col)
        })
        .collect::<Vec<_>>()
        .join(", ");

    let (from, condition) = match link_table {
        None => (
            format!("{} AS {}", dialect.quote_identifier(staging), alias),
            format!("{}.{} = {}.{}", table, key, alias, dialect.quote_identifier(staging_key)),
        ),
        Some((links, sequence_column)) => {
            let seq = dialect.quote_identifier(sequence_column);
            let link = dialect.quote_identifier(link_alias(table_name));
            (
                format!(
                    "{} AS {} JOIN {} AS {} ON {}.{} = {}.{}",
                    dialect.quote_identifier(staging),
                    alias,
                    dialect.quote_identifier(links),
                    link,
                    link,
                    seq,
                    alias,
                    seq
                ),
                format!("{}.{} = {}.{}", table, key, link, dialect.quote_identifier(staging_key)),
            )
        }
    };

    format!("UPDATE {table}\nSET {set_clauses}\nFROM {from}\nWHERE {condition}")
}
