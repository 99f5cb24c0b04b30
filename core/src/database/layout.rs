use crate::database::changeset::ValidatedChangeSet;

/// How a physical table finds its row for a logical record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// The table's key column holds the logical primary key value.
    Shared,
    /// The table's key is stored in `column` of the root table.
    Via { column: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalTable {
    pub name: String,
    pub key_column: String,
    pub key_source: KeySource,
    /// Columns stored in this table. Empty on the root table, which owns every
    /// column no other table claims.
    pub columns: Vec<String>,
}

impl PhysicalTable {
    pub fn shared(
        name: impl Into<String>,
        key_column: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        PhysicalTable {
            name: name.into(),
            key_column: key_column.into(),
            key_source: KeySource::Shared,
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn via(
        name: impl Into<String>,
        key_column: impl Into<String>,
        link_column: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        PhysicalTable {
            name: name.into(),
            key_column: key_column.into(),
            key_source: KeySource::Via { column: link_column.into() },
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// The physical tables one logical update target is stored in.
///
/// Single-table targets are the common case; inheritance-style targets add
/// parent tables that own some of the columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLayout {
    root: PhysicalTable,
    parents: Vec<PhysicalTable>,
}

/// The columns of a change set that land in one physical table.
#[derive(Debug, Clone)]
pub struct TablePart<'a> {
    pub table: &'a PhysicalTable,
    pub column_indexes: Vec<usize>,
}

impl TargetLayout {
    pub fn new(root: PhysicalTable) -> Self {
        TargetLayout { root, parents: Vec::new() }
    }

    pub fn single(table: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self::new(PhysicalTable::shared(table, key_column, Vec::<String>::new()))
    }

    pub fn with_parent(mut self, parent: PhysicalTable) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn root(&self) -> &PhysicalTable {
        &self.root
    }

    pub fn parents(&self) -> &[PhysicalTable] {
        &self.parents
    }

    pub fn is_multi_table(&self) -> bool {
        !self.parents.is_empty()
    }

    /// Assigns every change set column to exactly one table, root first.
    /// Tables without any changed column are left out.
    pub fn split(&self, changes: &ValidatedChangeSet) -> Vec<TablePart<'_>> {
        let mut claimed = vec![false; changes.columns().len()];
        let mut parent_parts = Vec::with_capacity(self.parents.len());

        for parent in &self.parents {
            let mut column_indexes = Vec::new();
            for (index, column) in changes.columns().iter().enumerate() {
                if !claimed[index] && parent.columns.iter().any(|name| *name == column.name) {
                    claimed[index] = true;
                    column_indexes.push(index);
                }
            }
            if !column_indexes.is_empty() {
                parent_parts.push(TablePart { table: parent, column_indexes });
            }
        }

        let root_indexes: Vec<usize> = (0..claimed.len()).filter(|i| !claimed[*i]).collect();

        let mut parts = Vec::with_capacity(parent_parts.len() + 1);
        if !root_indexes.is_empty() {
            parts.push(TablePart { table: &self.root, column_indexes: root_indexes });
        }
        parts.extend(parent_parts);
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{
        changeset::{validate, Record},
        column_spec::{ColumnSpec, LogicalType},
    };

    fn changes() -> ValidatedChangeSet {
        validate(
            ColumnSpec::new("id", LogicalType::Integer),
            vec![
                ColumnSpec::new("name", LogicalType::Text),
                ColumnSpec::new("rank", LogicalType::Integer),
                ColumnSpec::new("city", LogicalType::Text),
            ],
            vec![Record::new(1).set("name", "n").set("rank", 1).set("city", "c")],
        )
        .unwrap()
    }

    #[test]
    fn test_single_table_owns_everything() {
        let layout = TargetLayout::single("person", "id");
        let changes = changes();
        let parts = layout.split(&changes);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].column_indexes, vec![0, 1, 2]);
    }

    #[test]
    fn test_parent_claims_its_columns() {
        let layout = TargetLayout::single("employee", "person_ptr_id")
            .with_parent(PhysicalTable::shared("person", "id", ["name", "city"]));
        let changes = changes();
        let parts = layout.split(&changes);

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].table.name, "employee");
        assert_eq!(parts[0].column_indexes, vec![1]);
        assert_eq!(parts[1].table.name, "person");
        assert_eq!(parts[1].column_indexes, vec![0, 2]);
    }

    #[test]
    fn test_tables_without_changes_are_skipped() {
        let layout = TargetLayout::single("employee", "id")
            .with_parent(PhysicalTable::via("address", "id", "address_id", ["street"]));
        let changes = changes();
        let parts = layout.split(&changes);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].table.name, "employee");
    }
}
