use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::database::{
    changeset::{UnsupportedReason, ValidatedChangeSet, ValidationError},
    column_spec::ColumnSpec,
    sql_type_wrapper::{SqlValue, StorageKey},
};

/// Below this many records merging never pays off.
const MIN_MERGE_RECORDS: usize = 3;

/// Weighted plans are used when merged work is below this share of flat work.
const WEIGHTED_RATIO: f64 = 0.8;

/// Decides whether a partition is worth turning into merged statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostPolicy {
    /// Merge when there are fewer groups than records.
    #[default]
    GroupCount,
    /// Estimate statement work; an `UPDATE` touching `n` keys costs `10 + log2(n)`
    /// and every transferred value costs 1.
    Weighted,
}

/// Records sharing the same values on the merge columns.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeGroup {
    /// Merge columns with the value every member holds, in merge column order.
    pub shared_values: Vec<(ColumnSpec, SqlValue)>,
    pub member_pks: Vec<SqlValue>,
    rows: Vec<usize>,
}

impl MergeGroup {
    pub fn len(&self) -> usize {
        self.member_pks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_pks.is_empty()
    }

    /// Positions of the members in the change set the group was built from.
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }
}

/// Splits the records into groups keyed by their values on `merge_columns`.
///
/// Every record lands in exactly one group; groups come in order of their
/// first member. Values compare the way storage compares them, so `NULL`
/// groups with `NULL` here.
pub fn partition(changes: &ValidatedChangeSet, merge_columns: &[usize]) -> Vec<MergeGroup> {
    let mut index: HashMap<StorageKey, usize> = HashMap::new();
    let mut groups: Vec<MergeGroup> = Vec::new();

    for (position, row) in changes.rows().iter().enumerate() {
        let key = StorageKey(merge_columns.iter().map(|i| &row.values[*i]).collect());
        match index.get(&key) {
            Some(group) => {
                groups[*group].member_pks.push(row.primary_key.clone());
                groups[*group].rows.push(position);
            }
            None => {
                index.insert(key, groups.len());
                groups.push(MergeGroup {
                    shared_values: merge_columns
                        .iter()
                        .map(|i| (changes.columns()[*i].clone(), row.values[*i].clone()))
                        .collect(),
                    member_pks: vec![row.primary_key.clone()],
                    rows: vec![position],
                });
            }
        }
    }

    groups
}

/// A statement plan that writes merge columns once per group.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    /// Positions of the merge columns in the change set.
    pub merge_columns: Vec<usize>,
    /// Groups with more than one member.
    pub groups: Vec<MergeGroup>,
    /// Records of the multi-member groups, every column. Only their
    /// non-merge columns still need a values-join update.
    pub grouped: ValidatedChangeSet,
    /// Records that share nothing with another record, every column.
    pub residual: ValidatedChangeSet,
}

impl MergePlan {
    /// Columns of grouped records that the group statements do not write.
    pub fn remainder_columns(&self, column_count: usize) -> Vec<usize> {
        (0..column_count).filter(|i| !self.merge_columns.contains(i)).collect()
    }
}

fn merge_column_indexes(
    changes: &ValidatedChangeSet,
    merge_key: Option<&[String]>,
) -> Result<Vec<usize>, ValidationError> {
    let Some(names) = merge_key else {
        return Ok((0..changes.columns().len()).collect());
    };

    let mut indexes = Vec::with_capacity(names.len());
    for name in names {
        let index = changes.column_index(name).ok_or_else(|| {
            let reason = if *name == changes.pk_spec().name {
                UnsupportedReason::PrimaryKeyColumn
            } else {
                UnsupportedReason::UnknownColumn
            };
            ValidationError::UnsupportedValue { column: name.clone(), reason }
        })?;
        if indexes.contains(&index) {
            return Err(ValidationError::UnsupportedValue {
                column: name.clone(),
                reason: UnsupportedReason::DuplicateColumn,
            });
        }
        indexes.push(index);
    }
    Ok(indexes)
}

fn update_work(keys: usize) -> f64 {
    10.0 + (keys as f64).log2()
}

fn weighted_ratio(changes: &ValidatedChangeSet, groups: &[MergeGroup], merge_columns: usize) -> f64 {
    let columns = changes.columns().len();
    let flat = (columns as f64 + update_work(1)) * changes.len() as f64;

    let mut merged = 0.0;
    for group in groups {
        if group.len() > 1 {
            merged += update_work(group.len()) + merge_columns as f64;
            if columns > merge_columns {
                merged += (update_work(1) + (columns - merge_columns) as f64) * group.len() as f64;
            }
        } else {
            merged += update_work(1) + columns as f64;
        }
    }

    merged / flat
}

/// Builds a merge plan, or `None` when merging would not reduce the work.
///
/// `merge_key` names the columns compared across records; `None` compares
/// all of them. The plan never changes the final state of any record.
pub fn plan_merge(
    changes: &ValidatedChangeSet,
    merge_key: Option<&[String]>,
    policy: CostPolicy,
) -> Result<Option<MergePlan>, ValidationError> {
    let merge_columns = merge_column_indexes(changes, merge_key)?;

    if merge_columns.is_empty() || changes.len() < MIN_MERGE_RECORDS {
        return Ok(None);
    }

    let groups = partition(changes, &merge_columns);

    let apply = match policy {
        CostPolicy::GroupCount => groups.len() < changes.len(),
        CostPolicy::Weighted => {
            weighted_ratio(changes, &groups, merge_columns.len()) < WEIGHTED_RATIO
        }
    };

    debug!(
        "Merge partition: {} records, {} groups, policy {:?}, applied {}",
        changes.len(),
        groups.len(),
        policy,
        apply
    );

    if !apply {
        return Ok(None);
    }

    let (groups, singles): (Vec<_>, Vec<_>) = groups.into_iter().partition(|group| group.len() > 1);
    let grouped_rows: Vec<usize> = groups.iter().flat_map(|group| group.rows.iter().copied()).collect();
    let residual_rows: Vec<usize> = singles.iter().flat_map(|group| group.rows.iter().copied()).collect();

    Ok(Some(MergePlan {
        grouped: changes.select_rows(&grouped_rows),
        residual: changes.select_rows(&residual_rows),
        merge_columns,
        groups,
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::database::{
        changeset::{validate, Record},
        column_spec::LogicalType,
    };

    fn changes(records: Vec<Record>) -> ValidatedChangeSet {
        validate(
            ColumnSpec::new("id", LogicalType::Integer),
            vec![
                ColumnSpec::new("a", LogicalType::Integer).with_null(true),
                ColumnSpec::new("b", LogicalType::Text),
            ],
            records,
        )
        .unwrap()
    }

    fn three() -> ValidatedChangeSet {
        changes(vec![
            Record::new(1).set("a", 10).set("b", "x"),
            Record::new(2).set("a", 10).set("b", "x"),
            Record::new(3).set("a", 99).set("b", "y"),
        ])
    }

    #[test]
    fn test_two_groups_from_three_records() {
        let changes = three();
        let groups = partition(&changes, &[0, 1]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].member_pks, vec![SqlValue::I32(1), SqlValue::I32(2)]);
        assert_eq!(groups[0].shared_values[0].1, SqlValue::I32(10));
        assert_eq!(groups[0].shared_values[1].1, SqlValue::from("x"));
        assert_eq!(groups[1].member_pks, vec![SqlValue::I32(3)]);

        let plan = plan_merge(&changes, None, CostPolicy::GroupCount).unwrap().unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.residual.len(), 1);
        assert_eq!(plan.residual.rows()[0].primary_key, SqlValue::I32(3));
        assert!(plan.remainder_columns(2).is_empty());
    }

    #[test]
    fn test_groups_partition_records_exactly() {
        let records = (0..20)
            .map(|i| Record::new(i).set("a", if i % 3 == 0 { SqlValue::Null } else { SqlValue::I32(i % 4) }).set("b", "z"))
            .collect();
        let changes = changes(records);

        for merge_columns in [vec![0], vec![1], vec![0, 1]] {
            let groups = partition(&changes, &merge_columns);
            let members: Vec<_> = groups.iter().flat_map(|g| g.member_pks.iter()).collect();
            assert_eq!(members.len(), changes.len());
            let distinct: HashSet<_> = members.iter().map(|pk| pk.to_string()).collect();
            assert_eq!(distinct.len(), changes.len());
        }
    }

    #[test]
    fn test_nulls_group_together() {
        let changes = changes(vec![
            Record::new(1).set("a", SqlValue::Null).set("b", "x"),
            Record::new(2).set("a", SqlValue::Null).set("b", "y"),
            Record::new(3).set("a", 5).set("b", "x"),
        ]);
        let groups = partition(&changes, &[0]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn test_partial_merge_key_leaves_remainder() {
        let changes = three();
        let plan = plan_merge(&changes, Some(&["a".to_string()]), CostPolicy::GroupCount)
            .unwrap()
            .unwrap();
        assert_eq!(plan.merge_columns, vec![0]);
        assert_eq!(plan.grouped.len(), 2);
        assert_eq!(plan.remainder_columns(2), vec![1]);
    }

    #[test]
    fn test_no_duplicate_structure_skips_merge() {
        let changes = changes(vec![
            Record::new(1).set("a", 1).set("b", "x"),
            Record::new(2).set("a", 2).set("b", "x"),
            Record::new(3).set("a", 3).set("b", "x"),
        ]);
        assert_eq!(plan_merge(&changes, None, CostPolicy::GroupCount).unwrap(), None);
        assert_eq!(plan_merge(&changes, None, CostPolicy::Weighted).unwrap(), None);
    }

    #[test]
    fn test_small_batches_are_not_merged() {
        let changes = changes(vec![
            Record::new(1).set("a", 1).set("b", "x"),
            Record::new(2).set("a", 1).set("b", "x"),
        ]);
        assert_eq!(plan_merge(&changes, None, CostPolicy::GroupCount).unwrap(), None);
    }

    #[test]
    fn test_weighted_policy_needs_real_savings() {
        let records = (0..50).map(|i| Record::new(i).set("a", 7).set("b", "same")).collect();
        let changes = changes(records);
        let plan = plan_merge(&changes, None, CostPolicy::Weighted).unwrap().unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].len(), 50);

        // one shared pair is fewer groups, but not cheaper by the weighted estimate
        let mut records: Vec<_> = (0..10).map(|i| Record::new(i).set("a", i).set("b", "x")).collect();
        records.push(Record::new(100).set("a", 0).set("b", "x"));
        let changes = self::changes(records);
        assert!(plan_merge(&changes, None, CostPolicy::GroupCount).unwrap().is_some());
        assert_eq!(plan_merge(&changes, None, CostPolicy::Weighted).unwrap(), None);
    }

    #[test]
    fn test_unknown_merge_column() {
        let result = plan_merge(&three(), Some(&["id".to_string()]), CostPolicy::GroupCount);
        assert_eq!(
            result,
            Err(ValidationError::UnsupportedValue {
                column: "id".to_string(),
                reason: UnsupportedReason::PrimaryKeyColumn
            })
        );

        let result = plan_merge(&three(), Some(&["zzz".to_string()]), CostPolicy::GroupCount);
        assert!(matches!(
            result,
            Err(ValidationError::UnsupportedValue { reason: UnsupportedReason::UnknownColumn, .. })
        ));
    }
}
