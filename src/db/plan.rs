use serde::{Deserialize, Serialize};
use std::fmt;

use super::schema::{ColumnDependencies, IndexDefinition, TableName};
use super::sql_generator::SqlGenerator;

/// Category of a dependency object. Declaration order is the drop and
/// recreate order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DependencyKind {
    Index,
    ForeignKey,
    CheckConstraint,
    DefaultConstraint,
    UniqueConstraint,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Index => write!(f, "index"),
            DependencyKind::ForeignKey => write!(f, "foreign key"),
            DependencyKind::CheckConstraint => write!(f, "check constraint"),
            DependencyKind::DefaultConstraint => write!(f, "default constraint"),
            DependencyKind::UniqueConstraint => write!(f, "unique constraint"),
        }
    }
}

/// How the primary key index is recognised so it can be left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryKeyDetection {
    /// `sys.indexes.is_primary_key`
    #[default]
    CatalogFlag,
    /// Index name starts with `PK_`
    NamePrefix,
}

impl PrimaryKeyDetection {
    pub fn is_primary_key(&self, idx: &IndexDefinition) -> bool {
        match self {
            PrimaryKeyDetection::CatalogFlag => idx.is_primary_key,
            PrimaryKeyDetection::NamePrefix => idx.name.starts_with("PK_"),
        }
    }
}

/// One DDL statement acting on one dependency object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DdlStep {
    pub kind: DependencyKind,
    pub object_name: String,
    pub sql: String,
}

/// Drop and recreate statements for a captured dependency set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyPlan {
    pub drops: Vec<DdlStep>,
    pub recreates: Vec<DdlStep>,
    /// Primary key indexes left in place
    pub skipped_primary_keys: Vec<String>,
}

impl DependencyPlan {
    /// Recreate statement for a dropped object. Index names live outside
    /// `sys.objects`, so an index may share its name with a constraint.
    pub fn recreate_for(&self, kind: DependencyKind, object_name: &str) -> Option<&DdlStep> {
        self.recreates
            .iter()
            .find(|s| s.kind == kind && s.object_name == object_name)
    }

    /// Recreate steps for the given dropped steps, in recreate order.
    pub fn compensation_steps(&self, dropped: &[&DdlStep]) -> Vec<&DdlStep> {
        self.recreates
            .iter()
            .filter(|s| {
                dropped
                    .iter()
                    .any(|d| d.kind == s.kind && d.object_name == s.object_name)
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.drops.is_empty()
    }
}

/// Build the drop and recreate statements for `deps`, in the fixed order
/// indexes, foreign keys, check, default, unique constraints.
pub fn build_plan(
    table: &TableName,
    deps: &ColumnDependencies,
    pk_detection: PrimaryKeyDetection,
) -> DependencyPlan {
    let gen = SqlGenerator::new(table);
    let mut plan = DependencyPlan::default();

    for idx in deps.index_definitions() {
        if pk_detection.is_primary_key(&idx) {
            plan.skipped_primary_keys.push(idx.name.clone());
            continue;
        }
        plan.push(DependencyKind::Index, &idx.name, gen.drop_index(&idx.name), gen.create_index(&idx));
    }

    for fk in deps.foreign_key_definitions() {
        plan.push(
            DependencyKind::ForeignKey,
            &fk.name,
            gen.drop_constraint(&fk.name),
            gen.create_foreign_key(&fk),
        );
    }

    for chk in &deps.check_constraints {
        plan.push(
            DependencyKind::CheckConstraint,
            &chk.name,
            gen.drop_constraint(&chk.name),
            gen.create_check_constraint(chk),
        );
    }

    for df in &deps.default_constraints {
        plan.push(
            DependencyKind::DefaultConstraint,
            &df.name,
            gen.drop_constraint(&df.name),
            gen.create_default_constraint(df),
        );
    }

    for uq in deps.unique_constraint_definitions() {
        plan.push(
            DependencyKind::UniqueConstraint,
            &uq.name,
            gen.drop_constraint(&uq.name),
            gen.create_unique_constraint(&uq),
        );
    }

    plan
}

impl DependencyPlan {
    fn push(&mut self, kind: DependencyKind, name: &str, drop_sql: String, create_sql: String) {
        self.drops.push(DdlStep {
            kind,
            object_name: name.to_string(),
            sql: drop_sql,
        });
        self.recreates.push(DdlStep {
            kind,
            object_name: name.to_string(),
            sql: create_sql,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{
        CheckConstraintDependency, DefaultConstraintDependency, ForeignKeyDependency,
        IndexDependency, IndexType, UniqueConstraintDependency,
    };

    fn index(name: &str, pk: bool) -> IndexDependency {
        IndexDependency {
            name: name.to_string(),
            index_type: if pk { IndexType::Clustered } else { IndexType::Nonclustered },
            is_unique: pk,
            is_primary_key: pk,
            is_included_column: false,
            column: "id".to_string(),
            key_ordinal: 1,
            is_descending: false,
            filter_definition: None,
        }
    }

    fn one_of_each() -> ColumnDependencies {
        ColumnDependencies {
            indexes: vec![index("IX_ref", false)],
            foreign_keys: vec![ForeignKeyDependency {
                name: "FK_ref".to_string(),
                column: "id".to_string(),
                referenced_schema: "dbo".to_string(),
                referenced_table: "parents".to_string(),
                referenced_column: "id".to_string(),
                delete_action: 1,
                update_action: 0,
                ordinal: 1,
            }],
            check_constraints: vec![CheckConstraintDependency {
                name: "CK_ref".to_string(),
                definition: "([id]>(0))".to_string(),
            }],
            default_constraints: vec![DefaultConstraintDependency {
                name: "DF_ref".to_string(),
                definition: "((1))".to_string(),
                column: "id".to_string(),
            }],
            unique_constraints: vec![UniqueConstraintDependency {
                name: "UQ_ref".to_string(),
                column: "id".to_string(),
                index_type: IndexType::Nonclustered,
                key_ordinal: 1,
                is_descending: false,
            }],
        }
    }

    #[test]
    fn test_plan_order_is_fixed() {
        let plan = build_plan(
            &TableName::new("dbo", "t"),
            &one_of_each(),
            PrimaryKeyDetection::CatalogFlag,
        );
        let kinds: Vec<DependencyKind> = plan.drops.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DependencyKind::Index,
                DependencyKind::ForeignKey,
                DependencyKind::CheckConstraint,
                DependencyKind::DefaultConstraint,
                DependencyKind::UniqueConstraint,
            ]
        );
        let recreate_kinds: Vec<DependencyKind> = plan.recreates.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, recreate_kinds);
        assert!(plan.drops[0].sql.starts_with("DROP INDEX [IX_ref]"));
        assert!(plan.drops[1].sql.ends_with("DROP CONSTRAINT [FK_ref]"));
    }

    #[test]
    fn test_plan_skips_primary_key_by_flag() {
        let deps = ColumnDependencies {
            indexes: vec![index("PK_t", true), index("IX_ref", false)],
            ..Default::default()
        };
        let plan = build_plan(&TableName::new("dbo", "t"), &deps, PrimaryKeyDetection::CatalogFlag);
        assert_eq!(plan.skipped_primary_keys, vec!["PK_t"]);
        assert_eq!(plan.drops.len(), 1);
        assert!(plan.recreate_for(DependencyKind::Index, "PK_t").is_none());
    }

    #[test]
    fn test_plan_name_prefix_detection() {
        // Primary key with a non-conventional name is only caught by the flag.
        let deps = ColumnDependencies {
            indexes: vec![index("users_pkey", true), index("PK_legacy", false)],
            ..Default::default()
        };
        let table = TableName::new("dbo", "t");

        let by_flag = build_plan(&table, &deps, PrimaryKeyDetection::CatalogFlag);
        assert_eq!(by_flag.skipped_primary_keys, vec!["users_pkey"]);

        let by_prefix = build_plan(&table, &deps, PrimaryKeyDetection::NamePrefix);
        assert_eq!(by_prefix.skipped_primary_keys, vec!["PK_legacy"]);
    }

    #[test]
    fn test_compensation_steps_follow_recreate_order() {
        let plan = build_plan(
            &TableName::new("dbo", "t"),
            &one_of_each(),
            PrimaryKeyDetection::CatalogFlag,
        );
        let dropped = vec![&plan.drops[2], &plan.drops[0]];
        let steps: Vec<&str> = plan
            .compensation_steps(&dropped)
            .iter()
            .map(|s| s.object_name.as_str())
            .collect();
        assert_eq!(steps, vec!["IX_ref", "CK_ref"]);
    }

    #[test]
    fn test_compensation_matches_kind_and_name() {
        let deps = ColumnDependencies {
            indexes: vec![index("CK_shared", false)],
            check_constraints: vec![CheckConstraintDependency {
                name: "CK_shared".to_string(),
                definition: "([id]>(0))".to_string(),
            }],
            ..Default::default()
        };
        let plan = build_plan(&TableName::new("dbo", "t"), &deps, PrimaryKeyDetection::CatalogFlag);

        let steps = plan.compensation_steps(&[&plan.drops[0]]);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].kind, DependencyKind::Index);

        let check = plan
            .recreate_for(DependencyKind::CheckConstraint, "CK_shared")
            .unwrap();
        assert!(check.sql.contains("CHECK"));
    }

    #[test]
    fn test_empty_plan() {
        let plan = build_plan(
            &TableName::new("dbo", "t"),
            &ColumnDependencies::default(),
            PrimaryKeyDetection::default(),
        );
        assert!(plan.is_empty());
        assert!(plan.recreates.is_empty());
    }
}
