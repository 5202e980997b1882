use serde::{Deserialize, Serialize};
use std::fmt;

use crate::security::{validate_identifier, ValidationError};

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub const DEFAULT_SCHEMA: &'static str = "dbo";

    /// Parse `table`, `schema.table` or `[schema].[table]`, defaulting to `dbo`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyInput);
        }

        let (schema, name) = trimmed
            .split_once('.')
            .unwrap_or((Self::DEFAULT_SCHEMA, trimmed));

        let schema = strip_brackets(schema);
        let name = strip_brackets(name);
        validate_identifier(schema)?;
        validate_identifier(name)?;

        Ok(Self {
            schema: schema.to_string(),
            name: name.to_string(),
        })
    }

    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

fn strip_brackets(part: &str) -> &str {
    part.trim()
        .strip_prefix('[')
        .and_then(|p| p.strip_suffix(']'))
        .unwrap_or(part.trim())
}

/// Current definition of a column as reported by INFORMATION_SCHEMA.COLUMNS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub data_type: String,
    /// Character length; -1 for `(max)`
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    pub is_nullable: bool,
}

impl ColumnDefinition {
    /// Render the column type as T-SQL, e.g. `nvarchar(255)` or `decimal(18, 2)`.
    pub fn sql_type(&self) -> String {
        let lower = self.data_type.to_lowercase();
        let precision = self.precision.unwrap_or(0);
        let scale = self.scale.unwrap_or(0);
        match lower.as_str() {
            "char" | "varchar" | "nchar" | "nvarchar" | "binary" | "varbinary" => {
                match self.max_length {
                    Some(-1) => format!("{}(max)", lower),
                    Some(len) if len > 0 => format!("{}({})", lower, len),
                    _ => lower,
                }
            }
            "decimal" | "numeric" => {
                if precision > 0 {
                    format!("{}({}, {})", lower, precision, scale)
                } else {
                    format!("{}(18, 0)", lower)
                }
            }
            "datetime2" | "time" | "datetimeoffset" => match self.scale {
                Some(s) if s != 7 => format!("{}({})", lower, s),
                _ => lower,
            },
            _ => lower,
        }
    }

    /// Type plus nullability, as used in `ALTER COLUMN`.
    pub fn column_spec(&self) -> String {
        let null = if self.is_nullable { "NULL" } else { "NOT NULL" };
        format!("{} {}", self.sql_type(), null)
    }
}

/// Index storage type. Only rowstore indexes are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    Clustered,
    Nonclustered,
}

impl IndexType {
    /// Map a `sys.indexes.type_desc` value.
    pub fn from_type_desc(desc: &str) -> Self {
        if desc.eq_ignore_ascii_case("CLUSTERED") {
            IndexType::Clustered
        } else {
            IndexType::Nonclustered
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            IndexType::Clustered => "CLUSTERED",
            IndexType::Nonclustered => "NONCLUSTERED",
        }
    }
}

/// Referential action applied on delete or update of a referenced row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    NoAction,
}

impl ReferentialAction {
    /// Map a captured action code; unknown codes emit no clause.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ReferentialAction::Cascade),
            2 => Some(ReferentialAction::SetNull),
            3 => Some(ReferentialAction::SetDefault),
            4 => Some(ReferentialAction::NoAction),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

/// One index-column row of an index that references the target column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDependency {
    pub name: String,
    pub index_type: IndexType,
    pub is_unique: bool,
    pub is_primary_key: bool,
    pub is_included_column: bool,
    pub column: String,
    pub key_ordinal: u8,
    pub is_descending: bool,
    pub filter_definition: Option<String>,
}

/// One column pair of a foreign key that references the target column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDependency {
    pub name: String,
    pub column: String,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub delete_action: u8,
    pub update_action: u8,
    pub ordinal: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConstraintDependency {
    pub name: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultConstraintDependency {
    pub name: String,
    pub definition: String,
    pub column: String,
}

/// One column row of a UNIQUE constraint that references the target column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueConstraintDependency {
    pub name: String,
    pub column: String,
    pub index_type: IndexType,
    pub key_ordinal: u8,
    pub is_descending: bool,
}

/// Everything that references one column, captured before any DDL runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnDependencies {
    pub indexes: Vec<IndexDependency>,
    pub foreign_keys: Vec<ForeignKeyDependency>,
    pub check_constraints: Vec<CheckConstraintDependency>,
    pub default_constraints: Vec<DefaultConstraintDependency>,
    pub unique_constraints: Vec<UniqueConstraintDependency>,
}

/// Record counts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySummary {
    pub indexes: usize,
    pub foreign_keys: usize,
    pub check_constraints: usize,
    pub default_constraints: usize,
    pub unique_constraints: usize,
}

impl DependencySummary {
    pub fn total(&self) -> usize {
        self.indexes
            + self.foreign_keys
            + self.check_constraints
            + self.default_constraints
            + self.unique_constraints
    }
}

/// An index rebuilt from its captured column rows.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub index_type: IndexType,
    pub is_unique: bool,
    pub is_primary_key: bool,
    /// Key columns in key-ordinal order, with their descending flag
    pub key_columns: Vec<(String, bool)>,
    pub included_columns: Vec<String>,
    pub filter_definition: Option<String>,
}

/// A foreign key rebuilt from its captured column pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
}

/// A UNIQUE constraint rebuilt from its captured column rows.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueConstraintDefinition {
    pub name: String,
    pub index_type: IndexType,
    pub key_columns: Vec<(String, bool)>,
}

impl ColumnDependencies {
    pub fn is_empty(&self) -> bool {
        self.summary().total() == 0
    }

    pub fn summary(&self) -> DependencySummary {
        DependencySummary {
            indexes: self.indexes.len(),
            foreign_keys: self.foreign_keys.len(),
            check_constraints: self.check_constraints.len(),
            default_constraints: self.default_constraints.len(),
            unique_constraints: self.unique_constraints.len(),
        }
    }

    /// Group index rows by name, in first-seen order.
    pub fn index_definitions(&self) -> Vec<IndexDefinition> {
        let mut groups: Vec<(String, Vec<&IndexDependency>)> = Vec::new();
        for row in &self.indexes {
            group_push(&mut groups, &row.name, row);
        }

        groups
            .into_iter()
            .map(|(name, mut rows)| {
                rows.sort_by_key(|r| r.key_ordinal);
                let first = rows[0];
                IndexDefinition {
                    name,
                    index_type: first.index_type,
                    is_unique: first.is_unique,
                    is_primary_key: first.is_primary_key,
                    key_columns: rows
                        .iter()
                        .filter(|r| !r.is_included_column)
                        .map(|r| (r.column.clone(), r.is_descending))
                        .collect(),
                    included_columns: rows
                        .iter()
                        .filter(|r| r.is_included_column)
                        .map(|r| r.column.clone())
                        .collect(),
                    filter_definition: first.filter_definition.clone(),
                }
            })
            .collect()
    }

    /// Group foreign key rows by constraint name, in first-seen order.
    pub fn foreign_key_definitions(&self) -> Vec<ForeignKeyDefinition> {
        let mut groups: Vec<(String, Vec<&ForeignKeyDependency>)> = Vec::new();
        for row in &self.foreign_keys {
            group_push(&mut groups, &row.name, row);
        }

        groups
            .into_iter()
            .map(|(name, mut rows)| {
                rows.sort_by_key(|r| r.ordinal);
                let first = rows[0];
                ForeignKeyDefinition {
                    name,
                    columns: rows.iter().map(|r| r.column.clone()).collect(),
                    referenced_schema: first.referenced_schema.clone(),
                    referenced_table: first.referenced_table.clone(),
                    referenced_columns: rows
                        .iter()
                        .map(|r| r.referenced_column.clone())
                        .collect(),
                    on_delete: ReferentialAction::from_code(first.delete_action),
                    on_update: ReferentialAction::from_code(first.update_action),
                }
            })
            .collect()
    }

    /// Group unique constraint rows by constraint name, in first-seen order.
    pub fn unique_constraint_definitions(&self) -> Vec<UniqueConstraintDefinition> {
        let mut groups: Vec<(String, Vec<&UniqueConstraintDependency>)> = Vec::new();
        for row in &self.unique_constraints {
            group_push(&mut groups, &row.name, row);
        }

        groups
            .into_iter()
            .map(|(name, mut rows)| {
                rows.sort_by_key(|r| r.key_ordinal);
                UniqueConstraintDefinition {
                    name,
                    index_type: rows[0].index_type,
                    key_columns: rows
                        .iter()
                        .map(|r| (r.column.clone(), r.is_descending))
                        .collect(),
                }
            })
            .collect()
    }
}

fn group_push<'a, T>(groups: &mut Vec<(String, Vec<&'a T>)>, name: &str, row: &'a T) {
    match groups.iter_mut().find(|(n, _)| n == name) {
        Some((_, rows)) => rows.push(row),
        None => groups.push((name.to_string(), vec![row])),
    }
}
