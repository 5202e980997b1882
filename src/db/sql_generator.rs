use super::schema::{
    CheckConstraintDependency, ColumnDefinition, DefaultConstraintDependency,
    ForeignKeyDefinition, IndexDefinition, TableName, UniqueConstraintDefinition,
};

/// Quote an identifier with brackets, escaping embedded `]`.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// T-SQL DDL generator bound to one table.
pub struct SqlGenerator {
    table: TableName,
}

impl SqlGenerator {
    pub fn new(table: &TableName) -> Self {
        Self {
            table: table.clone(),
        }
    }

    /// `[schema].[table]`
    pub fn qualified_table(&self) -> String {
        qualify(&self.table.schema, &self.table.name)
    }

    pub fn drop_index(&self, name: &str) -> String {
        format!("DROP INDEX {} ON {}", quote_ident(name), self.qualified_table())
    }

    pub fn drop_constraint(&self, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.qualified_table(),
            quote_ident(name)
        )
    }

    pub fn create_index(&self, idx: &IndexDefinition) -> String {
        let unique = if idx.is_unique { "UNIQUE " } else { "" };
        let mut sql = format!(
            "CREATE {}{} INDEX {} ON {} ({})",
            unique,
            idx.index_type.as_sql(),
            quote_ident(&idx.name),
            self.qualified_table(),
            key_list(&idx.key_columns)
        );

        if !idx.included_columns.is_empty() {
            let cols: Vec<String> = idx.included_columns.iter().map(|c| quote_ident(c)).collect();
            sql.push_str(&format!(" INCLUDE ({})", cols.join(", ")));
        }

        if let Some(filter) = &idx.filter_definition {
            sql.push_str(&format!(" WHERE {}", filter));
        }

        sql
    }

    pub fn create_foreign_key(&self, fk: &ForeignKeyDefinition) -> String {
        let cols: Vec<String> = fk.columns.iter().map(|c| quote_ident(c)).collect();
        let ref_cols: Vec<String> = fk.referenced_columns.iter().map(|c| quote_ident(c)).collect();

        let mut sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.qualified_table(),
            quote_ident(&fk.name),
            cols.join(", "),
            qualify(&fk.referenced_schema, &fk.referenced_table),
            ref_cols.join(", ")
        );

        if let Some(action) = fk.on_delete {
            sql.push_str(&format!(" ON DELETE {}", action.as_sql()));
        }
        if let Some(action) = fk.on_update {
            sql.push_str(&format!(" ON UPDATE {}", action.as_sql()));
        }

        sql
    }

    pub fn create_check_constraint(&self, chk: &CheckConstraintDependency) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({})",
            self.qualified_table(),
            quote_ident(&chk.name),
            chk.definition
        )
    }

    pub fn create_default_constraint(&self, df: &DefaultConstraintDependency) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} DEFAULT {} FOR {}",
            self.qualified_table(),
            quote_ident(&df.name),
            df.definition,
            quote_ident(&df.column)
        )
    }

    pub fn create_unique_constraint(&self, uq: &UniqueConstraintDefinition) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE {} ({})",
            self.qualified_table(),
            quote_ident(&uq.name),
            uq.index_type.as_sql(),
            key_list(&uq.key_columns)
        )
    }

    /// `ALTER TABLE ... ALTER COLUMN [col] <type> NULL|NOT NULL`
    pub fn alter_column(&self, column: &str, data_type: &str, nullable: bool) -> String {
        let null = if nullable { "NULL" } else { "NOT NULL" };
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {} {}",
            self.qualified_table(),
            quote_ident(column),
            data_type,
            null
        )
    }

    /// Restore a column to a captured definition.
    pub fn restore_column(&self, column: &str, def: &ColumnDefinition) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {}",
            self.qualified_table(),
            quote_ident(column),
            def.column_spec()
        )
    }

    /// Default constraint name used when a mutation installs a new default.
    pub fn default_constraint_name(&self, column: &str) -> String {
        format!("DF_{}_{}", self.table.name, column)
    }
}

fn qualify(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn key_list(columns: &[(String, bool)]) -> String {
    columns
        .iter()
        .map(|(name, desc)| {
            format!("{} {}", quote_ident(name), if *desc { "DESC" } else { "ASC" })
        })
        .collect::<Vec<_>>()
        .join(", ")
}
