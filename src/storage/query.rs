//! Small builder for the handful of literal SQL statements the hub issues
//!
//! Statements are plain text, not parameterized. Identifiers are checked for
//! emptiness only, so callers must not feed untrusted input into them.
//!
//! ```
//! use server_monitor::storage::query::{ColumnAttribute, ColumnType, QueryBuilder};
//!
//! let sql = QueryBuilder::create_table("metrics")?
//!     .column_with("metrics_id", ColumnType::Serial, &[ColumnAttribute::PrimaryKey])?
//!     .column("cpu_usage_percent", ColumnType::Real)?
//!     .build()?;
//!
//! assert_eq!(
//!     sql,
//!     "CREATE TABLE metrics (metrics_id serial PRIMARY KEY,cpu_usage_percent real);"
//! );
//! # Ok::<(), server_monitor::storage::query::QueryBuilderError>(())
//! ```

use std::fmt;

/// SQL column types understood by the builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Serial,
    Integer,
    Real,
    Timestamp,
    /// Network address (`cidr`)
    IpAddress,
}

impl ColumnType {
    pub const fn keyword(self) -> &'static str {
        match self {
            ColumnType::Serial => "serial",
            ColumnType::Integer => "int",
            ColumnType::Real => "real",
            ColumnType::Timestamp => "timestamp",
            ColumnType::IpAddress => "cidr",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Column constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnAttribute {
    PrimaryKey,
    NotNull,
    Unique,
}

impl ColumnAttribute {
    pub const fn keyword(self) -> &'static str {
        match self {
            ColumnAttribute::PrimaryKey => "PRIMARY KEY",
            ColumnAttribute::NotNull => "NOT NULL",
            ColumnAttribute::Unique => "UNIQUE",
        }
    }
}

impl fmt::Display for ColumnAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryBuilderError {
    /// A table, column or database name was empty
    EmptyIdentifier(&'static str),

    /// `build` was called on a CREATE TABLE without any column
    NoColumns(String),
}

impl fmt::Display for QueryBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryBuilderError::EmptyIdentifier(kind) => write!(f, "{kind} name must not be empty"),
            QueryBuilderError::NoColumns(table) => {
                write!(f, "table {table} needs at least one column")
            }
        }
    }
}

impl std::error::Error for QueryBuilderError {}

fn identifier(kind: &'static str, name: &str) -> Result<String, QueryBuilderError> {
    if name.is_empty() {
        return Err(QueryBuilderError::EmptyIdentifier(kind));
    }
    Ok(name.to_string())
}

/// Entry point for all statements
pub struct QueryBuilder;

impl QueryBuilder {
    /// Lists every database on the server, one `datname` per row
    pub const DATABASE_LIST_QUERY: &'static str = "SELECT datname FROM pg_database;";

    pub fn create_table(table: &str) -> Result<CreateTableBuilder, QueryBuilderError> {
        Ok(CreateTableBuilder {
            table: identifier("table", table)?,
            columns: Vec::new(),
        })
    }

    pub fn select(table: &str) -> Result<SelectBuilder, QueryBuilderError> {
        Ok(SelectBuilder {
            table: identifier("table", table)?,
            columns: Vec::new(),
            order_by: Vec::new(),
        })
    }

    pub fn create_database(database: &str) -> Result<String, QueryBuilderError> {
        Ok(format!(
            "CREATE DATABASE {};",
            identifier("database", database)?
        ))
    }

    pub fn drop_database_if_exists(database: &str) -> Result<String, QueryBuilderError> {
        Ok(format!(
            "DROP DATABASE IF EXISTS {};",
            identifier("database", database)?
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnDefinition {
    name: String,
    column_type: ColumnType,
    attributes: Vec<ColumnAttribute>,
}

impl fmt::Display for ColumnDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.column_type)?;
        for attribute in &self.attributes {
            write!(f, " {attribute}")?;
        }
        Ok(())
    }
}

/// `CREATE TABLE` under construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTableBuilder {
    table: String,
    columns: Vec<ColumnDefinition>,
}

impl CreateTableBuilder {
    pub fn column(self, name: &str, column_type: ColumnType) -> Result<Self, QueryBuilderError> {
        self.column_with(name, column_type, &[])
    }

    pub fn column_with(
        mut self,
        name: &str,
        column_type: ColumnType,
        attributes: &[ColumnAttribute],
    ) -> Result<Self, QueryBuilderError> {
        self.columns.push(ColumnDefinition {
            name: identifier("column", name)?,
            column_type,
            attributes: attributes.to_vec(),
        });
        Ok(self)
    }

    pub fn build(&self) -> Result<String, QueryBuilderError> {
        if self.columns.is_empty() {
            return Err(QueryBuilderError::NoColumns(self.table.clone()));
        }

        let columns = self
            .columns
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        Ok(format!("CREATE TABLE {} ({columns});", self.table))
    }
}

/// `SELECT` under construction; no columns means `*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<String>,
    order_by: Vec<String>,
}

impl SelectBuilder {
    pub fn column(mut self, name: &str) -> Result<Self, QueryBuilderError> {
        self.columns.push(identifier("column", name)?);
        Ok(self)
    }

    pub fn columns(self, names: &[&str]) -> Result<Self, QueryBuilderError> {
        names.iter().try_fold(self, |builder, name| builder.column(name))
    }

    pub fn order_by(mut self, expression: &str) -> Result<Self, QueryBuilderError> {
        self.order_by.push(identifier("order by", expression)?);
        Ok(self)
    }

    pub fn build(&self) -> String {
        let columns = if self.columns.is_empty() {
            String::from("*")
        } else {
            self.columns.join(", ")
        };

        let mut sql = format!("SELECT {columns} FROM {}", self.table);
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        sql.push(';');
        sql
    }
}
