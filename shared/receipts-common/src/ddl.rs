//! Arrow schema to DuckDB DDL conversion
//!
//! Converts Arrow DataTypes to DuckDB SQL types and generates the
//! CREATE TABLE statements for the normalized relations.

use arrow_schema::{DataType, Field, Schema, TimeUnit};

/// Convert Arrow DataType to DuckDB SQL type string
pub fn arrow_type_to_duckdb(data_type: &DataType) -> String {
    match data_type {
        // String types
        DataType::Utf8 | DataType::LargeUtf8 => "VARCHAR".to_string(),

        // Integer types
        DataType::Int8 => "TINYINT".to_string(),
        DataType::Int16 => "SMALLINT".to_string(),
        DataType::Int32 => "INTEGER".to_string(),
        DataType::Int64 => "BIGINT".to_string(),
        DataType::UInt8 => "UTINYINT".to_string(),
        DataType::UInt16 => "USMALLINT".to_string(),
        DataType::UInt32 => "UINTEGER".to_string(),
        DataType::UInt64 => "UBIGINT".to_string(),

        // Floating point types
        DataType::Float16 | DataType::Float32 => "FLOAT".to_string(),
        DataType::Float64 => "DOUBLE".to_string(),

        // Boolean
        DataType::Boolean => "BOOLEAN".to_string(),

        // Date/Time types
        DataType::Date32 | DataType::Date64 => "DATE".to_string(),
        DataType::Timestamp(unit, tz) => {
            let base = match unit {
                TimeUnit::Second => "TIMESTAMP_S",
                TimeUnit::Millisecond => "TIMESTAMP_MS",
                TimeUnit::Microsecond => "TIMESTAMP",
                TimeUnit::Nanosecond => "TIMESTAMP_NS",
            };
            if tz.is_some() {
                format!("{} WITH TIME ZONE", base)
            } else {
                base.to_string()
            }
        }

        // Nested types - store as JSON
        DataType::List(_) | DataType::LargeList(_) | DataType::Struct(_) | DataType::Map(_, _) => {
            "JSON".to_string()
        }

        // Fallback for other types
        _ => "VARCHAR".to_string(),
    }
}

/// Convert Arrow Field to DuckDB column definition
pub fn field_to_column_def(field: &Field) -> String {
    let sql_type = arrow_type_to_duckdb(field.data_type());
    let nullable = if field.is_nullable() { "" } else { " NOT NULL" };
    format!("\"{}\" {}{}", field.name(), sql_type, nullable)
}

/// Generate CREATE TABLE DDL from Arrow schema
///
/// Key columns are `NOT NULL` but no `PRIMARY KEY` constraint is emitted:
/// rows sharing a key with a different payload must survive the load so
/// the duplicate-key scan can report them.
pub fn generate_create_table_ddl(table_name: &str, schema: &Schema) -> String {
    let columns: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| field_to_column_def(f.as_ref()))
        .collect();

    format!(
        "CREATE OR REPLACE TABLE \"{}\" (\n    {}\n);",
        table_name,
        columns.join(",\n    ")
    )
}
