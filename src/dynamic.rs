//! Untyped rows.

use std::sync::Arc;

use crate::driver::impl_value_row;
use crate::error::{DriverError, DriverResult, MapResult};
use crate::factory;
use crate::record::Record;
use crate::schema::ColumnMeta;
use crate::value::Value;

/// A materialized row with its column metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicRow {
    columns: Arc<[ColumnMeta]>,
    values: Vec<Value>,
}

impl DynamicRow {
    pub fn new(columns: Vec<ColumnMeta>, values: Vec<Value>) -> Self {
        Self::from_shared(columns.into(), values)
    }

    pub(crate) fn from_shared(columns: Arc<[ColumnMeta]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of the column `name`, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
            .and_then(|ordinal| self.values.get(ordinal))
    }

    /// Map onto a record through the shared row factories.
    pub fn map_to<T: Record>(&self) -> MapResult<T> {
        factory::resolve::<T>(&self.columns)?.map(self)
    }

    /// Render as a JSON object keyed by column name.
    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(column, value)| (column.name.clone(), value_to_json(value)))
            .collect();
        serde_json::Value::Object(object)
    }

    fn width(&self) -> usize {
        self.values.len()
    }

    fn cell(&self, ordinal: usize) -> DriverResult<&Value> {
        self.values.get(ordinal).ok_or(DriverError::ColumnOutOfRange {
            ordinal,
            count: self.values.len(),
        })
    }
}

impl_value_row!(DynamicRow);

fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Bool(v) => Json::Bool(*v),
        Value::I16(v) => Json::from(*v),
        Value::I32(v) => Json::from(*v),
        Value::I64(v) => Json::from(*v),
        Value::F32(v) => serde_json::Number::from_f64(*v as f64).map_or(Json::Null, Json::Number),
        Value::F64(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
        Value::Json(v) => v.clone(),
        other => Json::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Row;
    use crate::value::ColumnType;

    fn row() -> DynamicRow {
        DynamicRow::new(
            vec![
                ColumnMeta::new("Id", ColumnType::I32),
                ColumnMeta::new("Name", ColumnType::Text),
                ColumnMeta::new("Email", ColumnType::Text),
            ],
            vec![Value::I32(1), Value::from("Employee1"), Value::Null],
        )
    }

    #[test]
    fn test_get_by_name() {
        let row = row();
        assert_eq!(row.get("name"), Some(&Value::from("Employee1")));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_row_accessors() {
        let row = row();
        assert_eq!(row.column_count(), 3);
        assert_eq!(row.get_i32(0).unwrap(), 1);
        assert!(row.is_null(2).unwrap());
        assert!(matches!(
            row.get_i32(7),
            Err(DriverError::ColumnOutOfRange { ordinal: 7, count: 3 })
        ));
    }

    #[test]
    fn test_to_json() {
        assert_eq!(
            row().to_json(),
            serde_json::json!({"Id": 1, "Name": "Employee1", "Email": null})
        );
    }
}
