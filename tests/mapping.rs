//! Row mapping through the convenience API and dynamic rows.

mod common;

use std::sync::{Arc, Barrier};

use chrono::NaiveDate;
use futures::TryStreamExt;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;

use common::*;
use rowforge::factory;
use rowforge::memory::ResultSet;
use rowforge::prelude::*;

#[tokio::test]
async fn test_round_trip_all_employees() -> MapResult<()> {
    let db = database();
    let mut session = session(&db);

    let employees: Vec<EmployeeDto> = session.sql(ALL_EMPLOYEES).list().await?;

    assert_eq!(employees.len(), EMPLOYEE_COUNT as usize);
    assert_eq!(
        employees[0],
        EmployeeDto {
            id: 1,
            name: "Employee1".into(),
            department_id: 1,
        }
    );
    for employee in &employees {
        assert_eq!(employee.name, format!("Employee{}", employee.id));
        assert_eq!(employee.department_id, department_of(employee.id));
    }
    Ok(())
}

#[tokio::test]
async fn test_extra_columns_are_ignored() -> MapResult<()> {
    let db = database();
    let mut session = session(&db);

    let names: Vec<EmployeeNameOnlyDto> = session.sql(ALL_EMPLOYEES).list().await?;
    assert_eq!(names.len(), 30);
    assert_eq!(names[29].name, "Employee30");
    Ok(())
}

#[tokio::test]
async fn test_missing_columns_keep_defaults() -> MapResult<()> {
    let db = database();
    let mut session = session(&db);

    let rows: Vec<EmployeeExtendedDto> = session.sql(ALL_EMPLOYEES).list().await?;
    let third = &rows[2];
    assert_eq!(third.id, 3);
    assert_eq!(third.department_id, 3);
    assert_eq!(third.category, EmployeeCategory::Regular);
    assert_eq!(third.salary, Decimal::ZERO);
    assert_eq!(third.email, None);
    assert_eq!(third.hire_date, None);
    Ok(())
}

#[tokio::test]
async fn test_extended_mapping_with_nulls_and_widening() -> MapResult<()> {
    let db = database();
    let mut session = session(&db);

    let rows: Vec<EmployeeExtendedDto> = session.sql(EXTENDED).list().await?;
    assert_eq!(rows.len(), 30);

    let fourth = &rows[3];
    assert_eq!(fourth.department_id, 4_i64);
    assert_eq!(fourth.category, EmployeeCategory::Lead);
    assert_eq!(fourth.hire_date, None);
    assert_eq!(fourth.email.as_deref(), Some("employee4@example.com"));
    assert_eq!(fourth.salary, Decimal::new(5_004_00, 2));

    let fifth = &rows[4];
    assert_eq!(fifth.category, EmployeeCategory::Manager);
    assert_eq!(fifth.hire_date, NaiveDate::from_ymd_opt(2020, 1, 5));
    assert_eq!(fifth.email, None);

    assert_eq!(rows[2].category, EmployeeCategory::Regular);
    assert_eq!(rows[0].category, EmployeeCategory::Lead);
    Ok(())
}

#[tokio::test]
async fn test_enum_from_text_column() -> MapResult<()> {
    let db = database();
    let mut session = session(&db);

    let rows: Vec<CategoryRow> = session.sql(CATEGORY_NAMES).list().await?;
    let categories: Vec<_> = rows.iter().map(|r| r.category).collect();
    assert_eq!(
        categories,
        vec![
            Some(EmployeeCategory::Regular),
            Some(EmployeeCategory::Lead),
            Some(EmployeeCategory::Manager),
            None,
        ]
    );
    Ok(())
}

#[test]
fn test_enum_from_unknown_name_fails() {
    let row = DynamicRow::new(
        vec![
            ColumnMeta::new("Id", ColumnType::I32),
            ColumnMeta::new("Category", ColumnType::Text),
        ],
        vec![Value::I32(9), Value::from("Intern")],
    );
    match row.map_to::<CategoryRow>() {
        Err(MapError::Conversion { field, raw, source }) => {
            assert_eq!(field, "Category");
            assert_eq!(raw, "Intern");
            assert!(matches!(source, ConvertError::UnknownVariant { .. }));
        }
        other => panic!("expected a conversion error, got {:?}", other.map(|r| r.id)),
    }
}

#[test]
fn test_conversion_error_names_field_and_value() {
    let row = DynamicRow::new(
        vec![
            ColumnMeta::new("Id", ColumnType::Text),
            ColumnMeta::new("Name", ColumnType::Text),
        ],
        vec![Value::from("abc"), Value::from("Employee1")],
    );
    let err = row.map_to::<EmployeeDto>().unwrap_err();
    assert!(
        err.to_string()
            .starts_with("Failed to set field 'Id' with value 'abc'"),
        "{}",
        err
    );
}

#[test]
fn test_permuted_schema_maps_by_name() {
    let forward = DynamicRow::new(
        vec![
            ColumnMeta::new("Id", ColumnType::I32),
            ColumnMeta::new("Name", ColumnType::Text),
        ],
        vec![Value::I32(7), Value::from("Employee7")],
    );
    let reversed = DynamicRow::new(
        vec![
            ColumnMeta::new("Name", ColumnType::Text),
            ColumnMeta::new("Id", ColumnType::I32),
        ],
        vec![Value::from("Employee7"), Value::I32(7)],
    );

    assert_ne!(
        SchemaFingerprint::compute(forward.columns()),
        SchemaFingerprint::compute(reversed.columns())
    );
    let a: EmployeeDto = forward.map_to().unwrap();
    let b: EmployeeDto = reversed.map_to().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.id, 7);
}

#[test]
fn test_case_insensitive_column_names_share_a_factory() {
    let upper = [
        ColumnMeta::new("ID", ColumnType::I32),
        ColumnMeta::new("NAME", ColumnType::Text),
    ];
    let lower = [
        ColumnMeta::new("id", ColumnType::I32),
        ColumnMeta::new("name", ColumnType::Text),
    ];
    let a = factory::get_or_build::<EmployeeNameOnlyDto>(&upper).unwrap();
    let b = factory::get_or_build::<EmployeeNameOnlyDto>(&lower).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.bound_columns(), 1);
}

record! {
    #[derive(Debug, Default)]
    struct RaceDto {
        id: i64 => "Id",
        label: String => "Label",
    }
}

#[test]
fn test_concurrent_first_build_converges() {
    const THREADS: usize = 8;
    let columns = [
        ColumnMeta::new("Id", ColumnType::I64),
        ColumnMeta::new("Label", ColumnType::Text),
    ];
    let barrier = Barrier::new(THREADS);

    let factories: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    factory::resolve::<RaceDto>(&columns).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for other in &factories[1..] {
        assert!(Arc::ptr_eq(&factories[0], other));
    }

    let row = DynamicRow::new(columns.to_vec(), vec![Value::I64(3), Value::from("x")]);
    let mapped: RaceDto = factories[0].map(&row).unwrap();
    assert_eq!(mapped.id, 3);
    assert_eq!(mapped.label, "x");
}

#[tokio::test]
async fn test_dynamic_rows_map_like_typed_calls() -> MapResult<()> {
    let db = database();
    let mut session = session(&db);

    let dynamic = session
        .sql(BY_DEPARTMENT)
        .bind("DepartmentId", 2)
        .dynamic()
        .await?;
    let typed: Vec<EmployeeDto> = session
        .sql(BY_DEPARTMENT)
        .bind("DepartmentId", 2)
        .list()
        .await?;

    assert_eq!(dynamic.len(), typed.len());
    for (row, employee) in dynamic.iter().zip(&typed) {
        assert_eq!(&row.map_to::<EmployeeDto>()?, employee);
        assert_eq!(row.get("departmentid"), Some(&Value::I32(2)));
    }
    assert_eq!(dynamic[0].to_json()["Name"], "Employee2");
    Ok(())
}

#[test]
fn test_null_into_value_field_keeps_zero() {
    let row = DynamicRow::new(
        vec![
            ColumnMeta::new("Id", ColumnType::I32),
            ColumnMeta::new("Name", ColumnType::Text),
            ColumnMeta::new("DepartmentId", ColumnType::I32),
        ],
        vec![Value::Null, Value::Null, Value::I32(4)],
    );
    let employee: EmployeeDto = row.map_to().unwrap();
    assert_eq!(
        employee,
        EmployeeDto {
            id: 0,
            name: String::new(),
            department_id: 4,
        }
    );
}

#[tokio::test]
async fn test_outer_join_nulls_after_not_null_schema() -> MapResult<()> {
    const OUTER: &str =
        "SELECT e.Id, d.Name, d.DepartmentId FROM Departments d LEFT JOIN Employees e";
    let db = database();
    db.on_query(OUTER, |_| {
        Ok(ResultSet::new([
            ColumnMeta::new("Id", ColumnType::I32),
            ColumnMeta::new("Name", ColumnType::Text),
            ColumnMeta::new("DepartmentId", ColumnType::I32),
        ])
        .row([Value::I32(1), Value::from("Employee1"), Value::I32(1)])
        .row([Value::Null, Value::from("Vacant"), Value::I32(6)]))
    });
    let mut session = session(&db);

    // same names and types, but Id is declared NOT NULL here
    let strict: Vec<EmployeeDto> = session.sql(ALL_EMPLOYEES).list().await?;
    assert_eq!(strict.len(), 30);

    let expected = vec![
        EmployeeDto {
            id: 1,
            name: "Employee1".into(),
            department_id: 1,
        },
        EmployeeDto {
            id: 0,
            name: "Vacant".into(),
            department_id: 6,
        },
    ];
    let listed: Vec<EmployeeDto> = session.sql(OUTER).list().await?;
    assert_eq!(listed, expected);

    let _: Vec<EmployeeDto> = session
        .sql(ALL_EMPLOYEES)
        .stream::<EmployeeDto>()
        .try_collect()
        .await?;
    let streamed: Vec<EmployeeDto> = session
        .sql(OUTER)
        .stream::<EmployeeDto>()
        .try_collect()
        .await?;
    assert_eq!(streamed, expected);
    Ok(())
}
