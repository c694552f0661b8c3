//! Shared employee dataset served by the in-memory driver.
#![allow(dead_code)]

use chrono::NaiveDate;
use rust_decimal::Decimal;

use rowforge::memory::{MemoryConnection, MemoryDatabase, ResultSet};
use rowforge::params::BoundParameter;
use rowforge::prelude::*;

pub const EMPLOYEE_COUNT: i32 = 30;
pub const DEPARTMENTS: i32 = 5;

pub const ALL_EMPLOYEES: &str = "SELECT Id, Name, DepartmentId FROM Employees";
pub const BY_DEPARTMENT: &str =
    "SELECT Id, Name, DepartmentId FROM Employees WHERE DepartmentId = @DepartmentId";
pub const NAME_BY_ID: &str = "SELECT Name FROM Employees WHERE Id = @Id";
pub const EXTENDED: &str =
    "SELECT Id, Name, DepartmentId, Category, HireDate, Salary, Email, Badge FROM Employees";
pub const CATEGORY_NAMES: &str = "SELECT Id, Category FROM EmployeeCategoryNames";
pub const RENAME: &str = "UPDATE Employees SET Name = @Name WHERE Id = @Id";
pub const BROKEN: &str = "SELECT FROM";
pub const FLAKY: &str = "SELECT Id, Name, DepartmentId FROM FlakyEmployees";
pub const BY_DEPARTMENT_PROC: &str = "GetEmployeesByDepartment";

db_enum! {
    pub enum EmployeeCategory: i32 {
        #[default]
        Regular = 1,
        Lead = 2,
        Manager = 3,
    }
}

record! {
    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct EmployeeDto {
        pub id: i32 => "Id",
        pub name: String => "Name",
        pub department_id: i32 => "DepartmentId",
    }
}

record! {
    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct EmployeeNameOnlyDto {
        pub name: String => "Name",
    }
}

record! {
    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct EmployeeExtendedDto {
        pub id: i32 => "Id",
        pub name: String => "Name",
        pub department_id: i64 => "DepartmentId",
        pub category: EmployeeCategory => "Category",
        pub hire_date: Option<NaiveDate> => "HireDate",
        pub salary: Decimal => "Salary",
        pub email: Option<String> => "Email",
    }
}

record! {
    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct CategoryRow {
        pub id: i32 => "Id",
        pub category: Option<EmployeeCategory> => "Category",
    }
}

pub fn department_of(id: i32) -> i32 {
    (id - 1) % DEPARTMENTS + 1
}

pub fn category_of(id: i32) -> i32 {
    id % 3 + 1
}

fn basic_columns() -> [ColumnMeta; 3] {
    [
        ColumnMeta::new("Id", ColumnType::I32).not_null(),
        ColumnMeta::new("Name", ColumnType::Text),
        ColumnMeta::new("DepartmentId", ColumnType::I32),
    ]
}

fn basic_row(id: i32) -> Vec<Value> {
    vec![
        Value::I32(id),
        Value::Text(format!("Employee{}", id)),
        Value::I32(department_of(id)),
    ]
}

/// Value bound to `name`, or NULL.
pub fn param(parameters: &[BoundParameter], name: &str) -> Value {
    parameters
        .iter()
        .find(|p| p.matches(name))
        .map(|p| p.value().clone())
        .unwrap_or_default()
}

fn by_department(parameters: &[BoundParameter]) -> Result<ResultSet, DriverError> {
    let department = param(parameters, "DepartmentId");
    Ok(ResultSet::new(basic_columns()).rows(
        (1..=EMPLOYEE_COUNT)
            .filter(|id| Value::I32(department_of(*id)) == department)
            .map(basic_row),
    ))
}

/// Log to the test writer when `RUST_LOG` is set.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

pub fn database() -> MemoryDatabase {
    init_tracing();
    let db = MemoryDatabase::new();

    db.on_query(ALL_EMPLOYEES, |_| {
        Ok(ResultSet::new(basic_columns()).rows((1..=EMPLOYEE_COUNT).map(basic_row)))
    });
    db.on_query(BY_DEPARTMENT, by_department);
    db.on_procedure(BY_DEPARTMENT_PROC, by_department);

    db.on_query(NAME_BY_ID, |parameters| {
        let id = param(parameters, "Id");
        Ok(ResultSet::new([ColumnMeta::new("Name", ColumnType::Text)]).rows(
            (1..=EMPLOYEE_COUNT)
                .filter(|candidate| Value::I32(*candidate) == id)
                .map(|candidate| vec![Value::Text(format!("Employee{}", candidate))]),
        ))
    });

    db.on_query(EXTENDED, |_| {
        let columns = [
            ColumnMeta::new("Id", ColumnType::I32),
            ColumnMeta::new("Name", ColumnType::Text),
            ColumnMeta::new("DepartmentId", ColumnType::I32),
            ColumnMeta::new("Category", ColumnType::I32),
            ColumnMeta::new("HireDate", ColumnType::Date),
            ColumnMeta::new("Salary", ColumnType::Decimal),
            ColumnMeta::new("Email", ColumnType::Text),
            ColumnMeta::new("Badge", ColumnType::Uuid),
        ];
        Ok(ResultSet::new(columns).rows((1..=EMPLOYEE_COUNT).map(|id| {
            let hire_date = if id % 4 == 0 {
                Value::Null
            } else {
                NaiveDate::from_ymd_opt(2020, 1, id as u32).map_or(Value::Null, Value::Date)
            };
            let email = if id % 2 == 0 {
                Value::Text(format!("employee{}@example.com", id))
            } else {
                Value::Null
            };
            vec![
                Value::I32(id),
                Value::Text(format!("Employee{}", id)),
                Value::I32(department_of(id)),
                Value::I32(category_of(id)),
                hire_date,
                Value::Decimal(Decimal::new(5_000_00 + i64::from(id) * 100, 2)),
                email,
                Value::Uuid(uuid::Uuid::nil()),
            ]
        })))
    });

    db.on_query(CATEGORY_NAMES, |_| {
        Ok(ResultSet::new([
            ColumnMeta::new("Id", ColumnType::I32),
            ColumnMeta::new("Category", ColumnType::Text),
        ])
        .row([Value::I32(1), Value::from("regular")])
        .row([Value::I32(2), Value::from("LEAD")])
        .row([Value::I32(3), Value::from(" Manager ")])
        .row([Value::I32(4), Value::Null]))
    });

    db.on_query(RENAME, |parameters| {
        let affected = match param(parameters, "Id") {
            Value::I32(id) if (1..=EMPLOYEE_COUNT).contains(&id) => 1,
            _ => 0,
        };
        Ok(ResultSet::empty().affected(affected))
    });

    db.on_query(BROKEN, |_| {
        Err(DriverError::Query("syntax error at or near \"FROM\"".into()))
    });

    db.on_query(FLAKY, |_| {
        Ok(ResultSet::new(basic_columns())
            .rows((1..=EMPLOYEE_COUNT).map(basic_row))
            .fail_after(3, "connection reset by peer"))
    });

    db
}

pub fn session(db: &MemoryDatabase) -> Session<MemoryConnection> {
    Session::new(db.connect())
}
