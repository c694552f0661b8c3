//! # rowforge
//!
//! Schema-driven mapping of database rows onto plain Rust structs.
//!
//! A result schema (column names, order and types) is fingerprinted once, a
//! [`RowFactory`](factory::RowFactory) is compiled for it, and every later
//! result with the same shape reuses that factory.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use rowforge::prelude::*;
//! use rowforge::postgres::PostgresConnection;
//!
//! record! {
//!     #[derive(Debug, Default)]
//!     pub struct Employee {
//!         pub id: i32 => "Id",
//!         pub name: String => "Name",
//!         pub department_id: i32 => "DepartmentId",
//!     }
//! }
//!
//! let mut session = Session::new(PostgresConnection::connect(url).await?);
//! let employees: Vec<Employee> = session
//!     .sql("SELECT Id, Name, DepartmentId FROM Employees WHERE DepartmentId = @DepartmentId")
//!     .bind("DepartmentId", 2)
//!     .list()
//!     .await?;
//! ```
//!
//! ## Layers
//!
//! | Module          | Role                                              |
//! |-----------------|---------------------------------------------------|
//! | `schema`        | Column metadata and the schema fingerprint        |
//! | `record`        | Target types: `Record`, `FieldType`, `db_enum!`   |
//! | `factory`       | Row-factory compiler and its three-tier cache     |
//! | `compiled`      | Caller-owned reusable queries                     |
//! | `session`       | Convenience API over a connection                 |
//! | `entry_cache`   | Per-connection cache behind the convenience API   |
//! | `driver`        | Driver traits; `memory` and `postgres` implement them |

pub mod compiled;
pub mod config;
pub mod convert;
pub mod driver;
pub mod dynamic;
pub mod entry_cache;
pub mod error;
pub mod exec;
pub mod factory;
pub mod memory;
pub mod params;
pub mod postgres;
pub mod record;
pub mod schema;
pub mod session;
pub mod value;

pub use compiled::CompiledQuery;
pub use config::EngineConfig;
pub use dynamic::DynamicRow;
pub use error::{MapError, MapResult};
pub use session::{Call, Session};

pub mod prelude {
    pub use crate::compiled::CompiledQuery;
    pub use crate::config::EngineConfig;
    pub use crate::driver::{Command, CommandKind, Connection, ReadBehavior, Row, RowCursor};
    pub use crate::dynamic::DynamicRow;
    pub use crate::error::{ConvertError, DriverError, ExecStage, MapError, MapResult};
    pub use crate::exec::RowStream;
    pub use crate::params::Params;
    pub use crate::record::{Field, FieldType, Record};
    pub use crate::schema::{ColumnMeta, SchemaFingerprint};
    pub use crate::session::{Call, Session};
    pub use crate::value::{ColumnType, Value};
    pub use crate::{db_enum, params, record};
}
