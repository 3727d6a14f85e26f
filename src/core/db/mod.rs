/// Database Module
///
/// The persistence core, organized leaves first:
/// - **Connection** (`connection.rs`): lazily opened SQLite handle, quoting rules, factories
/// - **Values and parameters** (`value.rs`, `params.rs`): dynamically typed values and bind maps
/// - **Conditions** (`condition.rs`): the predicate tree used by WHERE and HAVING
/// - **Compiler** (`builder.rs`): query specification to parameterized SQL
/// - **Query** (`query.rs`): fluent specification with hydrating terminal calls
/// - **Command** (`command.rs`): one prepared statement, binding and execution
/// - **Reader** (`reader.rs`): forward-only cursor over a result set
///
/// ## Error Handling
///
/// All operations return the crate-wide `OtpgateError`.
pub mod builder;
pub mod command;
pub mod condition;
pub mod connection;
pub mod params;
pub mod query;
pub mod reader;
pub mod value;

pub use builder::{QueryBuilder, PARAM_PREFIX};
pub use command::Command;
pub use condition::{Condition, ConditionWriter};
pub use connection::Connection;
pub use params::{Param, ParamKey, ParamStyle, Params};
pub use query::{Hydrate, Join, Query, SelectColumn, SortOrder, TableRef};
pub use reader::{DataReader, Row};
pub use value::{TypeHint, Value};
