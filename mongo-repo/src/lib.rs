#[allow(unused_extern_crates)]
extern crate self as mongo_repo;

mod config;
mod datasource;
pub mod driver;
mod error;
pub mod filter;
mod insert;
mod lifecycle;
mod model;
mod repository;
mod schema;
mod soft_delete;
mod update;

pub use config::{ConnectorOptions, DEFAULT_TIMEOUT, RepositoryOptions};
pub use datasource::{Connector, Datasource};
pub use driver::{Driver, MemoryDriver, MongoDriver, UpdateOutcome};
pub use error::{Error, ErrorKind, Result};
pub use filter::{Condition, Direction, Filter, FilterCompiler, Operator, and, field, nor, or};
pub use insert::InsertCompiler;
pub use lifecycle::{
    CREATED_FIELD, CreatedStamp, DELETED_FIELD, Deletion, LifecyclePolicy, MODIFIED_FIELD,
    OperationContext,
};
pub use model::{FieldDescriptor, Fields, Model, ModelMeta, all_models};
pub use mongo_repo_derive::{Fields, Model};
pub use repository::Repository;
pub use schema::{FieldInfo, FieldType, ID_FIELD, SchemaIndex};
pub use soft_delete::SoftDeleteRewriter;
pub use update::{UpdateCompiler, UpdateSpec, UpdateStyle};

pub use bson;
pub use inventory;
