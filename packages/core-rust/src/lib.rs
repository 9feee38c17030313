//! Docstore core: condition model, index catalog, query validation and
//! compilation to the backing store's query model.

pub mod compiler;
pub mod condition;
pub mod conflicts;
pub mod document;
pub mod error;
pub mod grammar;
pub mod index;
pub mod schema;
pub mod selector;
pub mod sorter;
pub mod types;
pub mod validator;

pub use compiler::{
    compile_index, compile_query, physical_field, CompiledQuery, FieldPredicate, IndexSpec,
    SortKey, StoreOperator,
};
pub use condition::{Condition, ConditionValue, Operator, OrderBy, Pagination, Query, SortDirection};
pub use document::{Document, DocumentError};
pub use error::{Constraint, OrderByRule, PlacementRule, StructuralError, ValidationError, ValidationResult};
pub use grammar::QueryGrammar;
pub use index::{IndexCatalog, IndexDefinition, IndexProperty};
pub use schema::{DataContract, DocumentSchema, SchemaError};
pub use types::Value;
pub use validator::{QueryValidator, ValidatedQuery};
