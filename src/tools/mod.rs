//! Tool System - tool definitions, argument validation, catalog merge and local hosting

mod catalog;
mod definition;
pub mod provider;
mod schema;

pub use catalog::{Collision, CollisionOutcome, CollisionPolicy, QUALIFIER_SEPARATOR, ToolCatalog, fingerprint_specs};
pub use definition::{ToolDescriptor, ToolSpec, empty_object_schema};
pub use provider::{LocalTool, ToolBox};
pub use schema::{FieldViolation, validate_arguments, violating_fields};
