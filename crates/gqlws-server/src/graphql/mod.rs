//! Seams to the GraphQL engine: query parsing and execution.
//!
//! Both are traits so the subscription engine can be driven by any engine.
//! The default implementations use `async-graphql`.

pub mod executor;
pub mod parser;
pub mod schema;

pub use executor::{EventPayload, ExecutionContext, ExecutionError, ExecutionRequest, Executor};
pub use parser::{AsyncGraphqlParser, ParsedOperation, QueryParser, event_names};
pub use schema::SchemaExecutor;
