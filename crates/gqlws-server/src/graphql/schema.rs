//! [`Executor`] adapter for an `async_graphql::Schema`.

use async_graphql::{
    ObjectType, PathSegment, Request, Response, Schema, ServerError, SubscriptionType, Variables,
};
use async_trait::async_trait;
use futures::StreamExt;
use gqlws_core::{ExecutionResult, GraphQlError};
use serde_json::Value;

use super::executor::{EventPayload, ExecutionError, ExecutionRequest, Executor};

/// Runs subscription queries through an `async-graphql` schema.
///
/// The event payload is attached as [`EventPayload`] and the request snapshot
/// as `Arc<RequestContext>` request data. Subscription operations yield the
/// first item of their stream; queries and mutations execute once.
pub struct SchemaExecutor<Query, Mutation, Subscription> {
    schema: Schema<Query, Mutation, Subscription>,
}

impl<Query, Mutation, Subscription> SchemaExecutor<Query, Mutation, Subscription>
where
    Query: ObjectType + 'static,
    Mutation: ObjectType + 'static,
    Subscription: SubscriptionType + 'static,
{
    /// Wrap a built schema.
    pub fn new(schema: Schema<Query, Mutation, Subscription>) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl<Query, Mutation, Subscription> Executor for SchemaExecutor<Query, Mutation, Subscription>
where
    Query: ObjectType + 'static,
    Mutation: ObjectType + 'static,
    Subscription: SubscriptionType + 'static,
{
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        let ExecutionRequest {
            query,
            operation_name,
            variables,
            context,
        } = request;

        let mut gql_request = Request::new(query)
            .data(EventPayload(context.payload))
            .data(context.request);
        if let Some(name) = operation_name {
            gql_request = gql_request.operation_name(name);
        }
        if let Some(vars) = variables {
            gql_request = gql_request.variables(Variables::from_json(Value::Object(vars)));
        }

        let mut stream = Box::pin(self.schema.execute_stream(gql_request));
        let response = stream.next().await.ok_or(ExecutionError::NoResult)?;
        convert_response(response)
    }
}

fn convert_response(response: Response) -> Result<ExecutionResult, ExecutionError> {
    let data = response
        .data
        .into_json()
        .map_err(|e| ExecutionError::Engine(e.to_string()))?;
    let errors = response.errors.into_iter().map(convert_error).collect();
    Ok(ExecutionResult { data, errors })
}

fn convert_error(error: ServerError) -> GraphQlError {
    let err = GraphQlError::new(error.message);
    if error.path.is_empty() {
        return err;
    }
    let path = error
        .path
        .into_iter()
        .map(|segment| match segment {
            PathSegment::Field(name) => Value::String(name),
            PathSegment::Index(index) => Value::from(index),
        })
        .collect();
    err.with_path(path)
}
