//! Demo schema.
//!
//! ```graphql
//! type Query { greet: Greeter  bye: String! }
//! type Greeter { hello(name: String!): String! }
//! type Subscription { ping: String!  greet: Greeter }
//! ```
//!
//! Subscription fields resolve from the published event payload.

use async_graphql::{Context, EmptyMutation, Object, Schema, Subscription};
use futures::Stream;
use gqlws_server::EventPayload;

/// The demo schema type.
pub type DemoSchema = Schema<QueryRoot, EmptyMutation, SubscriptionRoot>;

/// Build the demo schema.
pub fn build_schema() -> DemoSchema {
    Schema::new(QueryRoot, EmptyMutation, SubscriptionRoot)
}

/// Query root.
pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn greet(&self) -> Greeter {
        Greeter { from: None }
    }

    async fn bye(&self) -> &str {
        "friend"
    }
}

/// Greets by name.
pub struct Greeter {
    from: Option<String>,
}

#[Object]
impl Greeter {
    async fn hello(&self, name: String) -> String {
        match &self.from {
            Some(from) => format!("hello {name}, from {from}"),
            None => format!("hello {name}"),
        }
    }
}

/// Subscription root.
pub struct SubscriptionRoot;

#[Subscription]
impl SubscriptionRoot {
    /// The payload of a `ping` event, `"Pong"` when it carries no text.
    async fn ping(&self, ctx: &Context<'_>) -> impl Stream<Item = String> {
        let text = payload_text(ctx).unwrap_or_else(|| "Pong".to_string());
        futures::stream::once(async move { text })
    }

    /// A greeter signed with the payload of a `greet` event.
    async fn greet(&self, ctx: &Context<'_>) -> impl Stream<Item = Option<Greeter>> {
        let from = payload_text(ctx);
        futures::stream::once(async move { Some(Greeter { from }) })
    }
}

fn payload_text(ctx: &Context<'_>) -> Option<String> {
    ctx.data::<EventPayload>()
        .ok()
        .and_then(|payload| payload.0.as_str())
        .map(str::to_owned)
}
