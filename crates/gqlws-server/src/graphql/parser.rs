//! Query parsing: from a subscription document to the event names it
//! listens to.

use std::collections::BTreeSet;

use async_graphql::parser::parse_query;
use async_graphql::parser::types::{Selection, SelectionSet};
use gqlws_core::SubscriptionParseError;

/// One operation of a parsed document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedOperation {
    /// Operation name, `None` for anonymous operations.
    pub name: Option<String>,
    /// Top-level field names, in document order. Aliases are ignored.
    pub selections: Vec<String>,
}

/// Parses subscription documents.
pub trait QueryParser: Send + Sync {
    /// Parse `query` into its operations.
    fn parse(&self, query: &str) -> Result<Vec<ParsedOperation>, SubscriptionParseError>;
}

/// [`QueryParser`] backed by the `async-graphql` parser.
///
/// Only plain field selections count. Fragment spreads and inline fragments
/// at the top level contribute nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct AsyncGraphqlParser;

impl QueryParser for AsyncGraphqlParser {
    fn parse(&self, query: &str) -> Result<Vec<ParsedOperation>, SubscriptionParseError> {
        let document =
            parse_query(query).map_err(|e| SubscriptionParseError::new(e.to_string()))?;

        Ok(document
            .operations
            .iter()
            .map(|(name, operation)| ParsedOperation {
                name: name.map(|n| n.to_string()),
                selections: top_level_fields(&operation.node.selection_set.node),
            })
            .collect())
    }
}

fn top_level_fields(selection_set: &SelectionSet) -> Vec<String> {
    selection_set
        .items
        .iter()
        .filter_map(|item| match &item.node {
            Selection::Field(field) => Some(field.node.name.node.to_string()),
            Selection::FragmentSpread(_) | Selection::InlineFragment(_) => None,
        })
        .collect()
}

/// Event names a subscription listens to.
///
/// When `operation_name` names one of the operations only that operation
/// contributes; otherwise every operation does.
pub fn event_names(operations: &[ParsedOperation], operation_name: Option<&str>) -> BTreeSet<String> {
    let selected = operation_name.and_then(|wanted| {
        operations
            .iter()
            .find(|op| op.name.as_deref() == Some(wanted))
    });

    match selected {
        Some(op) => op.selections.iter().cloned().collect(),
        None => operations
            .iter()
            .flat_map(|op| op.selections.iter().cloned())
            .collect(),
    }
}
