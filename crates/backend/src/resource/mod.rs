//! The external resource the coordinator mediates access to
//!
//! The resource has no notion of transactions. It is reached through a single
//! call that takes a query and produces a [`QueryResult`]; everything else
//! about it is opaque.

mod resilient;

use async_trait::async_trait;

pub use self::resilient::{RetryPolicy, RetryingResource};
use crate::actor::message::QueryResult;

/// A resource that answers queries
#[async_trait]
pub trait Resource: Send + Sync {
  /// Run one query. Failures are reported in the result, never as a panic.
  async fn call(&self, query: &str) -> QueryResult;
}

/// Adapts a synchronous function into a [`Resource`]
pub struct FnResource<F> {
  f: F,
}

impl<F> FnResource<F>
where
  F: Fn(&str) -> QueryResult + Send + Sync,
{
  pub fn new(f: F) -> Self {
    Self { f }
  }
}

#[async_trait]
impl<F> Resource for FnResource<F>
where
  F: Fn(&str) -> QueryResult + Send + Sync,
{
  async fn call(&self, query: &str) -> QueryResult {
    (self.f)(query)
  }
}

#[async_trait]
impl<R: Resource + ?Sized> Resource for std::sync::Arc<R> {
  async fn call(&self, query: &str) -> QueryResult {
    (**self).call(query).await
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
  #[error("Invalid retry policy: {0}")]
  InvalidRetryPolicy(String),
}
