//! A composable abstraction for handling messages read from a shard.

use std::{error::Error, fmt::Debug, ops::Deref, sync::Arc};

use async_trait::async_trait;

pub mod instrumentation;
pub mod mock;

/// A [`MessageProcessor`] handles the messages of one shard, identified by
/// their pointer of type `P`.
///
/// Calls for one shard are never concurrent and are made in pointer order.
#[async_trait]
pub trait MessageProcessor<P, M>: Debug + Send + Sync + 'static {
    type Error: Error + Send + Sync + 'static;

    /// Handle `message`, found at `pointer` in the shard.
    ///
    /// The message is borrowed so the same message can be submitted again
    /// when a failure is retried.
    async fn process(&self, pointer: &P, message: &M) -> Result<(), Self::Error>;
}

#[async_trait]
impl<T, P, M> MessageProcessor<P, M> for Arc<T>
where
    T: MessageProcessor<P, M>,
    P: Sync,
    M: Sync,
{
    type Error = T::Error;

    async fn process(&self, pointer: &P, message: &M) -> Result<(), Self::Error> {
        self.deref().process(pointer, message).await
    }
}
