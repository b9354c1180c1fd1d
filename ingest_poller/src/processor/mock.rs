//! A [`MessageProcessor`] recording its calls, for tests.

use std::{collections::VecDeque, fmt::Debug};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use super::MessageProcessor;

/// The error returned by a [`MockProcessor`] when told to fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mock processor error: {0}")]
pub struct MockProcessorError(pub String);

#[derive(Debug)]
struct Inner<P, M> {
    calls: Vec<(P, M)>,
    ret: VecDeque<Result<(), MockProcessorError>>,
}

/// A [`MessageProcessor`] that records every call made to it.
///
/// Each call pops the next scripted return value, succeeding once the script
/// is exhausted.
#[derive(Debug)]
pub struct MockProcessor<P, M> {
    inner: Mutex<Inner<P, M>>,
}

impl<P, M> Default for MockProcessor<P, M> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                calls: Vec::new(),
                ret: VecDeque::new(),
            }),
        }
    }
}

impl<P, M> MockProcessor<P, M>
where
    P: Clone,
    M: Clone,
{
    /// Return `ret`, in order, from subsequent calls.
    pub fn with_process_return(
        self,
        ret: impl IntoIterator<Item = Result<(), MockProcessorError>>,
    ) -> Self {
        self.inner.lock().ret.extend(ret);
        self
    }

    /// The `(pointer, message)` of every call, in call order.
    pub fn calls(&self) -> Vec<(P, M)> {
        self.inner.lock().calls.clone()
    }

    /// The pointer of every call, in call order.
    pub fn pointers(&self) -> Vec<P> {
        self.inner.lock().calls.iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().calls.len()
    }
}

#[async_trait]
impl<P, M> MessageProcessor<P, M> for MockProcessor<P, M>
where
    P: Clone + Debug + Send + Sync + 'static,
    M: Clone + Debug + Send + Sync + 'static,
{
    type Error = MockProcessorError;

    async fn process(&self, pointer: &P, message: &M) -> Result<(), Self::Error> {
        let mut guard = self.inner.lock();
        guard.calls.push((pointer.clone(), message.clone()));
        guard.ret.pop_front().unwrap_or(Ok(()))
    }
}
