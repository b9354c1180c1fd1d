use async_trait::async_trait;
use iox_time::{SystemProvider, TimeProvider};
use metric::{DurationHistogram, Metric};

use super::MessageProcessor;

/// Records how long each [`MessageProcessor::process()`] call of the wrapped
/// processor takes, in the `ingest_processor_duration` histogram.
///
/// Observations are labelled with the `name` given at construction and with
/// whether the call succeeded. Every attempt is observed, so a message retried
/// by the poller's error policy is recorded once per attempt.
#[derive(Debug)]
pub struct ProcessorInstrumentation<T, P = SystemProvider> {
    inner: T,
    time_provider: P,

    /// Latency of calls that returned `Ok`.
    process_duration_success: DurationHistogram,

    /// Latency of calls that returned an error, including ones that are
    /// later retried or skipped.
    process_duration_error: DurationHistogram,
}

impl<T> ProcessorInstrumentation<T> {
    pub fn new(name: &'static str, inner: T, metrics: &metric::Registry) -> Self {
        let process_duration: Metric<DurationHistogram> = metrics.register_metric(
            "ingest_processor_duration",
            "duration distribution of shard message process calls",
        );
        let process_duration_success =
            process_duration.recorder(&[("processor", name), ("result", "success")]);
        let process_duration_error =
            process_duration.recorder(&[("processor", name), ("result", "error")]);

        Self {
            inner,
            time_provider: Default::default(),
            process_duration_success,
            process_duration_error,
        }
    }
}

impl<T, P> ProcessorInstrumentation<T, P> {
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T, P, Ptr, M> MessageProcessor<Ptr, M> for ProcessorInstrumentation<T, P>
where
    T: MessageProcessor<Ptr, M>,
    P: TimeProvider,
    Ptr: Sync,
    M: Sync,
{
    type Error = T::Error;

    async fn process(&self, pointer: &Ptr, message: &M) -> Result<(), Self::Error> {
        let t = self.time_provider.now();

        let res = self.inner.process(pointer, message).await;

        if let Some(delta) = self.time_provider.now().checked_duration_since(t) {
            match &res {
                Ok(_) => self.process_duration_success.record(delta),
                Err(_) => self.process_duration_error.record(delta),
            };
        }

        res
    }
}
