use ingest_consumer::ConsumerErrorKind;
use ingest_types::ShardId;
use metric::{Attributes, DurationCounter, Metric, U64Counter};

/// Per-shard metrics emitted by a poller.
#[derive(Debug)]
pub(crate) struct PollerMetrics {
    shard_id: ShardId,

    /// Messages successfully handed to the processor.
    pub(crate) processed: U64Counter,

    /// Messages skipped because they were already persisted.
    pub(crate) already_persisted: U64Counter,

    /// Failed processor calls, including ones later retried.
    pub(crate) failed: U64Counter,

    /// Reads that returned no messages before their deadline.
    pub(crate) read_timeouts: U64Counter,

    /// Non-timeout read errors, faceted by kind.
    consumer_errors: Metric<U64Counter>,

    /// Duration of time the poller spent paused.
    pub(crate) pause_duration: DurationCounter,
}

impl PollerMetrics {
    pub(crate) fn new(shard_id: ShardId, metrics: &metric::Registry) -> Self {
        let messages = metrics.register_metric::<U64Counter>(
            "ingest_poller_messages",
            "number of shard messages seen by the poller, by outcome",
        );
        let processed = messages.recorder(metric_attrs(shard_id, Some(("outcome", "processed"))));
        let already_persisted =
            messages.recorder(metric_attrs(shard_id, Some(("outcome", "skipped"))));
        let failed = messages.recorder(metric_attrs(shard_id, Some(("outcome", "failed"))));

        let read_timeouts = metrics
            .register_metric::<U64Counter>(
                "ingest_poller_read_timeouts",
                "number of shard reads that timed out without returning a message",
            )
            .recorder(metric_attrs(shard_id, None));

        let consumer_errors = metrics.register_metric::<U64Counter>(
            "ingest_poller_consumer_errors",
            "number of shard reads that failed, by error kind",
        );

        let pause_duration = metrics
            .register_metric::<DurationCounter>(
                "ingest_poller_paused_duration",
                "duration of time ingestion of the shard has been paused",
            )
            .recorder(metric_attrs(shard_id, None));

        Self {
            shard_id,
            processed,
            already_persisted,
            failed,
            read_timeouts,
            consumer_errors,
            pause_duration,
        }
    }

    pub(crate) fn record_consumer_error(&self, kind: ConsumerErrorKind) {
        self.consumer_errors
            .recorder(metric_attrs(self.shard_id, Some(("kind", kind_name(kind)))))
            .inc(1);
    }
}

fn kind_name(kind: ConsumerErrorKind) -> &'static str {
    match kind {
        ConsumerErrorKind::Timeout => "timeout",
        ConsumerErrorKind::Closed => "closed",
        ConsumerErrorKind::PointerOutOfRange => "pointer_out_of_range",
        ConsumerErrorKind::InvalidData => "invalid_data",
        ConsumerErrorKind::Io => "io",
        ConsumerErrorKind::Unknown => "unknown",
    }
}

fn metric_attrs(shard_id: ShardId, extra: Option<(&'static str, &'static str)>) -> Attributes {
    let mut attr = Attributes::from([("shard_id", shard_id.to_string().into())]);

    if let Some((key, value)) = extra {
        attr.insert(key, value);
    }

    attr
}
