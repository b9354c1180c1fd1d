use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;
use ingest_consumer::{
    ConsumerError, ConsumerErrorKind,
    mock::{MockShardConsumer, MockShardState},
};
use ingest_poller::{
    PollOutcome, PollerConfig, PollerError, ProcessingErrorPolicy, StreamPoller,
    processor::mock::{MockProcessor, MockProcessorError},
};
use ingest_types::{MaxMessages, Offset, PersistedPointers, PollerState, ResetPolicy, ShardId};
use iox_time::{MockProvider, Time};
use metric::{Attributes, DurationCounter, Metric, U64Counter};
use test_helpers::timeout::FutureTimeout;

const SHARD: ShardId = ShardId::new(1);

type Processor = Arc<MockProcessor<Offset, String>>;
type Poller = StreamPoller<MockShardConsumer<String>, Processor>;

fn shard_with(n: usize) -> MockShardState<String> {
    MockShardState::with_messages(SHARD, (0..n).map(|i| format!("message-{i}")))
}

fn test_config() -> PollerConfig {
    PollerConfig::default()
        .with_read_timeout(Duration::from_millis(10))
        .with_consumer_error_backoff(Duration::from_millis(1))
}

struct TestPoller {
    poller: Poller,
    processor: Processor,
    metrics: metric::Registry,
}

impl TestPoller {
    fn new(
        shard: &MockShardState<String>,
        start: i64,
        persisted: impl IntoIterator<Item = i64>,
        processor: MockProcessor<Offset, String>,
        config: PollerConfig,
    ) -> Self {
        let processor = Arc::new(processor);
        let metrics = metric::Registry::default();
        let poller = StreamPoller::new(
            Offset::new(start),
            persisted.into_iter().map(Offset::new).collect::<PersistedPointers<_>>(),
            shard.consumer(),
            Arc::clone(&processor),
            config,
            &metrics,
        );

        Self {
            poller,
            processor,
            metrics,
        }
    }

    fn processed(&self) -> Vec<i64> {
        self.processor.pointers().iter().map(|p| p.get()).collect()
    }

    fn message_count(&self, outcome: &'static str) -> u64 {
        self.metrics
            .get_instrument::<Metric<U64Counter>>("ingest_poller_messages")
            .expect("did not find messages metric")
            .get_observer(&Attributes::from(&[("shard_id", "1"), ("outcome", outcome)]))
            .expect("did not match metric attributes")
            .fetch()
    }
}

/// Wait for `cond` to become true, panicking if it takes too long.
async fn wait_for(cond: impl Fn() -> bool + Send) {
    async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
    .with_timeout_panic(Duration::from_secs(5))
    .await
}

#[tokio::test]
async fn test_pause_before_start_then_resume() {
    let shard = shard_with(2);
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    t.poller.pause();
    t.poller.start().await.unwrap();
    wait_for(|| t.poller.state() == PollerState::Paused).await;
    assert!(t.poller.is_paused());

    // No reads or processing while paused.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(t.processor.call_count(), 0);
    assert!(shard.reads().is_empty());

    t.poller.resume();
    assert!(!t.poller.is_paused());
    wait_for(|| t.processor.call_count() == 2).await;
    wait_for(|| t.poller.state() == PollerState::Polling).await;
    assert_eq!(t.processed(), [0, 1]);

    t.poller.close().await;
}

#[tokio::test]
async fn test_pause_mid_stream_resumes_without_loss() {
    let shard = shard_with(2);
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    t.poller.start().await.unwrap();
    wait_for(|| t.processor.call_count() == 2).await;

    t.poller.pause();
    wait_for(|| t.poller.state() == PollerState::Paused).await;

    shard.push("message-2".to_string());
    shard.push("message-3".to_string());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(t.processor.call_count(), 2);

    t.poller.resume();
    wait_for(|| t.processor.call_count() == 4).await;
    assert_eq!(t.processed(), [0, 1, 2, 3]);
    assert_eq!(t.poller.batch_start_pointer(), Offset::new(4));

    t.poller.close().await;
}

#[tokio::test]
async fn test_skip_persisted() {
    let shard = shard_with(4);
    let t = TestPoller::new(&shard, 0, [1, 2], MockProcessor::default(), test_config());
    assert_eq!(t.poller.max_persisted_pointer(), None);

    t.poller.start().await.unwrap();
    wait_for(|| t.poller.batch_start_pointer() == Offset::new(4)).await;

    assert_eq!(
        t.processor.calls(),
        [
            (Offset::new(0), "message-0".to_string()),
            (Offset::new(3), "message-3".to_string()),
        ]
    );
    assert_eq!(t.poller.max_persisted_pointer(), Some(Offset::new(2)));
    assert_eq!(t.message_count("processed"), 2);
    assert_eq!(t.message_count("skipped"), 2);
    assert_eq!(t.message_count("failed"), 0);

    t.poller.close().await;
}

#[tokio::test]
async fn test_close_without_start() {
    let shard = shard_with(2);
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    t.poller.close().await;
    assert!(t.poller.is_closed());
    assert_eq!(t.poller.state(), PollerState::Closed);
    assert_eq!(shard.close_count(), 1);

    assert_matches!(t.poller.start().await, Err(PollerError::Closed));
    assert_eq!(t.processor.call_count(), 0);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let shard = shard_with(2);
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    t.poller.start().await.unwrap();
    wait_for(|| t.processor.call_count() == 2).await;

    t.poller.close().await;
    assert!(t.poller.is_closed());
    assert_eq!(t.poller.state(), PollerState::Closed);

    t.poller.close().await;
    t.poller.close().await;
    assert_eq!(t.poller.state(), PollerState::Closed);
    assert_eq!(shard.close_count(), 1);
    assert!(t.poller.failure().is_none());
}

#[tokio::test]
async fn test_close_abandons_blocked_read() {
    let shard = shard_with(0);
    let config = test_config().with_read_timeout(Duration::from_secs(60));
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), config);

    t.poller.start().await.unwrap();
    wait_for(|| !shard.reads().is_empty()).await;

    t.poller
        .close()
        .with_timeout_panic(Duration::from_secs(5))
        .await;
    assert_eq!(t.poller.state(), PollerState::Closed);
    assert_eq!(t.poller.batch_start_pointer(), Offset::new(0));
    assert_eq!(shard.close_count(), 1);
}

#[tokio::test]
async fn test_close_release_failure_still_closes() {
    let shard = shard_with(2);
    shard.push_close_error(ConsumerError::io("connection reset"));
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    t.poller.start().await.unwrap();
    wait_for(|| t.processor.call_count() == 2).await;

    t.poller.close().await;
    assert_eq!(t.poller.state(), PollerState::Closed);
    assert!(t.poller.failure().is_none());

    t.poller.close().await;
    t.poller.close().await;
    assert_eq!(t.poller.state(), PollerState::Closed);
    assert_eq!(shard.close_attempts(), 1);
    assert_eq!(shard.close_count(), 0);

    assert_matches!(t.poller.poll_once().await, Err(PollerError::Closed));
}

#[tokio::test]
async fn test_close_release_failure_before_start() {
    let shard = shard_with(1);
    shard.push_close_error(ConsumerError::io("connection reset"));
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    t.poller.close().await;
    t.poller.close().await;
    assert!(t.poller.is_closed());
    assert_eq!(shard.close_attempts(), 1);
}

#[tokio::test]
async fn test_paused_duration_metric() {
    let shard = shard_with(1);
    let processor = Arc::new(MockProcessor::default());
    let metrics = metric::Registry::default();
    let time_provider = Arc::new(MockProvider::new(Time::from_timestamp_nanos(0)));
    let poller: Poller = StreamPoller::new_with_time_provider(
        Offset::new(0),
        PersistedPointers::default(),
        shard.consumer(),
        Arc::clone(&processor),
        test_config(),
        &metrics,
        Arc::clone(&time_provider) as _,
    );

    let paused = || {
        metrics
            .get_instrument::<Metric<DurationCounter>>("ingest_poller_paused_duration")
            .expect("did not find pause metric")
            .get_observer(&Attributes::from(&[("shard_id", "1")]))
            .expect("did not match metric attributes")
            .fetch()
    };

    poller.start().await.unwrap();
    wait_for(|| processor.call_count() == 1).await;
    assert_eq!(paused(), Duration::ZERO);

    poller.pause();
    wait_for(|| poller.state() == PollerState::Paused).await;

    // Reported while still paused.
    time_provider.inc(Duration::from_secs(10));
    wait_for(|| paused() == Duration::from_secs(10)).await;

    time_provider.inc(Duration::from_secs(5));
    poller.resume();
    wait_for(|| poller.state() == PollerState::Polling).await;
    assert_eq!(paused(), Duration::from_secs(15));

    // Time passing while polling is not counted.
    time_provider.inc(Duration::from_secs(60));
    shard.push("message-1".to_string());
    wait_for(|| processor.call_count() == 2).await;
    assert_eq!(paused(), Duration::from_secs(15));

    poller.close().await;
}

#[tokio::test]
async fn test_reset_policy_none_uses_supplied_pointer() {
    let shard = shard_with(3);
    let t = TestPoller::new(&shard, 1, [], MockProcessor::default(), test_config());

    t.poller.start().await.unwrap();
    wait_for(|| t.processor.call_count() == 2).await;
    assert_eq!(t.processed(), [1, 2]);
    assert_eq!(shard.reads()[0], Offset::new(1));

    t.poller.close().await;
}

#[tokio::test]
async fn test_reset_policy_earliest() {
    let shard = shard_with(2);
    let config = test_config().with_reset_policy(ResetPolicy::Earliest);
    let t = TestPoller::new(&shard, 1, [], MockProcessor::default(), config);

    t.poller.start().await.unwrap();
    wait_for(|| t.processor.call_count() == 2).await;
    assert_eq!(t.processed(), [0, 1]);

    t.poller.close().await;
}

#[tokio::test]
async fn test_reset_policy_earliest_after_truncation() {
    let shard = shard_with(4);
    shard.truncate_before(Offset::new(2));
    let config = test_config().with_reset_policy(ResetPolicy::Earliest);
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), config);

    t.poller.start().await.unwrap();
    wait_for(|| t.processor.call_count() == 2).await;
    assert_eq!(t.processed(), [2, 3]);

    t.poller.close().await;
}

#[tokio::test]
async fn test_reset_policy_latest() {
    let shard = shard_with(2);
    let config = test_config().with_reset_policy(ResetPolicy::Latest);
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), config);

    t.poller.start().await.unwrap();
    assert_eq!(t.poller.batch_start_pointer(), Offset::new(2));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(t.processor.call_count(), 0);
    assert_eq!(t.poller.batch_start_pointer(), Offset::new(2));

    // Only messages appended after start are read.
    shard.push("message-2".to_string());
    wait_for(|| t.processor.call_count() == 1).await;
    assert_eq!(t.processed(), [2]);

    t.poller.close().await;
}

#[tokio::test]
async fn test_start_twice() {
    let shard = shard_with(0);
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    t.poller.start().await.unwrap();
    assert_matches!(t.poller.start().await, Err(PollerError::AlreadyStarted));

    t.poller.close().await;
}

#[tokio::test]
async fn test_poll_once_not_started() {
    let shard = shard_with(2);
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    let err = t.poller.poll_once().await.unwrap_err();
    assert_matches!(err, PollerError::NotStarted);
    assert_eq!(err.to_string(), "poller is not started");
    assert_eq!(t.processor.call_count(), 0);

    t.poller.close().await;
}

#[tokio::test]
async fn test_poll_once_closed() {
    let shard = shard_with(2);
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    t.poller.start().await.unwrap();
    t.poller.close().await;

    let err = t.poller.poll_once().await.unwrap_err();
    assert_matches!(err, PollerError::Closed);
    assert_eq!(err.to_string(), "poller is closed");
}

#[tokio::test]
async fn test_poll_once_batches() {
    let shard = shard_with(3);
    let config = test_config().with_max_messages(MaxMessages::from_count(2));
    let t = TestPoller::new(&shard, 0, [1], MockProcessor::default(), config);

    // Keep the background loop out of the way.
    t.poller.pause();
    t.poller.start().await.unwrap();
    wait_for(|| t.poller.state() == PollerState::Paused).await;

    let got = t.poller.poll_once().await.unwrap();
    assert_eq!(
        got,
        PollOutcome {
            processed: 1,
            already_persisted: 1,
            dropped: 0,
        }
    );
    assert_eq!(t.poller.batch_start_pointer(), Offset::new(2));

    let got = t.poller.poll_once().await.unwrap();
    assert_eq!(got.processed, 1);
    assert_eq!(t.poller.batch_start_pointer(), Offset::new(3));

    // Caught up: the timeout is an empty poll, not an error.
    let got = t.poller.poll_once().await.unwrap();
    assert!(got.is_empty());
    assert_eq!(t.poller.batch_start_pointer(), Offset::new(3));

    assert_eq!(t.processed(), [0, 2]);
    assert_eq!(shard.reads(), [Offset::new(0), Offset::new(2), Offset::new(3)]);

    t.poller.close().await;
}

#[tokio::test]
async fn test_poll_once_consumer_error() {
    let shard = shard_with(1);
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    t.poller.pause();
    t.poller.start().await.unwrap();
    wait_for(|| t.poller.state() == PollerState::Paused).await;

    shard.push_error(ConsumerError::io("connection reset"));
    let err = t.poller.poll_once().await.unwrap_err();
    assert_matches!(&err, PollerError::Consumer { source, .. } => {
        assert_eq!(source.kind(), ConsumerErrorKind::Io);
    });
    assert_eq!(t.poller.batch_start_pointer(), Offset::new(0));

    // The next poll reads from the same pointer.
    let got = t.poller.poll_once().await.unwrap();
    assert_eq!(got.processed, 1);

    t.poller.close().await;
}

#[tokio::test]
async fn test_consumer_error_retried_by_loop() {
    let shard = shard_with(2);
    shard.push_error(ConsumerError::io("connection reset"));
    shard.push_error(ConsumerError::unknown("bananas"));
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    t.poller.start().await.unwrap();
    wait_for(|| t.processor.call_count() == 2).await;
    assert_eq!(t.processed(), [0, 1]);
    assert_eq!(
        &shard.reads()[..3],
        [Offset::new(0), Offset::new(0), Offset::new(0)]
    );

    let errors = t
        .metrics
        .get_instrument::<Metric<U64Counter>>("ingest_poller_consumer_errors")
        .expect("did not find consumer error metric")
        .get_observer(&Attributes::from(&[("shard_id", "1"), ("kind", "io")]))
        .expect("did not match metric attributes")
        .fetch();
    assert_eq!(errors, 1);

    t.poller.close().await;
}

#[tokio::test]
async fn test_closed_consumer_stops_loop() {
    let shard = shard_with(2);
    shard.push_error(ConsumerError::closed());
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    t.poller.start().await.unwrap();
    wait_for(|| t.poller.is_closed()).await;
    assert_eq!(t.processor.call_count(), 0);
    assert!(t.poller.failure().is_none());

    t.poller.close().await;
    assert_eq!(shard.close_count(), 1);
}

#[tokio::test]
async fn test_order_preserved_across_batches() {
    let shard = shard_with(0);
    let config = test_config().with_max_messages(MaxMessages::from_count(3));
    let t = TestPoller::new(&shard, 0, [4, 7], MockProcessor::default(), config);

    t.poller.start().await.unwrap();
    for i in 0..10 {
        shard.push(format!("message-{i}"));
        tokio::task::yield_now().await;
    }

    wait_for(|| t.poller.batch_start_pointer() == Offset::new(10)).await;
    assert_eq!(t.processed(), [0, 1, 2, 3, 5, 6, 8, 9]);
    assert_eq!(t.poller.max_persisted_pointer(), Some(Offset::new(7)));

    t.poller.close().await;
}

#[tokio::test]
async fn test_drop_releases_consumer() {
    let shard = shard_with(1);
    let t = TestPoller::new(&shard, 0, [], MockProcessor::default(), test_config());

    t.poller.start().await.unwrap();
    wait_for(|| t.processor.call_count() == 1).await;
    drop(t);

    wait_for(|| shard.close_count() == 1).await;
}

fn fail(msg: &str) -> Result<(), MockProcessorError> {
    Err(MockProcessorError(msg.to_string()))
}

macro_rules! test_error_policy {
    (
        $name:ident,
        policy = $policy:expr,
        process_ret = $ret:expr,
        want_processed = $want_processed:expr,
        want_batch_start = $want_batch_start:expr,
        want_failed = $want_failed:expr,
        want_failure = $($want_failure:tt)+
    ) => {
        paste::paste! {
            #[test_log::test(tokio::test)]
            async fn [<test_error_policy_ $name>]() {
                let shard = shard_with(3);
                let processor = MockProcessor::default().with_process_return($ret);
                let config = test_config().with_error_policy($policy);
                let t = TestPoller::new(&shard, 0, [], processor, config);

                t.poller.start().await.unwrap();
                wait_for(|| {
                    t.poller.is_closed() || t.poller.batch_start_pointer() == Offset::new(3)
                })
                .await;

                assert_eq!(t.processed(), $want_processed);
                assert_eq!(t.poller.batch_start_pointer(), Offset::new($want_batch_start));
                assert_eq!(t.message_count("failed"), $want_failed);

                let failure = t.poller.failure();
                assert_matches!(failure.as_deref(), $($want_failure)+);

                t.poller.close().await;
                assert_eq!(t.poller.state(), PollerState::Closed);
                assert_eq!(shard.close_count(), 1);
            }
        }
    };
}

test_error_policy!(
    halt,
    policy = ProcessingErrorPolicy::Halt,
    process_ret = [Ok(()), fail("bananas")],
    want_processed = [0, 1],
    want_batch_start = 1,
    want_failed = 1,
    want_failure = Some(PollerError::Processing { pointer, source, .. }) => {
        assert_eq!(pointer, "1");
        assert_eq!(source.to_string(), "mock processor error: bananas");
    }
);

test_error_policy!(
    skip,
    policy = ProcessingErrorPolicy::Skip,
    process_ret = [Ok(()), fail("bananas")],
    want_processed = [0, 1, 2],
    want_batch_start = 3,
    want_failed = 1,
    want_failure = None
);

test_error_policy!(
    retry_succeeds,
    policy = ProcessingErrorPolicy::Retry {
        max_retries: 2,
        backoff: Duration::from_millis(1),
    },
    process_ret = [fail("one"), fail("two"), Ok(())],
    want_processed = [0, 0, 0, 1, 2],
    want_batch_start = 3,
    want_failed = 2,
    want_failure = None
);

test_error_policy!(
    retry_exhausted,
    policy = ProcessingErrorPolicy::Retry {
        max_retries: 1,
        backoff: Duration::from_millis(1),
    },
    process_ret = [fail("one"), fail("two")],
    want_processed = [0, 0],
    want_batch_start = 0,
    want_failed = 2,
    want_failure = Some(PollerError::Processing { pointer, .. }) => {
        assert_eq!(pointer, "0");
    }
);

#[tokio::test]
async fn test_end_of_shard_halts() {
    let shard = MockShardState::starting_at(SHARD, Offset::new(i64::MAX - 1));
    shard.push("penultimate".to_string());
    shard.push("last".to_string());
    let t = TestPoller::new(
        &shard,
        i64::MAX - 1,
        [],
        MockProcessor::default(),
        test_config(),
    );

    t.poller.start().await.unwrap();
    t.poller
        .wait_for_stop()
        .with_timeout_panic(Duration::from_secs(5))
        .await;
    t.poller.close().await;

    assert_eq!(t.processed(), [i64::MAX - 1, i64::MAX]);
    assert_eq!(t.poller.batch_start_pointer(), Offset::new(i64::MAX));
    assert_matches!(
        t.poller.failure().as_deref(),
        Some(PollerError::EndOfShard { pointer, .. }) => {
            assert_eq!(pointer, &i64::MAX.to_string());
        }
    );
    assert!(t.poller.is_closed());
}

#[tokio::test]
async fn test_halted_poller_rejects_polls() {
    let shard = shard_with(1);
    let processor = MockProcessor::default().with_process_return([fail("bananas")]);
    let t = TestPoller::new(&shard, 0, [], processor, test_config());

    t.poller.start().await.unwrap();
    wait_for(|| t.poller.is_closed()).await;

    assert_matches!(t.poller.poll_once().await, Err(PollerError::Closed));
    assert_matches!(t.poller.start().await, Err(PollerError::Closed));
    assert_eq!(shard.close_count(), 1);
}

#[tokio::test]
async fn test_wait_for_stop_on_halt() {
    let shard = shard_with(1);
    let processor = MockProcessor::default().with_process_return([fail("bananas")]);
    let t = TestPoller::new(&shard, 0, [], processor, test_config());

    t.poller.start().await.unwrap();
    t.poller
        .wait_for_stop()
        .with_timeout_panic(Duration::from_secs(5))
        .await;
    t.poller.close().await;

    assert_eq!(t.poller.state(), PollerState::Closed);
    assert_matches!(t.poller.failure().as_deref(), Some(PollerError::Processing { .. }));
}
