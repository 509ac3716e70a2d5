//! End-to-end tests against the ingester API.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tephra_common::{LocalConfig, MockClock, ObjectStoreConfig, RequestContext};
use tephra_ingester::wire::{
    MatcherType, QueryRequest, WireLabel, WireMatcher, WireSample, WireSeries, WriteRequest,
};
use tephra_ingester::{IngestError, Ingester, IngesterConfig, Metrics, TsdbConfig};

fn config(dir: &Path) -> IngesterConfig {
    IngesterConfig {
        tsdb: TsdbConfig {
            dir: dir.to_path_buf(),
            ship_interval: Duration::ZERO,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn ingester_with(config: IngesterConfig) -> Arc<Ingester> {
    Arc::new(Ingester::new(config, Arc::new(Metrics::new())).unwrap())
}

fn series(labels: &[(&str, &str)], samples: &[(i64, f64)]) -> WireSeries {
    WireSeries {
        labels: labels
            .iter()
            .map(|&(name, value)| WireLabel {
                name: name.to_string(),
                value: value.to_string(),
            })
            .collect(),
        samples: samples
            .iter()
            .map(|&(ts_ms, value)| WireSample { ts_ms, value })
            .collect(),
    }
}

fn query_all(start_ms: i64, end_ms: i64) -> QueryRequest {
    QueryRequest {
        start_ms,
        end_ms,
        matchers: vec![WireMatcher {
            matcher_type: MatcherType::Re,
            name: "__name__".to_string(),
            value: ".*".to_string(),
        }],
    }
}

#[tokio::test]
async fn should_round_trip_pushed_samples_through_query() {
    // given
    let tmp = tempfile::tempdir().unwrap();
    let ingester = ingester_with(config(tmp.path()));
    let ctx = RequestContext::for_tenant("team-a");

    let request = WriteRequest {
        series: vec![
            series(
                &[("__name__", "up"), ("job", "api")],
                &[(1000, 1.0), (2000, 0.0)],
            ),
            series(&[("__name__", "up"), ("job", "db")], &[(1500, 1.0)]),
        ],
    };

    // when
    ingester.push(&ctx, request).await.unwrap();
    let response = ingester.query(&ctx, query_all(0, 10_000)).await.unwrap();

    // then - both series come back, sorted by labels, samples in order
    assert_eq!(response.series.len(), 2);
    let api = &response.series[0];
    assert!(api.labels.iter().any(|l| l.value == "api"));
    assert_eq!(api.samples.len(), 2);
    assert_eq!(api.samples[0].ts_ms, 1000);
    assert_eq!(api.samples[1].ts_ms, 2000);
}

#[tokio::test]
async fn should_isolate_tenants_with_identical_labels() {
    // given
    let tmp = tempfile::tempdir().unwrap();
    let ingester = ingester_with(config(tmp.path()));
    let ctx_a = RequestContext::for_tenant("team-a");
    let ctx_b = RequestContext::for_tenant("team-b");

    let labels = &[("__name__", "up"), ("job", "api")];
    ingester
        .push(
            &ctx_a,
            WriteRequest {
                series: vec![series(labels, &[(1000, 1.0)])],
            },
        )
        .await
        .unwrap();
    ingester
        .push(
            &ctx_b,
            WriteRequest {
                series: vec![series(labels, &[(1000, 2.0)])],
            },
        )
        .await
        .unwrap();

    // when
    let a = ingester.query(&ctx_a, query_all(0, 10_000)).await.unwrap();
    let b = ingester.query(&ctx_b, query_all(0, 10_000)).await.unwrap();

    // then - each tenant sees only its own value
    assert_eq!(a.series.len(), 1);
    assert_eq!(a.series[0].samples[0].value, 1.0);
    assert_eq!(b.series.len(), 1);
    assert_eq!(b.series[0].samples[0].value, 2.0);
}

#[tokio::test]
async fn should_roll_back_whole_request_when_one_sample_is_rejected() {
    // given
    let tmp = tempfile::tempdir().unwrap();
    let ingester = ingester_with(config(tmp.path()));
    let ctx = RequestContext::for_tenant("team-a");

    // two series; the second sample of the second series goes backwards in
    // time and is rejected by the appender
    let request = WriteRequest {
        series: vec![
            series(&[("__name__", "up"), ("job", "api")], &[(1000, 1.0)]),
            series(
                &[("__name__", "up"), ("job", "db")],
                &[(1000, 1.0), (500, 2.0)],
            ),
        ],
    };

    // when
    let err = ingester.push(&ctx, request).await.unwrap_err();

    // then - the push fails as a whole and no sample of either series is
    // visible afterwards
    assert!(matches!(err, IngestError::InvalidRequest(_)));
    let response = ingester.query(&ctx, query_all(0, 10_000)).await.unwrap();
    assert!(response.series.is_empty());
}

#[tokio::test]
async fn should_select_series_with_translated_matchers() {
    // given
    let tmp = tempfile::tempdir().unwrap();
    let ingester = ingester_with(config(tmp.path()));
    let ctx = RequestContext::for_tenant("team-a");
    ingester
        .push(
            &ctx,
            WriteRequest {
                series: vec![
                    series(&[("__name__", "up"), ("job", "foobar")], &[(1000, 1.0)]),
                    series(&[("__name__", "up"), ("job", "xfoobar")], &[(1000, 1.0)]),
                ],
            },
        )
        .await
        .unwrap();

    // when - regex is compiled anchored, so only "foobar" matches "foo.*"
    let response = ingester
        .query(
            &ctx,
            QueryRequest {
                start_ms: 0,
                end_ms: 10_000,
                matchers: vec![WireMatcher {
                    matcher_type: MatcherType::Re,
                    name: "job".to_string(),
                    value: "foo.*".to_string(),
                }],
            },
        )
        .await
        .unwrap();

    // then
    assert_eq!(response.series.len(), 1);
    assert!(response.series[0].labels.iter().any(|l| l.value == "foobar"));
}

#[tokio::test]
async fn should_return_label_names_and_values_over_retention_window() {
    // given
    let tmp = tempfile::tempdir().unwrap();
    let ingester = ingester_with(config(tmp.path()));
    let ctx = RequestContext::for_tenant("team-a");
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    ingester
        .push(
            &ctx,
            WriteRequest {
                series: vec![
                    series(&[("__name__", "up"), ("job", "api")], &[(now_ms, 1.0)]),
                    series(&[("__name__", "up"), ("job", "db")], &[(now_ms, 1.0)]),
                ],
            },
        )
        .await
        .unwrap();

    // when
    let names = ingester.label_names(&ctx).await.unwrap();
    let values = ingester.label_values(&ctx, "job").await.unwrap();

    // then - sorted and unique
    assert_eq!(names.names, vec!["__name__", "job"]);
    assert_eq!(values.values, vec!["api", "db"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_complete_concurrent_pushes_across_shutdown() {
    // given
    let tmp = tempfile::tempdir().unwrap();
    let ingester = ingester_with(config(tmp.path()));
    let ctx = RequestContext::for_tenant("team-a");
    ingester.get_or_create("team-a").await.unwrap();

    // when - five pushes race the shutdown
    let mut pushes = Vec::new();
    for i in 0..5 {
        let ingester = ingester.clone();
        let ctx = ctx.clone();
        pushes.push(tokio::spawn(async move {
            let instance = format!("host-{}", i);
            let request = WriteRequest {
                series: vec![series(
                    &[("__name__", "up"), ("instance", instance.as_str())],
                    &[(1000, 1.0)],
                )],
            };
            ingester.push(&ctx, request).await
        }));
    }
    ingester.shutdown().await;

    // then - every push completed, either accepted or refused cleanly
    for push in pushes {
        match push.await.unwrap() {
            Ok(()) => {}
            Err(IngestError::Unavailable(_)) => {}
            Err(err) => panic!("unexpected push error: {}", err),
        }
    }

    // and the registry is empty with further writes refused
    assert_eq!(ingester.tenant_count().await, 0);
    let err = ingester
        .push(
            &ctx,
            WriteRequest {
                series: vec![series(&[("__name__", "up")], &[(2000, 1.0)])],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Unavailable(_)));
}

#[tokio::test]
async fn should_ship_sealed_blocks_to_tenant_prefix() {
    // given - a local object store we can inspect, a fast shipper, and a
    // clock pinned near the sample timestamps so retention stays out of
    // the way
    let tmp = tempfile::tempdir().unwrap();
    let objstore_dir = tmp.path().join("bucket");
    let mut cfg = config(&tmp.path().join("data"));
    cfg.tsdb.block_ranges = vec![Duration::from_secs(1)];
    cfg.tsdb.ship_interval = Duration::from_millis(100);
    cfg.object_store = ObjectStoreConfig::Local(LocalConfig {
        path: objstore_dir.display().to_string(),
    });
    let clock = Arc::new(MockClock::with_time(
        std::time::UNIX_EPOCH + Duration::from_secs(60),
    ));
    let ingester = Arc::new(
        Ingester::new_with_clock(cfg, Arc::new(Metrics::new()), clock).unwrap(),
    );
    let ctx = RequestContext::for_tenant("team-a");

    // when - samples spanning several block windows force a cut at commit
    ingester
        .push(
            &ctx,
            WriteRequest {
                series: vec![series(
                    &[("__name__", "up")],
                    &[(100, 1.0), (1500, 2.0), (3200, 3.0)],
                )],
            },
        )
        .await
        .unwrap();
    let db = ingester.get_or_create("team-a").await.unwrap();
    assert!(!db.blocks().is_empty());

    // and the shipper gets a few ticks
    tokio::time::sleep(Duration::from_millis(500)).await;

    // then - the blocks landed under the tenant prefix
    let tenant_prefix = objstore_dir.join("team-a");
    let mut uploaded = Vec::new();
    for entry in std::fs::read_dir(&tenant_prefix).unwrap() {
        uploaded.push(entry.unwrap().file_name());
    }
    assert_eq!(uploaded.len(), db.blocks().len());

    ingester.shutdown().await;
}
