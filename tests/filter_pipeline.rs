//! Filter orchestration over realistic event streams.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use logdag::config::{FilterConfig, SampleRule};
use logdag::event::loader::{EventLoader, RawRecord, RecordLoader};
use logdag::event::{EventDefinition, EventSource};
use logdag::filter::linear::filter_linear;
use logdag::filter::periodic::{filter_periodic, PeriodicMethod};
use logdag::filter::{apply_filter, FilterAction, FilterOutcome, PeriodicTest};
use logdag::series::discretize::sequential_timestamps;
use logdag::series::TimeWindow;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

fn event() -> EventDefinition {
    EventDefinition::new(EventSource::Log, "rt1", "linkdown")
}

fn loader_for(timestamps: &[DateTime<Utc>]) -> RecordLoader {
    let records = timestamps.iter().map(|t| RawRecord {
        source: EventSource::Log,
        host: "rt1".into(),
        group: "linkdown".into(),
        time: *t,
        value: 1.0,
    });
    RecordLoader::from_records(EventSource::Log, records)
}

fn ten_days() -> TimeWindow {
    TimeWindow::new(t0(), t0() + Duration::days(10)).unwrap()
}

fn every_six_hours() -> Vec<DateTime<Utc>> {
    (0..40).map(|i| t0() + Duration::hours(6 * i)).collect()
}

fn hourly_rule_conf(action: FilterAction) -> FilterConfig {
    FilterConfig {
        action,
        linear_binsize: Duration::hours(1),
        sample_rules: vec![SampleRule {
            duration: Duration::days(10),
            binsize: Duration::hours(1),
        }],
        ..FilterConfig::default()
    }
}

#[test]
fn test_disabled_filter_passes_everything_through() {
    let ts = every_six_hours();
    let conf = FilterConfig {
        enabled: false,
        ..hourly_rule_conf(FilterAction::RemoveLinear)
    };
    let outcome = apply_filter(&conf, &loader_for(&ts), &event(), &ten_days(), ts.clone()).unwrap();
    assert_eq!(outcome, FilterOutcome::None { timestamps: ts });
}

#[test]
fn test_noise_is_kept_verbatim() {
    let mut rng = StdRng::seed_from_u64(7);
    let span_ms = ten_days().span().num_milliseconds();
    let mut ts: Vec<_> = (0..40)
        .map(|_| t0() + Duration::milliseconds(rng.gen_range(0..span_ms)))
        .collect();
    ts.sort();

    let conf = FilterConfig {
        linear_threshold: 0.01,
        fourier_p_value: 1e-3,
        ..hourly_rule_conf(FilterAction::RemoveLinear)
    };
    let outcome = apply_filter(&conf, &loader_for(&ts), &event(), &ten_days(), ts.clone()).unwrap();
    assert_eq!(outcome, FilterOutcome::None { timestamps: ts });
    assert_eq!(outcome.value(), None);
}

#[test]
fn test_action_order_decides_between_period_and_const() {
    let ts = every_six_hours();
    let loader = loader_for(&ts);
    assert!(filter_linear(&ts, &ten_days(), Duration::hours(1), 0.5, 10).unwrap());

    let periodic_first = apply_filter(
        &hourly_rule_conf(FilterAction::RemoveLinear),
        &loader,
        &event(),
        &ten_days(),
        ts.clone(),
    )
    .unwrap();
    assert_eq!(
        periodic_first,
        FilterOutcome::Period {
            residual: None,
            interval: Duration::hours(6),
        }
    );
    assert_eq!(periodic_first.value(), Some(21600.0));

    let linear_first = apply_filter(
        &hourly_rule_conf(FilterAction::LinearRemove),
        &loader,
        &event(),
        &ten_days(),
        ts,
    )
    .unwrap();
    assert_eq!(linear_first, FilterOutcome::Const { daily_rate: 4.0 });
    assert!(linear_first.timestamps().is_empty());
}

#[test]
fn test_correlation_test_reports_the_same_period() {
    let ts = every_six_hours();
    let conf = FilterConfig {
        periodic_test: PeriodicTest::Corr,
        ..hourly_rule_conf(FilterAction::Replace)
    };
    let outcome = apply_filter(&conf, &loader_for(&ts), &event(), &ten_days(), ts).unwrap();
    assert_eq!(
        outcome,
        FilterOutcome::Period {
            residual: None,
            interval: Duration::hours(6),
        }
    );
}

#[test]
fn test_hourly_events_over_one_day() {
    let day = TimeWindow::new(t0(), t0() + Duration::days(1)).unwrap();
    let ts: Vec<_> = (0..24).map(|h| t0() + Duration::hours(h)).collect();

    let series = sequential_timestamps(&ts, &day, Duration::hours(1)).unwrap();
    assert_eq!(series, vec![1.0; 24]);
    assert!(filter_linear(&ts, &day, Duration::hours(1), 0.5, 10).unwrap());

    let conf = FilterConfig {
        sample_rules: vec![SampleRule {
            duration: Duration::days(1),
            binsize: Duration::hours(1),
        }],
        ..FilterConfig::default()
    };
    let loader = loader_for(&ts);
    let found = filter_periodic(&conf, &loader, &event(), &day, &ts, PeriodicMethod::Remove).unwrap();
    assert!(found.is_none());

    let outcome = apply_filter(&conf, &loader, &event(), &day, ts).unwrap();
    assert_eq!(outcome, FilterOutcome::Const { daily_rate: 24.0 });
}

#[test]
fn test_look_back_rule_reloads_history() {
    let all = every_six_hours();
    let loader = loader_for(&all);
    let last_day = TimeWindow::new(t0() + Duration::days(9), t0() + Duration::days(10)).unwrap();
    let today = loader.load_timestamps(&event(), &last_day).unwrap().unwrap();
    assert_eq!(today.len(), 4);

    let conf = FilterConfig {
        pre_count: 2,
        ..hourly_rule_conf(FilterAction::Remove)
    };
    let found = filter_periodic(&conf, &loader, &event(), &last_day, &today, PeriodicMethod::Remove)
        .unwrap()
        .unwrap();
    assert!((found.interval - Duration::hours(6)).num_seconds().abs() <= 3600);
    assert!(found.residual.is_none());
}

#[test]
fn test_replace_keeps_the_aperiodic_occurrence() {
    let mut ts = every_six_hours();
    let stray = t0() + Duration::hours(100) + Duration::minutes(30);
    ts.push(stray);
    ts.sort();

    let outcome = apply_filter(
        &hourly_rule_conf(FilterAction::ReplaceLinear),
        &loader_for(&ts),
        &event(),
        &ten_days(),
        ts,
    )
    .unwrap();
    let FilterOutcome::Period { residual, interval } = outcome else {
        panic!("expected a periodic outcome, got {:?}", outcome);
    };
    assert_eq!(interval, Duration::hours(6));
    assert_eq!(residual, Some(vec![t0() + Duration::hours(100)]));
}

#[test]
fn test_replace_residual_is_clipped_to_the_window() {
    let mut all = every_six_hours();
    all.push(t0() + Duration::hours(100) + Duration::minutes(30));
    all.push(t0() + Duration::hours(230) + Duration::minutes(30));
    all.sort();
    let loader = loader_for(&all);

    let last_day = TimeWindow::new(t0() + Duration::days(9), t0() + Duration::days(10)).unwrap();
    let today = loader.load_timestamps(&event(), &last_day).unwrap().unwrap();
    assert_eq!(today.len(), 5);

    let conf = hourly_rule_conf(FilterAction::Replace);
    let found = filter_periodic(&conf, &loader, &event(), &last_day, &today, PeriodicMethod::Replace)
        .unwrap()
        .unwrap();
    assert_eq!(found.interval, Duration::hours(6));
    // The stray on day 4 is part of the sample but not of this window.
    assert_eq!(found.residual, Some(vec![t0() + Duration::hours(230)]));
}

#[test]
fn test_inverted_sample_rule_is_an_error() {
    let day = TimeWindow::new(t0(), t0() + Duration::days(1)).unwrap();
    let ts: Vec<_> = (0..24).map(|h| t0() + Duration::hours(h)).collect();
    let conf = FilterConfig {
        sample_rules: vec![SampleRule {
            duration: Duration::days(-1),
            binsize: Duration::hours(1),
        }],
        ..FilterConfig::default()
    };
    assert!(apply_filter(&conf, &loader_for(&ts), &event(), &day, ts).is_err());
}

#[test]
fn test_sparse_events_skip_the_periodic_test() {
    let ts: Vec<_> = (0..3).map(|i| t0() + Duration::days(3 * i)).collect();
    let conf = hourly_rule_conf(FilterAction::Remove);
    let found = filter_periodic(
        &conf,
        &loader_for(&ts),
        &event(),
        &ten_days(),
        &ts,
        PeriodicMethod::Remove,
    )
    .unwrap();
    assert!(found.is_none());
}
