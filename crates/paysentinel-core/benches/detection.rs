use std::time::Duration;

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use paysentinel::alerting::{
    aggregate, resolve_root_cause, DetectorId, EvaluationKey, Evidence, StateStore,
};
use paysentinel::models::{AlertType, IssuerBreakdown, ScopeKey};

const OUTCOMES: [&str; 3] = ["SUCCEEDED", "DECLINED", "ERROR"];
const COUNTRIES: [&str; 4] = ["MX", "BR", "CO", "CL"];
const PROVIDERS: [&str; 3] = ["STRIPE", "ADYEN", "DLOCAL"];

/// Counter entries for `merchants` tenants over a 15 minute window
fn counter_entries(merchants: usize) -> Vec<(String, i64)> {
    let mut entries = Vec::new();
    for m in 0..merchants {
        for country in COUNTRIES {
            for provider in PROVIDERS {
                for outcome in OUTCOMES {
                    for minute in 0..15 {
                        entries.push((
                            format!("stats:m-{m}:{country}:{provider}:{outcome}:2024101612{minute:02}"),
                            (m + minute) as i64 % 40,
                        ));
                    }
                }
            }
        }
    }
    // a few malformed keys mixed in
    entries.push(("stats:broken".to_string(), 1));
    entries.push(("stats:MX:STRIPE:ERROR:notaminute".to_string(), 1));
    entries
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for merchants in [1, 10, 50] {
        let entries = counter_entries(merchants);
        group.throughput(Throughput::Elements(entries.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(merchants), &entries, |b, entries| {
            b.iter(|| aggregate(black_box(entries.clone()), "stats"));
        });
    }

    group.finish();
}

fn bench_root_cause(c: &mut Criterion) {
    let issuers = vec![IssuerBreakdown {
        issuer_name: "BBVA".to_string(),
        error_count: 12,
        revenue_at_risk: 840.0,
        sub_statuses: vec!["issuer_unavailable".to_string()],
    }];

    let mut group = c.benchmark_group("root_cause");
    for (name, code, issuers) in [
        ("credentials", Some("401"), &issuers[..0]),
        ("single_issuer", Some("504"), &issuers[..]),
        ("provider_wide", Some("503"), &issuers[..0]),
    ] {
        let evidence = Evidence {
            provider: "STRIPE",
            country: "MX",
            alert_type: AlertType::HighErrorRate,
            most_common_code: code,
            issuers,
        };
        group.bench_function(name, |b| b.iter(|| resolve_root_cause(black_box(&evidence))));
    }
    group.finish();
}

fn bench_state_tracking(c: &mut Criterion) {
    let store = StateStore::new();
    let keys: Vec<EvaluationKey> = (0..1_000)
        .map(|i| EvaluationKey::new(ScopeKey::new(Some(&format!("m-{i}")), "MX", "STRIPE"), DetectorId::Fallback))
        .collect();
    let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    c.bench_function("state/record_breach_1000_keys", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(store.record_breach(key, now, Duration::from_secs(30)));
            }
        });
    });
}

criterion_group!(benches, bench_aggregate, bench_root_cause, bench_state_tracking);
criterion_main!(benches);
