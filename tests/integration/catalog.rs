//! Catalog expansion for realistic requests

use crate::support::{date, ppt_1971_request};
use prism_bulk_downloader::catalog::{build_catalog, RetrievalRequest, StabilityPolicy, Violation};
use prism_bulk_downloader::{StabilityCode, TemporalResolution, Variable};
use std::collections::HashSet;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_1971_monthly_precipitation_catalog() {
    let dir = TempDir::new().unwrap();
    let targets = build_catalog(&ppt_1971_request(dir.path())).unwrap();

    assert_eq!(targets.len(), 12);
    for (i, target) in targets.iter().enumerate() {
        assert_eq!(target.ordinal, i);
        assert_eq!(target.period_key, format!("1971{:02}", i + 1));
        assert_eq!(target.stability, StabilityCode::Stable);
    }
    assert_eq!(
        targets[6].local_path,
        dir.path()
            .join("ppt")
            .join("monthly")
            .join("PRISM_ppt_stable_4kmM3_197107_bil.zip")
    );
    assert_eq!(
        targets[11].primary_url,
        "https://services.nacse.org/prism/data/public/4km/ppt/197112"
    );
}

#[test]
fn test_multi_variable_catalog_is_period_major_and_unique() {
    let request = RetrievalRequest::new(
        date(2020, 2, 1),
        date(2020, 3, 31),
        vec![Variable::Tmax, Variable::Ppt, Variable::Tmax, Variable::Vpdmax],
        TemporalResolution::Daily,
        "/data",
    )
    .with_reference_date(date(2024, 6, 15));

    let targets = build_catalog(&request).unwrap();

    // 29 + 31 days, three distinct variables
    assert_eq!(targets.len(), 60 * 3);
    let order: Vec<Variable> = targets[..3].iter().map(|t| t.variable).collect();
    assert_eq!(order, vec![Variable::Tmax, Variable::Ppt, Variable::Vpdmax]);
    assert_eq!(targets[3].period_key, "20200202");
    assert!(targets.iter().any(|t| t.period_key == "20200229"));

    let paths: HashSet<&PathBuf> = targets.iter().map(|t| &t.local_path).collect();
    assert_eq!(paths.len(), targets.len());
    let urls: HashSet<&String> = targets.iter().map(|t| &t.primary_url).collect();
    assert_eq!(urls.len(), targets.len());
}

#[test]
fn test_recent_periods_take_newer_release_tags() {
    let request = RetrievalRequest::new(
        date(2024, 1, 1),
        date(2024, 6, 15),
        vec![Variable::Tmean],
        TemporalResolution::Monthly,
        "/data",
    )
    .with_reference_date(date(2024, 6, 20))
    .with_stability_policy(StabilityPolicy {
        provisional_months: 3,
        early_window_days: Some(10),
    });

    let targets = build_catalog(&request).unwrap();
    let tags: Vec<StabilityCode> = targets.iter().map(|t| t.stability).collect();

    assert_eq!(
        tags,
        vec![
            StabilityCode::Stable,
            StabilityCode::Stable,
            StabilityCode::Provisional,
            StabilityCode::Provisional,
            StabilityCode::Provisional,
            StabilityCode::Early,
        ]
    );
    assert!(targets[5]
        .fallback_url
        .ends_with("/monthly/tmean/2024/PRISM_tmean_early_4kmM3_202406_bil.zip"));
}

#[test]
fn test_flat_annual_layout() {
    let request = RetrievalRequest::new(
        date(1990, 6, 1),
        date(1992, 2, 1),
        vec![Variable::Ppt],
        TemporalResolution::Annual,
        "/data",
    )
    .with_reference_date(date(2024, 6, 15))
    .with_nesting(false);

    let targets = build_catalog(&request).unwrap();

    let keys: Vec<&str> = targets.iter().map(|t| t.period_key.as_str()).collect();
    assert_eq!(keys, vec!["1990", "1991", "1992"]);
    assert_eq!(
        targets[0].local_path,
        PathBuf::from("/data/ppt/PRISM_ppt_stable_4kmM3_1990_bil.zip")
    );
}

#[test]
fn test_request_rejections() {
    let daily_too_early = RetrievalRequest::new(
        date(1975, 1, 1),
        date(1975, 1, 31),
        vec![Variable::Ppt],
        TemporalResolution::Daily,
        "/data",
    )
    .with_reference_date(date(2024, 6, 15));
    let err = build_catalog(&daily_too_early).unwrap_err();
    assert!(matches!(err.violations[0], Violation::BeforeEarliest { .. }));

    let future = RetrievalRequest::new(
        date(2024, 1, 1),
        date(2025, 1, 31),
        vec![Variable::Ppt],
        TemporalResolution::Monthly,
        "/data",
    )
    .with_reference_date(date(2024, 6, 15));
    let err = build_catalog(&future).unwrap_err();
    assert!(matches!(err.violations[0], Violation::NotYetPublished { .. }));

    let annual_vpd = RetrievalRequest::new(
        date(2000, 1, 1),
        date(2001, 1, 1),
        vec![Variable::Vpdmin],
        TemporalResolution::Annual,
        "/data",
    )
    .with_reference_date(date(2024, 6, 15));
    let err = build_catalog(&annual_vpd).unwrap_err();
    assert_eq!(
        err.violations,
        vec![Violation::UnsupportedCombination {
            variable: Variable::Vpdmin,
            resolution: TemporalResolution::Annual,
        }]
    );
}
