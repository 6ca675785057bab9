use prism_bulk_downloader::output::{archive_file_name, is_temp_artifact, TargetPathBuilder};
use prism_bulk_downloader::{SpatialResolution, StabilityCode, TemporalResolution, Variable};
use std::path::PathBuf;

#[test]
fn test_monthly_archive_lands_under_variable_and_resolution() {
    let path = TargetPathBuilder::new(PathBuf::from("prism_data"), Variable::Ppt, TemporalResolution::Monthly)
        .with_stability(StabilityCode::Stable)
        .with_period_key("197107")
        .build();

    assert_eq!(
        path,
        PathBuf::from("prism_data/ppt/monthly/PRISM_ppt_stable_4kmM3_197107_bil.zip")
    );
}

#[test]
fn test_file_name_mirrors_upstream_naming() {
    let cases = [
        (
            Variable::Tdmean,
            StabilityCode::Early,
            SpatialResolution::FourKm,
            TemporalResolution::Daily,
            "20240610",
            "PRISM_tdmean_early_4kmD2_20240610_bil.zip",
        ),
        (
            Variable::Vpdmax,
            StabilityCode::Provisional,
            SpatialResolution::EightHundredM,
            TemporalResolution::Monthly,
            "202403",
            "PRISM_vpdmax_provisional_800mM3_202403_bil.zip",
        ),
        (
            Variable::Tmin,
            StabilityCode::Stable,
            SpatialResolution::FourKm,
            TemporalResolution::Annual,
            "1999",
            "PRISM_tmin_stable_4kmM3_1999_bil.zip",
        ),
    ];

    for (variable, stability, spatial, temporal, key, expected) in cases {
        assert_eq!(archive_file_name(variable, stability, spatial, temporal, key), expected);
    }
}

#[test]
fn test_directory_without_resolution_level() {
    let builder = TargetPathBuilder::new(PathBuf::from("/srv/prism"), Variable::Tmax, TemporalResolution::Daily)
        .nested(false);

    assert_eq!(builder.directory(), PathBuf::from("/srv/prism/tmax"));
}

#[test]
fn test_archive_names_never_look_like_temp_files() {
    let name = archive_file_name(
        Variable::Ppt,
        StabilityCode::Stable,
        SpatialResolution::FourKm,
        TemporalResolution::Monthly,
        "197101",
    );
    assert!(!is_temp_artifact(&name));
    assert!(is_temp_artifact(".prism-3fQz9a.part"));
}
