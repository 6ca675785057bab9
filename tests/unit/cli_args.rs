use clap::Parser;
use prism_bulk_downloader::cli::download::{parse_date_bound, DateBound};
use prism_bulk_downloader::cli::{Cli, Commands, OutputFormat};
use prism_bulk_downloader::{SpatialResolution, TemporalResolution, Variable};
use std::path::PathBuf;
use std::time::Duration;

fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
    Cli::try_parse_from(std::iter::once("prism-bulk-downloader").chain(args.iter().copied()))
}

#[test]
fn test_download_defaults() {
    let cli = parse(&[
        "download",
        "--resolution",
        "monthly",
        "--start",
        "1971",
        "--end",
        "1971",
        "--variables",
        "ppt",
    ])
    .unwrap();

    assert_eq!(cli.output_format, OutputFormat::Human);
    assert_eq!(cli.output_dir, PathBuf::from("prism_data"));
    assert_eq!(cli.concurrency, 4);
    assert_eq!(cli.max_attempts, 5);
    assert!(cli.metrics_addr.is_none());

    let Commands::Download(args) = &cli.command else {
        panic!("expected download command");
    };
    assert_eq!(args.spatial, SpatialResolution::FourKm);
    assert!(!args.flat);
    assert!(!args.extract);

    let request = args.to_request(&cli).unwrap();
    assert_eq!(request.variables, vec![Variable::Ppt]);
    assert_eq!(request.temporal_resolution, TemporalResolution::Monthly);
    assert_eq!(request.date_end.to_string(), "1971-12-31");
}

#[test]
fn test_global_options_after_subcommand() {
    let cli = parse(&[
        "plan",
        "--resolution",
        "daily",
        "--start",
        "2020-02",
        "--end",
        "2020-02",
        "--variables",
        "tmin,tmax",
        "--concurrency",
        "8",
        "--politeness-ms",
        "250",
        "--grace-period-secs",
        "5",
        "--output-dir",
        "/tmp/prism",
        "--output-format",
        "json",
    ])
    .unwrap();

    assert!(matches!(cli.command, Commands::Plan(_)));
    assert_eq!(cli.output_format, OutputFormat::Json);
    let pool = cli.pool_config();
    assert_eq!(pool.max_concurrency, 8);
    assert_eq!(pool.politeness_delay, Duration::from_millis(250));
    assert_eq!(pool.grace_period, Duration::from_secs(5));
}

#[test]
fn test_out_of_range_values_rejected() {
    let base = [
        "download",
        "--resolution",
        "monthly",
        "--start",
        "1971",
        "--end",
        "1971",
        "--variables",
        "ppt",
    ];
    for extra in [
        ["--concurrency", "0"],
        ["--concurrency", "33"],
        ["--max-attempts", "0"],
        ["--max-attempts", "21"],
        ["--jitter", "1.5"],
        ["--fallback-after", "0"],
    ] {
        let args: Vec<&str> = base.iter().copied().chain(extra).collect();
        assert!(parse(&args).is_err(), "{extra:?} accepted");
    }
}

#[test]
fn test_missing_variables_rejected() {
    let result = parse(&[
        "download",
        "--resolution",
        "monthly",
        "--start",
        "1971",
        "--end",
        "1971",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_variables_command_filter() {
    let cli = parse(&["variables", "--resolution", "annual"]).unwrap();
    let Commands::Variables(cmd) = cli.command else {
        panic!("expected variables command");
    };
    assert!(!cmd.matching().contains(&Variable::Vpdmax));
}

#[test]
fn test_end_bound_covers_leap_february() {
    let end = parse_date_bound("2024-02", DateBound::End).unwrap();
    assert_eq!(end.to_string(), "2024-02-29");
    let start = parse_date_bound("2024-02", DateBound::Start).unwrap();
    assert_eq!(start.to_string(), "2024-02-01");
}
