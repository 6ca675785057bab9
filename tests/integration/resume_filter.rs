//! Resume filtering against files and manifest entries on disk

use crate::support::{ppt_1971_request, sample_archive};
use chrono::Utc;
use prism_bulk_downloader::catalog::{build_catalog, RetrievalTarget};
use prism_bulk_downloader::resume::{
    file_sha256, sweep_temp_files, DownloadManifest, ManifestEntry, ResumeFilter,
};
use std::path::Path;
use tempfile::TempDir;

fn place(target: &RetrievalTarget, content: &[u8]) {
    std::fs::create_dir_all(target.local_path.parent().unwrap()).unwrap();
    std::fs::write(&target.local_path, content).unwrap();
}

fn manifest_with(root: &Path, target: &RetrievalTarget) -> DownloadManifest {
    let mut manifest = DownloadManifest::new();
    manifest.record(
        DownloadManifest::relative_key(root, &target.local_path).unwrap(),
        ManifestEntry {
            bytes: std::fs::metadata(&target.local_path).unwrap().len(),
            sha256: file_sha256(&target.local_path).unwrap(),
            completed_at: Utc::now(),
        },
    );
    manifest
}

#[test]
fn test_partition_keeps_catalog_order() {
    let dir = TempDir::new().unwrap();
    let targets = build_catalog(&ppt_1971_request(dir.path())).unwrap();
    place(&targets[1], &sample_archive());
    place(&targets[4], &sample_archive());
    place(&targets[5], b"");

    let mut filter = ResumeFilter::new(dir.path(), DownloadManifest::new());
    let partition = filter.partition(targets);

    let skipped: Vec<usize> = partition.skipped.iter().map(|t| t.ordinal).collect();
    let pending: Vec<usize> = partition.pending.iter().map(|t| t.ordinal).collect();
    assert_eq!(skipped, vec![1, 4]);
    assert_eq!(pending, vec![0, 2, 3, 5, 6, 7, 8, 9, 10, 11]);
}

#[test]
fn test_same_size_corruption_needs_checksum_verification() {
    let dir = TempDir::new().unwrap();
    let targets = build_catalog(&ppt_1971_request(dir.path())).unwrap();
    let target = &targets[0];
    place(target, &sample_archive());
    let manifest = manifest_with(dir.path(), target);

    let mut corrupted = sample_archive();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xff;
    place(target, &corrupted);

    let mut by_size = ResumeFilter::new(dir.path(), manifest.clone());
    assert!(by_size.is_satisfied(target));

    let mut by_hash = ResumeFilter::new(dir.path(), manifest).with_checksum_verification(true);
    assert!(!by_hash.is_satisfied(target));
    assert!(by_hash.into_manifest().is_empty());
}

#[test]
fn test_min_file_size_threshold() {
    let dir = TempDir::new().unwrap();
    let targets = build_catalog(&ppt_1971_request(dir.path())).unwrap();
    place(&targets[0], &[0u8; 100]);

    let mut strict = ResumeFilter::new(dir.path(), DownloadManifest::new()).with_min_file_size(1024);
    assert!(!strict.is_satisfied(&targets[0]));

    let mut lenient = ResumeFilter::new(dir.path(), DownloadManifest::new()).with_min_file_size(100);
    assert!(lenient.is_satisfied(&targets[0]));
}

#[test]
fn test_sweep_removes_only_abandoned_parts() {
    let dir = TempDir::new().unwrap();
    let targets = build_catalog(&ppt_1971_request(dir.path())).unwrap();
    place(&targets[0], &sample_archive());
    let archive_dir = targets[0].local_path.parent().unwrap();
    std::fs::write(archive_dir.join(".prism-x1y2z3.part"), b"half").unwrap();
    std::fs::write(archive_dir.join(".prism-a9b8c7.part"), b"").unwrap();
    std::fs::write(archive_dir.join("notes.txt"), b"keep me").unwrap();

    let removed = sweep_temp_files(&targets);

    assert_eq!(removed, 2);
    let mut remaining: Vec<String> = std::fs::read_dir(archive_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    remaining.sort();
    assert_eq!(
        remaining,
        vec![
            "PRISM_ppt_stable_4kmM3_197101_bil.zip".to_string(),
            "notes.txt".to_string()
        ]
    );
}

#[test]
fn test_sweep_tolerates_missing_directories() {
    let dir = TempDir::new().unwrap();
    let targets = build_catalog(&ppt_1971_request(&dir.path().join("never-created"))).unwrap();
    assert_eq!(sweep_temp_files(&targets), 0);
}
