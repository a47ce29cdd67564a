use super::*;
use std::cell::Cell;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use xsupdater_core::{PatchFormat, PatchRecord, UpdateError};

#[derive(Default)]
struct FakeRemote {
    bodies: HashMap<String, Vec<u8>>,
    texts: HashMap<String, String>,
    declare_length: bool,
    declared_length_override: Option<u64>,
    fail_mid_body: bool,
    calls: Cell<usize>,
}

impl FakeRemote {
    fn serving(url: &str, body: Vec<u8>) -> Self {
        let mut remote = Self {
            declare_length: true,
            ..Self::default()
        };
        remote.bodies.insert(url.to_string(), body);
        remote
    }
}

struct BrokenBody {
    sent: bool,
}

impl Read for BrokenBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.sent {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
        }
        self.sent = true;
        buf[0] = b'P';
        Ok(1)
    }
}

impl RemoteSource for FakeRemote {
    fn get_text(&self, url: &str) -> Result<String, RemoteError> {
        self.calls.set(self.calls.get() + 1);
        self.texts.get(url).cloned().ok_or(RemoteError::Status(404))
    }

    fn open(&self, url: &str) -> Result<RemoteStream, RemoteError> {
        self.calls.set(self.calls.get() + 1);
        if self.fail_mid_body {
            return Ok(RemoteStream {
                content_length: None,
                body: Box::new(BrokenBody { sent: false }),
            });
        }
        let body = self.bodies.get(url).cloned().ok_or(RemoteError::Status(404))?;
        let content_length = if self.declare_length {
            Some(self.declared_length_override.unwrap_or(body.len() as u64))
        } else {
            None
        };
        Ok(RemoteStream {
            content_length,
            body: Box::new(Cursor::new(body)),
        })
    }
}

#[derive(Default)]
struct RecordingProgress {
    started: Vec<(String, Option<u64>)>,
    advanced: u64,
    finished: bool,
    abandoned: bool,
}

impl TransferProgress for RecordingProgress {
    fn start(&mut self, label: &str, total: Option<u64>) {
        self.started.push((label.to_string(), total));
    }

    fn advance(&mut self, bytes: u64) {
        self.advanced += bytes;
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn abandon(&mut self) {
        self.abandoned = true;
    }
}

const URL: &str = "http://example.test/XS65E001.zip";

fn record() -> PatchRecord {
    PatchRecord {
        uuid: "u1".to_string(),
        name: "XS65E001".to_string(),
        description: "Security fix".to_string(),
        download_url: URL.to_string(),
    }
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).expect("must start zip entry");
        writer.write_all(data).expect("must write zip entry");
    }
    writer.finish().expect("must finish zip").into_inner()
}

fn dir_is_empty(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

fn dir_names(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(path)
        .expect("must read dir")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}

#[test]
fn cache_paths_use_platform_extension() {
    let root = tempfile::tempdir().expect("tempdir");
    let legacy = PatchCache::new(root.path(), PatchFormat::LegacyPatch);
    let image = PatchCache::new(root.path(), PatchFormat::ImageUpdate);
    assert_eq!(legacy.path("XS65E001"), root.path().join("XS65E001.xsupdate"));
    assert_eq!(image.path("XS71E001"), root.path().join("XS71E001.iso"));
    assert_eq!(image.entry("XS71E001").file_name(), "XS71E001.iso");
}

#[test]
fn cache_store_publishes_entry_with_digest() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = PatchCache::new(root.path().join("cache"), PatchFormat::LegacyPatch);
    assert!(!cache.has("XS65E001"));

    let stored = cache
        .store("XS65E001", &mut Cursor::new(b"payload".to_vec()))
        .expect("must store");

    assert!(cache.has("XS65E001"));
    assert_eq!(stored.bytes, 7);
    assert_eq!(stored.sha256, hex::encode(Sha256::digest(b"payload")));
    assert_eq!(fs::read(&stored.entry.path).expect("must read"), b"payload");
    assert_eq!(dir_names(cache.root()), vec!["XS65E001.xsupdate"]);
}

#[test]
fn cache_store_never_overwrites_existing_entry() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = PatchCache::new(root.path(), PatchFormat::ImageUpdate);
    cache
        .store("XS71E001", &mut Cursor::new(b"first".to_vec()))
        .expect("must store");

    let err = cache
        .store("XS71E001", &mut Cursor::new(b"second".to_vec()))
        .expect_err("must refuse to clobber");
    assert!(matches!(err, UpdateError::Cache { .. }));
    assert_eq!(fs::read(cache.path("XS71E001")).expect("must read"), b"first");
    assert_eq!(dir_names(cache.root()), vec!["XS71E001.iso"]);
}

#[test]
fn cache_store_discards_partial_file_on_read_failure() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = PatchCache::new(root.path(), PatchFormat::LegacyPatch);

    cache
        .store("XS65E001", &mut BrokenBody { sent: false })
        .expect_err("must fail on broken reader");
    assert!(!cache.has("XS65E001"));
    assert!(dir_is_empty(cache.root()));
}

#[test]
fn pipeline_cache_hit_performs_no_network_calls() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = PatchCache::new(root.path().join("cache"), PatchFormat::LegacyPatch);
    cache
        .store("XS65E001", &mut Cursor::new(b"cached".to_vec()))
        .expect("must seed cache");
    let remote = FakeRemote::default();
    let pipeline = TransferPipeline::new(&remote, &cache, root.path().join("scratch"));

    let outcome = pipeline
        .fetch(&record(), &mut NoProgress)
        .expect("cache hit must succeed");

    assert_eq!(outcome.as_str(), "cache-hit");
    assert_eq!(outcome.entry().path, cache.path("XS65E001"));
    assert_eq!(remote.calls.get(), 0);
}

#[test]
fn pipeline_extracts_matching_entry_into_cache() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = PatchCache::new(root.path().join("cache"), PatchFormat::LegacyPatch);
    let payload = b"xsupdate payload bytes".repeat(1000);
    let archive = zip_bytes(&[
        ("README.txt", b"read me".as_slice()),
        ("XS65E001.xsupdate", payload.as_slice()),
    ]);
    let archive_len = archive.len() as u64;
    let remote = FakeRemote::serving(URL, archive);
    let scratch = root.path().join("scratch");
    let pipeline = TransferPipeline::new(&remote, &cache, &scratch);
    let mut progress = RecordingProgress::default();

    let outcome = pipeline
        .fetch(&record(), &mut progress)
        .expect("download must succeed");

    let TransferOutcome::Downloaded {
        stored,
        archive_bytes,
    } = outcome
    else {
        panic!("expected a download");
    };
    assert_eq!(archive_bytes, archive_len);
    assert_eq!(fs::read(&stored.entry.path).expect("must read"), payload);
    assert_eq!(stored.sha256, hex::encode(Sha256::digest(&payload)));
    assert_eq!(remote.calls.get(), 1);
    assert_eq!(
        progress.started,
        vec![("XS65E001".to_string(), Some(archive_len))]
    );
    assert_eq!(progress.advanced, archive_len);
    assert!(progress.finished);
    assert!(dir_is_empty(&scratch), "scratch must be cleaned up");
}

#[test]
fn pipeline_streams_without_declared_length() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = PatchCache::new(root.path().join("cache"), PatchFormat::ImageUpdate);
    let mut remote = FakeRemote::serving(URL, zip_bytes(&[("XS65E001.iso", b"iso".as_slice())]));
    remote.declare_length = false;
    let pipeline = TransferPipeline::new(&remote, &cache, root.path().join("scratch"));
    let mut progress = RecordingProgress::default();

    pipeline
        .fetch(&record(), &mut progress)
        .expect("download without content length must succeed");

    assert_eq!(progress.started[0].1, None);
    assert_eq!(fs::read(cache.path("XS65E001")).expect("must read"), b"iso");
}

#[test]
fn pipeline_rejects_archive_without_expected_entry() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = PatchCache::new(root.path().join("cache"), PatchFormat::ImageUpdate);
    let remote = FakeRemote::serving(
        URL,
        zip_bytes(&[("XS65E001.xsupdate", b"wrong generation".as_slice())]),
    );
    let scratch = root.path().join("scratch");
    let pipeline = TransferPipeline::new(&remote, &cache, &scratch);

    let err = pipeline
        .fetch(&record(), &mut NoProgress)
        .expect_err("must reject archive without the iso");

    assert!(matches!(err, UpdateError::ArchiveFormat { .. }));
    assert!(err.to_string().contains("entry 'XS65E001.iso' not found"));
    assert!(!cache.has("XS65E001"));
    assert!(dir_is_empty(&scratch), "scratch must be cleaned up");
}

#[test]
fn pipeline_rejects_payload_that_is_not_a_zip() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = PatchCache::new(root.path().join("cache"), PatchFormat::LegacyPatch);
    let remote = FakeRemote::serving(URL, b"<html>not found</html>".to_vec());
    let pipeline = TransferPipeline::new(&remote, &cache, root.path().join("scratch"));

    let err = pipeline
        .fetch(&record(), &mut NoProgress)
        .expect_err("must reject html body");
    assert!(matches!(err, UpdateError::ArchiveFormat { .. }));
}

#[test]
fn pipeline_maps_http_failure_to_transfer_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = PatchCache::new(root.path().join("cache"), PatchFormat::LegacyPatch);
    let remote = FakeRemote::default();
    let pipeline = TransferPipeline::new(&remote, &cache, root.path().join("scratch"));

    let err = pipeline
        .fetch(&record(), &mut NoProgress)
        .expect_err("must fail on 404");
    assert!(matches!(err, UpdateError::Transfer { .. }));
    assert!(err.to_string().contains("unexpected HTTP status 404"));
}

#[test]
fn pipeline_aborts_on_broken_body_and_cleans_scratch() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = PatchCache::new(root.path().join("cache"), PatchFormat::LegacyPatch);
    let remote = FakeRemote {
        fail_mid_body: true,
        ..FakeRemote::default()
    };
    let scratch = root.path().join("scratch");
    let pipeline = TransferPipeline::new(&remote, &cache, &scratch);
    let mut progress = RecordingProgress::default();

    let err = pipeline
        .fetch(&record(), &mut progress)
        .expect_err("must fail on reset");

    assert!(err.to_string().contains("connection reset"));
    assert!(progress.abandoned);
    assert!(!progress.finished);
    assert!(!cache.has("XS65E001"));
    assert!(dir_is_empty(&scratch));
}

#[test]
fn pipeline_rejects_body_shorter_than_declared_length() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = PatchCache::new(root.path().join("cache"), PatchFormat::LegacyPatch);
    let archive = zip_bytes(&[("XS65E001.xsupdate", b"x".as_slice())]);
    let declared = archive.len() as u64 + 10;
    let mut remote = FakeRemote::serving(URL, archive);
    remote.declared_length_override = Some(declared);
    let pipeline = TransferPipeline::new(&remote, &cache, root.path().join("scratch"));

    let err = pipeline
        .fetch(&record(), &mut NoProgress)
        .expect_err("must reject truncated body");
    assert!(err.to_string().contains("declared bytes"));
    assert!(!cache.has("XS65E001"));
}

#[test]
fn fetch_catalog_returns_body_and_url() {
    let mut remote = FakeRemote::default();
    remote
        .texts
        .insert("http://example.test/updates.xml".to_string(), "<patchdata/>".to_string());

    let raw = fetch_catalog(&remote, "http://example.test/updates.xml").expect("must fetch");
    assert_eq!(raw.body, "<patchdata/>");
    assert_eq!(raw.url, "http://example.test/updates.xml");
}

#[test]
fn fetch_catalog_maps_failure_to_catalog_unavailable() {
    let remote = FakeRemote::default();
    let err = fetch_catalog(&remote, "http://example.test/updates.xml").expect_err("must fail");
    assert!(matches!(err, UpdateError::CatalogUnavailable { .. }));
    assert!(err.to_string().contains("404"));
}
