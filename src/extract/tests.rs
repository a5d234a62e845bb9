use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use super::*;
use crate::header::{ArchiveHeader, ContentLayout, FolderInfo, Property};

/// Scripted decoder: each stream's plaintext is fixed up front, and every
/// batch it is asked for is recorded.
struct MockDecoder {
    streams: Vec<Vec<u8>>,
    batches: Vec<Vec<usize>>,
    fail_on: Option<usize>,
}

impl MockDecoder {
    fn new(streams: &[&[u8]]) -> MockDecoder {
        MockDecoder {
            streams: streams.iter().map(|s| s.to_vec()).collect(),
            batches: vec![],
            fail_on: None,
        }
    }
}

impl StreamDecoder for MockDecoder {
    fn decode_one(&mut self, stream_index: usize, dest: &mut dyn Write) -> Result<(), DecodeError> {
        self.batches.push(vec![stream_index]);
        if self.fail_on == Some(stream_index) {
            return Err(DecodeError::Corrupt("scripted failure".into()));
        }
        dest.write_all(&self.streams[stream_index])?;
        Ok(())
    }

    fn decode_many(
        &mut self,
        stream_indices: &[usize],
        sinks: &mut dyn SinkProvider,
    ) -> Result<(), DecodeError> {
        self.batches.push(stream_indices.to_vec());
        for &i in stream_indices {
            if self.fail_on == Some(i) {
                return Err(DecodeError::Corrupt("scripted failure".into()));
            }
            // A declined sink still costs a decode pass; the bytes are
            // simply discarded.
            if let Some(mut sink) = sinks.open(i)? {
                sink.write_all(&self.streams[i])?;
                sinks.close(i, sink)?;
            }
        }
        Ok(())
    }
}

fn mixed_header() -> ArchiveHeader {
    ArchiveHeader {
        num_entries: 4,
        properties: vec![
            Property::EmptyStreams(vec![true, true, false, false]),
            Property::EmptyFiles(vec![false, true]),
            Property::Names(vec![
                "docs".into(),
                "docs/empty.txt".into(),
                "docs/a.txt".into(),
                "b.bin".into(),
            ]),
        ],
        layout: Some(ContentLayout {
            folders: vec![
                FolderInfo {
                    unpack_size: 5,
                    crc: None,
                },
                FolderInfo {
                    unpack_size: 3,
                    crc: None,
                },
            ],
            substreams: None,
        }),
    }
}

fn mixed_extractor() -> Extractor<MockDecoder> {
    Extractor::from_header(&mixed_header(), MockDecoder::new(&[b"hello", b"xyz"])).unwrap()
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn extracts_all_members_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut extractor = mixed_extractor();

    let stats = extractor
        .extract(&Selection::All, dir.path(), &ExtractOptions::default())
        .unwrap();

    assert!(dir.path().join("docs").is_dir());
    assert_eq!(read(&dir.path().join("docs/empty.txt")), "");
    assert_eq!(read(&dir.path().join("docs/a.txt")), "hello");
    assert_eq!(read(&dir.path().join("b.bin")), "xyz");

    assert_eq!(stats.files_extracted, 3);
    assert_eq!(stats.dirs_created, 1);
    assert_eq!(stats.files_skipped, 0);
    assert_eq!(stats.bytes_written, 8);
}

#[test]
fn streams_are_requested_in_ascending_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut extractor = mixed_extractor();

    extractor
        .extract(
            &Selection::Indices(vec![3, 2, 3]),
            dir.path(),
            &ExtractOptions::default(),
        )
        .unwrap();

    let (_, decoder) = extractor.into_inner();
    assert_eq!(decoder.batches, vec![vec![0, 1]]);
}

#[test]
fn out_of_range_index_fails_before_touching_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut extractor = mixed_extractor();

    let err = extractor
        .extract(
            &Selection::Indices(vec![0, 99]),
            dir.path(),
            &ExtractOptions::default(),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        ExtractError::IndexOutOfRange { index: 99, len: 4 }
    ));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

    let (_, decoder) = extractor.into_inner();
    assert!(decoder.batches.is_empty());
}

#[test]
fn conflict_error_precedes_any_decoding() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("b.bin"), b"precious").unwrap();
    let mut extractor = mixed_extractor();

    let err = extractor
        .extract(&Selection::All, dir.path(), &ExtractOptions::default())
        .unwrap_err();

    assert!(matches!(err, ExtractError::AlreadyExists(_)));
    assert_eq!(read(&dir.path().join("b.bin")), "precious");
    assert!(!dir.path().join("docs").exists());

    let (_, decoder) = extractor.into_inner();
    assert!(decoder.batches.is_empty());
}

#[test]
fn skipped_stream_stays_in_the_decode_batch() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("docs")).unwrap();
    fs::write(dir.path().join("docs/a.txt"), b"old").unwrap();
    let mut extractor = mixed_extractor();

    let stats = extractor
        .extract(
            &Selection::All,
            dir.path(),
            &ExtractOptions {
                skip_existing: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(read(&dir.path().join("docs/a.txt")), "old");
    assert_eq!(read(&dir.path().join("b.bin")), "xyz");
    assert_eq!(stats.files_skipped, 1);
    assert_eq!(stats.files_extracted, 2);
    assert_eq!(stats.bytes_written, 3);

    // The skipped member's stream was still part of the batch so the solid
    // block could be decoded front to back.
    let (_, decoder) = extractor.into_inner();
    assert_eq!(decoder.batches, vec![vec![0, 1]]);
}

#[test]
fn all_conflicting_selection_skips_decoding_entirely() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("b.bin"), b"old").unwrap();
    let mut extractor = mixed_extractor();

    let stats = extractor
        .extract(
            &Selection::Indices(vec![3]),
            dir.path(),
            &ExtractOptions {
                skip_existing: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(stats.files_skipped, 1);
    assert_eq!(read(&dir.path().join("b.bin")), "old");

    let (_, decoder) = extractor.into_inner();
    assert!(decoder.batches.is_empty());
}

#[test]
fn overwrite_wins_when_both_policies_are_set() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("b.bin"), b"old").unwrap();
    let mut extractor = mixed_extractor();

    let stats = extractor
        .extract(
            &Selection::Indices(vec![3]),
            dir.path(),
            &ExtractOptions {
                overwrite: true,
                skip_existing: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(read(&dir.path().join("b.bin")), "xyz");
    assert_eq!(stats.files_extracted, 1);
    assert_eq!(stats.files_skipped, 0);
}

#[test]
fn repeated_extraction_with_overwrite_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let options = ExtractOptions {
        overwrite: true,
        ..Default::default()
    };

    let first = mixed_extractor()
        .extract(&Selection::All, dir.path(), &options)
        .unwrap();
    let second = mixed_extractor()
        .extract(&Selection::All, dir.path(), &options)
        .unwrap();

    assert_eq!(first.files_extracted, second.files_extracted);
    assert_eq!(read(&dir.path().join("docs/a.txt")), "hello");
    assert_eq!(read(&dir.path().join("b.bin")), "xyz");
}

#[test]
fn repeated_extraction_with_skip_leaves_first_output_untouched() {
    let dir = tempfile::tempdir().unwrap();

    mixed_extractor()
        .extract(&Selection::All, dir.path(), &ExtractOptions::default())
        .unwrap();
    fs::write(dir.path().join("b.bin"), b"edited").unwrap();

    let stats = mixed_extractor()
        .extract(
            &Selection::All,
            dir.path(),
            &ExtractOptions {
                skip_existing: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(read(&dir.path().join("b.bin")), "edited");
    assert_eq!(stats.files_extracted, 0);
    assert_eq!(stats.files_skipped, 3);
}

#[test]
fn flatten_mode_drops_directory_structure() {
    let dir = tempfile::tempdir().unwrap();
    let mut extractor = mixed_extractor();

    let stats = extractor
        .extract(
            &Selection::All,
            dir.path(),
            &ExtractOptions {
                preserve_dirs: false,
                ..Default::default()
            },
        )
        .unwrap();

    assert!(!dir.path().join("docs").exists());
    assert_eq!(read(&dir.path().join("a.txt")), "hello");
    assert_eq!(read(&dir.path().join("empty.txt")), "");
    assert_eq!(read(&dir.path().join("b.bin")), "xyz");
    assert_eq!(stats.dirs_created, 0);
}

fn clashing_basenames_header() -> ArchiveHeader {
    ArchiveHeader {
        num_entries: 2,
        properties: vec![Property::Names(vec!["a/x.txt".into(), "b/x.txt".into()])],
        layout: Some(ContentLayout {
            folders: vec![
                FolderInfo {
                    unpack_size: 3,
                    crc: None,
                },
                FolderInfo {
                    unpack_size: 3,
                    crc: None,
                },
            ],
            substreams: None,
        }),
    }
}

#[test]
fn flatten_mode_detects_basename_clashes_before_decoding() {
    let dir = tempfile::tempdir().unwrap();
    let mut extractor =
        Extractor::from_header(&clashing_basenames_header(), MockDecoder::new(&[b"one", b"two"]))
            .unwrap();

    let err = extractor
        .extract(
            &Selection::All,
            dir.path(),
            &ExtractOptions {
                preserve_dirs: false,
                ..Default::default()
            },
        )
        .unwrap_err();

    assert!(matches!(err, ExtractError::AlreadyExists(_)));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

    let (_, decoder) = extractor.into_inner();
    assert!(decoder.batches.is_empty());
}

#[test]
fn flatten_mode_skips_later_basename_clashes_when_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let mut extractor =
        Extractor::from_header(&clashing_basenames_header(), MockDecoder::new(&[b"one", b"two"]))
            .unwrap();

    let stats = extractor
        .extract(
            &Selection::All,
            dir.path(),
            &ExtractOptions {
                preserve_dirs: false,
                skip_existing: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(read(&dir.path().join("x.txt")), "one");
    assert_eq!(stats.files_extracted, 1);
    assert_eq!(stats.files_skipped, 1);
}

#[test]
fn selects_members_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut extractor = mixed_extractor();

    let stats = extractor
        .extract(
            &Selection::Names {
                names: vec!["docs/a.txt".into()],
                loose: false,
            },
            dir.path(),
            &ExtractOptions::default(),
        )
        .unwrap();

    assert_eq!(stats.files_extracted, 1);
    assert_eq!(read(&dir.path().join("docs/a.txt")), "hello");
    assert!(!dir.path().join("b.bin").exists());
}

#[test]
fn loose_name_selection_matches_basenames() {
    let dir = tempfile::tempdir().unwrap();
    let mut extractor = mixed_extractor();

    let strict = extractor.extract(
        &Selection::Names {
            names: vec!["a.txt".into()],
            loose: false,
        },
        dir.path(),
        &ExtractOptions::default(),
    );
    assert!(matches!(strict, Err(ExtractError::NotFoundInArchive(_))));

    extractor
        .extract(
            &Selection::Names {
                names: vec!["a.txt".into()],
                loose: true,
            },
            dir.path(),
            &ExtractOptions::default(),
        )
        .unwrap();
    assert_eq!(read(&dir.path().join("docs/a.txt")), "hello");
}

#[test]
fn deletion_markers_remove_existing_paths_when_allowed() {
    let header = ArchiveHeader {
        num_entries: 2,
        properties: vec![
            Property::EmptyStreams(vec![true, false]),
            Property::EmptyFiles(vec![true]),
            Property::Anti(vec![true]),
            Property::Names(vec!["stale.txt".into(), "fresh.txt".into()]),
        ],
        layout: Some(ContentLayout {
            folders: vec![FolderInfo {
                unpack_size: 4,
                crc: None,
            }],
            substreams: None,
        }),
    };

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("stale.txt"), b"remove me").unwrap();

    let mut extractor =
        Extractor::from_header(&header, MockDecoder::new(&[b"data"])).unwrap();
    let stats = extractor
        .extract(
            &Selection::All,
            dir.path(),
            &ExtractOptions {
                allow_deletions: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert!(!dir.path().join("stale.txt").exists());
    assert_eq!(read(&dir.path().join("fresh.txt")), "data");
    assert_eq!(stats.deletions, 1);

    // Without the policy flag the marker is inert.
    fs::write(dir.path().join("stale.txt"), b"keep me").unwrap();
    let mut extractor =
        Extractor::from_header(&header, MockDecoder::new(&[b"data"])).unwrap();
    let stats = extractor
        .extract(
            &Selection::Indices(vec![0]),
            dir.path(),
            &ExtractOptions::default(),
        )
        .unwrap();
    assert_eq!(read(&dir.path().join("stale.txt")), "keep me");
    assert_eq!(stats.deletions, 0);
}

#[test]
fn decode_failure_aborts_the_batch_and_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let mut decoder = MockDecoder::new(&[b"hello", b"xyz"]);
    decoder.fail_on = Some(1);
    let mut extractor = Extractor::from_header(&mixed_header(), decoder).unwrap();

    let err = extractor
        .extract(&Selection::All, dir.path(), &ExtractOptions::default())
        .unwrap_err();

    assert!(matches!(err, ExtractError::Decode(DecodeError::Corrupt(_))));
    assert!(!dir.path().join("b.bin").exists());
}

#[test]
fn restores_modification_times() {
    let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000);
    let mut header = mixed_header();
    header
        .properties
        .push(Property::ModifiedTimes(vec![None, None, Some(stamp), None]));

    let dir = tempfile::tempdir().unwrap();
    let mut extractor =
        Extractor::from_header(&header, MockDecoder::new(&[b"hello", b"xyz"])).unwrap();
    extractor
        .extract(&Selection::All, dir.path(), &ExtractOptions::default())
        .unwrap();

    let modified = fs::metadata(dir.path().join("docs/a.txt"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(
        modified.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs(),
        1_500_000_000
    );
}

#[test]
fn extract_entry_decodes_a_single_member() {
    let mut extractor = mixed_extractor();
    let mut out = vec![];
    extractor.extract_entry(3, &mut out).unwrap();
    assert_eq!(out, b"xyz");

    let (_, decoder) = extractor.into_inner();
    assert_eq!(decoder.batches, vec![vec![1]]);
}

#[test]
fn extract_entry_on_an_empty_file_writes_nothing() {
    let mut extractor = mixed_extractor();
    let mut out = vec![];
    extractor.extract_entry(1, &mut out).unwrap();
    assert!(out.is_empty());
}

#[test]
fn extract_entry_rejects_directories() {
    let mut extractor = mixed_extractor();
    let mut out = vec![];
    assert!(matches!(
        extractor.extract_entry(0, &mut out),
        Err(ExtractError::NotAFile(_))
    ));
    assert!(matches!(
        extractor.extract_entry(42, &mut out),
        Err(ExtractError::IndexOutOfRange { index: 42, len: 4 })
    ));
}

struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Collects extracted members into in-memory buffers keyed by name.
#[derive(Default)]
struct BufferProvider {
    buffers: HashMap<String, Rc<RefCell<Vec<u8>>>>,
    closed: Vec<String>,
    decline: Option<String>,
}

impl EntrySinkProvider for BufferProvider {
    fn open(&mut self, entry: &ArchiveEntry) -> std::io::Result<Option<Sink>> {
        if self.decline.as_deref() == Some(entry.name.as_str()) {
            return Ok(None);
        }
        let buf = Rc::new(RefCell::new(vec![]));
        self.buffers.insert(entry.name.clone(), Rc::clone(&buf));
        Ok(Some(Box::new(SharedSink(buf))))
    }

    fn close(&mut self, entry: &ArchiveEntry, mut sink: Sink) -> std::io::Result<()> {
        sink.flush()?;
        self.closed.push(entry.name.clone());
        Ok(())
    }
}

#[test]
fn extracts_through_caller_supplied_sinks() {
    let mut extractor = mixed_extractor();
    let mut provider = BufferProvider::default();

    let stats = extractor
        .extract_with(&Selection::All, &mut provider)
        .unwrap();

    assert_eq!(
        &*provider.buffers["docs/a.txt"].borrow(),
        b"hello"
    );
    assert_eq!(&*provider.buffers["b.bin"].borrow(), b"xyz");
    assert!(provider.buffers["docs/empty.txt"].borrow().is_empty());
    assert_eq!(stats.files_extracted, 3);
    assert_eq!(stats.bytes_written, 8);

    // Every opened sink was closed, and the directory never produced one.
    assert_eq!(provider.closed.len(), 3);
    assert!(!provider.buffers.contains_key("docs"));
}

#[test]
fn declined_sinks_are_counted_as_skipped() {
    let mut extractor = mixed_extractor();
    let mut provider = BufferProvider {
        decline: Some("docs/a.txt".into()),
        ..Default::default()
    };

    let stats = extractor
        .extract_with(&Selection::All, &mut provider)
        .unwrap();

    assert!(!provider.buffers.contains_key("docs/a.txt"));
    assert_eq!(&*provider.buffers["b.bin"].borrow(), b"xyz");
    assert_eq!(stats.files_skipped, 1);
    assert_eq!(stats.files_extracted, 2);
}
