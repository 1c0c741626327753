//! CSV loader for feedback exports.
//!
//! Reads plain `.csv` or gzip-compressed `.csv.gz` files into
//! [`FeedbackRecord`]s. Column names are configurable; matching is
//! case-insensitive and ignores surrounding whitespace and a leading BOM.

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::record::{FeedbackRecord, parse_timestamp};

/// Names of the input columns.
///
/// `student`, `group` and `text` are required. `class` and `timestamp` may be
/// absent from a file; rows then fall back to `default_class` (or the file
/// stem) and carry no timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub student: String,
    pub group: String,
    pub class: String,
    pub text: String,
    pub timestamp: String,
    pub default_class: Option<String>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            student: "student".to_string(),
            group: "group".to_string(),
            class: "class".to_string(),
            text: "feedback".to_string(),
            timestamp: "date".to_string(),
            default_class: None,
        }
    }
}

/// Records read from one or more inputs.
#[derive(Debug, Default)]
pub struct LoadedFeedback {
    pub records: Vec<FeedbackRecord>,
    /// Data rows seen, usable or not.
    pub rows_read: usize,
    /// Rows that could not be parsed or had no student/group identifier.
    pub skipped: usize,
}

struct ColumnIndex {
    student: usize,
    group: usize,
    class: Option<usize>,
    text: usize,
    timestamp: Option<usize>,
}

/// Loads every file in `paths`. A record id is the zero-based position of its
/// row across all files, so skipped rows leave gaps.
///
/// # Errors
///
/// [`PipelineError::Io`] if a file cannot be opened or its stream fails,
/// [`PipelineError::MalformedInput`] if a required column is missing, and
/// [`PipelineError::EmptyInput`] if no usable row remains across all files.
#[tracing::instrument(skip(columns), fields(files = paths.len()))]
pub fn load_files(
    paths: &[PathBuf],
    columns: &ColumnMapping,
) -> Result<LoadedFeedback, PipelineError> {
    let mut loaded = LoadedFeedback::default();

    for path in paths {
        let file = File::open(path).map_err(|source| PipelineError::Io {
            path: path.clone(),
            source,
        })?;
        let source_name = path.display().to_string();
        let default_class = columns
            .default_class
            .clone()
            .unwrap_or_else(|| file_stem(path));

        let reader: Box<dyn Read> = if is_gzip(path) {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        read_source(reader, &source_name, columns, &default_class, &mut loaded)?;
    }

    let names = paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    ensure_not_empty(loaded, &names)
}

/// Loads a single CSV stream. Rows without a class column take
/// `columns.default_class`, or `source_name` when none is configured.
pub fn load_reader<R: Read>(
    reader: R,
    source_name: &str,
    columns: &ColumnMapping,
) -> Result<LoadedFeedback, PipelineError> {
    let default_class = columns
        .default_class
        .clone()
        .unwrap_or_else(|| source_name.to_string());

    let mut loaded = LoadedFeedback::default();
    read_source(reader, source_name, columns, &default_class, &mut loaded)?;
    ensure_not_empty(loaded, source_name)
}

fn ensure_not_empty(
    loaded: LoadedFeedback,
    source_name: &str,
) -> Result<LoadedFeedback, PipelineError> {
    if loaded.records.is_empty() {
        return Err(PipelineError::EmptyInput(source_name.to_string()));
    }
    Ok(loaded)
}

fn read_source<R: Read>(
    reader: R,
    source_name: &str,
    columns: &ColumnMapping,
    default_class: &str,
    loaded: &mut LoadedFeedback,
) -> Result<(), PipelineError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);

    let headers = rdr
        .byte_headers()
        .map_err(|e| read_error(source_name, e))?
        .clone();
    let index = resolve_columns(&headers, columns, source_name)?;

    let before = loaded.records.len();
    let mut skipped = 0usize;

    for (row, result) in rdr.byte_records().enumerate() {
        // Position across every input read so far.
        let record_id = loaded.rows_read as u64;
        loaded.rows_read += 1;
        // Header is line 1.
        let line = row + 2;

        let record = match result {
            Ok(record) => record,
            // Stream failures (I/O, corrupt gzip) abort; only parse errors skip a row.
            Err(e) if e.is_io_error() => return Err(read_error(source_name, e)),
            Err(e) => {
                warn!(source = source_name, line, error = %e, "Skipping unreadable row");
                skipped += 1;
                continue;
            }
        };

        let field = |i: usize| {
            record
                .get(i)
                .map(|b| String::from_utf8_lossy(b).trim().to_string())
                .unwrap_or_default()
        };

        let student_id = field(index.student);
        let group_id = field(index.group);
        if student_id.is_empty() || group_id.is_empty() {
            warn!(source = source_name, line, "Skipping row without student or group id");
            skipped += 1;
            continue;
        }

        let class_id = index
            .class
            .map(field)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| default_class.to_string());

        // Text is kept as-is; cleaning belongs to the preprocessor.
        let raw_text = record
            .get(index.text)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();

        let timestamp = index.timestamp.map(field).and_then(|value| {
            let parsed = parse_timestamp(&value);
            if parsed.is_none() && !value.is_empty() {
                debug!(source = source_name, line, value = %value, "Unparseable timestamp");
            }
            parsed
        });

        loaded.records.push(FeedbackRecord {
            record_id,
            student_id,
            group_id,
            class_id,
            raw_text,
            timestamp,
        });
    }

    loaded.skipped += skipped;
    info!(
        source = source_name,
        records = loaded.records.len() - before,
        skipped,
        "Loaded feedback source"
    );
    Ok(())
}

fn read_error(source_name: &str, error: csv::Error) -> PipelineError {
    match error.into_kind() {
        csv::ErrorKind::Io(source) => PipelineError::Io {
            path: PathBuf::from(source_name),
            source,
        },
        kind => PipelineError::malformed(source_name, format!("unreadable CSV: {kind:?}")),
    }
}

fn resolve_columns(
    headers: &csv::ByteRecord,
    columns: &ColumnMapping,
    source_name: &str,
) -> Result<ColumnIndex, PipelineError> {
    let names: Vec<String> = headers
        .iter()
        .map(|h| {
            String::from_utf8_lossy(h)
                .trim_start_matches('\u{feff}')
                .trim()
                .to_lowercase()
        })
        .collect();

    let find = |wanted: &str| {
        let wanted = wanted.trim().to_lowercase();
        names.iter().position(|n| *n == wanted)
    };

    let student = find(&columns.student);
    let group = find(&columns.group);
    let text = find(&columns.text);

    match (student, group, text) {
        (Some(student), Some(group), Some(text)) => Ok(ColumnIndex {
            student,
            group,
            class: find(&columns.class),
            text,
            timestamp: find(&columns.timestamp),
        }),
        _ => {
            let missing: Vec<&str> = [
                (student, columns.student.as_str()),
                (group, columns.group.as_str()),
                (text, columns.text.as_str()),
            ]
            .into_iter()
            .filter(|(found, _)| found.is_none())
            .map(|(_, name)| name)
            .collect();

            Err(PipelineError::malformed(
                source_name,
                format!("missing required column(s): {}", missing.join(", ")),
            ))
        }
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

/// `feedback/week1.csv.gz` -> `week1`
fn file_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("class");
    let name = name.strip_suffix(".gz").unwrap_or(name);
    name.strip_suffix(".csv").unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn load(data: &str) -> Result<LoadedFeedback, PipelineError> {
        load_reader(data.as_bytes(), "test.csv", &ColumnMapping::default())
    }

    #[test]
    fn test_loads_rows_in_order() {
        let loaded = load(
            "group,student,feedback,date\n\
             Group A,Student 1,Great work on the project!,2024-01-01\n\
             Group B,Student 3,Excellent presentation skills.,2024-01-03\n",
        )
        .unwrap();

        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.rows_read, 2);
        assert_eq!(loaded.records[0].record_id, 0);
        assert_eq!(loaded.records[0].group_id, "Group A");
        assert_eq!(loaded.records[1].student_id, "Student 3");
        assert!(loaded.records[1].timestamp.is_some());
    }

    #[test]
    fn test_missing_text_column_is_malformed() {
        let err = load("group,student,date\nA,1,2024-01-01\n").unwrap_err();
        match err {
            PipelineError::MalformedInput { reason, .. } => assert!(reason.contains("feedback")),
            other => panic!("expected MalformedInput, got {other:?}"),
        }
    }

    #[test]
    fn test_header_only_is_empty_input() {
        let err = load("group,student,feedback\n").unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput(_)));
    }

    #[test]
    fn test_completely_empty_file_is_malformed() {
        let err = load("").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput { .. }));
    }

    #[test]
    fn test_rows_without_ids_are_skipped() {
        let loaded = load("group,student,feedback\nA,,hello\n,2,hi\nA,3,ok\n").unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.skipped, 2);
        assert_eq!(loaded.rows_read, 3);
        // Ids are row positions, so skipped rows leave gaps.
        assert_eq!(loaded.records[0].record_id, 2);
    }

    #[test]
    fn test_only_unusable_rows_is_empty_input() {
        let err = load("group,student,feedback\n,,hello\n").unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput(_)));
    }

    #[test]
    fn test_empty_text_is_kept_for_preprocessor() {
        let loaded = load("group,student,feedback\nA,1,great job\nA,2,\n").unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[1].raw_text, "");
    }

    #[test]
    fn test_headers_are_case_insensitive_and_bom_tolerant() {
        let loaded = load("\u{feff}Group , STUDENT,Feedback\nA,1,fine\n").unwrap();
        assert_eq!(loaded.records[0].student_id, "1");
    }

    #[test]
    fn test_class_column_and_default_class() {
        let loaded = load("class,group,student,feedback\nCS101,A,1,x\n,A,2,y\n").unwrap();
        assert_eq!(loaded.records[0].class_id, "CS101");
        assert_eq!(loaded.records[1].class_id, "test.csv");

        let columns = ColumnMapping {
            default_class: Some("fallback".into()),
            ..Default::default()
        };
        let loaded = load_reader("group,student,feedback\nA,1,x\n".as_bytes(), "s", &columns).unwrap();
        assert_eq!(loaded.records[0].class_id, "fallback");
    }

    #[test]
    fn test_custom_column_names() {
        let columns = ColumnMapping {
            student: "student_id".into(),
            text: "feedback_text".into(),
            group: "team".into(),
            ..Default::default()
        };
        let loaded = load_reader(
            "student_id,team,feedback_text\ns1,t1,clear slides\n".as_bytes(),
            "s",
            &columns,
        )
        .unwrap();
        assert_eq!(loaded.records[0].raw_text, "clear slides");
        assert_eq!(loaded.records[0].group_id, "t1");
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let mut data = b"group,student,feedback\nA,1,caf".to_vec();
        data.extend_from_slice(&[0xE9, b'\n']);
        let loaded = load_reader(data.as_slice(), "s", &ColumnMapping::default()).unwrap();
        assert!(loaded.records[0].raw_text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_load_files_reads_gzip_and_numbers_across_files() {
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("week1.csv");
        std::fs::write(&plain, "group,student,feedback\nA,1,one\nA,2,two\n").unwrap();

        let gz = dir.path().join("week2.csv.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(b"group,student,feedback\nB,3,three\n")
            .unwrap();
        std::fs::write(&gz, encoder.finish().unwrap()).unwrap();

        let loaded = load_files(&[plain, gz], &ColumnMapping::default()).unwrap();

        let ids: Vec<u64> = loaded.records.iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(loaded.records[0].class_id, "week1");
        assert_eq!(loaded.records[2].class_id, "week2");
        assert_eq!(loaded.records[2].raw_text, "three");
    }

    #[test]
    fn test_record_ids_are_row_positions_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        std::fs::write(&first, "group,student,feedback\nA,,skipped\nA,1,one\n").unwrap();
        let second = dir.path().join("b.csv");
        std::fs::write(&second, "group,student,feedback\nB,2,two\n").unwrap();

        let loaded = load_files(&[first, second], &ColumnMapping::default()).unwrap();

        let ids: Vec<u64> = loaded.records.iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(loaded.rows_read, 3);
    }

    /// Yields `data`, then fails like a corrupt decompression stream.
    struct FailingStream<'a> {
        data: &'a [u8],
    }

    impl Read for FailingStream<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.data.is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "corrupt deflate stream",
                ));
            }
            let n = self.data.len().min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_stream_error_mid_file_aborts_load() {
        let stream = FailingStream {
            data: b"group,student,feedback\nA,1,one\nA,2,two\n",
        };
        let err = load_reader(stream, "broken.csv.gz", &ColumnMapping::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }), "{err}");
    }

    #[test]
    fn test_corrupt_gzip_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("week.csv.gz");

        let mut csv = String::from("group,student,feedback\n");
        for i in 0..2_000 {
            csv.push_str(&format!("G{},{i},comment number {i}\n", i % 7));
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(csv.as_bytes()).unwrap();
        let mut bytes = encoder.finish().unwrap();
        // Break the trailing CRC32.
        let crc = bytes.len() - 8;
        bytes[crc] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = load_files(&[path], &ColumnMapping::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }), "{err}");
    }

    #[test]
    fn test_load_files_missing_file_is_io_error() {
        let err = load_files(
            &[PathBuf::from("/definitely/not/here.csv")],
            &ColumnMapping::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
