//! Response decoder state machine.
//!
//! The decoder pulls chunks from a `ByteSource` into a `FrameBuffer` and
//! re-runs the step of its current state until that step either advances or
//! needs more bytes. Chunk boundaries never matter: a step that cannot finish
//! leaves the buffer untouched and is simply retried after the next read.
//!
//! ```text
//! AwaitingStatus ──status=0──▶ AwaitingFilename ──▶ AwaitingLength ──▶ AwaitingPayload
//!       │                        ▲      │                                    │
//!   status≠0                     │   end-of-stream                           │
//!       ▼                        │      ▼                                    │
//!    Finished ◀──────────────────┼── Finished                                │
//!                                └───────────── record complete ◀────────────┘
//! ```
//!
//! Any error moves the decoder to `Failed`; an open sink is dropped on the
//! way, which removes its partial file.

use super::buffer::FrameBuffer;
use super::sink::{FileRecord, RecordSink};
use super::source::{ByteSource, Chunk};
use crate::error::DecodeError;
use crate::protocol::parser::{self, ParseResult};
use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Filename limit assumed when the filesystem cannot be asked.
pub const DEFAULT_NAME_MAX: usize = 255;

/// Upper bound on the filename limit; larger values from `pathconf` are
/// clamped so the frame buffer stays small.
pub const NAME_MAX_LIMIT: usize = 4096;

/// Largest single read from the source.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Everything a decode needs besides the source.
#[derive(Debug, Clone)]
pub struct DecodeContext {
    /// Directory received files are written to.
    pub working_dir: PathBuf,
    /// Maximum filename length in `working_dir`.
    pub name_max: usize,
    /// Largest single read from the source.
    pub chunk_size: usize,
}

impl DecodeContext {
    /// Context for `working_dir`, asking its filesystem for the name limit.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        let name_max = name_max_for(&working_dir);
        Self {
            working_dir,
            name_max,
            chunk_size: READ_CHUNK_SIZE,
        }
    }

    /// Override the filename limit, clamped to `NAME_MAX_LIMIT`.
    pub fn with_name_max(mut self, name_max: usize) -> Self {
        self.name_max = name_max.min(NAME_MAX_LIMIT);
        self
    }
}

/// Query the maximum filename length of the filesystem holding `dir`.
pub fn name_max_for(dir: &Path) -> usize {
    let c_path = match CString::new(dir.as_os_str().as_bytes()) {
        Ok(p) => p,
        Err(_) => return DEFAULT_NAME_MAX,
    };

    // SAFETY: c_path is a valid NUL-terminated string for the whole call.
    let max = unsafe { libc::pathconf(c_path.as_ptr(), libc::_PC_NAME_MAX) };
    if max <= 0 {
        warn!(
            dir = %dir.display(),
            fallback = DEFAULT_NAME_MAX,
            "Could not query maximum filename length"
        );
        return DEFAULT_NAME_MAX;
    }
    usize::try_from(max).map_or(NAME_MAX_LIMIT, |max| max.min(NAME_MAX_LIMIT))
}

/// Where the decoder is in the response.
#[derive(Debug)]
pub enum ParserState {
    /// Expecting `status=<int>\n`.
    AwaitingStatus,
    /// Expecting `file=<name>\n` or a clean end-of-stream.
    AwaitingFilename,
    /// Expecting `len=<uint>\n` for the named file.
    AwaitingLength { name: OsString },
    /// Copying payload bytes into the open sink.
    AwaitingPayload { sink: RecordSink },
    Finished,
    Failed,
}

impl ParserState {
    fn is_terminal(&self) -> bool {
        matches!(self, ParserState::Finished | ParserState::Failed)
    }
}

/// Result of a complete decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseOutcome {
    /// Status reported by the server; non-zero means the server failed.
    pub status: i32,
    /// Files written, in the order received.
    pub records: Vec<FileRecord>,
}

/// What a single step achieved.
enum Progress {
    /// The state changed or bytes were consumed; run the next step.
    Advanced,
    /// Nothing more can be done with the buffered bytes.
    NeedData,
}

/// Streaming response decoder for one connection.
pub struct Decoder<S> {
    source: S,
    ctx: DecodeContext,
    buffer: FrameBuffer,
    state: ParserState,
    status: i32,
    records: Vec<FileRecord>,
    scratch: Vec<u8>,
}

impl<S: ByteSource> Decoder<S> {
    pub fn new(source: S, ctx: DecodeContext) -> Self {
        let buffer = FrameBuffer::for_name_max(ctx.name_max);
        let scratch = vec![0u8; ctx.chunk_size.max(1)];
        Self {
            source,
            ctx,
            buffer,
            state: ParserState::AwaitingStatus,
            status: 0,
            records: Vec::new(),
            scratch,
        }
    }

    /// Drive the state machine until the response is fully decoded.
    pub fn run(mut self) -> Result<ResponseOutcome, DecodeError> {
        while !self.state.is_terminal() {
            let result = match self.step() {
                Ok(Progress::Advanced) => Ok(()),
                Ok(Progress::NeedData) => self.fill(),
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                debug!(error = %e, records = self.records.len(), "Decode failed");
                // Drops any open sink, removing its partial file.
                self.state = ParserState::Failed;
                return Err(e);
            }
        }

        Ok(ResponseOutcome {
            status: self.status,
            records: self.records,
        })
    }

    /// Run the current state's step once.
    ///
    /// The state is taken out for the duration of the step; if the step
    /// fails it stays `Failed`.
    fn step(&mut self) -> Result<Progress, DecodeError> {
        let full = self.buffer.is_full();
        let state = std::mem::replace(&mut self.state, ParserState::Failed);

        let (next, progress) = match state {
            ParserState::AwaitingStatus => match parser::parse_status(self.buffer.window(), full) {
                ParseResult::Complete(status, consumed) => {
                    self.buffer.consume(consumed);
                    self.status = status;
                    if status == 0 {
                        debug!("Server reported success");
                        (ParserState::AwaitingFilename, Progress::Advanced)
                    } else {
                        debug!(status, "Server reported failure, no files follow");
                        (ParserState::Finished, Progress::Advanced)
                    }
                }
                ParseResult::Incomplete => (ParserState::AwaitingStatus, Progress::NeedData),
                ParseResult::Error(e) => return Err(e),
            },

            ParserState::AwaitingFilename => {
                if self.buffer.is_empty() && self.buffer.at_end_of_stream() {
                    debug!(records = self.records.len(), "Response complete");
                    (ParserState::Finished, Progress::Advanced)
                } else {
                    match parser::parse_filename(self.buffer.window(), full, self.ctx.name_max) {
                        ParseResult::Complete(name, consumed) => {
                            self.buffer.consume(consumed);
                            trace!(file = %name.to_string_lossy(), "Filename decoded");
                            (ParserState::AwaitingLength { name }, Progress::Advanced)
                        }
                        ParseResult::Incomplete => {
                            (ParserState::AwaitingFilename, Progress::NeedData)
                        }
                        ParseResult::Error(e) => return Err(e),
                    }
                }
            }

            ParserState::AwaitingLength { name } => {
                match parser::parse_length(self.buffer.window(), full) {
                    ParseResult::Complete(length, consumed) => {
                        self.buffer.consume(consumed);
                        let sink = RecordSink::create(&self.ctx.working_dir, name, length)?;
                        (ParserState::AwaitingPayload { sink }, Progress::Advanced)
                    }
                    ParseResult::Incomplete => {
                        (ParserState::AwaitingLength { name }, Progress::NeedData)
                    }
                    ParseResult::Error(e) => return Err(e),
                }
            }

            ParserState::AwaitingPayload { mut sink } => {
                if !self.buffer.is_empty() {
                    let written = sink.write(self.buffer.window())?;
                    self.buffer.consume(written);
                }

                if sink.is_complete() {
                    self.records.push(sink.finish());
                    (ParserState::AwaitingFilename, Progress::Advanced)
                } else if self.buffer.at_end_of_stream() {
                    let record = sink.record();
                    return Err(DecodeError::TruncatedPayload {
                        name: record.name.to_string_lossy().into_owned(),
                        declared: record.declared_length,
                        written: record.bytes_written,
                    });
                } else {
                    (ParserState::AwaitingPayload { sink }, Progress::NeedData)
                }
            }

            terminal @ (ParserState::Finished | ParserState::Failed) => {
                (terminal, Progress::Advanced)
            }
        };

        self.state = next;
        Ok(progress)
    }

    /// Read the next chunk from the source.
    ///
    /// While a payload is pending and nothing is buffered, bytes go straight
    /// from the source into the sink, never more than the record still
    /// expects.
    fn fill(&mut self) -> Result<(), DecodeError> {
        if let ParserState::AwaitingPayload { sink } = &mut self.state {
            debug_assert!(self.buffer.is_empty());
            let want = usize::try_from(sink.remaining())
                .unwrap_or(usize::MAX)
                .min(self.scratch.len());
            match self.source.read_chunk(&mut self.scratch[..want])? {
                Chunk::Data(n) => {
                    sink.write(&self.scratch[..n])?;
                }
                Chunk::EndOfStream => self.buffer.mark_end_of_stream(),
            }
            return Ok(());
        }

        let want = self.buffer.remaining().min(self.scratch.len());
        if want == 0 {
            return Err(DecodeError::CapacityExceeded {
                needed: self.buffer.len() + 1,
                capacity: self.buffer.capacity(),
            });
        }
        match self.source.read_chunk(&mut self.scratch[..want])? {
            Chunk::Data(n) => self.buffer.append(&self.scratch[..n])?,
            Chunk::EndOfStream => self.buffer.mark_end_of_stream(),
        }
        Ok(())
    }
}

/// Decode a complete response from `source`, writing received files into
/// `working_dir`. Returns the server status.
pub fn decode_response<S: ByteSource>(
    source: S,
    working_dir: &Path,
) -> Result<i32, DecodeError> {
    Decoder::new(source, DecodeContext::new(working_dir))
        .run()
        .map(|outcome| outcome.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::source::testing::{Event, ScriptedSource};
    use std::fs;
    use std::io::ErrorKind;
    use tempfile::TempDir;

    const SCENARIO_1: &[u8] = b"status=0\nfile=a.txt\nlen=5\nhello";
    const SCENARIO_2: &[u8] = b"status=0\nfile=b.txt\nlen=0\nfile=c.txt\nlen=3\nbye";

    fn context(dir: &TempDir) -> DecodeContext {
        DecodeContext::new(dir.path()).with_name_max(32)
    }

    fn decode(dir: &TempDir, source: ScriptedSource) -> Result<ResponseOutcome, DecodeError> {
        Decoder::new(source, context(dir)).run()
    }

    fn read(dir: &TempDir, name: &str) -> Vec<u8> {
        fs::read(dir.path().join(name)).unwrap()
    }

    fn names(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn wire(status: i32, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = format!("status={}\n", status).into_bytes();
        for (name, payload) in files {
            out.extend_from_slice(format!("file={}\nlen={}\n", name, payload.len()).as_bytes());
            out.extend_from_slice(payload);
        }
        out
    }

    #[test]
    fn test_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = decode(&dir, ScriptedSource::whole(SCENARIO_1)).unwrap();

        assert_eq!(outcome.status, 0);
        assert_eq!(
            outcome.records,
            vec![FileRecord {
                name: "a.txt".into(),
                declared_length: 5,
                bytes_written: 5,
            }]
        );
        assert_eq!(read(&dir, "a.txt"), b"hello");
    }

    #[test]
    fn test_zero_length_record_then_next() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = decode(&dir, ScriptedSource::whole(SCENARIO_2)).unwrap();

        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].declared_length, 0);
        assert_eq!(read(&dir, "b.txt"), b"");
        assert_eq!(read(&dir, "c.txt"), b"bye");
    }

    #[test]
    fn test_zero_length_record_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = decode(&dir, ScriptedSource::whole(b"status=0\nfile=e\nlen=0\n")).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(read(&dir, "e"), b"");
    }

    #[test]
    fn test_nonzero_status_short_circuits_files() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = decode(&dir, ScriptedSource::whole(b"status=1\n")).unwrap();
        assert_eq!(outcome.status, 1);
        assert!(outcome.records.is_empty());

        // Bytes after a failure status are ignored.
        let source = ScriptedSource::whole(b"status=3\nfile=x\nlen=1\nX");
        let outcome = decode(&dir, source).unwrap();
        assert_eq!(outcome.status, 3);
        assert!(outcome.records.is_empty());
        assert!(names(&dir).is_empty());
    }

    #[test]
    fn test_status_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = decode(&dir, ScriptedSource::whole(b"status=0\n")).unwrap();
        assert_eq!(outcome.status, 0);
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_malformed_status() {
        let dir = tempfile::tempdir().unwrap();
        for input in [&b"statuz=0\nfile=a\nlen=1\nX"[..], b"", b"status=0", b"status=x\n"] {
            match decode(&dir, ScriptedSource::whole(input)) {
                Err(DecodeError::MalformedStatus(_)) => {}
                other => panic!("unexpected for {:?}: {:?}", input, other),
            }
        }
        assert!(names(&dir).is_empty());
    }

    #[test]
    fn test_traversal_rejected_without_creating_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::whole(b"status=0\nfile=../x\nlen=1\nX");
        match decode(&dir, source) {
            Err(DecodeError::InvalidFilename(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert!(names(&dir).is_empty());
    }

    #[test]
    fn test_non_utf8_filename_stored_as_bytes() {
        use std::ffi::OsStr;

        let dir = tempfile::tempdir().unwrap();
        let input = b"status=0\nfile=caf\xe9.html\nlen=1\nXfile=next\nlen=2\nok";
        let outcome = decode(&dir, ScriptedSource::chunked(input, 3)).unwrap();

        let name = OsStr::from_bytes(b"caf\xe9.html");
        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].name.as_os_str(), name);
        assert_eq!(fs::read(dir.path().join(name)).unwrap(), b"X");
        assert_eq!(read(&dir, "next"), b"ok");
    }

    #[test]
    fn test_one_byte_reads_match_single_read() {
        let whole = tempfile::tempdir().unwrap();
        let bytewise = tempfile::tempdir().unwrap();

        let mut single = ScriptedSource::whole(SCENARIO_1);
        let mut one_byte = ScriptedSource::chunked(SCENARIO_1, 1);
        let expected = Decoder::new(&mut single, context(&whole)).run().unwrap();
        let actual = Decoder::new(&mut one_byte, context(&bytewise)).run().unwrap();

        assert_eq!(actual, expected);
        // One read per byte plus the end-of-stream read.
        assert_eq!(one_byte.reads, SCENARIO_1.len() + 1);
        assert!(single.reads < one_byte.reads);
        assert_eq!(read(&bytewise, "a.txt"), read(&whole, "a.txt"));
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let big: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let files: Vec<(&str, &[u8])> = vec![
            ("index.html", &b"<html><body>board</body></html>"[..]),
            ("empty.txt", &b""[..]),
            ("blob.bin", &big[..]),
            ("nl.txt", &b"\n\nfile=not-a-header\nlen=9\n"[..]),
        ];
        let input = wire(0, &files);

        for size in [1, 2, 3, 7, 13, 64, 1000, input.len()] {
            let dir = tempfile::tempdir().unwrap();
            let outcome = decode(&dir, ScriptedSource::chunked(&input, size)).unwrap();

            assert_eq!(outcome.status, 0, "chunk size {}", size);
            let decoded: Vec<&str> = outcome.records.iter().map(|r| r.name.to_str().unwrap()).collect();
            assert_eq!(decoded, vec!["index.html", "empty.txt", "blob.bin", "nl.txt"]);
            for (name, payload) in &files {
                assert_eq!(&read(&dir, name)[..], *payload, "{} at chunk size {}", name, size);
            }
        }
    }

    #[test]
    fn test_payload_larger_than_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![b'z'; 100_000];
        let input = wire(0, &[("large", &payload[..])]);

        let mut ctx = context(&dir);
        ctx.chunk_size = 4096;
        let outcome = Decoder::new(ScriptedSource::chunked(&input, 3000), ctx)
            .run()
            .unwrap();

        assert_eq!(outcome.records[0].bytes_written, 100_000);
        assert_eq!(read(&dir, "large"), payload);
    }

    #[test]
    fn test_truncated_payload_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::whole(b"status=0\nfile=ok\nlen=2\nhifile=cut\nlen=10\nshort");

        match decode(&dir, source) {
            Err(DecodeError::TruncatedPayload {
                name,
                declared: 10,
                written: 5,
            }) => assert_eq!(name, "cut"),
            other => panic!("unexpected: {:?}", other),
        }
        // The completed record stays, the partial one is gone.
        assert_eq!(names(&dir), vec!["ok".to_string()]);
    }

    #[test]
    fn test_truncated_before_any_payload() {
        let dir = tempfile::tempdir().unwrap();
        match decode(&dir, ScriptedSource::whole(b"status=0\nfile=a\nlen=4\n")) {
            Err(DecodeError::TruncatedPayload { written: 0, .. }) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert!(names(&dir).is_empty());
    }

    #[test]
    fn test_incomplete_header_at_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        match decode(&dir, ScriptedSource::whole(b"status=0\nfile=a")) {
            Err(DecodeError::InvalidFilename(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
        match decode(&dir, ScriptedSource::whole(b"status=0\nfile=a\nlen=")) {
            Err(DecodeError::InvalidLength(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_length() {
        let dir = tempfile::tempdir().unwrap();
        match decode(&dir, ScriptedSource::whole(b"status=0\nfile=a\nlen=-5\nhello")) {
            Err(DecodeError::InvalidLength(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert!(names(&dir).is_empty());
    }

    #[test]
    fn test_filename_too_long() {
        let dir = tempfile::tempdir().unwrap();
        let name = "n".repeat(40);
        let input = wire(0, &[(name.as_str(), &b"x"[..])]);

        // Delivered in small pieces so the limit is hit before the terminator.
        match decode(&dir, ScriptedSource::chunked(&input, 4)) {
            Err(DecodeError::FilenameTooLong(32)) => {}
            other => panic!("unexpected: {:?}", other),
        }
        match decode(&dir, ScriptedSource::whole(&input)) {
            Err(DecodeError::FilenameTooLong(32)) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert!(names(&dir).is_empty());
    }

    #[test]
    fn test_timeout_mid_payload() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![
            Event::Bytes(b"status=0\nfile=slow\nlen=10\nabc".to_vec()),
            Event::Timeout,
        ]);
        match decode(&dir, source) {
            Err(DecodeError::Timeout) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert!(names(&dir).is_empty());
    }

    #[test]
    fn test_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![
            Event::Bytes(b"status=0\nfi".to_vec()),
            Event::Fail(ErrorKind::ConnectionReset),
        ]);
        match decode(&dir, source) {
            Err(DecodeError::ConnectionError(e)) => {
                assert_eq!(e.kind(), ErrorKind::ConnectionReset)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_trailing_garbage_after_records() {
        let dir = tempfile::tempdir().unwrap();
        match decode(&dir, ScriptedSource::whole(b"status=0\nfile=a\nlen=1\nXjunk")) {
            Err(DecodeError::InvalidFilename(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
        // The record before the garbage was complete and is kept.
        assert_eq!(read(&dir, "a"), b"X");
    }

    #[test]
    fn test_decode_response_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let status = decode_response(ScriptedSource::chunked(SCENARIO_2, 5), dir.path()).unwrap();
        assert_eq!(status, 0);
        assert_eq!(read(&dir, "c.txt"), b"bye");
    }

    #[test]
    fn test_name_max_for_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let max = name_max_for(dir.path());
        assert!((14..=NAME_MAX_LIMIT).contains(&max));
    }

    #[test]
    fn test_name_max_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DecodeContext::new(dir.path()).with_name_max(usize::MAX);
        assert_eq!(ctx.name_max, NAME_MAX_LIMIT);

        // The buffer is sized from the clamped limit.
        let decoder = Decoder::new(ScriptedSource::whole(b"status=0\n"), ctx);
        assert_eq!(decoder.buffer.capacity(), 2 * NAME_MAX_LIMIT + 1);
    }
}
