//! Single-pass streaming decode of a `GeoJSON` `FeatureCollection`.
//!
//! The NSN dump runs to hundreds of megabytes; hosting gives us ~512 MB,
//! so the whole-document parse is off the table. [`FeatureStream`] reads
//! the byte source in fixed-size chunks, locates the `"features"` array
//! by scanning text, then decodes one JSON value at a time with
//! `serde_json`'s incremental deserializer, trimming the consumed prefix
//! so memory stays bounded regardless of document size.
//!
//! The stream is forward-only and not restartable: every
//! [`FeatureStream::open`] call opens a fresh byte stream. A genuinely
//! malformed document ends the stream silently: the caller sees "no
//! more features", never an error.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::DeflateDecoder;
use geojson::Feature;

use plantwijs_nsn_models::Source;

use crate::NsnError;

/// Chunk size for reads from the byte source (256 KiB of text).
const CHUNK_SIZE: usize = 256 * 1024;

/// While still scanning for `"features"`, the buffer is capped here...
const SCAN_CAP: usize = 2_000_000;
/// ...and trimmed to this tail, so a pathological document prefix
/// cannot grow memory without bound.
const SCAN_KEEP: usize = 1_000_000;

/// Once the cursor passes this many consumed bytes, the buffer is
/// trimmed to the unconsumed tail.
const TRIM_THRESHOLD: usize = 1_000_000;

/// Lazy iterator over the `Feature` objects of a `FeatureCollection`.
pub struct FeatureStream {
    reader: Box<dyn Read>,
    chunk_size: usize,
    /// Decoded text, trimmed periodically to the unconsumed tail.
    buf: String,
    /// Byte cursor into `buf`; always on a char boundary.
    pos: usize,
    /// Bytes held back from lossy UTF-8 decoding (a multi-byte sequence
    /// split across a chunk boundary).
    carry: Vec<u8>,
    in_features: bool,
    done: bool,
}

/// Outcome of one decode attempt at the cursor.
enum Step {
    Value(serde_json::Value),
    NeedMore,
    End,
}

impl FeatureStream {
    /// Opens a fresh byte stream over the resolved source.
    ///
    /// # Errors
    ///
    /// Returns [`NsnError::SourceMissing`] for a missing source, and
    /// I/O or zip errors if the file or archive member cannot be opened.
    pub fn open(source: &Source) -> Result<Self, NsnError> {
        Self::with_chunk_size(source, CHUNK_SIZE)
    }

    /// Like [`FeatureStream::open`] with an explicit chunk size.
    ///
    /// The decoded features are independent of the chunk size; this
    /// exists so tests can exercise pathological chunk boundaries.
    ///
    /// # Errors
    ///
    /// Same as [`FeatureStream::open`].
    pub fn with_chunk_size(source: &Source, chunk_size: usize) -> Result<Self, NsnError> {
        let reader: Box<dyn Read> = match source {
            Source::Missing => return Err(NsnError::SourceMissing),
            Source::LooseFile { path } => Box::new(File::open(path)?),
            Source::ZipMember { archive, member } => open_zip_member(archive, member)?,
        };
        Ok(Self {
            reader,
            chunk_size: chunk_size.max(1),
            buf: String::new(),
            pos: 0,
            carry: Vec::new(),
            in_features: false,
            done: false,
        })
    }

    /// Reads one chunk from the source into the text buffer. Returns
    /// `false` at end of input. Read errors end the stream (logged, not
    /// propagated; the contract is "no more features").
    fn fill(&mut self) -> bool {
        let mut chunk = vec![0u8; self.chunk_size];
        match self.reader.read(&mut chunk) {
            Ok(0) => {
                // Flush any dangling bytes so a truncated trailing
                // sequence still surfaces as replacement characters.
                if !self.carry.is_empty() {
                    let tail = std::mem::take(&mut self.carry);
                    self.buf.push_str(&String::from_utf8_lossy(&tail));
                }
                false
            }
            Ok(n) => {
                self.push_bytes(&chunk[..n]);
                true
            }
            Err(e) => {
                log::warn!("NSN stream read failed: {e}");
                false
            }
        }
    }

    /// Appends bytes as lossy UTF-8, holding back an incomplete trailing
    /// multi-byte sequence for the next chunk.
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.carry.extend_from_slice(bytes);
        let data = std::mem::take(&mut self.carry);
        let split = complete_utf8_len(&data);
        self.buf.push_str(&String::from_utf8_lossy(&data[..split]));
        self.carry.extend_from_slice(&data[split..]);
    }

    /// Scans for the start of the `"features"` array. Returns `true`
    /// once the cursor is positioned just past its opening `[`.
    fn seek_features_array(&mut self) -> bool {
        let Some(idx) = self.buf.find("\"features\"") else {
            // Keep the scan buffer bounded even if "features" appears
            // very late in the document.
            if self.buf.len() > SCAN_CAP {
                let cut = floor_char_boundary(&self.buf, self.buf.len() - SCAN_KEEP);
                self.buf.drain(..cut);
            }
            return false;
        };
        let Some(bracket) = self.buf[idx..].find('[') else {
            return false;
        };
        self.in_features = true;
        self.pos = idx + bracket + 1;
        true
    }

    /// Attempts to decode one JSON value at the cursor.
    fn next_value(&mut self) -> Step {
        // Skip whitespace and element separators.
        let bytes = self.buf.as_bytes();
        while self.pos < bytes.len()
            && matches!(bytes[self.pos], b' ' | b'\r' | b'\n' | b'\t' | b',')
        {
            self.pos += 1;
        }
        if self.pos >= bytes.len() {
            return Step::NeedMore;
        }
        if bytes[self.pos] == b']' {
            return Step::End;
        }

        let mut values = serde_json::Deserializer::from_str(&self.buf[self.pos..])
            .into_iter::<serde_json::Value>();
        match values.next() {
            Some(Ok(value)) => {
                self.pos += values.byte_offset();
                self.trim();
                Step::Value(value)
            }
            // Truncated value: more bytes will complete it.
            Some(Err(e)) if e.is_eof() => Step::NeedMore,
            // Genuinely malformed document: end the stream quietly.
            Some(Err(e)) => {
                log::warn!("NSN stream: malformed JSON, stopping: {e}");
                Step::End
            }
            None => Step::End,
        }
    }

    /// Drops the consumed prefix once it is large enough to matter.
    fn trim(&mut self) {
        if self.pos > TRIM_THRESHOLD {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}

impl Iterator for FeatureStream {
    type Item = Feature;

    fn next(&mut self) -> Option<Feature> {
        while !self.done {
            if !self.in_features {
                if !self.seek_features_array() && !self.fill() {
                    self.done = true;
                }
                continue;
            }
            match self.next_value() {
                Step::Value(value) => {
                    if let Some(feature) = as_feature(value) {
                        return Some(feature);
                    }
                    // Not a Feature object; skip it.
                }
                Step::NeedMore => {
                    if !self.fill() {
                        self.done = true;
                    }
                }
                Step::End => self.done = true,
            }
        }
        None
    }
}

/// Converts a decoded JSON value into a [`Feature`] if it claims to be
/// one. Objects with a broken geometry or properties shape are skipped.
fn as_feature(value: serde_json::Value) -> Option<Feature> {
    if value.get("type").and_then(serde_json::Value::as_str) != Some("Feature") {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Length of the prefix of `data` that is safe to decode now: everything
/// except a trailing multi-byte sequence that may continue in the next
/// chunk.
fn complete_utf8_len(data: &[u8]) -> usize {
    let n = data.len();
    for i in (n.saturating_sub(3)..n).rev() {
        let byte = data[i];
        // Continuation bytes can't tell us anything; walk back to the
        // sequence start.
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            0x00..=0x7F => 1,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xFF => 4,
            _ => 1,
        };
        if i + width > n {
            return i;
        }
        break;
    }
    n
}

/// Largest index `<= target` that is a char boundary of `s`.
fn floor_char_boundary(s: &str, target: usize) -> usize {
    let mut idx = target.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Opens a zip member as an owned byte stream: the member's raw byte
/// range in the archive, wrapped in a raw-deflate decoder when the entry
/// is compressed.
fn open_zip_member(archive_path: &Path, member: &str) -> Result<Box<dyn Read>, NsnError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let (data_start, compressed_size, method) = {
        let entry = archive.by_name(member)?;
        (entry.data_start(), entry.compressed_size(), entry.compression())
    };

    let mut file = archive.into_inner();
    file.seek(SeekFrom::Start(data_start))?;
    let raw = file.take(compressed_size);

    match method {
        zip::CompressionMethod::Stored => Ok(Box::new(raw)),
        zip::CompressionMethod::Deflated => Ok(Box::new(DeflateDecoder::new(raw))),
        other => Err(NsnError::UnsupportedCompression(format!("{other:?}"))),
    }
}
