//! Decoder for the newline-delimited JSON body of a streaming generate call.
//!
//! Bytes arrive in arbitrary chunks. Each line is one JSON object; blank
//! lines are ignored and lines that fail to parse are skipped without
//! ending the stream. Decoding ends when the transport ends, whether or not
//! a `done` fragment was seen.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::error::{CaptionError, Result};
use super::request::GenerationFragment;

/// How the byte stream is cut into lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Carry an incomplete trailing line over to the next chunk.
    #[default]
    LineBuffered,
    /// Split every chunk on its own. An object cut by a chunk boundary is
    /// lost: both halves fail to parse and are skipped.
    PerChunk,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::LineBuffered => write!(f, "line_buffered"),
            Framing::PerChunk => write!(f, "per_chunk"),
        }
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "line_buffered" | "buffered" => Ok(Framing::LineBuffered),
            "per_chunk" | "chunk" => Ok(Framing::PerChunk),
            other => Err(format!(
                "Unknown framing '{}'. Expected 'line_buffered' or 'per_chunk'",
                other
            )),
        }
    }
}

/// Incremental NDJSON decoder. Feed it chunks with [`LineDecoder::push`] and
/// call [`LineDecoder::finish`] once the transport is exhausted.
#[derive(Debug, Default)]
pub struct LineDecoder {
    framing: Framing,
    line: String,
    // Tail of a multi-byte UTF-8 sequence cut by a chunk boundary.
    partial_utf8: Vec<u8>,
    skipped: usize,
}

impl LineDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            ..Default::default()
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Number of non-blank lines dropped because they were not valid JSON.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<GenerationFragment> {
        match self.framing {
            Framing::PerChunk => {
                let text = String::from_utf8_lossy(chunk);
                let mut fragments = Vec::new();
                for segment in text.split('\n') {
                    if let Some(fragment) = self.parse_line(segment) {
                        fragments.push(fragment);
                    }
                }
                fragments
            }
            Framing::LineBuffered => {
                let text = self.decode_utf8(chunk);
                self.line.push_str(&text);

                let mut fragments = Vec::new();
                while let Some(pos) = self.line.find('\n') {
                    let segment: String = self.line.drain(..=pos).collect();
                    if let Some(fragment) = self.parse_line(&segment) {
                        fragments.push(fragment);
                    }
                }
                fragments
            }
        }
    }

    /// Flush whatever is left after the final chunk.
    pub fn finish(&mut self) -> Vec<GenerationFragment> {
        if self.framing == Framing::PerChunk {
            return Vec::new();
        }

        if !self.partial_utf8.is_empty() {
            let tail = String::from_utf8_lossy(&self.partial_utf8).into_owned();
            self.partial_utf8.clear();
            self.line.push_str(&tail);
        }

        let rest = std::mem::take(&mut self.line);
        self.parse_line(&rest).into_iter().collect()
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.partial_utf8.extend_from_slice(chunk);
        match std::str::from_utf8(&self.partial_utf8) {
            Ok(s) => {
                let s = s.to_string();
                self.partial_utf8.clear();
                s
            }
            Err(e) if e.error_len().is_none() => {
                // Incomplete sequence at the end: keep it for the next chunk.
                let valid = e.valid_up_to();
                let s = String::from_utf8_lossy(&self.partial_utf8[..valid]).into_owned();
                self.partial_utf8.drain(..valid);
                s
            }
            Err(_) => {
                let s = String::from_utf8_lossy(&self.partial_utf8).into_owned();
                self.partial_utf8.clear();
                s
            }
        }
    }

    fn parse_line(&mut self, segment: &str) -> Option<GenerationFragment> {
        let line = segment.trim();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str::<GenerationFragment>(line) {
            Ok(fragment) => Some(fragment),
            Err(e) => {
                self.skipped += 1;
                debug!("Skipping undecodable stream line ({}): {}", e, line);
                None
            }
        }
    }
}

/// Turn a chunked byte stream into a lazy stream of fragments.
///
/// A transport error is yielded once and ends the stream.
pub fn decode_stream<S, E>(
    stream: S,
    framing: Framing,
) -> impl Stream<Item = Result<GenerationFragment>>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<CaptionError>,
{
    async_stream::stream! {
        let mut decoder = LineDecoder::new(framing);
        let mut chunks = std::pin::pin!(stream);

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    for fragment in decoder.push(&bytes) {
                        yield Ok(fragment);
                    }
                }
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            }
        }

        for fragment in decoder.finish() {
            yield Ok(fragment);
        }

        if decoder.skipped() > 0 {
            debug!("Stream ended; {} line(s) skipped", decoder.skipped());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn tokens(fragments: &[GenerationFragment]) -> Vec<String> {
        fragments
            .iter()
            .filter_map(|f| f.token().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_two_objects_in_one_chunk() {
        for framing in [Framing::LineBuffered, Framing::PerChunk] {
            let mut decoder = LineDecoder::new(framing);
            let mut out = decoder.push(b"{\"response\":\"Sun\"}\n{\"response\":\"set\"}\n");
            out.extend(decoder.finish());
            assert_eq!(tokens(&out), vec!["Sun", "set"], "framing {}", framing);
        }
    }

    #[test]
    fn test_whitespace_chunk_yields_nothing() {
        let mut decoder = LineDecoder::new(Framing::LineBuffered);
        assert!(decoder.push(b"  \n\t\n\r\n").is_empty());
        assert_eq!(decoder.skipped(), 0);

        let out = decoder.push(b"{\"response\":\"still here\"}\n");
        assert_eq!(tokens(&out), vec!["still here"]);
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let mut decoder = LineDecoder::new(Framing::LineBuffered);
        let out = decoder.push(b"{\"response\":\"a\"}\n{not json}\n{\"response\":\"b\"}\n");
        assert_eq!(tokens(&out), vec!["a", "b"]);
        assert_eq!(decoder.skipped(), 1);
    }

    #[test]
    fn test_split_object_is_reassembled_when_line_buffered() {
        let mut decoder = LineDecoder::new(Framing::LineBuffered);
        let mut out = decoder.push(b"{\"response\":\"Gol");
        assert!(out.is_empty());
        out.extend(decoder.push(b"den\"}\n"));
        assert_eq!(tokens(&out), vec!["Golden"]);
        assert_eq!(decoder.skipped(), 0);
    }

    #[test]
    fn test_split_object_is_dropped_per_chunk() {
        // Known limitation of per-chunk framing: neither half parses.
        let mut decoder = LineDecoder::new(Framing::PerChunk);
        let mut out = decoder.push(b"{\"response\":\"Sun\"}\n{\"response\":\"Gol");
        out.extend(decoder.push(b"den\"}\n{\"response\":\"!\"}\n"));
        out.extend(decoder.finish());
        assert_eq!(tokens(&out), vec!["Sun", "!"]);
        assert_eq!(decoder.skipped(), 2);
    }

    #[test]
    fn test_unterminated_last_line_flushed_on_finish() {
        let mut decoder = LineDecoder::new(Framing::LineBuffered);
        assert!(decoder.push(b"{\"response\":\"end\",\"done\":true}").is_empty());
        let out = decoder.finish();
        assert_eq!(out.len(), 1);
        assert!(out[0].done);
        assert_eq!(out[0].token(), Some("end"));
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let line = "{\"response\":\"caf\u{e9} \u{2600}\"}\n".as_bytes();
        // Cut inside the three-byte sun glyph.
        let cut = line.len() - 4;
        let mut decoder = LineDecoder::new(Framing::LineBuffered);
        let mut out = decoder.push(&line[..cut]);
        out.extend(decoder.push(&line[cut..]));
        assert_eq!(tokens(&out), vec!["caf\u{e9} \u{2600}"]);
    }

    #[tokio::test]
    async fn test_decode_stream_reassembles_chunks() {
        let chunks = vec![
            Ok::<_, CaptionError>(Bytes::from_static(b"{\"response\":\"Sun\"}\n{\"resp")),
            Ok(Bytes::from_static(b"onse\":\"set\"}\n")),
            Ok(Bytes::from_static(b"{\"response\":\"\",\"done\":true}\n")),
        ];
        let fragments: Vec<_> = decode_stream(stream::iter(chunks), Framing::LineBuffered)
            .collect()
            .await;
        let fragments: Vec<GenerationFragment> =
            fragments.into_iter().collect::<Result<_>>().unwrap();
        assert_eq!(tokens(&fragments), vec!["Sun", "set"]);
        assert!(fragments.last().unwrap().done);
    }

    #[tokio::test]
    async fn test_decode_stream_stops_on_transport_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"{\"response\":\"a\"}\n")),
            Err(CaptionError::ConnectionRefused("http://127.0.0.1:1".into())),
            Ok(Bytes::from_static(b"{\"response\":\"b\"}\n")),
        ];
        let items: Vec<_> = decode_stream(stream::iter(chunks), Framing::LineBuffered)
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(CaptionError::ConnectionRefused(_))));
    }

    #[test]
    fn test_framing_parse() {
        assert_eq!("per-chunk".parse::<Framing>().unwrap(), Framing::PerChunk);
        assert_eq!("line_buffered".parse::<Framing>().unwrap(), Framing::LineBuffered);
        assert!("nope".parse::<Framing>().is_err());
    }
}
