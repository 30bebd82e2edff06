//! Blank-line framing for the EDA event stream.
//!
//! The server writes one event per paragraph: `data: <json>` followed by an
//! empty line. Network fragments can split a frame anywhere, including inside
//! the delimiter or inside a multi-byte UTF-8 character, so the decoder keeps a
//! byte carry-over buffer and only interprets a frame once its closing
//! delimiter has arrived.

use tracing::{debug, trace};

/// Prefix every meaningful frame starts with.
pub const DATA_PREFIX: &str = "data: ";

/// Separator between frames.
const FRAME_DELIMITER: &[u8] = b"\n\n";

/// Longest frame preview included in trace output.
const PREVIEW_LEN: usize = 80;

// ---------------------------------------------------------------------------
// FrameDecoder
// ---------------------------------------------------------------------------

/// Stateful splitter turning arbitrary byte fragments into frame payloads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes of the frame currently being assembled.
    buffer: Vec<u8>,
    /// Complete frames seen so far, including noise.
    frames_seen: u64,
    /// Complete frames dropped for lacking [`DATA_PREFIX`].
    noise_dropped: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment and return the payloads of every frame it completed.
    ///
    /// Payloads are returned with the `data: ` prefix stripped, in wire order.
    /// Bytes after the last delimiter stay buffered for the next call.
    pub fn decode(&mut self, fragment: &[u8]) -> Vec<String> {
        if fragment.is_empty() {
            return Vec::new();
        }

        // The old buffer holds no full delimiter, but its last byte may be the
        // first half of one.
        let mut cursor = self.buffer.len().saturating_sub(1);
        self.buffer.extend_from_slice(fragment);

        let mut payloads = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = find_delimiter(&self.buffer[cursor..]) {
            let end = cursor + offset;
            if let Some(payload) = self.accept(consumed, end) {
                payloads.push(payload);
            }
            consumed = end + FRAME_DELIMITER.len();
            cursor = consumed;
        }

        self.buffer.drain(..consumed);
        payloads
    }

    /// Discard whatever partial frame is still buffered at end of stream.
    ///
    /// Returns the number of bytes thrown away. An unterminated trailing frame
    /// is never emitted.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buffer.len();
        if discarded > 0 {
            debug!(
                bytes = discarded,
                preview = %preview(&self.buffer),
                "discarding unterminated trailing frame"
            );
        }
        self.buffer.clear();
        discarded
    }

    /// Bytes currently buffered waiting for a delimiter.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Complete frames seen so far, including noise.
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Complete frames dropped as protocol noise.
    pub fn noise_dropped(&self) -> u64 {
        self.noise_dropped
    }

    /// Interpret `buffer[start..end]` as one complete frame.
    fn accept(&mut self, start: usize, end: usize) -> Option<String> {
        self.frames_seen += 1;
        let frame = &self.buffer[start..end];

        match frame.strip_prefix(DATA_PREFIX.as_bytes()) {
            // Invalid sequences become U+FFFD.
            Some(payload) => Some(String::from_utf8_lossy(payload).into_owned()),
            None => {
                self.noise_dropped += 1;
                trace!(frame = %preview(frame), "skipping frame without data prefix");
                None
            }
        }
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}

fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.chars().take(PREVIEW_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(fragments: &[&[u8]]) -> Vec<String> {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        for fragment in fragments {
            out.extend(decoder.decode(fragment));
        }
        decoder.finish();
        out
    }

    #[test]
    fn single_complete_frame() {
        let out = decode_all(&[b"data: {\"block_id\":1}\n\n".as_slice()]);
        assert_eq!(out, vec![r#"{"block_id":1}"#.to_string()]);
    }

    #[test]
    fn chunk_boundaries_do_not_change_output() {
        let fragments: [&[u8]; 3] = [
            b"data: {\"block_",
            b"id\":1,\"status\":\"queued\"}\n",
            b"\ndata: {\"block_id\":2,\"status\":\"queued\"}\n\n",
        ];
        let joined = fragments.concat();

        let split = decode_all(&fragments);
        let whole = decode_all(&[joined.as_slice()]);

        assert_eq!(split.len(), 2);
        assert_eq!(split, whole);
        assert_eq!(split[0], r#"{"block_id":1,"status":"queued"}"#);
    }

    #[test]
    fn every_split_point_of_fixture_agrees() {
        let body = std::fs::read("../../../fixtures/stream/eda-session.sse").expect("read fixture");
        let expected = decode_all(&[body.as_slice()]);
        assert_eq!(expected.len(), 7);

        for at in 0..=body.len() {
            let (head, tail) = body.split_at(at);
            assert_eq!(decode_all(&[head, tail]), expected, "split at byte {at}");
        }
    }

    #[test]
    fn byte_at_a_time() {
        let body = b"data: {\"block_id\":7}\n\n: ping\n\ndata: {\"block_id\":8}\n\n";
        let fragments: Vec<&[u8]> = body.chunks(1).collect();
        let out = decode_all(&fragments);
        assert_eq!(out, vec![r#"{"block_id":7}"#, r#"{"block_id":8}"#]);
    }

    #[test]
    fn multiple_frames_in_one_fragment() {
        let mut decoder = FrameDecoder::new();
        let out = decoder.decode(b"data: a\n\ndata: b\n\ndata: c\n\n");
        assert_eq!(out, vec!["a", "b", "c"]);
        assert_eq!(decoder.pending_len(), 0);
        assert_eq!(decoder.frames_seen(), 3);
    }

    #[test]
    fn fragment_without_delimiter_only_buffers() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode(b"data: {\"block_id\"").is_empty());
        assert!(decoder.decode(b":4}\n").is_empty());
        assert_eq!(decoder.pending_len(), 21);
        assert_eq!(decoder.decode(b"\n"), vec![r#"{"block_id":4}"#]);
    }

    #[test]
    fn empty_fragment_is_a_no_op() {
        let mut decoder = FrameDecoder::new();
        decoder.decode(b"data: x");
        assert!(decoder.decode(b"").is_empty());
        assert_eq!(decoder.pending_len(), 7);
    }

    #[test]
    fn frames_without_prefix_are_dropped() {
        let mut decoder = FrameDecoder::new();
        let out = decoder.decode(b": keep-alive\n\nevent: ping\n\ndata: real\n\n");
        assert_eq!(out, vec!["real"]);
        assert_eq!(decoder.noise_dropped(), 2);
    }

    #[test]
    fn extra_newlines_yield_an_empty_noise_frame() {
        // "\n\n\n" splits as delimiter + "\n"-prefixed next frame, which lacks the prefix.
        let mut decoder = FrameDecoder::new();
        let out = decoder.decode(b"data: a\n\n\ndata: b\n\n");
        assert_eq!(out, vec!["a"]);
        assert_eq!(decoder.noise_dropped(), 1);
    }

    #[test]
    fn trailing_partial_frame_is_discarded() {
        let mut decoder = FrameDecoder::new();
        let out = decoder.decode(b"data: {\"block_id\":1}\n\ndata: {\"block_id\":2");
        assert_eq!(out.len(), 1);
        assert_eq!(decoder.finish(), 19);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn utf8_character_split_across_fragments() {
        let body = "data: {\"block_id\":1,\"output\":\"température\"}\n\n".as_bytes();
        let cut = body.iter().position(|&b| b == 0xC3).expect("multi-byte char") + 1;
        let out = decode_all(&[&body[..cut], &body[cut..]]);
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("température"));
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let mut decoder = FrameDecoder::new();
        let out = decoder.decode(b"data: caf\xE9\n\n");
        assert_eq!(out, vec!["caf\u{FFFD}"]);
    }
}
