//! Terminator-delimited message framing.
//!
//! A message is every byte from the end of the previous message (or the
//! start of the stream) through the last byte of the next terminator. The
//! payload is never inspected beyond locating the terminator.

use crate::runtime::RecvBuffer;
use bytes::Bytes;

/// Default message terminator for the TAK event protocol.
pub const DEFAULT_TERMINATOR: &[u8] = b"</event>";

/// Splits receive buffers into complete messages.
#[derive(Debug, Clone)]
pub struct Framer {
    terminator: Vec<u8>,
}

impl Framer {
    /// Create a framer for the given terminator.
    ///
    /// # Panics
    /// Panics if `terminator` is empty.
    pub fn new(terminator: impl Into<Vec<u8>>) -> Self {
        let terminator = terminator.into();
        assert!(!terminator.is_empty(), "terminator must not be empty");
        Self { terminator }
    }

    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }

    /// Extract every complete message after `received` new bytes were
    /// committed to `buf`.
    ///
    /// Bytes that were already in the buffer before this receive are known to
    /// hold no terminator, so the search starts `terminator.len() - 1` bytes
    /// before the old end to catch a terminator split across reads.
    pub fn consume(&self, buf: &mut RecvBuffer, received: usize) -> Vec<Bytes> {
        let previous = buf.len().saturating_sub(received);
        let mut from = previous.saturating_sub(self.terminator.len() - 1);
        let mut messages = Vec::new();

        while let Some(pos) = find(&buf.data()[from..], &self.terminator) {
            let end = from + pos + self.terminator.len();
            messages.push(Bytes::copy_from_slice(&buf.data()[..end]));
            buf.consume(end);
            from = 0;
        }

        messages
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINATOR)
    }
}

/// Leftmost occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CHUNK: usize = 64;

    /// Feed `chunks` one receive at a time, collecting every message.
    fn feed(framer: &Framer, buf: &mut RecvBuffer, chunks: &[&[u8]]) -> Vec<Bytes> {
        let mut out = Vec::new();
        for chunk in chunks {
            buf.extend(chunk, CHUNK).unwrap();
            out.extend(framer.consume(buf, chunk.len()));
        }
        out
    }

    fn feed_text(framer: &Framer, buf: &mut RecvBuffer, chunks: &[&str]) -> Vec<Bytes> {
        let chunks: Vec<&[u8]> = chunks.iter().map(|c| c.as_bytes()).collect();
        feed(framer, buf, &chunks)
    }

    /// Reference: split a whole stream in one pass.
    fn split_once(stream: &[u8], terminator: &[u8]) -> (Vec<Vec<u8>>, Vec<u8>) {
        let mut messages = Vec::new();
        let mut rest = stream;
        while let Some(pos) = find(rest, terminator) {
            let end = pos + terminator.len();
            messages.push(rest[..end].to_vec());
            rest = &rest[end..];
        }
        (messages, rest.to_vec())
    }

    #[test]
    fn test_terminator_split_across_three_reads() {
        let framer = Framer::default();
        let mut buf = RecvBuffer::new();

        let message = b"<event>X</event>";
        let out = feed(
            &framer,
            &mut buf,
            &[&message[..5], &message[5..11], &message[11..]],
        );

        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &message[..]);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_every_message_in_one_read_is_extracted() {
        let framer = Framer::default();
        let mut buf = RecvBuffer::new();

        let out = feed_text(&framer, &mut buf, &["<event>1</event><event>2</event><ev"]);

        assert_eq!(out.len(), 2);
        assert_eq!(&out[0][..], b"<event>1</event>");
        assert_eq!(&out[1][..], b"<event>2</event>");
        assert_eq!(buf.data(), b"<ev");
    }

    #[test]
    fn test_no_terminator_is_retained() {
        let framer = Framer::default();
        let mut buf = RecvBuffer::new();

        let out = feed_text(&framer, &mut buf, &["<event>", "partial", "</even"]);

        assert!(out.is_empty());
        assert_eq!(buf.data(), b"<event>partial</even");
    }

    #[test]
    fn test_terminator_only_message() {
        let framer = Framer::default();
        let mut buf = RecvBuffer::new();

        let out = feed_text(&framer, &mut buf, &["</event></event>"]);

        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|m| &m[..] == b"</event>"));
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_single_byte_terminator() {
        let framer = Framer::new(b"\n".to_vec());
        let mut buf = RecvBuffer::new();

        let out = feed_text(&framer, &mut buf, &["a", "b\nc", "\n\n"]);

        let out: Vec<&[u8]> = out.iter().map(|m| &m[..]).collect();
        assert_eq!(out, vec![&b"ab\n"[..], &b"c\n"[..], &b"\n"[..]]);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_zero_byte_receive_finds_nothing_new() {
        let framer = Framer::default();
        let mut buf = RecvBuffer::new();
        buf.extend(b"<event>", CHUNK).unwrap();

        assert!(framer.consume(&mut buf, 0).is_empty());
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn test_large_message_grows_buffer() {
        let framer = Framer::default();
        let mut buf = RecvBuffer::new();

        let mut message = b"<event>".to_vec();
        message.extend(std::iter::repeat(b'x').take(CHUNK * 5));
        message.extend_from_slice(b"</event>");

        let chunks: Vec<&[u8]> = message.chunks(CHUNK / 2).collect();
        let out = feed(&framer, &mut buf, &chunks);

        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &message[..]);
        assert!(buf.capacity() >= message.len());
        assert!(buf.capacity().is_power_of_two());
    }

    proptest! {
        #[test]
        fn prop_chopping_matches_single_pass(
            parts in prop::collection::vec(
                prop_oneof![
                    Just(b"</event>".to_vec()),
                    Just(b"</ev".to_vec()),
                    Just(b"ent>".to_vec()),
                    prop::collection::vec(any::<u8>(), 0..12),
                ],
                0..24,
            ),
            cuts in prop::collection::vec(1usize..20, 1..40),
        ) {
            let stream: Vec<u8> = parts.concat();
            let framer = Framer::default();
            let mut buf = RecvBuffer::new();

            let mut chunks = Vec::new();
            let mut rest = &stream[..];
            for cut in cuts.iter().cycle() {
                if rest.is_empty() {
                    break;
                }
                let n = (*cut).min(rest.len());
                chunks.push(&rest[..n]);
                rest = &rest[n..];
            }

            let out = feed(&framer, &mut buf, &chunks);
            let (expected, remainder) = split_once(&stream, framer.terminator());

            let out: Vec<Vec<u8>> = out.iter().map(|m| m.to_vec()).collect();
            prop_assert_eq!(out, expected);
            prop_assert_eq!(buf.data(), &remainder[..]);
        }
    }
}
