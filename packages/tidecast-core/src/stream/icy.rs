//! ICY (Shoutcast) protocol metadata handling.
//!
//! This module encapsulates ICY metadata formatting and the per-session
//! splicing of metadata blocks into the encoded byte stream, keeping
//! protocol-specific concerns separate from session bookkeeping.

use bytes::Bytes;

use super::StreamSession;
use crate::error::SpliceError;
use crate::player::QueueItem;
pub use crate::protocol_constants::ICY_METAINT;
use crate::protocol_constants::{ICY_BLOCK_UNIT, ICY_METALEN_MAX, ICY_TITLE_HEAD, ICY_TITLE_TAIL};

/// Formats display titles into ICY metadata blocks.
///
/// Stateless; the dispatcher caches the block for the current title.
pub struct IcyFormatter;

impl IcyFormatter {
    /// Longest title (in bytes) that still fits the payload ceiling.
    pub const MAX_TITLE_LEN: usize = ICY_METALEN_MAX - ICY_TITLE_HEAD.len() - ICY_TITLE_TAIL.len();

    /// Builds the display title for a queue item.
    ///
    /// `"<title> - <artist>"` when both are present, otherwise whichever one
    /// is non-empty.
    #[must_use]
    pub fn display_title(item: &QueueItem) -> String {
        match (item.title.is_empty(), item.artist.is_empty()) {
            (false, false) => format!("{} - {}", item.title, item.artist),
            (false, true) => item.title.clone(),
            _ => item.artist.clone(),
        }
    }

    /// Formats a title into an ICY metadata block.
    ///
    /// The first byte is the number `N` of 16-byte words that follow; the
    /// payload `StreamTitle='<title>';` is null-padded to `N * 16` bytes.
    /// `None` produces the single zero byte meaning "no title".
    #[must_use]
    pub fn metadata_block(title: Option<&str>) -> Vec<u8> {
        let Some(title) = title else {
            return vec![0];
        };

        let title = truncate_on_char_boundary(title, Self::MAX_TITLE_LEN);
        let payload_len = ICY_TITLE_HEAD.len() + title.len() + ICY_TITLE_TAIL.len();
        let words = payload_len.div_ceil(ICY_BLOCK_UNIT);

        let mut block = Vec::with_capacity(1 + words * ICY_BLOCK_UNIT);
        block.push(words as u8);
        block.extend_from_slice(ICY_TITLE_HEAD.as_bytes());
        block.extend_from_slice(title.as_bytes());
        block.extend_from_slice(ICY_TITLE_TAIL.as_bytes());
        block.resize(1 + words * ICY_BLOCK_UNIT, 0);

        log::trace!("[Icy] StreamTitle='{}' ({} words)", title, words);
        block
    }

    /// Parses a metadata block back into its word count and title.
    ///
    /// Returns `None` if the block is malformed or shorter than announced.
    #[must_use]
    pub fn parse_block(block: &[u8]) -> Option<(usize, Option<String>)> {
        let words = *block.first()? as usize;
        if words == 0 {
            return Some((0, None));
        }

        let payload = block.get(1..1 + words * ICY_BLOCK_UNIT)?;
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        let text = std::str::from_utf8(&payload[..end]).ok()?;
        let title = text
            .strip_prefix(ICY_TITLE_HEAD)?
            .strip_suffix(ICY_TITLE_TAIL)?;

        Some((words, Some(title.to_string())))
    }
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Computes the bytes to send to one session for an encoded chunk.
///
/// Sessions without metadata always get `raw` unchanged. ICY sessions get
/// `block` inserted at every point exactly [`ICY_METAINT`] audio bytes after
/// the previous insertion. A boundary that falls exactly at the end of the
/// chunk is left for the next chunk, so the session's counter never exceeds
/// the interval.
///
/// The session counter is only updated on success; on allocation failure the
/// session is untouched and the caller skips its delivery.
pub fn splice(session: &mut StreamSession, raw: &Bytes, block: &[u8]) -> Result<Bytes, SpliceError> {
    let len = raw.len() as u64;
    let metaint = ICY_METAINT as u64;

    if !session.wants_metadata {
        session.bytes_since_metadata += len;
        return Ok(raw.clone());
    }

    let count = session.bytes_since_metadata + len;
    if count <= metaint {
        session.bytes_since_metadata = count;
        return Ok(raw.clone());
    }

    // Boundaries strictly inside this chunk
    let insertions = ((count - 1) / metaint) as usize;
    let requested = raw.len() + insertions * block.len();

    let mut out = Vec::new();
    out.try_reserve_exact(requested)
        .map_err(|_| SpliceError::Allocation { requested })?;

    let mut start = 0;
    let mut offset = (metaint - session.bytes_since_metadata) as usize;
    for _ in 0..insertions {
        out.extend_from_slice(&raw[start..offset]);
        out.extend_from_slice(block);
        start = offset;
        offset += ICY_METAINT;
    }
    out.extend_from_slice(&raw[start..]);

    session.bytes_since_metadata = count - insertions as u64 * metaint;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::session::tests::test_session;

    mod formatter {
        use super::*;

        fn item(title: &str, artist: &str) -> QueueItem {
            QueueItem {
                title: title.to_string(),
                artist: artist.to_string(),
            }
        }

        #[test]
        fn no_title_is_single_zero_byte() {
            assert_eq!(IcyFormatter::metadata_block(None), vec![0]);
        }

        #[test]
        fn song_and_band_block_layout() {
            let title = IcyFormatter::display_title(&item("Song", "Band"));
            assert_eq!(title, "Song - Band");

            let block = IcyFormatter::metadata_block(Some(&title));
            assert_eq!(block.len(), 33);
            assert_eq!(block[0], 2);
            assert_eq!(&block[1..14], b"StreamTitle='");
            assert_eq!(&block[14..25], b"Song - Band");
            assert_eq!(&block[25..27], b"';");
            assert!(block[27..].iter().all(|&b| b == 0));
        }

        #[test]
        fn display_title_falls_back_to_single_field() {
            assert_eq!(IcyFormatter::display_title(&item("Solo", "")), "Solo");
            assert_eq!(IcyFormatter::display_title(&item("", "Band")), "Band");
            assert_eq!(IcyFormatter::display_title(&item("", "")), "");
        }

        #[test]
        fn empty_title_still_carries_wrapper() {
            let block = IcyFormatter::metadata_block(Some(""));
            assert_eq!(block[0], 1);
            assert_eq!(block.len(), 17);
        }

        #[test]
        fn payload_exactly_one_word() {
            // 13 + 1 + 2 = 16 bytes
            let block = IcyFormatter::metadata_block(Some("x"));
            assert_eq!(block[0], 1);
            assert_eq!(block.len(), 17);
            assert_eq!(block[16], b';');
        }

        #[test]
        fn titles_round_trip_across_lengths() {
            for len in [0usize, 1, 2, 17, 100, 1000, 4064, 4065, 4066, 4080] {
                let title = "a".repeat(len);
                let block = IcyFormatter::metadata_block(Some(&title));
                let (words, parsed) = IcyFormatter::parse_block(&block).unwrap();

                let expected = &title[..len.min(IcyFormatter::MAX_TITLE_LEN)];
                assert_eq!(parsed.as_deref(), Some(expected), "len {}", len);
                assert_eq!(block.len(), 1 + words * 16, "len {}", len);
                assert!(words <= 255);
            }
        }

        #[test]
        fn oversized_title_is_truncated_to_max_block() {
            let block = IcyFormatter::metadata_block(Some(&"z".repeat(5000)));
            assert_eq!(block[0], 255);
            assert_eq!(block.len(), 1 + ICY_METALEN_MAX);
        }

        #[test]
        fn truncation_respects_utf8_boundaries() {
            let title = "é".repeat(3000); // 6000 bytes
            let block = IcyFormatter::metadata_block(Some(&title));
            let (_, parsed) = IcyFormatter::parse_block(&block).unwrap();
            let parsed = parsed.unwrap();
            assert!(parsed.len() <= IcyFormatter::MAX_TITLE_LEN);
            assert!(parsed.chars().all(|c| c == 'é'));
        }

        #[test]
        fn parse_rejects_truncated_block() {
            assert!(IcyFormatter::parse_block(&[2, b'S']).is_none());
            assert!(IcyFormatter::parse_block(&[]).is_none());
        }
    }

    mod splicing {
        use super::*;

        fn chunk(len: usize, fill: u8) -> Bytes {
            Bytes::from(vec![fill; len])
        }

        #[test]
        fn plain_session_receives_raw_bytes() {
            let mut session = test_session(false);
            let raw = chunk(20_000, 7);
            let out = splice(&mut session, &raw, &[0]).unwrap();
            assert_eq!(out, raw);
            assert_eq!(session.bytes_since_metadata, 20_000);
        }

        #[test]
        fn no_splice_up_to_interval() {
            let mut session = test_session(true);
            let out = splice(&mut session, &chunk(ICY_METAINT, 1), &[0]).unwrap();
            assert_eq!(out.len(), ICY_METAINT);
            assert_eq!(session.bytes_since_metadata, ICY_METAINT as u64);
        }

        #[test]
        fn block_inserted_at_len_minus_overflow() {
            let mut session = test_session(true);
            session.bytes_since_metadata = 8000;
            let raw = Bytes::from((0..500u32).map(|i| i as u8).collect::<Vec<_>>());
            let block = IcyFormatter::metadata_block(Some("Song - Band"));

            let out = splice(&mut session, &raw, &block).unwrap();

            // count = 8500, overflow = 308, offset = 192
            assert_eq!(out.len(), 500 + 33);
            assert_eq!(&out[..192], &raw[..192]);
            assert_eq!(&out[192..225], &block[..]);
            assert_eq!(&out[225..], &raw[192..]);
            assert_eq!(session.bytes_since_metadata, 308);
        }

        #[test]
        fn boundary_at_chunk_start_after_exact_fill() {
            let mut session = test_session(true);
            splice(&mut session, &chunk(ICY_METAINT, 1), &[0]).unwrap();
            let out = splice(&mut session, &chunk(10, 2), &[0]).unwrap();
            assert_eq!(out[0], 0);
            assert_eq!(out.len(), 11);
            assert_eq!(session.bytes_since_metadata, 10);
        }

        #[test]
        fn large_chunk_gets_block_at_every_boundary() {
            let mut session = test_session(true);
            let raw = chunk(ICY_METAINT * 2 + 100, 5);
            let out = splice(&mut session, &raw, &[0]).unwrap();

            assert_eq!(out.len(), raw.len() + 2);
            assert_eq!(out[ICY_METAINT], 0);
            assert_eq!(out[2 * ICY_METAINT + 1], 0);
            assert_eq!(session.bytes_since_metadata, 100);
        }

        #[test]
        fn counter_never_exceeds_interval() {
            let mut session = test_session(true);
            for len in [1usize, 8191, 8192, 8193, 16_384, 24_577, 3, 40_000] {
                splice(&mut session, &chunk(len, 9), &[0]).unwrap();
                assert!(session.bytes_since_metadata >= 1);
                assert!(session.bytes_since_metadata <= ICY_METAINT as u64);
            }
        }

        /// Reassembles a received ICY stream and checks block placement.
        fn assert_block_every_interval(received: &[u8], block: &[u8]) -> usize {
            let mut audio = 0usize;
            let mut pos = 0usize;
            let mut blocks = 0usize;
            while pos < received.len() {
                let take = (ICY_METAINT).min(received.len() - pos);
                audio += take;
                pos += take;
                if pos < received.len() {
                    assert_eq!(&received[pos..pos + block.len()], block);
                    pos += block.len();
                    blocks += 1;
                }
            }
            assert_eq!(blocks, (audio - 1) / ICY_METAINT);
            audio
        }

        #[test]
        fn arbitrary_chunk_sequence_keeps_cadence() {
            let mut session = test_session(true);
            let block = IcyFormatter::metadata_block(Some("Now Playing"));
            let lengths = [417usize, 1, 9000, 8192, 3000, 30_000, 5, 8187, 12_000, 777];

            let mut received = Vec::new();
            let mut sent_audio = 0;
            for (i, len) in lengths.iter().enumerate() {
                // audio bytes never collide with the block's length byte
                let raw = chunk(*len, 0x80 | i as u8);
                sent_audio += len;
                received.extend_from_slice(&splice(&mut session, &raw, &block).unwrap());
            }

            let audio = assert_block_every_interval(&received, &block);
            assert_eq!(audio, sent_audio);
        }

        #[test]
        fn sessions_keep_independent_cadence() {
            let mut early = test_session(true);
            let mut late = test_session(true);

            splice(&mut early, &chunk(6000, 1), &[0]).unwrap();
            let early_out = splice(&mut early, &chunk(4000, 1), &[0]).unwrap();
            let late_out = splice(&mut late, &chunk(4000, 1), &[0]).unwrap();

            assert_eq!(early_out.len(), 4001);
            assert_eq!(early_out[2192], 0);
            assert_eq!(late_out.len(), 4000);
            assert_eq!(late.bytes_since_metadata, 4000);
        }
    }
}
