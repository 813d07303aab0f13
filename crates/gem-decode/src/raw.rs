//! Event-file interface and the big-endian block/bank wire parser (spec §6).
//!
//! The core only depends on [`EventSource`]; [`RawEvent`] and [`parse_event`]
//! are the concrete collaborator implementation spec §6 asks for, built on
//! top of [`crate::binutil`]'s defining-word helpers.

use std::collections::HashMap;

use crate::binutil::{
    defining_word_kind, is_defining_word, read_word_be, sign_extend, RawEventError, BLOCK_HEADER,
    BLOCK_TRAILER, EVENT_HEADER,
};

/// Read-only event view the decode core pulls from (spec §6). `channel` is
/// the flat front-end channel index `chip_id * 128 + raw_channel`; the
/// caller (the module driver) splits it back apart via the chip map.
pub trait EventSource {
    fn num_hits(&self, crate_id: u32, slot: u32, channel: u32) -> usize;
    fn raw_data(&self, crate_id: u32, slot: u32, channel: u32, index: usize) -> u32;
    fn data(&self, crate_id: u32, slot: u32, channel: u32, index: usize) -> u32;
    fn event_number(&self) -> u64;
}

const BANK_TYPE_SEGMENT: u8 = 0x20;
const BANK_TYPE_ROC: u8 = 0x10;

/// bits [26:16] of a defining word: the slot number.
fn defining_word_slot(word: u32) -> u32 {
    (word >> 16) & 0x07FF
}

/// One decoded event: every (crate, slot, channel) hit list plus the
/// per-chip debug-word online common-mode values, keyed the same way.
#[derive(Debug, Clone, Default)]
pub struct RawEvent {
    event_number: u64,
    hits: HashMap<(u32, u32, u32), Vec<(u32, u32)>>,
    /// Decoded online common-mode values per (crate, slot, chip_id): six
    /// signed values, one per time sample (spec §6 "debug-word channel").
    debug_common_mode: HashMap<(u32, u32, u32), [i32; 6]>,
    event_type: Option<u16>,
}

impl RawEvent {
    pub fn event_type(&self) -> Option<u16> {
        self.event_type
    }

    /// Online common-mode debug values for one chip, if present in this event.
    pub fn debug_common_mode(&self, crate_id: u32, slot: u32, chip_id: u32) -> Option<[i32; 6]> {
        self.debug_common_mode.get(&(crate_id, slot, chip_id)).copied()
    }
}

impl EventSource for RawEvent {
    fn num_hits(&self, crate_id: u32, slot: u32, channel: u32) -> usize {
        self.hits.get(&(crate_id, slot, channel)).map(|v| v.len()).unwrap_or(0)
    }

    fn raw_data(&self, crate_id: u32, slot: u32, channel: u32, index: usize) -> u32 {
        self.hits
            .get(&(crate_id, slot, channel))
            .and_then(|v| v.get(index))
            .map(|&(tag, _)| tag)
            .unwrap_or(0)
    }

    fn data(&self, crate_id: u32, slot: u32, channel: u32, index: usize) -> u32 {
        self.hits
            .get(&(crate_id, slot, channel))
            .and_then(|v| v.get(index))
            .map(|&(_, value)| value)
            .unwrap_or(0)
    }

    fn event_number(&self) -> u64 {
        self.event_number
    }
}

impl RawEvent {
    fn new(event_number: u64) -> Self {
        Self {
            event_number,
            hits: HashMap::new(),
            debug_common_mode: HashMap::new(),
            event_type: None,
        }
    }
}

/// Parse one ROC sub-bank's block-structured payload: a `BLOCK_HEADER`,
/// one or more `EVENT_HEADER` sections each carrying `(channel, sample)`
/// tag words paired with an ADC/debug data word, and a matching
/// `BLOCK_TRAILER` (spec §6, §7: `UnmatchedBlockSlot`).
fn parse_roc_block(
    words: &[u32],
    crate_id: u32,
    event: &mut RawEvent,
) -> Result<(), RawEventError> {
    let mut i = 0;
    while i < words.len() {
        let header = read_word_be(words, i)?;
        if !is_defining_word(header) || defining_word_kind(header) != BLOCK_HEADER {
            return Err(RawEventError::MalformedRawEvent {
                reason: format!("expected BLOCK_HEADER at word {i}"),
            });
        }
        let header_slot = defining_word_slot(header);
        i += 1;

        loop {
            let word = read_word_be(words, i)?;
            if is_defining_word(word) && defining_word_kind(word) == BLOCK_TRAILER {
                let trailer_slot = defining_word_slot(word);
                if trailer_slot != header_slot {
                    return Err(RawEventError::UnmatchedBlockSlot {
                        header_slot,
                        other_slot: trailer_slot,
                    });
                }
                i += 1;
                break;
            }

            if !is_defining_word(word) || defining_word_kind(word) != EVENT_HEADER {
                return Err(RawEventError::MalformedRawEvent {
                    reason: format!("expected EVENT_HEADER or BLOCK_TRAILER at word {i}"),
                });
            }
            let header_event_slot = defining_word_slot(word);
            if header_event_slot != header_slot {
                return Err(RawEventError::UnmatchedBlockSlot {
                    header_slot,
                    other_slot: header_event_slot,
                });
            }
            i += 1;

            // Payload words: pairs of (tag, data) until the next defining word.
            loop {
                let next = read_word_be(words, i)?;
                if is_defining_word(next) {
                    break;
                }
                let tag = next;
                let channel = (tag >> 8) & 0xFFFF;
                i += 1;
                let data = read_word_be(words, i)?;
                i += 1;
                event
                    .hits
                    .entry((crate_id, header_slot, channel))
                    .or_default()
                    .push((tag, data));
            }
        }
    }
    Ok(())
}

/// Decode three consecutive debug words into six sign-extended 13-bit
/// online common-mode values (spec §6's "Debug-word channel").
pub fn decode_debug_words(words: [u32; 3]) -> [i32; 6] {
    let mut out = [0i32; 6];
    for (i, word) in words.iter().enumerate() {
        out[2 * i] = sign_extend(word & 0x1FFF, 13);
        out[2 * i + 1] = sign_extend((word >> 13) & 0x1FFF, 13);
    }
    out
}

/// Parse one outer event bank: a BANK header, a trigger sub-bank (type
/// SEGMENT, carrying a 16-bit event type), and zero or more ROC sub-banks
/// (type ROC) carrying block-structured strip data. Sub-banks whose tag
/// isn't in `interesting_tags` are skipped entirely (spec §6: "filter
/// sub-banks by tag").
pub fn parse_event(
    words: &[u32],
    event_number: u64,
    crate_id: u32,
    interesting_tags: &[u32],
) -> Result<RawEvent, RawEventError> {
    let mut event = RawEvent::new(event_number);
    let mut i = 0;

    while i < words.len() {
        let length = read_word_be(words, i)? as usize;
        if length == 0 {
            break;
        }
        let bank_start = i;
        let header_word = read_word_be(words, i + 1)?;
        let tag = (header_word >> 16) & 0xFFFF;
        let bank_type = ((header_word >> 8) & 0xFF) as u8;
        let body_start = i + 2;
        let body_end = bank_start + 1 + length;
        if body_end > words.len() {
            return Err(RawEventError::MalformedRawEvent {
                reason: format!("bank at word {bank_start} declares length {length} past buffer end"),
            });
        }
        let body = &words[body_start..body_end];

        if !interesting_tags.is_empty() && !interesting_tags.contains(&tag) {
            i = body_end;
            continue;
        }

        match bank_type {
            BANK_TYPE_SEGMENT => {
                let word0 = body.first().copied().unwrap_or(0);
                event.event_type = Some((word0 & 0xFFFF) as u16);
            }
            BANK_TYPE_ROC => {
                parse_roc_block(body, crate_id, &mut event)?;
            }
            other => {
                return Err(RawEventError::UnknownBankTag { tag: other as u32 });
            }
        }

        i = body_end;
    }

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(tag: u16, bank_type: u8, body: &[u32]) -> Vec<u32> {
        let mut out = vec![(body.len() + 1) as u32, ((tag as u32) << 16) | ((bank_type as u32) << 8)];
        out.extend_from_slice(body);
        out
    }

    fn block_header(slot: u32) -> u32 {
        0x8000_0000 | ((BLOCK_HEADER as u32) << 27) | ((slot & 0x7FF) << 16)
    }
    fn block_trailer(slot: u32) -> u32 {
        0x8000_0000 | ((BLOCK_TRAILER as u32) << 27) | ((slot & 0x7FF) << 16)
    }
    fn event_header(slot: u32) -> u32 {
        0x8000_0000 | ((EVENT_HEADER as u32) << 27) | ((slot & 0x7FF) << 16)
    }

    #[test]
    fn roundtrip_single_chip_two_hits() {
        let channel = 5u32;
        let tag = channel << 8;
        let roc_body = vec![
            block_header(2),
            event_header(2),
            tag,
            1234,
            tag,
            5678,
            block_trailer(2),
        ];
        let words = bank(0x10, BANK_TYPE_ROC, &roc_body);
        let event = parse_event(&words, 42, 0, &[]).unwrap();
        assert_eq!(event.event_number(), 42);
        assert_eq!(event.num_hits(0, 2, channel), 2);
        assert_eq!(event.data(0, 2, channel, 0), 1234);
        assert_eq!(event.data(0, 2, channel, 1), 5678);
    }

    #[test]
    fn mismatched_block_trailer_slot_is_rejected() {
        let roc_body = vec![block_header(2), event_header(2), 0u32, 0u32, block_trailer(3)];
        let words = bank(0x10, BANK_TYPE_ROC, &roc_body);
        let err = parse_event(&words, 1, 0, &[]).unwrap_err();
        assert!(matches!(err, RawEventError::UnmatchedBlockSlot { .. }));
    }

    #[test]
    fn segment_bank_carries_event_type() {
        let words = bank(0x1, BANK_TYPE_SEGMENT, &[7]);
        let event = parse_event(&words, 1, 0, &[]).unwrap();
        assert_eq!(event.event_type(), Some(7));
    }

    #[test]
    fn uninteresting_tag_is_skipped() {
        let mut words = bank(0x99, BANK_TYPE_SEGMENT, &[7]);
        words.extend(bank(0x1, BANK_TYPE_SEGMENT, &[9]));
        let event = parse_event(&words, 1, 0, &[0x1]).unwrap();
        assert_eq!(event.event_type(), Some(9));
    }

    #[test]
    fn debug_words_decode_six_signed_values() {
        // word encodes value -1 in bits [12:0] and +1 in bits [25:13].
        let word = 0x1FFF | (1 << 13);
        let values = decode_debug_words([word, 0, 0]);
        assert_eq!(values[0], -1);
        assert_eq!(values[1], 1);
        assert_eq!(values[2], 0);
    }
}
