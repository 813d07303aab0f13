//! Raw event-file reader: big-endian `u32` words, one length-prefixed event
//! per frame (`word[0]` = total word count of the frame, itself included).
//! This outer framing is a CLI-only convenience; `gem_decode::raw::parse_event`
//! only knows how to decode the bank/block structure inside one frame.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Split a raw event file into per-event word slices.
pub fn read_event_frames(path: &Path) -> Result<Vec<Vec<u32>>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.len() % 4 != 0 {
        bail!("{}: file length {} is not a multiple of 4 bytes", path.display(), bytes.len());
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let mut frames = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let frame_len = words[i] as usize;
        if frame_len == 0 || i + frame_len > words.len() {
            bail!(
                "{}: event frame at word {} declares length {}, past end of file ({} words total)",
                path.display(),
                i,
                frame_len,
                words.len()
            );
        }
        frames.push(words[i..i + frame_len].to_vec());
        i += frame_len;
    }
    Ok(frames)
}
