//! Text file reader with multi-encoding detection.
//!
//! Decoding order is fixed: UTF-8, then GBK, GB2312 and Latin-1 via
//! `encoding_rs`, then lossy UTF-8 as the last resort. Only failing to open
//! or read the file is an error; encoding trouble degrades to the lossy path
//! with a warning.

use anyhow::{Context, Result};
use encoding_rs::{CoderResult, Encoding, UTF_8};
use std::{
    fs,
    io::Read,
    path::Path,
};

/// Window inspected when choosing an encoding for large files.
const SNIFF_LEN: usize = 8 * 1024;

/// Files above this size are stream-decoded chunk by chunk instead of being
/// slurped into one byte buffer before decoding.
const STREAMING_THRESHOLD: u64 = 10 * 1024 * 1024;

const READ_CHUNK: usize = 1024 * 1024;

const FALLBACK_LABELS: [&str; 3] = ["gbk", "gb2312", "iso-8859-1"];

/// Read a file as text, detecting its encoding.
pub fn read_text(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("open file: {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("stat file: {}", path.display()))?
        .len();

    if len > STREAMING_THRESHOLD {
        return decode_streaming(&mut file, len, path);
    }

    let mut bytes = Vec::with_capacity(len as usize);
    file.read_to_end(&mut bytes)
        .with_context(|| format!("read file: {}", path.display()))?;
    Ok(decode_bytes(bytes, path))
}

/// Strict attempts in the fixed order, lossy UTF-8 if nothing matches.
pub fn decode_bytes(bytes: Vec<u8>, origin: &Path) -> String {
    let bytes = match String::from_utf8(bytes) {
        Ok(s) => return s,
        Err(e) => e.into_bytes(),
    };
    for label in FALLBACK_LABELS {
        if let Some(enc) = Encoding::for_label(label.as_bytes())
            && let Some(cow) = enc.decode_without_bom_handling_and_without_replacement(&bytes)
        {
            return cow.into_owned();
        }
    }
    tracing::warn!(path = %origin.display(), "no strict encoding matched, decoding as lossy UTF-8");
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Pick the encoding from a prefix of the file. The window may cut a
/// multibyte sequence, so an incomplete trailing sequence counts as a match.
fn sniff_encoding(head: &[u8], truncated: bool) -> Option<&'static Encoding> {
    match std::str::from_utf8(head) {
        Ok(_) => return Some(UTF_8),
        Err(e) if truncated && e.error_len().is_none() => return Some(UTF_8),
        Err(_) => {}
    }
    for label in FALLBACK_LABELS {
        let enc = Encoding::for_label(label.as_bytes())?;
        if enc
            .decode_without_bom_handling_and_without_replacement(head)
            .is_some()
        {
            return Some(enc);
        }
        if truncated
            && head.len() > 1
            && enc
                .decode_without_bom_handling_and_without_replacement(&head[..head.len() - 1])
                .is_some()
        {
            return Some(enc);
        }
    }
    None
}

fn decode_streaming(file: &mut fs::File, len: u64, path: &Path) -> Result<String> {
    let mut head = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < head.len() {
        let n = file
            .read(&mut head[filled..])
            .with_context(|| format!("read file: {}", path.display()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);

    let enc = match sniff_encoding(&head, (filled as u64) < len) {
        Some(enc) => enc,
        None => {
            tracing::warn!(path = %path.display(), "no strict encoding matched, decoding as lossy UTF-8");
            UTF_8
        }
    };

    let mut decoder = enc.new_decoder_without_bom_handling();
    let mut out = String::with_capacity(len as usize);
    let mut buf = vec![0u8; READ_CHUNK];

    decode_chunk(&mut decoder, &head, &mut out, false);
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("read file: {}", path.display()))?;
        if n == 0 {
            decode_chunk(&mut decoder, &[], &mut out, true);
            break;
        }
        decode_chunk(&mut decoder, &buf[..n], &mut out, false);
    }
    Ok(out)
}

fn decode_chunk(decoder: &mut encoding_rs::Decoder, src: &[u8], dst: &mut String, last: bool) {
    let mut consumed = 0;
    loop {
        let needed = decoder
            .max_utf8_buffer_length(src.len() - consumed)
            .unwrap_or(READ_CHUNK);
        dst.reserve(needed.max(16));
        let (result, read, _) = decoder.decode_to_string(&src[consumed..], dst, last);
        consumed += read;
        match result {
            CoderResult::InputEmpty => break,
            CoderResult::OutputFull => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn utf8_passthrough() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("a.txt");
        fs::write(&p, "héllo wörld\n").unwrap();
        assert_eq!(read_text(&p).unwrap(), "héllo wörld\n");
    }

    #[test]
    fn gbk_decoded() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("cn.txt");
        // "中文" in GBK
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(&[0xD6, 0xD0, 0xCE, 0xC4]).unwrap();
        drop(f);
        assert_eq!(read_text(&p).unwrap(), "中文");
    }

    #[test]
    fn latin1_fallback_never_fails() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("l1.txt");
        fs::write(&p, [0xFFu8, 0x20, 0x41]).unwrap();
        let s = read_text(&p).unwrap();
        assert!(!s.is_empty());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_text(Path::new("/definitely/not/here.txt")).is_err());
    }

    #[test]
    fn sniff_tolerates_cut_utf8_sequence() {
        // "é" is 0xC3 0xA9; cut after the lead byte
        assert_eq!(sniff_encoding(&[b'a', 0xC3], true), Some(UTF_8));
    }
}
