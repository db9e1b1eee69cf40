//! Checksum of the audio payload that ignores tag blocks, so retagging a file
//! keeps its identity.

use std::fs;
use std::path::Path;

use crate::MetadataError;

const ID3V2_HEADER_LEN: usize = 10;
const ID3V2_FOOTER_FLAG: u8 = 0x10;
const ID3V1_LEN: usize = 128;
const FLAC_MAGIC: &[u8] = b"fLaC";

pub fn content_checksum(path: &Path) -> Result<String, MetadataError> {
    let data = fs::read(path)?;
    Ok(checksum_bytes(&data))
}

pub fn checksum_bytes(data: &[u8]) -> String {
    blake3::hash(audio_payload(data)).to_hex().to_string()
}

fn audio_payload(data: &[u8]) -> &[u8] {
    if data.starts_with(b"ID3") {
        return strip_id3v1(skip_id3v2(data));
    }
    if data.starts_with(FLAC_MAGIC) {
        return skip_flac_metadata(data);
    }
    if data.get(4..8) == Some(b"ftyp".as_slice()) {
        if let Some(payload) = mp4_mdat(data) {
            return payload;
        }
        return data;
    }
    strip_id3v1(data)
}

fn skip_id3v2(data: &[u8]) -> &[u8] {
    if data.len() < ID3V2_HEADER_LEN {
        return data;
    }
    let flags = data[5];
    let size = data[6..10]
        .iter()
        .fold(0usize, |acc, byte| (acc << 7) | usize::from(byte & 0x7F));
    let mut offset = ID3V2_HEADER_LEN + size;
    if flags & ID3V2_FOOTER_FLAG != 0 {
        offset += ID3V2_HEADER_LEN;
    }
    data.get(offset..).unwrap_or(&[])
}

fn strip_id3v1(data: &[u8]) -> &[u8] {
    if data.len() >= ID3V1_LEN && data[data.len() - ID3V1_LEN..].starts_with(b"TAG") {
        &data[..data.len() - ID3V1_LEN]
    } else {
        data
    }
}

fn skip_flac_metadata(data: &[u8]) -> &[u8] {
    let mut offset = FLAC_MAGIC.len();
    loop {
        let header = match data.get(offset..offset + 4) {
            Some(header) => header,
            None => return &[],
        };
        let last = header[0] & 0x80 != 0;
        let len = (usize::from(header[1]) << 16) | (usize::from(header[2]) << 8) | usize::from(header[3]);
        offset += 4 + len;
        if last {
            break;
        }
    }
    data.get(offset..).unwrap_or(&[])
}

fn mp4_mdat(data: &[u8]) -> Option<&[u8]> {
    let mut offset = 0usize;
    while offset + 8 <= data.len() {
        let size32 = u32::from_be_bytes(data[offset..offset + 4].try_into().ok()?);
        let kind = &data[offset + 4..offset + 8];
        let (size, header) = match size32 {
            0 => (data.len() - offset, 8),
            1 => {
                let wide = u64::from_be_bytes(data.get(offset + 8..offset + 16)?.try_into().ok()?);
                (usize::try_from(wide).ok()?, 16)
            }
            n => (n as usize, 8),
        };
        if size < header {
            return None;
        }
        let end = offset.saturating_add(size).min(data.len());
        if kind == b"mdat" {
            return data.get(offset + header..end);
        }
        offset = end;
    }
    None
}
