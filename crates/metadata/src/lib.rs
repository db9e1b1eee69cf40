use std::path::Path;

use lofty::error::LoftyError;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{ItemKey, TaggedFileExt};
use thiserror::Error;

mod checksum;

pub use checksum::{checksum_bytes, content_checksum};

/// Structural tag fields of one audio file. Missing values are empty / zero.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagFields {
    pub format: String,
    pub file_type: String,
    pub title: String,
    pub album: String,
    pub artist: String,
    pub album_artist: String,
    pub composer: String,
    pub genre: String,
    pub year: i32,
    pub track: u32,
    pub total_tracks: u32,
    pub disc: u32,
    pub total_discs: u32,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct AudioTags {
    pub fields: TagFields,
    pub picture: Option<CoverArt>,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tag error: {0}")]
    Lofty(#[from] LoftyError),
}

pub fn read_tags(path: &Path) -> Result<AudioTags, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;

    let mut tags = AudioTags::default();
    tags.fields.file_type = format!("{:?}", tagged_file.file_type()).to_uppercase();

    let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        Some(tag) => tag,
        None => return Ok(tags),
    };

    let text = |key: &ItemKey| tag.get_string(key).map(|v| v.trim().to_string()).unwrap_or_default();

    let fields = &mut tags.fields;
    fields.format = format!("{:?}", tag.tag_type());
    fields.title = text(&ItemKey::TrackTitle);
    fields.album = text(&ItemKey::AlbumTitle);
    fields.artist = text(&ItemKey::TrackArtist);
    fields.album_artist = text(&ItemKey::AlbumArtist);
    fields.composer = text(&ItemKey::Composer);
    fields.genre = text(&ItemKey::Genre);
    fields.comment = text(&ItemKey::Comment);
    fields.year = tag
        .get_string(&ItemKey::Year)
        .or_else(|| tag.get_string(&ItemKey::RecordingDate))
        .and_then(parse_year)
        .unwrap_or(0);

    let (track, total_tracks) = tag
        .get_string(&ItemKey::TrackNumber)
        .map(parse_number_pair)
        .unwrap_or((0, 0));
    fields.track = track;
    fields.total_tracks = match total_tracks {
        0 => tag
            .get_string(&ItemKey::TrackTotal)
            .map(|v| parse_number_pair(v).0)
            .unwrap_or(0),
        total => total,
    };

    let (disc, total_discs) = tag
        .get_string(&ItemKey::DiscNumber)
        .map(parse_number_pair)
        .unwrap_or((0, 0));
    fields.disc = disc;
    fields.total_discs = match total_discs {
        0 => tag
            .get_string(&ItemKey::DiscTotal)
            .map(|v| parse_number_pair(v).0)
            .unwrap_or(0),
        total => total,
    };

    tags.picture = pick_picture(tag.pictures()).map(|picture| {
        let data = picture.data().to_vec();
        let mime = guess_mime(&data);
        CoverArt { data, mime }
    });

    Ok(tags)
}

/// Splits `"3/12"` into `(3, 12)`. Unparseable parts become zero.
fn parse_number_pair(text: &str) -> (u32, u32) {
    let mut parts = text.splitn(2, '/');
    let number = parts
        .next()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    let total = parts
        .next()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    (number, total)
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}

pub fn guess_mime(bytes: &[u8]) -> Option<String> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg".to_string())
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png".to_string())
    } else {
        None
    }
}
