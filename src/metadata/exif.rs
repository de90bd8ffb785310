use std::io::Cursor;

use exif::{Field, In, Tag, Value};

use crate::metadata::MetadataTags;

pub struct ExifExtractor;

impl ExifExtractor {
    /// Merges every EXIF field found in `bytes` into `tags`. Returns `false` when the container
    /// has no readable EXIF block.
    pub fn extract_into(bytes: &[u8], tags: &mut MetadataTags) -> bool {
        let mut reader = Cursor::new(bytes);

        let exif = match exif::Reader::new().read_from_container(&mut reader) {
            Ok(exif) => exif,
            Err(e) => {
                log::trace!("no EXIF block: {}", e);
                return false;
            }
        };

        for field in exif.fields() {
            tags.entries
                .insert(format!("{}", field.tag), field.display_value().to_string());
        }

        if let Some(field) = exif.get_field(Tag::Software, In::PRIMARY) {
            tags.software = Some(Self::field_text(field));
        }

        for tag in [Tag::ImageDescription, Tag::UserComment] {
            if let Some(field) = exif.get_field(tag, In::PRIMARY) {
                let text = Self::field_text(field);
                if !text.is_empty() {
                    tags.comments.push(text);
                }
            }
        }

        true
    }

    fn field_text(field: &Field) -> String {
        match &field.value {
            Value::Ascii(parts) => parts
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string(),
            Value::Undefined(bytes, _) => Self::user_comment_text(bytes),
            _ => field.display_value().to_string(),
        }
    }

    /// UserComment carries an 8-byte character code prefix before the payload.
    fn user_comment_text(bytes: &[u8]) -> String {
        if bytes.len() >= 8 && bytes[..8].starts_with(b"UNICODE") {
            let units = bytes[8..]
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect::<Vec<_>>();
            return String::from_utf16_lossy(&units)
                .trim_matches(char::from(0))
                .trim()
                .to_string();
        }

        let payload = if bytes.len() >= 8 && (bytes.starts_with(b"ASCII") || bytes[..8] == [0; 8]) {
            &bytes[8..]
        } else {
            bytes
        };

        String::from_utf8_lossy(payload)
            .trim_matches(char::from(0))
            .trim()
            .to_string()
    }
}
