//! Plain-text metadata carried by the container itself: PNG `tEXt`/`iTXt` chunks and JPEG `COM`
//! segments. Compressed text (`zTXt`, compressed `iTXt`) is skipped.

use crate::metadata::MetadataTags;

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// Keys whose text is treated as a free-form comment.
const COMMENT_KEYS: &[&str] = &["parameters", "comment", "description", "prompt", "workflow"];

pub fn extract_into(bytes: &[u8], tags: &mut MetadataTags) -> bool {
    if bytes.starts_with(PNG_SIGNATURE) {
        png_text_chunks(bytes, tags)
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        jpeg_comments(bytes, tags)
    } else {
        false
    }
}

fn record(tags: &mut MetadataTags, key: &str, text: String) {
    if key.eq_ignore_ascii_case("software") {
        tags.software = Some(text.clone());
    } else if COMMENT_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k)) {
        tags.comments.push(text.clone());
    }
    tags.entries.insert(key.to_string(), text);
}

fn png_text_chunks(bytes: &[u8], tags: &mut MetadataTags) -> bool {
    let mut found = false;
    let mut pos = PNG_SIGNATURE.len();

    while pos + 8 <= bytes.len() {
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
            as usize;
        let kind = &bytes[pos + 4..pos + 8];
        let data_start = pos + 8;
        let Some(data_end) = data_start.checked_add(len).filter(|&end| end <= bytes.len()) else {
            break;
        };
        let data = &bytes[data_start..data_end];

        match kind {
            b"tEXt" => {
                if let Some((key, text)) = split_keyword(data) {
                    record(tags, &key, String::from_utf8_lossy(text).into_owned());
                    found = true;
                }
            }
            b"iTXt" => {
                if let Some((key, text)) = parse_itxt(data) {
                    record(tags, &key, text);
                    found = true;
                }
            }
            b"IEND" => break,
            _ => {}
        }

        // chunk data is followed by a 4-byte CRC
        pos = data_end + 4;
    }

    found
}

fn split_keyword(data: &[u8]) -> Option<(String, &[u8])> {
    let nul = data.iter().position(|&b| b == 0)?;
    let key = String::from_utf8_lossy(&data[..nul]).into_owned();
    Some((key, &data[nul + 1..]))
}

fn parse_itxt(data: &[u8]) -> Option<(String, String)> {
    let (key, rest) = split_keyword(data)?;
    let (&compressed, rest) = rest.split_first()?;
    if compressed != 0 {
        return None;
    }
    // compression method, language tag, translated keyword
    let rest = rest.get(1..)?;
    let lang_end = rest.iter().position(|&b| b == 0)?;
    let rest = &rest[lang_end + 1..];
    let translated_end = rest.iter().position(|&b| b == 0)?;
    let text = &rest[translated_end + 1..];

    Some((key, String::from_utf8_lossy(text).into_owned()))
}

fn jpeg_comments(bytes: &[u8], tags: &mut MetadataTags) -> bool {
    let mut found = false;
    let mut pos = 2;

    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            break;
        }
        let marker = bytes[pos + 1];
        // start of scan: entropy-coded data follows, no more segments to read
        if marker == 0xDA || marker == 0xD9 {
            break;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > bytes.len() {
            break;
        }

        if marker == 0xFE {
            let text = String::from_utf8_lossy(&bytes[pos + 4..pos + 2 + len])
                .trim_matches(char::from(0))
                .to_string();
            record(tags, "Comment", text);
            found = true;
        }

        pos += 2 + len;
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut chunk = (data.len() as u32).to_be_bytes().to_vec();
        chunk.extend_from_slice(kind);
        chunk.extend_from_slice(data);
        chunk.extend_from_slice(&[0, 0, 0, 0]);
        chunk
    }

    #[test]
    fn test_png_text_chunks() {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend(png_chunk(b"tEXt", b"Software\0Stable Diffusion WebUI"));
        bytes.extend(png_chunk(b"iTXt", b"parameters\0\0\0en\0\0a cat, Steps: 30"));
        bytes.extend(png_chunk(b"IEND", b""));

        let mut tags = MetadataTags::default();
        assert!(extract_into(&bytes, &mut tags));
        assert_eq!(tags.software.as_deref(), Some("Stable Diffusion WebUI"));
        assert_eq!(tags.comments, vec!["a cat, Steps: 30".to_string()]);
        assert_eq!(tags.entries.len(), 2);
    }

    #[test]
    fn test_compressed_itxt_skipped() {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend(png_chunk(b"iTXt", b"parameters\0\x01\0en\0\0xyz"));

        let mut tags = MetadataTags::default();
        assert!(!extract_into(&bytes, &mut tags));
    }

    #[test]
    fn test_truncated_png_does_not_panic() {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 200, b't', b'E', b'X', b't', b'a']);

        let mut tags = MetadataTags::default();
        assert!(!extract_into(&bytes, &mut tags));
    }

    #[test]
    fn test_jpeg_com_segment() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xFE];
        let text = b"seed: 12345";
        bytes.extend_from_slice(&((text.len() + 2) as u16).to_be_bytes());
        bytes.extend_from_slice(text);
        bytes.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02]);

        let mut tags = MetadataTags::default();
        assert!(extract_into(&bytes, &mut tags));
        assert_eq!(tags.comments, vec!["seed: 12345".to_string()]);
    }
}
