//! Parsers for the replies of Novatek-style dashcam firmware.
//!
//! The firmware answers `Config.cgi` requests with a mix of bare status
//! text (`OK`, `0`, `0\nOK`, `200`), newline-delimited values and ad hoc
//! XML.  None of these functions perform I/O; the fallible ones return
//! [`ParseError`] and the callers pick the documented default.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{CameraAddress, StorageInfo, VideoFileRecord};

/// Folder the firmware keeps driving clips in, written with its `$`
/// path separator.
pub const FIRMWARE_CLIP_FOLDER: &str = "$EMMC$Normal$F$";

/// Folder assumed for listing entries that carry a bare file name.
pub const DEFAULT_CLIP_DIR: &str = "/SD/Normal/";

/// Storage figures are reported in MiB.
const STORAGE_UNIT: u64 = 1024 * 1024;

/// Smallest value the capacity heuristic accepts as a card size.
const MIN_CAPACITY_TOKEN: u64 = 1000;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("unrecognized storage response: {0:?}")]
    Storage(String),
    #[error("no preview channel in {0:?}")]
    Channel(String),
}

// ── command results ──────────────────────────────────────────────────────

/// Whether a command reply means the camera accepted it.
///
/// Accepts anything containing `OK` (any case), anything starting with
/// `0`, and a bare 2xx status code.  `None` (no reply) is a failure.
pub fn is_success(response: Option<&str>) -> bool {
    let Some(body) = response else {
        return false;
    };
    let clean = body.trim();
    clean.to_ascii_uppercase().contains("OK") || clean.starts_with('0') || is_2xx_code(clean)
}

fn is_2xx_code(text: &str) -> bool {
    text.len() == 3 && text.starts_with('2') && text.bytes().all(|b| b.is_ascii_digit())
}

/// Result of the `ipc` format command: an XML body carrying `<Status>0</Status>`.
pub fn is_format_success(body: &str) -> bool {
    body.contains("<Status>0</Status>")
}

// ── file listing ─────────────────────────────────────────────────────────

/// Parse a `action=dir` listing into file records.
///
/// Entries without a `<name>` are skipped.  A malformed document stops
/// the scan; whatever was collected before that point is returned.
pub fn parse_file_list(xml: &str, address: &CameraAddress) -> Vec<VideoFileRecord> {
    let mut files = Vec::new();
    if let Err(e) = scan_file_list(xml, address, &mut files) {
        warn!("File list parse stopped after {} entries: {e}", files.len());
    }
    debug!("Parsed {} file(s) from listing", files.len());
    files
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Name,
    Size,
    Time,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"name" => Some(Self::Name),
            b"size" => Some(Self::Size),
            b"time" => Some(Self::Time),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct FileEntry {
    name: Option<String>,
    size: Option<String>,
    time: Option<String>,
}

impl FileEntry {
    fn push(&mut self, field: Field, text: &str) {
        let slot = match field {
            Field::Name => &mut self.name,
            Field::Size => &mut self.size,
            Field::Time => &mut self.time,
        };
        slot.get_or_insert_with(String::new).push_str(text);
    }

    fn into_record(self, address: &CameraAddress) -> Option<VideoFileRecord> {
        let raw_name = self.name.filter(|n| !n.trim().is_empty())?;
        let rooted = rooted_path(raw_name.trim());
        let filename = rooted.rsplit('/').next().unwrap_or(&rooted).to_string();

        Some(VideoFileRecord {
            filename,
            download_url: address.http_url(&rooted),
            thumbnail_url: address.http_url(&thumbnail_path(&rooted)),
            size: self.size.unwrap_or_else(|| "Unknown".to_string()),
            time: self.time.unwrap_or_default(),
        })
    }
}

fn scan_file_list(
    xml: &str,
    address: &CameraAddress,
    files: &mut Vec<VideoFileRecord>,
) -> Result<(), ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut entry = FileEntry::default();
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => {
                let tag = start.name();
                if tag.as_ref() == b"file" {
                    entry = FileEntry::default();
                }
                field = Field::from_tag(tag.as_ref());
            }
            Event::Text(text) => {
                if let (Some(f), Ok(decoded)) = (field, text.decode()) {
                    entry.push(f, &decoded);
                }
            }
            Event::End(end) => {
                if end.name().as_ref() == b"file" {
                    match std::mem::take(&mut entry).into_record(address) {
                        Some(record) => {
                            debug!("Listed {} ({})", record.filename, record.download_url);
                            files.push(record);
                        }
                        None => debug!("Skipping listing entry without a name"),
                    }
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// Root a listed name: absolute paths are kept, bare names live under
/// [`DEFAULT_CLIP_DIR`].
pub fn rooted_path(raw_name: &str) -> String {
    if raw_name.starts_with('/') {
        raw_name.to_string()
    } else {
        format!("{DEFAULT_CLIP_DIR}{raw_name}")
    }
}

/// Hidden thumbnail next to a clip: `/dir/clip.MP4` → `/dir/.clip_tb.jpg`.
pub fn thumbnail_path(rooted: &str) -> String {
    let (dir, file) = rooted.rsplit_once('/').unwrap_or(("", rooted));
    let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
    format!("{dir}/.{stem}_tb.jpg")
}

// ── deletion ─────────────────────────────────────────────────────────────

/// Turn a file name or download URL into the `property` value of a
/// `action=del` request.
///
/// The firmware uses `$` as its path separator; bare names are placed in
/// [`FIRMWARE_CLIP_FOLDER`].
pub fn delete_property(filename: &str, address: &CameraAddress) -> String {
    let origin = address.http_url("");
    // Only strip a whole host: `http://192.168.0.1` must not eat the
    // start of `http://192.168.0.10`.
    let path = filename
        .strip_prefix(origin.as_str())
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        .unwrap_or(filename);
    let path = path.replace('/', "$");
    if path.starts_with('$') {
        path
    } else {
        format!("{FIRMWARE_CLIP_FOLDER}{path}")
    }
}

// ── storage ──────────────────────────────────────────────────────────────

/// Parse the `SDCard.Capacity` reply.
///
/// Prefers explicit `...Total=` / `...Free=` lines when the firmware
/// sends both.  Otherwise the first integer above 1000 is taken as the
/// capacity in MiB and half of it is reported free; this needs at least
/// the three lines of a `code\nstatus\nvalue` reply.
pub fn parse_storage(body: &str) -> Result<StorageInfo, ParseError> {
    if let Some(info) = keyed_storage(body) {
        return Ok(info);
    }

    let lines: Vec<&str> = body.lines().collect();
    if lines.len() < 3 {
        return Err(ParseError::Storage(body.to_string()));
    }

    // Free space is not reported in this format.
    let total = lines
        .iter()
        .filter_map(|line| line.trim().parse::<u64>().ok())
        .find(|&n| n > MIN_CAPACITY_TOKEN)
        .unwrap_or(0);

    Ok(StorageInfo {
        total_bytes: total.saturating_mul(STORAGE_UNIT),
        free_bytes: (total / 2).saturating_mul(STORAGE_UNIT),
    })
}

fn keyed_storage(body: &str) -> Option<StorageInfo> {
    let mut total = None;
    let mut free = None;
    for line in body.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<u64>() else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        if key.ends_with("total") {
            total = Some(value);
        } else if key.ends_with("free") {
            free = Some(value);
        }
    }
    Some(StorageInfo {
        total_bytes: total?.saturating_mul(STORAGE_UNIT),
        free_bytes: free?.saturating_mul(STORAGE_UNIT),
    })
}

// ── live view ────────────────────────────────────────────────────────────

/// Active preview channel from a `Camera.Preview.RTSP.av` reply such as
/// `Camera.Preview.RTSP.av=4` or a bare `4`.
pub fn parse_preview_channel(body: &str) -> Result<u32, ParseError> {
    let value = body.rsplit_once("av=").map_or(body, |(_, v)| v);
    let first = value.lines().next().unwrap_or_default().trim();
    first
        .parse()
        .map_err(|_| ParseError::Channel(body.to_string()))
}

/// RTSP path segment for a preview channel; unknown channels use channel 1's.
pub fn stream_path(channel: u32) -> &'static str {
    match channel {
        2 => "v1",
        3 => "av2",
        4 => "av4",
        _ => "av1",
    }
}

// ── device status ────────────────────────────────────────────────────────

/// Recording flag from the `status.record` reply.
pub fn recording_from_response(body: Option<&str>) -> bool {
    body.is_some_and(|b| b.to_ascii_lowercase().contains("recording"))
}

/// SD-card presence from the `Camera.Menu.SD0` reply.  Only an explicit
/// `Insert...` or `...Error` reply reports the card missing.
pub fn sd_card_from_response(body: Option<&str>) -> bool {
    match body {
        Some(b) => {
            let lower = b.to_ascii_lowercase();
            !(lower.contains("insert") || lower.contains("error"))
        }
        None => true,
    }
}
