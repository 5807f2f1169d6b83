//! File extension to MIME type table.

use std::path::Path;

/// `text/plain`
pub const TEXT_PLAIN: &str = "text/plain";
/// `text/html`
pub const TEXT_HTML: &str = "text/html";
/// Used for any extension not in the table.
pub const OCTET_STREAM: &str = "application/octet-stream";

#[rustfmt::skip]
const TABLE: &[(&str, &str)] = &[
    ("css",  "text/css"),
    ("htm",  TEXT_HTML),
    ("html", TEXT_HTML),
    ("xml",  "text/xml"),
    ("java", "text/x-java-source, text/java"),
    ("txt",  TEXT_PLAIN),
    ("text", TEXT_PLAIN),
    ("asc",  TEXT_PLAIN),
    ("gif",  "image/gif"),
    ("jpg",  "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png",  "image/png"),
    ("mp3",  "audio/mpeg"),
    ("m3u",  "audio/mpeg-url"),
    ("mp4",  "video/mp4"),
    ("ogv",  "video/ogg"),
    ("flv",  "video/x-flv"),
    ("mov",  "video/quicktime"),
    ("swf",  "application/x-shockwave-flash"),
    ("js",   "application/javascript"),
    ("pdf",  "application/pdf"),
    ("doc",  "application/msword"),
];

/// MIME type for a file extension, matched case-insensitively.
///
/// # Examples
/// ```
/// use duplex_web::mime;
///
/// assert_eq!(mime::from_extension("HTML"), "text/html");
/// assert_eq!(mime::from_extension("tar"), "application/octet-stream");
/// ```
pub fn from_extension(extension: &str) -> &'static str {
    TABLE
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
        .map(|(_, mime)| *mime)
        .unwrap_or(OCTET_STREAM)
}

/// MIME type for a file, from the text after the last `.` of its name.
pub fn from_path(path: &Path) -> &'static str {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, extension)| from_extension(extension))
        .unwrap_or(OCTET_STREAM)
}
