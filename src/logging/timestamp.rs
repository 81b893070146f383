/*!
 * Line Timestamps
 */

use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const LINE_PREFIX: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// `YYYY-MM-DDTHH:MM:SS: ` for `at`, in UTC
pub fn line_prefix(at: OffsetDateTime) -> String {
    let mut prefix = at
        .to_offset(time::UtcOffset::UTC)
        .format(LINE_PREFIX)
        .unwrap_or_default();
    prefix.push_str(": ");
    prefix
}

/// Terminate `line` with `\n` and optionally prefix the current time
pub fn frame_line(line: &[u8], stamp: bool) -> Vec<u8> {
    let body = line.strip_suffix(b"\n").unwrap_or(line);
    let body = body.strip_suffix(b"\r").unwrap_or(body);

    let mut framed = Vec::with_capacity(body.len() + 24);
    if stamp {
        framed.extend_from_slice(line_prefix(OffsetDateTime::now_utc()).as_bytes());
    }
    framed.extend_from_slice(body);
    framed.push(b'\n');
    framed
}
