//! Dot-stuffing (RFC 5321 §4.5.2 / RFC 1939): a line that starts with `.`
//! gets an extra `.` prefixed on the wire; the terminator is a lone `.`
//! line. Unlike a streaming encoder this server always has the whole
//! message in memory (either freshly read from DATA, or already stored),
//! so stuffing/unstuffing work line-at-a-time rather than byte-at-a-time.

/// Strips one leading `.` from a line read from the wire, if present.
/// Used while reading SMTP `DATA` and is a no-op for ordinary lines. Operates
/// on raw bytes so an 8-bit body line is never routed through `String`.
pub fn unstuff_line(line: &[u8]) -> &[u8] {
    line.strip_prefix(b".").unwrap_or(line)
}

/// Joins already-unstuffed DATA lines with CRLF, no trailing CRLF, per the
/// spec's pinned DATA contract (internal CRLFs preserved, none trailing).
pub fn join_data_lines(lines: &[Vec<u8>]) -> Vec<u8> {
    lines.join(&b"\r\n"[..])
}

/// Splits message content into CRLF-delimited lines and stuffs any line
/// that starts with `.`. Returned lines do not include the terminator;
/// callers write each line then a final lone `.` line.
pub fn stuff_for_wire(content: &[u8]) -> Vec<Vec<u8>> {
    if content.is_empty() {
        return Vec::new();
    }
    content
        .split(|&b| b == b'\n')
        .map(strip_trailing_cr)
        .map(|line| {
            if line.first() == Some(&b'.') {
                let mut stuffed = Vec::with_capacity(line.len() + 1);
                stuffed.push(b'.');
                stuffed.extend_from_slice(line);
                stuffed
            } else {
                line.to_vec()
            }
        })
        .collect()
}

fn strip_trailing_cr(line: &[u8]) -> &[u8] {
    if let Some((&b'\r', rest)) = line.split_last() {
        rest
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unstuff_line_strips_single_leading_dot() {
        assert_eq!(unstuff_line(b"..hidden"), b"." as &[u8]);
        assert_eq!(unstuff_line(b"no dot"), b"no dot" as &[u8]);
        assert_eq!(unstuff_line(b"."), b"" as &[u8]);
    }

    #[test]
    fn join_data_lines_has_no_trailing_crlf() {
        let lines = vec![b"Subject: Hi".to_vec(), b"".to_vec(), b"Hello".to_vec(), b".".to_vec()];
        assert_eq!(join_data_lines(&lines), b"Subject: Hi\r\n\r\nHello\r\n.".to_vec());
    }

    #[test]
    fn stuff_for_wire_doubles_leading_dots() {
        let stuffed = stuff_for_wire(b"Hi\r\n.\r\nBye");
        assert_eq!(stuffed, vec![b"Hi".to_vec(), b"..".to_vec(), b"Bye".to_vec()]);
    }

    #[test]
    fn stuff_for_wire_leaves_interior_dots_alone() {
        let stuffed = stuff_for_wire(b"a.b\r\nc.d");
        assert_eq!(stuffed, vec![b"a.b".to_vec(), b"c.d".to_vec()]);
    }
}
