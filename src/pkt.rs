//! pkt-line framing, see gitprotocol-common(5) "pkt-line Format".

use crate::errors::GitError;

pub const FLUSH: &str = "0000";

/// Decode the 4-hex-digit length prefix at the start of `buf`.
/// Returns 0 for a flush line, otherwise the full line length
/// including the prefix itself.
pub fn pkt_line_len(buf: &[u8]) -> Result<usize, GitError> {
    let prefix = buf
        .get(..4)
        .ok_or_else(|| GitError::Protocol("truncated pkt-line length".into()))?;
    let digits = std::str::from_utf8(prefix)
        .map_err(|_| GitError::Protocol("pkt-line length is not ASCII".into()))?;
    let len = usize::from_str_radix(digits, 16)
        .map_err(|_| GitError::Protocol(format!("pkt-line length {:?} is not hex", digits)))?;
    if len != 0 && len < 4 {
        return Err(GitError::Protocol(format!("invalid pkt-line length {}", len)));
    }
    Ok(len)
}

/// Frame one request line: 4-digit lowercase hex length (counting the
/// prefix itself) followed by the text.
pub fn pkt_line(text: &str) -> String {
    format!("{:04x}{}", text.len() + 4, text)
}
