//! Smart-HTTP transport: ref discovery and pack download.
//!
//! Two requests per gitprotocol-http(5): `GET info/refs` to learn what
//! the remote has, then one `POST git-upload-pack` per wanted object.

use reqwest::blocking::Client;

use crate::errors::GitError;
use crate::pkt::{pkt_line, pkt_line_len, FLUSH};

/// One advertised remote ref.
#[derive(Debug, Clone)]
pub struct Ref {
    pub id: String,
    pub name: String,
}

/// Fetch and parse the ref advertisement for `base_url`.
pub fn discover_refs(base_url: &str) -> Result<Vec<Ref>, GitError> {
    let url = format!(
        "{}/info/refs?service=git-upload-pack",
        base_url.trim_end_matches('/')
    );
    let response = Client::new().get(url).send()?.error_for_status()?;
    let body = response.bytes()?;
    parse_ref_advertisement(&body)
}

// gitprotocol-http(5) "smart server response": a pkt-line service
// announcement ("NNNN# service=git-upload-pack"), a flush, then one
// pkt-line per ref, then a terminating flush.
fn parse_ref_advertisement(body: &[u8]) -> Result<Vec<Ref>, GitError> {
    let header_ok = body.len() > 4
        && body[..4].iter().all(|b| b.is_ascii_hexdigit())
        && body[4] == b'#';
    if !header_ok {
        return Err(GitError::Protocol(
            "response lacks the service announcement header".into(),
        ));
    }
    let text = std::str::from_utf8(body)
        .map_err(|_| GitError::Protocol("advertisement is not valid UTF-8".into()))?;

    let mut refs = Vec::new();
    for line in text.split('\n').skip(1) {
        // The flush after the announcement is not newline-terminated,
        // so it arrives glued to the front of the first ref line; the
        // terminating flush arrives as a line of its own.
        let line = line.strip_prefix(FLUSH).unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        // The first ref line carries a capability list after a NUL.
        let line = &line[..line.find('\0').unwrap_or(line.len())];
        let id = line
            .get(4..44)
            .filter(|id| id.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| GitError::Protocol(format!("malformed ref line {:?}", line)))?;
        let name = line
            .split_whitespace()
            .last()
            .ok_or_else(|| GitError::Protocol(format!("ref line {:?} has no name", line)))?;
        refs.push(Ref {
            id: id.to_owned(),
            name: name.to_owned(),
        });
    }
    Ok(refs)
}

fn negotiation_body(want: &str) -> String {
    format!(
        "{}{}{}",
        pkt_line(&format!("want {}\n", want)),
        FLUSH,
        pkt_line("done\n")
    )
}

/// Negotiate for a single object and return the raw pack bytes.
pub fn fetch_pack(base_url: &str, want: &str) -> Result<Vec<u8>, GitError> {
    let url = format!("{}/git-upload-pack", base_url.trim_end_matches('/'));
    let response = Client::new()
        .post(url)
        .header("Content-Type", "application/x-git-upload-pack-request")
        .body(negotiation_body(want))
        .send()?
        .error_for_status()?;
    let body = response.bytes()?;
    let start = pack_start(&body)?;
    Ok(body[start..].to_vec())
}

// The pack is preceded by negotiation pkt-lines (typically "0008NAK\n");
// skip them until the PACK signature.
fn pack_start(body: &[u8]) -> Result<usize, GitError> {
    let mut pos = 0;
    while !body[pos..].starts_with(b"PACK") {
        let len = pkt_line_len(&body[pos..])?;
        pos += if len == 0 { 4 } else { len };
        if pos >= body.len() {
            return Err(GitError::InvalidPack(
                "no PACK signature in fetch response".into(),
            ));
        }
    }
    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SHA_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn advertisement_parses_in_server_order() {
        let body = format!(
            "001e# service=git-upload-pack\n\
             0000009b{SHA_A} HEAD\0multi_ack side-band-64k symref=HEAD:refs/heads/master\n\
             003f{SHA_A} refs/heads/master\n\
             003d{SHA_B} refs/tags/v1.0\n\
             0000"
        );
        let refs = parse_ref_advertisement(body.as_bytes()).unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].id, SHA_A);
        assert_eq!(refs[0].name, "HEAD");
        assert_eq!(refs[1].name, "refs/heads/master");
        assert_eq!(refs[2].id, SHA_B);
        assert_eq!(refs[2].name, "refs/tags/v1.0");
    }

    #[test]
    fn missing_service_marker_is_a_protocol_error() {
        let body = format!("001e  service=git-upload-pack\n003f{SHA_A} refs/heads/master\n0000");
        assert!(matches!(
            parse_ref_advertisement(body.as_bytes()),
            Err(GitError::Protocol(_))
        ));
    }

    #[test]
    fn malformed_ref_line_is_a_protocol_error() {
        let body = "001e# service=git-upload-pack\n0000nonsense\n0000";
        assert!(matches!(
            parse_ref_advertisement(body.as_bytes()),
            Err(GitError::Protocol(_))
        ));
    }

    #[test]
    fn negotiation_body_is_byte_exact() {
        assert_eq!(
            negotiation_body(SHA_A),
            format!("0032want {SHA_A}\n00000009done\n")
        );
    }

    #[test]
    fn pack_start_skips_the_nak_line() {
        let mut body = b"0008NAK\nPACK....".to_vec();
        assert_eq!(pack_start(&body).unwrap(), 8);
        body = b"PACK....".to_vec();
        assert_eq!(pack_start(&body).unwrap(), 0);
        assert!(matches!(
            pack_start(b"0008NAK\n"),
            Err(GitError::InvalidPack(_))
        ));
    }
}
