//! DIGEST-MD5 (RFC 2831). A simplified server half: one challenge, one
//! client response carrying `qop=auth`, one rspauth acknowledgement.

use super::{b64_decode, b64_encode, read_b64_line, AuthChannel, Authenticator, Credentials};
use crate::error::MailResult;
use crate::store::MailboxStore;
use md5::{Digest, Md5};
use rand::Rng;
use std::collections::HashMap;

const REALM: &str = "localhost";

fn generate_nonce() -> String {
    let nonce: u128 = rand::thread_rng().gen();
    format!("{:032x}", nonce)
}

fn challenge_line(nonce: &str) -> String {
    format!(
        "realm=\"{REALM}\",nonce=\"{nonce}\",qop=\"auth\",algorithm=md5-sess,charset=utf-8"
    )
}

/// Parses a comma-separated list of `key=value` or `key="value"` directives.
/// Not a full RFC 2831 grammar (no escaped-quote handling) but sufficient
/// for the directives this server inspects.
fn parse_directives(s: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for part in split_top_level_commas(s) {
        let Some((k, v)) = part.split_once('=') else {
            continue;
        };
        let v = v.trim();
        let v = v.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(v);
        map.insert(k.trim().to_string(), v.to_string());
    }
    map
}

fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// RFC 2831 response-value computation for `qop=auth`.
fn response_value(username: &str, secret: &str, realm: &str, nonce: &str, cnonce: &str, nc: &str, digest_uri: &str) -> String {
    let a1_inner = Md5::digest(format!("{username}:{realm}:{secret}"));
    let mut a1_hasher = Md5::new();
    a1_hasher.update(a1_inner);
    a1_hasher.update(format!(":{nonce}:{cnonce}"));
    let a1 = a1_hasher.finalize();

    let a2 = Md5::digest(format!("AUTHENTICATE:{digest_uri}"));

    let kd_input = format!("{}:{nonce}:{nc}:{cnonce}:auth:{}", hex(&a1), hex(&a2));
    hex(&Md5::digest(kd_input))
}

pub struct DigestMd5Authenticator;

impl Authenticator for DigestMd5Authenticator {
    fn authenticate(
        &self,
        initial: Option<&str>,
        channel: &mut dyn AuthChannel,
        store: &MailboxStore,
    ) -> MailResult<Option<Credentials>> {
        if initial.is_some() {
            return Ok(None);
        }
        let nonce = generate_nonce();
        channel.write_continuation(&b64_encode(challenge_line(&nonce).as_bytes()))?;

        let Some(response_bytes) = read_b64_line(channel)? else {
            return Ok(None);
        };
        let Ok(response_text) = String::from_utf8(response_bytes) else {
            return Ok(None);
        };
        let directives = parse_directives(&response_text);

        let (Some(username), Some(client_nonce), Some(cnonce), Some(nc), Some(digest_uri), Some(response)) = (
            directives.get("username"),
            directives.get("nonce"),
            directives.get("cnonce"),
            directives.get("nc"),
            directives.get("digest-uri"),
            directives.get("response"),
        ) else {
            return Ok(None);
        };
        if client_nonce != &nonce {
            return Ok(None);
        }

        let realm = directives.get("realm").map(String::as_str).unwrap_or(REALM);
        let Some(mailbox) = store.find_mailbox(username) else {
            return Ok(None);
        };
        if response_value(username, mailbox.secret(), realm, &nonce, cnonce, nc, digest_uri) != *response {
            return Ok(None);
        }

        let secret = mailbox.secret().to_string();
        let rspauth = {
            let a2_for_rspauth = Md5::digest(format!(":{digest_uri}"));
            let a1_inner = Md5::digest(format!("{username}:{realm}:{secret}"));
            let mut a1_hasher = Md5::new();
            a1_hasher.update(a1_inner);
            a1_hasher.update(format!(":{nonce}:{cnonce}"));
            let a1 = a1_hasher.finalize();
            let kd_input = format!("{}:{nonce}:{nc}:{cnonce}:auth:{}", hex(&a1), hex(&a2_for_rspauth));
            hex(&Md5::digest(kd_input))
        };
        channel.write_continuation(&b64_encode(format!("rspauth={rspauth}").as_bytes()))?;
        // Client sends an empty line acknowledging rspauth; ignore its content.
        let _ = read_b64_line(channel)?;

        Ok(Some(Credentials {
            username: username.to_string(),
            secret,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_parsing_handles_quoted_commas_free_values() {
        let parsed = parse_directives(r#"username="alice",realm="localhost",nc=00000001,qop=auth"#);
        assert_eq!(parsed.get("username").unwrap(), "alice");
        assert_eq!(parsed.get("realm").unwrap(), "localhost");
        assert_eq!(parsed.get("nc").unwrap(), "00000001");
        assert_eq!(parsed.get("qop").unwrap(), "auth");
    }

    #[test]
    fn response_value_is_deterministic_for_same_inputs() {
        let a = response_value("alice", "pw", "localhost", "nonce1", "cnonce1", "00000001", "smtp/localhost");
        let b = response_value("alice", "pw", "localhost", "nonce1", "cnonce1", "00000001", "smtp/localhost");
        assert_eq!(a, b);
        let c = response_value("alice", "other", "localhost", "nonce1", "cnonce1", "00000001", "smtp/localhost");
        assert_ne!(a, c);
    }
}
