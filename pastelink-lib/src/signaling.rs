//! Copy-paste friendly signaling codes.
//!
//! A code looks like `<offer>...</offer>`, where the body is the SDP text
//! deflated and encoded as unpadded base64. Whitespace inside a code is ignored
//! so that codes survive line wrapping in chat clients.

use std::io::{Read, Write};

use anyhow::{anyhow, bail, Result};
use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};
use flate2::{
    read::DeflateDecoder,
    write::DeflateEncoder,
    Compression,
};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::transport::{SdpType, SessionDescription};

/// Upper bound for an inflated description.
const MAX_SDP_LEN: usize = 1024 * 1024;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s").unwrap());
static CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<(.+?)>(.+?)</(.+?)>"#).unwrap());

pub fn encode(desc: &SessionDescription) -> Result<String> {
    let mut e = DeflateEncoder::new(Vec::new(), Compression::best());
    e.write_all(desc.sdp.as_bytes())?;
    let compressed_bytes = e.finish()?;
    Ok(format!(
        "<{}>{}</{}>",
        desc.sdp_type,
        BASE64_STANDARD_NO_PAD.encode(compressed_bytes),
        desc.sdp_type,
    ))
}

/// Parses a code produced by [`encode`], or a description in its JSON form.
pub fn decode(code: &str) -> Result<SessionDescription> {
    let code = code.trim();
    if code.starts_with('{') {
        return Ok(serde_json::from_str(code)?);
    }
    let code = WHITESPACE.replace_all(code, "");
    let captures = CODE
        .captures(&code)
        .ok_or_else(|| anyhow!("Failed to parse"))?;
    let tag = &captures[1];
    let tag_end = &captures[3];
    if tag != tag_end {
        bail!("unmatched tag: <{}></{}>", tag, tag_end);
    }
    let sdp_type = match tag {
        "offer" => SdpType::Offer,
        "pranswer" => SdpType::Pranswer,
        "answer" => SdpType::Answer,
        _ => bail!("unknown tag: {}", tag),
    };
    let compressed_bytes = BASE64_STANDARD_NO_PAD.decode(&captures[2])?;
    let mut sdp = Vec::new();
    DeflateDecoder::new(compressed_bytes.as_slice())
        .take(MAX_SDP_LEN as u64 + 1)
        .read_to_end(&mut sdp)?;
    if sdp.len() > MAX_SDP_LEN {
        bail!("description exceeds {} bytes", MAX_SDP_LEN);
    }
    let sdp = String::from_utf8(sdp)?;
    Ok(SessionDescription { sdp_type, sdp })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    #[test]
    fn code_survives_line_wrapping() {
        let code = encode(&SessionDescription::answer(SDP)).unwrap();
        assert!(code.starts_with("<answer>"));
        assert!(code.ends_with("</answer>"));

        let wrapped: String = code
            .chars()
            .enumerate()
            .flat_map(|(i, c)| if i % 20 == 19 { vec![c, '\n', ' '] } else { vec![c] })
            .collect();
        assert_eq!(decode(&wrapped).unwrap(), SessionDescription::answer(SDP));
    }

    #[test]
    fn accepts_json_descriptions() {
        let desc = decode(r#" {"type":"offer","sdp":"v=0"} "#).unwrap();
        assert_eq!(desc, SessionDescription::offer("v=0"));
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(decode("hello").is_err());
        assert!(decode("<offer>AAAA</answer>").is_err());
        assert!(decode("<rollback>AAAA</rollback>").is_err());
        assert!(decode("<offer>!!!</offer>").is_err());
    }

    #[test]
    fn rejects_codes_that_inflate_too_far() {
        let mut e = DeflateEncoder::new(Vec::new(), Compression::best());
        e.write_all(&vec![b'a'; MAX_SDP_LEN + 1]).unwrap();
        let code = format!(
            "<offer>{}</offer>",
            BASE64_STANDARD_NO_PAD.encode(e.finish().unwrap())
        );
        assert!(code.len() < 4 * 1024);

        let err = decode(&code).unwrap_err();
        assert!(err.to_string().contains("exceeds"));

        let sdp = "a".repeat(MAX_SDP_LEN);
        assert_eq!(
            decode(&encode(&SessionDescription::offer(sdp.clone())).unwrap()).unwrap(),
            SessionDescription::offer(sdp)
        );
    }
}
