//! Internal module for parsing fetched messages into searchable text.

use crate::error::{Error, Result};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use tracing::{debug, warn};

/// A MIME part that was left out of the searchable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPart {
    /// Position of the leaf part in depth-first order.
    pub index: usize,
    /// Declared content type of the part.
    pub content_type: String,
    /// Why it could not be decoded.
    pub reason: String,
}

/// Headers and text of one message.
#[derive(Debug)]
pub(crate) struct ParsedMessage {
    pub subject: String,
    pub from: String,
    pub body: String,
    pub skipped: Vec<SkippedPart>,
}

/// Parses a raw RFC 822 message.
///
/// For multipart messages every `text/plain` and `text/html` leaf is decoded and the
/// results are joined with newlines. A part whose charset cannot be decoded is read as
/// lossy UTF-8; a part whose transfer encoding is broken is skipped and recorded.
pub(crate) fn parse_message(raw: &[u8]) -> Result<ParsedMessage> {
    let parsed = parse_mail(raw).map_err(|source| Error::ParseEmail { source })?;

    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let from = parsed.headers.get_first_value("From").unwrap_or_default();

    let mut body = String::new();
    let mut skipped = Vec::new();

    if parsed.subparts.is_empty() {
        match decode_part(&parsed) {
            Ok(text) => body = text,
            Err(reason) => skipped.push(SkippedPart {
                index: 0,
                content_type: parsed.ctype.mimetype.clone(),
                reason,
            }),
        }
    } else {
        let mut index = 0;
        collect_text_parts(&parsed, &mut index, &mut body, &mut skipped);
    }

    for part in &skipped {
        warn!(
            index = part.index,
            content_type = %part.content_type,
            reason = %part.reason,
            "Skipping undecodable message part"
        );
    }
    debug!(body_len = body.len(), skipped = skipped.len(), "Parsed message");

    Ok(ParsedMessage {
        subject,
        from,
        body,
        skipped,
    })
}

fn collect_text_parts(
    part: &ParsedMail<'_>,
    index: &mut usize,
    body: &mut String,
    skipped: &mut Vec<SkippedPart>,
) {
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            collect_text_parts(subpart, index, body, skipped);
        }
        return;
    }

    let leaf_index = *index;
    *index += 1;

    let mimetype = part.ctype.mimetype.to_lowercase();
    if mimetype != "text/plain" && mimetype != "text/html" {
        return;
    }

    match decode_part(part) {
        Ok(text) => {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(&text);
        }
        Err(reason) => skipped.push(SkippedPart {
            index: leaf_index,
            content_type: mimetype,
            reason,
        }),
    }
}

/// Charset-aware decode, falling back to lossy UTF-8 of the transfer-decoded bytes.
fn decode_part(part: &ParsedMail<'_>) -> std::result::Result<String, String> {
    part.get_body().or_else(|charset_err| {
        part.get_body_raw()
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
            .map_err(|raw_err| format!("{charset_err}; {raw_err}"))
    })
}
