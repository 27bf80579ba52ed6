/// Decode RFC 2047 encoded-words in a raw envelope subject.
pub fn decode_subject(raw: &[u8]) -> String {
    decode_header_value(b"Subject", raw)
}

pub fn decode_mime_words(raw: &[u8]) -> String {
    decode_header_value(b"X", raw)
}

fn decode_header_value(name: &[u8], raw: &[u8]) -> String {
    // mailparse expects a full "Key: value" header line
    let mut line = name.to_vec();
    line.extend_from_slice(b": ");
    line.extend_from_slice(raw);
    line.extend_from_slice(b"\r\n");

    match mailparse::parse_header(&line) {
        Ok((h, _idx)) => h.get_value(),
        Err(_) => String::from_utf8_lossy(raw).into_owned(),
    }
}

/// `mailbox@host` from the parts of an envelope address. Either part may be missing.
pub fn format_address(mailbox: Option<&[u8]>, host: Option<&[u8]>) -> String {
    let mailbox = mailbox.map(decode_mime_words).unwrap_or_default();
    let host = host.map(decode_mime_words).unwrap_or_default();
    match (mailbox.trim(), host.trim()) {
        ("", _) => String::new(),
        (m, "") => m.to_string(),
        (m, h) => format!("{m}@{h}"),
    }
}
