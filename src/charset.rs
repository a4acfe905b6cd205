//! Charset helper (C3): guessing the request charset, transcoding between
//! the known set, and entity-encoding text. Pure functions, no mutable
//! state, built on `encoding_rs` (the same crate the pack's other HTTP-ish
//! examples reach for when they need charset transcoding).

use encoding_rs::Encoding;

/// The charsets this engine understands natively. Anything else requires a
/// transcoder backend the engine doesn't carry, and is reported as
/// [`DxrError::UnsupportedCharset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Iso88591,
    UsAscii,
}

impl Charset {
    /// The canonical name used in `Content-Type`/XML-declaration output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Iso88591 => "ISO-8859-1",
            Charset::UsAscii => "US-ASCII",
        }
    }

    /// Parses a charset name, case-insensitively, accepting the common
    /// aliases (`latin1`, `ascii`).
    pub fn parse(name: &str) -> Option<Charset> {
        match name.trim().to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Some(Charset::Utf8),
            "ISO-8859-1" | "LATIN1" | "ISO8859-1" => Some(Charset::Iso88591),
            "US-ASCII" | "ASCII" | "USASCII" => Some(Charset::UsAscii),
            _ => None,
        }
    }

    pub(crate) fn encoding(&self) -> &'static Encoding {
        match self {
            Charset::Utf8 => encoding_rs::UTF_8,
            Charset::Iso88591 => encoding_rs::WINDOWS_1252, // ISO-8859-1 superset, ASCII-compatible below 0x80
            Charset::UsAscii => encoding_rs::UTF_8,         // US-ASCII is a strict subset of UTF-8
        }
    }
}

/// Decodes raw request bytes in the given charset into UTF-8 text, so the
/// codec always hands `quick_xml` a `&str` regardless of the wire encoding.
pub fn decode_bytes(bytes: &[u8], charset: Charset) -> String {
    let (decoded, _, _) = charset.encoding().decode(bytes);
    decoded.into_owned()
}

/// Guesses the charset of an incoming request body, trying in order:
/// the `charset=` parameter of `Content-Type`, the XML declaration's
/// `encoding="…"`, a BOM sniff, then defaulting to UTF-8.
pub fn guess_encoding(content_type: Option<&str>, body: &[u8]) -> Charset {
    if let Some(charset) = content_type.and_then(charset_from_content_type) {
        return charset;
    }

    if let Some(charset) = charset_from_xml_decl(body) {
        return charset;
    }

    if let Some(charset) = charset_from_bom(body) {
        return charset;
    }

    Charset::Utf8
}

fn charset_from_content_type(content_type: &str) -> Option<Charset> {
    content_type
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("charset="))
        .find_map(|raw| Charset::parse(raw.trim_matches('"')))
}

fn charset_from_xml_decl(body: &[u8]) -> Option<Charset> {
    let text = std::str::from_utf8(&body[..body.len().min(256)]).ok()?;
    let decl_end = text.find("?>")?;
    let decl = &text[..decl_end];
    let marker = "encoding=";
    let start = decl.find(marker)? + marker.len();
    let rest = decl[start..].trim_start();
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let end = rest[1..].find(quote)? + 1;
    Charset::parse(&rest[1..end])
}

fn charset_from_bom(body: &[u8]) -> Option<Charset> {
    if body.starts_with(&[0xEF, 0xBB, 0xBF]) {
        Some(Charset::Utf8)
    } else if body.starts_with(&[0xFF, 0xFE]) || body.starts_with(&[0xFE, 0xFF]) {
        // UTF-16 BOMs: not one of the three supported charsets, but not
        // unknown either; treat as UTF-8 after the caller's own transcode
        // step fails over, same as "no match" would.
        None
    } else {
        None
    }
}

/// Entity-escapes `text` for embedding in an XML document (`&`, `<`, `>`,
/// and any code point that can't be represented in `to` as a numeric
/// character reference). `text` is the engine's own internal
/// representation, always a Rust `String` (i.e. already Unicode), so there
/// is no separate "transcode from an external charset" step here — only
/// the representability check against the charset the response will
/// actually declare.
pub fn encode_entities(text: &str, to: Charset) -> String {
    escape_for_charset(text, to)
}

/// Replaces code points in an *already-serialized* XML document that
/// cannot be represented in `charset` with numeric character references,
/// per spec §4.2 ("non-representable code points replaced by numeric
/// character references, so the resulting document is valid in the
/// declared charset"). Unlike [`encode_entities`], this does not touch
/// `&`/`<`/`>`, since the document passed in already has its markup
/// escaped by the serializer — re-escaping here would double-escape it
/// (turning an existing `&amp;` into `&amp;amp;`).
pub(crate) fn replace_non_representable(document: &str, charset: Charset) -> String {
    if charset == Charset::Utf8 {
        return document.to_string();
    }

    let mut out = String::with_capacity(document.len());
    for ch in document.chars() {
        if is_representable(ch, charset) {
            out.push(ch);
        } else {
            out.push_str(&format!("&#{};", ch as u32));
        }
    }
    out
}

fn escape_for_charset(text: &str, to: Charset) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c if is_representable(c, to) => out.push(c),
            c => out.push_str(&format!("&#{};", c as u32)),
        }
    }
    out
}

fn is_representable(ch: char, charset: Charset) -> bool {
    match charset {
        Charset::Utf8 => true,
        Charset::Iso88591 => (ch as u32) <= 0xFF,
        Charset::UsAscii => ch.is_ascii(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_from_content_type() {
        let body = b"<?xml version=\"1.0\"?><methodCall/>";
        let guessed = guess_encoding(Some("text/xml; charset=ISO-8859-1"), body);
        assert_eq!(guessed, Charset::Iso88591);
    }

    #[test]
    fn guesses_from_xml_decl() {
        let body = b"<?xml version=\"1.0\" encoding=\"US-ASCII\"?><methodCall/>";
        assert_eq!(guess_encoding(None, body), Charset::UsAscii);
    }

    #[test]
    fn guesses_from_bom() {
        let mut body = vec![0xEF, 0xBB, 0xBF];
        body.extend_from_slice(b"<?xml version=\"1.0\"?>");
        assert_eq!(guess_encoding(None, &body), Charset::Utf8);
    }

    #[test]
    fn defaults_to_utf8() {
        assert_eq!(guess_encoding(None, b"<methodCall/>"), Charset::Utf8);
    }

    #[test]
    fn ascii_escapes_non_ascii_as_numeric_refs() {
        let encoded = encode_entities("caf\u{e9}", Charset::UsAscii);
        assert_eq!(encoded, "caf&#233;");
    }

    #[test]
    fn escapes_xml_special_characters() {
        let encoded = encode_entities("<a & b>", Charset::Utf8);
        assert_eq!(encoded, "&lt;a &amp; b&gt;");
    }

    #[test]
    fn replace_non_representable_leaves_existing_markup_alone() {
        let document = r#"<string>caf&#233; &amp; t&#233;</string>"#;
        let charset_escaped = replace_non_representable("<string>café &amp; té</string>", Charset::UsAscii);
        assert_eq!(charset_escaped, document);
    }

    #[test]
    fn replace_non_representable_is_a_no_op_for_utf8() {
        let document = "<string>café</string>";
        assert_eq!(replace_non_representable(document, Charset::Utf8), document);
    }
}
