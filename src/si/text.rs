//! SI string decoding (ETSI EN 300 468 Annex A), simplified.
//!
//! A leading byte below 0x20 selects the character table. The tables
//! actually seen in the wild are handled: UTF-8 (0x15), the 16-bit
//! selector (0x10, treated as Latin), and the default Latin table.
//! Everything else falls back to a Latin-1 interpretation, which at least
//! never loses ASCII. Full character-table coverage is a localization
//! concern and lives outside this crate.

/// Decode one SI text field to a `String`.
pub fn decode_si_string(data: &[u8]) -> String {
    let body = match data.first() {
        Some(0x15) => return sanitize(&String::from_utf8_lossy(&data[1..])),
        Some(0x10) if data.len() >= 3 => &data[3..],
        Some(&b) if b < 0x20 => &data[1..],
        _ => data,
    };
    sanitize(&body.iter().map(|&b| b as char).collect::<String>())
}

/// Strip single-byte control codes; 0x8A is the SI line break.
fn sanitize(s: &str) -> String {
    s.chars()
        .filter_map(|c| match c {
            '\u{8A}' => Some('\n'),
            '\u{80}'..='\u{9F}' => None,
            c if c.is_control() && c != '\n' => None,
            c => Some(c),
        })
        .collect()
}

/// Decode the name carried in linkage private data. Its encoding is not
/// specified by the standard, so the bytes are passed through lossily and
/// only control codes are removed.
pub fn decode_link_name(data: &[u8]) -> String {
    sanitize(&String::from_utf8_lossy(data))
}

/// Normalize an ISO 639-2 language code for comparison: lowercase, with
/// the common bibliographic/terminological aliases folded together.
pub fn normalize_language_code(code: [u8; 3]) -> String {
    let lower: String = code
        .iter()
        .filter(|b| b.is_ascii_alphabetic())
        .map(|b| b.to_ascii_lowercase() as char)
        .collect();
    match lower.as_str() {
        "ger" => "deu".into(),
        "fre" => "fra".into(),
        "dut" => "nld".into(),
        "cze" => "ces".into(),
        "gre" => "ell".into(),
        _ => lower,
    }
}

/// Whether a configured language preference matches a normalized code.
pub fn language_matches(preference: &str, code: &str) -> bool {
    normalize_language_code(to_code(preference)) == code
}

fn to_code(s: &str) -> [u8; 3] {
    let mut code = [b' '; 3];
    for (dst, src) in code.iter_mut().zip(s.bytes()) {
        *dst = src;
    }
    code
}
