//! Inbound text cleanup.

/// Zero-width and byte-order characters that some keyboards inject.
const INVISIBLE: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

/// Normalize raw inbound text.
///
/// Control and zero-width characters are dropped (whitespace controls become
/// spaces), whitespace runs collapse to one space, the ends are trimmed, and
/// the result is capped at `max_chars` characters.
pub fn sanitize(raw: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(raw.len().min(max_chars.saturating_mul(4)));
    let mut pending_space = false;
    let mut kept = 0usize;

    for c in raw.chars() {
        if INVISIBLE.contains(&c) {
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if c.is_control() {
            continue;
        }

        if pending_space {
            if kept + 1 >= max_chars {
                break;
            }
            out.push(' ');
            kept += 1;
            pending_space = false;
        }
        if kept >= max_chars {
            break;
        }
        out.push(c);
        kept += 1;
    }

    out
}

/// Lowercase `text` and fold the accented Latin letters common in Spanish
/// replies, so "Atrás" and "atras" compare equal.
pub fn fold_keyword(text: &str) -> String {
    text.trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}
