//! Sanitization of untrusted text before it reaches a terminal or a model context.
//!
//! Grep output echoes raw file contents. A line can carry terminal escape
//! sequences (clipboard writes via OSC 52, cursor movement, hyperlinks) or
//! invisible Unicode that changes how a path or a line reads. Both are removed
//! here before any tool output is returned.

use std::borrow::Cow;
use std::iter::Peekable;

const ESC: char = '\x1b';
const BEL: char = '\x07';
const C1_CSI: char = '\u{009b}';

/// Strip ANSI escape sequences and control characters from `input`.
///
/// `\n`, `\t` and `\r` are preserved. Returns `Cow::Borrowed` when the input is
/// already clean.
///
/// ```
/// use delve_types::sanitize_terminal_text;
///
/// assert_eq!(sanitize_terminal_text("plain"), "plain");
/// assert_eq!(sanitize_terminal_text("a\x1b[2Jb"), "ab");
/// ```
#[must_use]
pub fn sanitize_terminal_text(input: &str) -> Cow<'_, str> {
    if !input.chars().any(is_disallowed_control) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ESC => skip_escape(&mut chars),
            C1_CSI => skip_csi(&mut chars),
            c if is_disallowed_control(c) => {}
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Characters that are invisible or reorder text: bidi controls, zero-width
/// characters, Unicode tags and variation selectors.
#[must_use]
pub fn is_steganographic_char(c: char) -> bool {
    matches!(
        c,
        '\u{00ad}'
            | '\u{061c}'
            | '\u{180e}'
            | '\u{200b}'..='\u{200f}'
            | '\u{202a}'..='\u{202e}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{2069}'
            | '\u{feff}'
            | '\u{fe00}'..='\u{fe0f}'
            | '\u{e0000}'..='\u{e007f}'
            | '\u{e0100}'..='\u{e01ef}'
    )
}

/// Remove every [`is_steganographic_char`] from `input`.
#[must_use]
pub fn strip_steganographic_chars(input: &str) -> Cow<'_, str> {
    if input.chars().any(is_steganographic_char) {
        Cow::Owned(input.chars().filter(|c| !is_steganographic_char(*c)).collect())
    } else {
        Cow::Borrowed(input)
    }
}

fn is_disallowed_control(c: char) -> bool {
    if matches!(c, '\n' | '\t' | '\r') {
        return false;
    }
    c <= '\x1f' || c == '\x7f' || ('\u{0080}'..='\u{009f}').contains(&c)
}

fn skip_escape<I: Iterator<Item = char>>(chars: &mut Peekable<I>) {
    match chars.peek().copied() {
        Some('[') => {
            chars.next();
            skip_csi(chars);
        }
        Some(']' | 'P' | '^' | '_') => {
            chars.next();
            skip_string_sequence(chars);
        }
        // Charset designators and line attributes take one argument character.
        Some('(' | ')' | '*' | '+' | '#' | ' ') => {
            chars.next();
            chars.next();
        }
        Some('7' | '8' | 'c' | 'D' | 'E' | 'H' | 'M' | 'N' | 'O' | 'Z' | '=' | '>' | '<') => {
            chars.next();
        }
        _ => {}
    }
}

/// Parameter and intermediate bytes (0x20-0x3F) until a final byte (0x40-0x7E).
fn skip_csi<I: Iterator<Item = char>>(chars: &mut Peekable<I>) {
    while let Some(&c) = chars.peek() {
        if ('\x20'..='\x3f').contains(&c) {
            chars.next();
            continue;
        }
        if ('\x40'..='\x7e').contains(&c) {
            chars.next();
        }
        return;
    }
}

/// OSC/DCS/PM/APC bodies end at BEL or ST (`ESC \`).
fn skip_string_sequence<I: Iterator<Item = char>>(chars: &mut Peekable<I>) {
    while let Some(c) = chars.next() {
        if c == BEL {
            return;
        }
        if c == ESC && chars.peek() == Some(&'\\') {
            chars.next();
            return;
        }
    }
}
