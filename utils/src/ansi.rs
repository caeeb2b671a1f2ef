//! Terminal escape stripping for captured process output.
//!
//! Commands run by tools frequently emit colour codes, cursor movement and
//! window-title sequences. None of that belongs in model context, so output is
//! reduced to printable text plus `\n`, `\t` and `\r`.

use std::borrow::Cow;

const ESC: char = '\x1b';
const BEL: char = '\x07';
const C1_CSI: char = '\u{009b}';
const C1_OSC: char = '\u{009d}';
const C1_ST: char = '\u{009c}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    /// Saw ESC, waiting for the introducer.
    Escape,
    /// ESC followed by an intermediate byte (charset selection etc.).
    EscapeIntermediate,
    /// Control sequence: parameters until a final byte in `@..=~`.
    Csi,
    /// Operating system command: until BEL or ST.
    Osc,
    /// DCS / PM / APC / SOS string: until ST.
    ControlString,
    /// Saw ESC inside an OSC or control string; `\` completes ST.
    StringEscape { in_osc: bool },
}

/// Remove ANSI/VT escape sequences and stray control characters.
///
/// Returns `Cow::Borrowed` when the input is already clean.
#[must_use]
pub fn strip_terminal_escapes(input: &str) -> Cow<'_, str> {
    if !input.chars().any(needs_stripping) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut state = State::Text;

    for c in input.chars() {
        state = match state {
            State::Text => match c {
                ESC => State::Escape,
                C1_CSI => State::Csi,
                C1_OSC => State::Osc,
                '\n' | '\t' | '\r' => {
                    out.push(c);
                    State::Text
                }
                c if is_control(c) => State::Text,
                c => {
                    out.push(c);
                    State::Text
                }
            },
            State::Escape => match c {
                '[' => State::Csi,
                ']' => State::Osc,
                'P' | 'X' | '^' | '_' => State::ControlString,
                ' '..='/' => State::EscapeIntermediate,
                // Any other byte completes a two-character sequence (ESC 7, ESC c, ...).
                _ => State::Text,
            },
            State::EscapeIntermediate => {
                if (' '..='/').contains(&c) {
                    State::EscapeIntermediate
                } else {
                    State::Text
                }
            }
            State::Csi => match c {
                '@'..='~' => State::Text,
                ' '..='?' => State::Csi,
                // Malformed sequence: drop what we have and resume with this char.
                _ => resume_text(c, &mut out),
            },
            State::Osc => match c {
                BEL | C1_ST => State::Text,
                ESC => State::StringEscape { in_osc: true },
                _ => State::Osc,
            },
            State::ControlString => match c {
                C1_ST => State::Text,
                ESC => State::StringEscape { in_osc: false },
                _ => State::ControlString,
            },
            State::StringEscape { in_osc } => match c {
                '\\' => State::Text,
                ESC => State::StringEscape { in_osc },
                _ if in_osc => State::Osc,
                _ => State::ControlString,
            },
        };
    }

    Cow::Owned(out)
}

fn resume_text(c: char, out: &mut String) -> State {
    match c {
        ESC => State::Escape,
        '\n' | '\t' | '\r' => {
            out.push(c);
            State::Text
        }
        c if is_control(c) => State::Text,
        c => {
            out.push(c);
            State::Text
        }
    }
}

fn is_control(c: char) -> bool {
    c <= '\x1f' || c == '\x7f' || ('\u{0080}'..='\u{009f}').contains(&c)
}

fn needs_stripping(c: char) -> bool {
    is_control(c) && !matches!(c, '\n' | '\t' | '\r')
}
