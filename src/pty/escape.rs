//! Escape sequence stripping for plain-text matching.
//!
//! Shells built on line-editing libraries decorate their output with colour
//! codes, cursor movement and title updates. [`EscapeFilter`] removes those
//! while the bytes stream in. It keeps its state between chunks, so a
//! sequence split across two reads is still removed entirely.
//!
//! Carriage returns, newlines and tabs pass through untouched: scripts match
//! on line endings such as `"exit\r\n"`.

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Ground,
    /// Saw ESC
    Escape,
    /// ESC followed by intermediate bytes, e.g. `ESC ( B`
    EscapeIntermediate,
    /// Inside `ESC [ ...`
    Csi,
    /// Inside `ESC ] ...`, terminated by BEL or `ESC \`
    Osc,
    /// Saw ESC inside an OSC string
    OscEscape,
}

#[derive(Debug, Default)]
pub struct EscapeFilter {
    state: State,
}

impl EscapeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strip escape sequences from `input`, appending the plain bytes to `out`.
    pub fn filter(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &b in input {
            self.state = match self.state {
                State::Ground => match b {
                    ESC => State::Escape,
                    BEL => State::Ground,
                    _ => {
                        out.push(b);
                        State::Ground
                    }
                },
                State::Escape => match b {
                    b'[' => State::Csi,
                    b']' => State::Osc,
                    0x20..=0x2F => State::EscapeIntermediate,
                    // An ESC interrupting an escape starts over
                    ESC => State::Escape,
                    _ => State::Ground,
                },
                State::EscapeIntermediate => match b {
                    0x20..=0x2F => State::EscapeIntermediate,
                    _ => State::Ground,
                },
                State::Csi => match b {
                    // Parameter and intermediate bytes
                    0x20..=0x3F => State::Csi,
                    ESC => State::Escape,
                    // Final byte, or anything malformed ends the sequence
                    _ => State::Ground,
                },
                State::Osc => match b {
                    BEL => State::Ground,
                    ESC => State::OscEscape,
                    _ => State::Osc,
                },
                State::OscEscape => match b {
                    b'\\' => State::Ground,
                    _ => State::Osc,
                },
            };
        }
    }

    /// True while a sequence is only partially received.
    pub fn in_sequence(&self) -> bool {
        self.state != State::Ground
    }
}
