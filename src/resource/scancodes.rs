//! PC keyboard (set 1) scancodes for named keys and printable ASCII.

use std::collections::BTreeSet;

use crate::error::{DeskError, Result};

const EXTENDED_PREFIX: u8 = 0xE0;
const BREAK_BIT: u8 = 0x80;

/// A single key on the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scancode {
    pub code: u8,
    /// Keys that are sent with an `E0` prefix
    pub extended: bool,
}

impl Scancode {
    const fn basic(code: u8) -> Self {
        Self {
            code,
            extended: false,
        }
    }

    const fn extended(code: u8) -> Self {
        Self {
            code,
            extended: true,
        }
    }

    /// Bytes for pressing the key.
    pub fn make(&self) -> Vec<u8> {
        self.with_prefix(self.code)
    }

    /// Bytes for releasing the key.
    pub fn brk(&self) -> Vec<u8> {
        self.with_prefix(self.code | BREAK_BIT)
    }

    fn with_prefix(&self, byte: u8) -> Vec<u8> {
        if self.extended {
            vec![EXTENDED_PREFIX, byte]
        } else {
            vec![byte]
        }
    }
}

const NAMED: &[(&str, Scancode)] = &[
    ("ESC", Scancode::basic(0x01)),
    ("BKSP", Scancode::basic(0x0E)),
    ("TAB", Scancode::basic(0x0F)),
    ("ENTER", Scancode::basic(0x1C)),
    ("CTRL", Scancode::basic(0x1D)),
    ("LCTRL", Scancode::basic(0x1D)),
    ("RCTRL", Scancode::extended(0x1D)),
    ("SHIFT", Scancode::basic(0x2A)),
    ("LSHIFT", Scancode::basic(0x2A)),
    ("RSHIFT", Scancode::basic(0x36)),
    ("ALT", Scancode::basic(0x38)),
    ("LALT", Scancode::basic(0x38)),
    ("RALT", Scancode::extended(0x38)),
    ("SPACE", Scancode::basic(0x39)),
    ("CAPS", Scancode::basic(0x3A)),
    ("F1", Scancode::basic(0x3B)),
    ("F2", Scancode::basic(0x3C)),
    ("F3", Scancode::basic(0x3D)),
    ("F4", Scancode::basic(0x3E)),
    ("F5", Scancode::basic(0x3F)),
    ("F6", Scancode::basic(0x40)),
    ("F7", Scancode::basic(0x41)),
    ("F8", Scancode::basic(0x42)),
    ("F9", Scancode::basic(0x43)),
    ("F10", Scancode::basic(0x44)),
    ("NUMLOCK", Scancode::basic(0x45)),
    ("SCROLLLOCK", Scancode::basic(0x46)),
    ("F11", Scancode::basic(0x57)),
    ("F12", Scancode::basic(0x58)),
    ("HOME", Scancode::extended(0x47)),
    ("UP", Scancode::extended(0x48)),
    ("PGUP", Scancode::extended(0x49)),
    ("LEFT", Scancode::extended(0x4B)),
    ("RIGHT", Scancode::extended(0x4D)),
    ("END", Scancode::extended(0x4F)),
    ("DOWN", Scancode::extended(0x50)),
    ("PGDN", Scancode::extended(0x51)),
    ("INS", Scancode::extended(0x52)),
    ("DEL", Scancode::extended(0x53)),
    ("WIN", Scancode::extended(0x5B)),
    ("LWIN", Scancode::extended(0x5B)),
    ("RWIN", Scancode::extended(0x5C)),
    ("MENU", Scancode::extended(0x5D)),
];

/// Unshifted and shifted character for each key of the main block.
const CHARACTERS: &[(char, char, u8)] = &[
    ('1', '!', 0x02),
    ('2', '@', 0x03),
    ('3', '#', 0x04),
    ('4', '$', 0x05),
    ('5', '%', 0x06),
    ('6', '^', 0x07),
    ('7', '&', 0x08),
    ('8', '*', 0x09),
    ('9', '(', 0x0A),
    ('0', ')', 0x0B),
    ('-', '_', 0x0C),
    ('=', '+', 0x0D),
    ('q', 'Q', 0x10),
    ('w', 'W', 0x11),
    ('e', 'E', 0x12),
    ('r', 'R', 0x13),
    ('t', 'T', 0x14),
    ('y', 'Y', 0x15),
    ('u', 'U', 0x16),
    ('i', 'I', 0x17),
    ('o', 'O', 0x18),
    ('p', 'P', 0x19),
    ('[', '{', 0x1A),
    (']', '}', 0x1B),
    ('a', 'A', 0x1E),
    ('s', 'S', 0x1F),
    ('d', 'D', 0x20),
    ('f', 'F', 0x21),
    ('g', 'G', 0x22),
    ('h', 'H', 0x23),
    ('j', 'J', 0x24),
    ('k', 'K', 0x25),
    ('l', 'L', 0x26),
    (';', ':', 0x27),
    ('\'', '"', 0x28),
    ('`', '~', 0x29),
    ('\\', '|', 0x2B),
    ('z', 'Z', 0x2C),
    ('x', 'X', 0x2D),
    ('c', 'C', 0x2E),
    ('v', 'V', 0x2F),
    ('b', 'B', 0x30),
    ('n', 'N', 0x31),
    ('m', 'M', 0x32),
    (',', '<', 0x33),
    ('.', '>', 0x34),
    ('/', '?', 0x35),
];

/// Look up a named key (case-insensitive).
pub fn named(name: &str) -> Option<Scancode> {
    let upper = name.to_ascii_uppercase();
    NAMED
        .iter()
        .find(|(n, _)| *n == upper)
        .map(|(_, code)| *code)
}

/// Look up a single character. The flag is set when shift is needed.
pub fn for_char(c: char) -> Option<(Scancode, bool)> {
    match c {
        ' ' => return Some((Scancode::basic(0x39), false)),
        '\t' => return Some((Scancode::basic(0x0F), false)),
        '\n' | '\r' => return Some((Scancode::basic(0x1C), false)),
        _ => {}
    }
    CHARACTERS.iter().find_map(|&(plain, shifted, code)| {
        if c == plain {
            Some((Scancode::basic(code), false))
        } else if c == shifted {
            Some((Scancode::basic(code), true))
        } else {
            None
        }
    })
}

/// All named keys.
pub fn key_names() -> BTreeSet<String> {
    NAMED.iter().map(|(n, _)| n.to_string()).collect()
}

fn resolve(key: &str) -> Result<(Scancode, bool)> {
    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if let Some(found) = for_char(c) {
            return Ok(found);
        }
    }
    named(key)
        .map(|code| (code, false))
        .ok_or_else(|| DeskError::Validation(format!("No scancode for `{}`", key.escape_default())))
}

/// Encode a key event: hold keys go down, each pressed key is tapped,
/// then hold keys are released in reverse order.
pub fn encode(press: &[String], hold: &[String]) -> Result<Vec<u8>> {
    let held = hold
        .iter()
        .map(|k| resolve(k).map(|(code, _)| code))
        .collect::<Result<Vec<_>>>()?;
    let shift = Scancode::basic(0x2A);
    let shift_held = held.contains(&shift);

    let mut bytes = Vec::new();
    for code in &held {
        bytes.extend(code.make());
    }
    for key in press {
        let (code, needs_shift) = resolve(key)?;
        let wrap = needs_shift && !shift_held;
        if wrap {
            bytes.extend(shift.make());
        }
        bytes.extend(code.make());
        bytes.extend(code.brk());
        if wrap {
            bytes.extend(shift.brk());
        }
    }
    for code in held.iter().rev() {
        bytes.extend(code.brk());
    }
    Ok(bytes)
}
