//! Input payload validation.
//!
//! Everything here is pure: a payload either turns into something the
//! console session can execute or into a [`DeskError::Validation`].

use std::collections::BTreeSet;

use crate::error::{DeskError, Result};
use crate::frontend::sanitize_mentions;

/// Largest relative pointer movement accepted per axis.
pub const MAX_MOVEMENT: i32 = 100;

/// Modifier synthesized for uppercase letters.
const SHIFT: &str = "LSHIFT";

/// Mouse buttons and their bits in the button mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn parse(button: &str) -> Result<Self> {
        match button {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            _ => Err(DeskError::Validation(
                "Invalid button, must be left/right/middle!".to_string(),
            )),
        }
    }

    pub fn mask(&self) -> u32 {
        match self {
            MouseButton::Left => 0x01,
            MouseButton::Right => 0x02,
            MouseButton::Middle => 0x04,
        }
    }
}

/// Reject pointer movement beyond [`MAX_MOVEMENT`] on either axis.
pub fn validate_movement(dx: i32, dy: i32) -> Result<()> {
    let range = -MAX_MOVEMENT..=MAX_MOVEMENT;
    if range.contains(&dx) && range.contains(&dy) {
        Ok(())
    } else {
        Err(DeskError::Validation(format!(
            "Movement cannot be above/below {}!",
            MAX_MOVEMENT
        )))
    }
}

/// A parsed key spec such as `a`, `A`, `enter` or `ctrl+alt+del`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    /// Keys tapped in order
    pub press: Vec<String>,
    /// Keys held down while pressing
    pub hold: Vec<String>,
}

impl KeyChord {
    /// Parse `spec` against the session's named keys.
    ///
    /// Modifiers must be named keys. The final key is either one printable
    /// ASCII character, sent as-is, or a named key, sent uppercased.
    pub fn parse(spec: &str, known: &BTreeSet<String>) -> Result<Self> {
        let mut hold = Vec::new();

        let key = match spec.rsplit_once('+') {
            Some((mods, key)) => {
                for modifier in mods.split('+') {
                    let upper = modifier.to_ascii_uppercase();
                    if modifier.chars().count() == 1 || !known.contains(&upper) {
                        return Err(DeskError::Validation(format!(
                            "Invalid modifier: `{}`",
                            sanitize_mentions(modifier)
                        )));
                    }
                    hold.push(upper);
                }
                key
            }
            None => spec,
        };

        let mut chars = key.chars();
        let press = match (chars.next(), chars.next()) {
            (Some(c), None) if is_printable(c) => {
                if c.is_ascii_uppercase() {
                    hold.push(SHIFT.to_string());
                }
                c.to_string()
            }
            _ if known.contains(&key.to_ascii_uppercase()) => key.to_ascii_uppercase(),
            _ => {
                return Err(DeskError::Validation(format!(
                    "Invalid key: `{}`",
                    sanitize_mentions(key)
                )))
            }
        };

        Ok(Self {
            press: vec![press],
            hold,
        })
    }
}

/// Printable ASCII plus the whitespace a keyboard can type.
fn is_printable(c: char) -> bool {
    c.is_ascii_graphic() || matches!(c, ' ' | '\t' | '\n' | '\r')
}
