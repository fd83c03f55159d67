//! Arbitration around the shared desktop session.
//!
//! The [`SessionController`] owns the one live console session and runs every
//! request through the same gates: authorization, location, cooldown, then
//! the action itself. Input injection is serialized by the
//! [`ExclusionLock`]; resets may be gated by a [`VoteSession`].

mod controller;
mod input;
mod lock;
mod vote;

pub use controller::{ControllerSettings, ResetPhase, SessionController};
pub use input::{validate_movement, KeyChord, MouseButton, MAX_MOVEMENT};
pub use lock::ExclusionLock;
pub use vote::{Ballot, VoteOutcome, VoteSession, APPROVE, DEFAULT_VOTE_WINDOW, REJECT};
