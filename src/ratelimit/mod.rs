//! Cooldown tracking and restriction windows.

mod limiter;
mod window;

pub use limiter::{RateLimiter, DEFAULT_COOLDOWN};
pub use window::RestrictionWindow;
