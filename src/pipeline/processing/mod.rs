// Processing stages, each usable on its own

pub mod title;
pub mod fallback;
pub mod festival;
pub mod dedupe;
pub mod health;
