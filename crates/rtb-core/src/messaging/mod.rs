//! Primary delivery sink abstraction (Telegram today).

pub mod port;
