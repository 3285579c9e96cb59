//! Chat transports: subscriber commands in, alerts out.

pub mod telegram;
