//! Promptgate CLI library: the command implementations behind the
//! `promptgate` binary, exposed so tests can drive them directly.

pub mod commands;
