//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for supervisors and scripts
//! - JSON-lines bus adapter over stdin/stdout

pub mod exit_codes;
pub mod pipe;

pub use exit_codes::{exit_code_description, print_exit_codes, transport_code, CliResult, ExitCodes};
pub use pipe::{forward_lines, parse_envelope, spawn_stdin_reader, PipeMode, StdoutPublisher};
