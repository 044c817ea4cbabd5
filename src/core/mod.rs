//! Core module containing the bridge between the bus and the peripheral board
//!
//! This module provides:
//! - Wire protocol (CRC-8, frame encoder, streaming decoder, readings)
//! - Validated commands and the topic router
//! - Transport layer (serial, dry run, scripted device)
//! - Bus seam (inbound messages, reading publisher, in-process bus)
//! - The bridge event loop
//! - Diagnostic and traffic logging

pub mod bridge;
pub mod bus;
pub mod command;
pub mod logger;
pub mod protocol;
pub mod router;
pub mod transport;
