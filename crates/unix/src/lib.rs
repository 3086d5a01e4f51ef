// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Unix command parsers and shell events.
//!
//! Plugin layer over the observer machinery: each command here is a
//! [`CommandBehavior`](observer::command::CommandBehavior) implementing the
//! output-to-structured-result logic of one unix command, and each event a
//! detector over a live stream (e.g. ping output). Nothing in this crate
//! touches transports; everything goes through a moler connection.

pub mod cmd;
pub mod events;
