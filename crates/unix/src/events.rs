// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Stream events over unix command output.

pub mod ping;
