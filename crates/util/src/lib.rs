// SPDX-License-Identifier: PolyForm-Shield-1.0

pub mod logging;
