// SPDX-License-Identifier: PolyForm-Shield-1.0

/// Chunk-to-line assembly shared by commands and events.
///
/// Parsers are notified twice per line: once (possibly repeatedly, with a
/// growing buffer) while the line is still partial, and once with the
/// terminator stripped when it completes. `\r\n` and bare `\n` both
/// terminate a line.
pub struct LineAssembler {
    buffer: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed one chunk; returns `(line, is_full_line)` notifications in
    /// arrival order.
    pub fn feed(&mut self, chunk: &str) -> Vec<(String, bool)> {
        self.buffer.push_str(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            out.push((line, true));
        }
        if !self.buffer.is_empty() {
            out.push((self.buffer.clone(), false));
        }
        out
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}
