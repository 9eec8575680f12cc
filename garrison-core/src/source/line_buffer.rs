/// Accumulates raw bytes from a transport and splits them into complete
/// lines, buffering a trailing partial line until it is completed by a
/// later chunk.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly read bytes (already UTF-8 lossily decoded by the caller)
    /// and drain any complete lines. The trailing partial segment, if any,
    /// stays buffered for the next call.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(idx) = self.pending.find('\n') {
            let mut line: String = self.pending.drain(..=idx).collect();
            line.pop(); // drop the '\n'
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Discard any buffered partial line, e.g. on truncation/rotation.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
