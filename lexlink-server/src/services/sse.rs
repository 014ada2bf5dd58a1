//! Incremental reassembly of SSE frames from an untrusted byte stream.
//!
//! Upstream reads arrive on arbitrary boundaries; a frame only exists once
//! its blank-line terminator has been seen. Partial trailing frames stay
//! buffered until terminated and are never forwarded early.

/// Reassembles `\n\n`-delimited SSE frames across network reads.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network read into the assembler and returns every frame
    /// completed by it, in arrival order. Blank frames (stray delimiters,
    /// keep-alive padding) are dropped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = find_delimiter(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&frame[..pos]);
            let text = text.trim_end_matches('\r');
            if !text.trim().is_empty() {
                frames.push(text.to_string());
            }
        }
        frames
    }

    /// Bytes still waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\n\n")
}

/// Extracts the payload of a frame: every `data:` line with the prefix and
/// one optional leading space stripped, joined by newlines. Returns `None`
/// for frames without data lines (comments, event-only frames).
pub fn data_payload(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            line.strip_prefix("data:")
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        })
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
