//! Log sanitization: strip NUL bytes and replace any other control byte
//! below 0x20 (except `\n`) with `?`, with an optional size cap applied
//! before sanitizing.

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSanitizer {
    pub max_size: Option<usize>,
}

impl LogSanitizer {
    pub fn new(max_size: Option<usize>) -> Self {
        Self { max_size }
    }

    pub fn sanitize(&self, input: &[u8]) -> Vec<u8> {
        let truncated = match self.max_size {
            Some(limit) if input.len() > limit => &input[..limit],
            _ => input,
        };
        truncated
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .map(|b| if b < 0x20 && b != b'\n' { b'?' } else { b })
            .collect()
    }
}
