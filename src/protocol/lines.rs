/// Reassembles lines from arbitrarily chunked bytes.
///
/// Splits on `\n`, drops a trailing `\r`, and decodes lossily so invalid
/// UTF-8 never aborts a stream.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Returns the unterminated tail, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks_are_reassembled() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"data: {\"tok").is_empty());
        assert_eq!(splitter.push(b"en\":\"a\"}\r\n\r\n"), vec![
            "data: {\"token\":\"a\"}".to_string(),
            String::new(),
        ]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn multibyte_characters_survive_chunk_boundaries() {
        let bytes = "Grüße\n".as_bytes();
        let mut splitter = LineSplitter::default();
        let (head, tail) = bytes.split_at(3);
        assert!(splitter.push(head).is_empty());
        assert_eq!(splitter.push(tail), vec!["Grüße".to_string()]);
    }

    #[test]
    fn unterminated_tail_is_flushed() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"plain tail").is_empty());
        assert_eq!(splitter.finish().as_deref(), Some("plain tail"));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let mut splitter = LineSplitter::default();
        let lines = splitter.push(b"ok\xff\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok"));
    }
}
