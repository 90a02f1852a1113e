/// Accumulates raw output of one stream and hands out complete lines.
///
/// Splitting happens on bytes, so a read boundary inside a multi-byte
/// character or between `\r` and `\n` yields the same lines as one big read.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator, or `None` if only an
    /// unterminated fragment remains.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// The unterminated tail, for prompt detection.
    pub fn fragment(&self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }

    /// Consume the unterminated tail, if any.
    pub fn take_fragment(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let mut fragment = std::mem::take(&mut self.pending);
        if fragment.last() == Some(&b'\r') {
            fragment.pop();
        }
        Some(String::from_utf8_lossy(&fragment).into_owned())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain(buffer: &mut LineBuffer) -> Vec<String> {
        std::iter::from_fn(|| buffer.next_line()).collect()
    }

    #[test]
    fn splits_and_trims_carriage_returns() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"one\r\ntwo\nthr");
        assert_eq!(drain(&mut buffer), vec!["one", "two"]);
        assert_eq!(buffer.fragment(), "thr");
        buffer.push(b"ee\n");
        assert_eq!(drain(&mut buffer), vec!["three"]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.take_fragment(), None);
    }

    #[test]
    fn keeps_empty_lines() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"a\n\nb\n");
        assert_eq!(drain(&mut buffer), vec!["a", "", "b"]);
    }

    #[test]
    fn prompt_fragment_is_available() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"Enter password (will not be echoed):");
        assert_eq!(buffer.next_line(), None);
        assert_eq!(
            buffer.take_fragment().as_deref(),
            Some("Enter password (will not be echoed):")
        );
        assert!(buffer.is_empty());
    }

    proptest! {
        #[test]
        fn any_split_yields_same_lines(
            text in "([a-zé✓ =:/]{0,12}(\r\n|\n)){0,8}[a-z ]{0,6}",
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let bytes = text.as_bytes();
            let mut whole = LineBuffer::default();
            whole.push(bytes);
            let mut expected = drain(&mut whole);
            expected.extend(whole.take_fragment());

            let mut offsets: Vec<usize> = cuts.iter().map(|c| c.index(bytes.len() + 1)).collect();
            offsets.sort_unstable();
            let mut pieces = LineBuffer::default();
            let mut actual = Vec::new();
            let mut start = 0;
            for offset in offsets.into_iter().chain(std::iter::once(bytes.len())) {
                pieces.push(&bytes[start..offset]);
                actual.extend(drain(&mut pieces));
                start = offset;
            }
            actual.extend(pieces.take_fragment());

            prop_assert_eq!(actual, expected);
        }
    }
}
