/// Acknowledgment sent by the device after each line it has processed
pub const DEFAULT_ACK: &[u8] = b"ok\r\n";

/// Confirmation scanner
///
/// Counts occurrences of a fixed acknowledgment token in the byte stream coming back from the
/// device. The stream may be chunked arbitrarily; a partial match at the end of one chunk is
/// resumed with the next.
///
/// On a mismatch the scanner falls back to the longest prefix of the token that is still matched,
/// so `ook\r\n` is recognized. Matches do not overlap: after a full match scanning restarts from
/// scratch.
#[derive(Debug, Clone)]
pub struct ConfirmScanner {
    token: Vec<u8>,
    // fallback[i]: length of the longest proper prefix of token[..=i] that is also its suffix
    fallback: Vec<usize>,
    matched: usize,
}

impl ConfirmScanner {
    /// Creates a scanner for `token`. An empty token never matches.
    pub fn new(token: impl Into<Vec<u8>>) -> Self {
        let token = token.into();
        let fallback = prefix_function(&token);
        ConfirmScanner {
            token,
            fallback,
            matched: 0,
        }
    }

    /// The token being looked for
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// Number of token bytes matched so far at the end of the stream
    pub fn matched(&self) -> usize {
        self.matched
    }

    /// Forgets any partial match
    pub fn reset(&mut self) {
        self.matched = 0;
    }

    /// Scans `bytes`, returning the number of tokens completed within them
    pub fn scan(&mut self, bytes: &[u8]) -> usize {
        if self.token.is_empty() {
            return 0;
        }
        let mut found = 0;
        for &b in bytes {
            while self.matched > 0 && self.token[self.matched] != b {
                self.matched = self.fallback[self.matched - 1];
            }
            if self.token[self.matched] == b {
                self.matched += 1;
            }
            if self.matched == self.token.len() {
                found += 1;
                self.matched = 0;
            }
        }
        found
    }
}

impl Default for ConfirmScanner {
    fn default() -> Self {
        Self::new(DEFAULT_ACK)
    }
}

fn prefix_function(token: &[u8]) -> Vec<usize> {
    let mut fallback = vec![0; token.len()];
    let mut k = 0;
    for i in 1..token.len() {
        while k > 0 && token[i] != token[k] {
            k = fallback[k - 1];
        }
        if token[i] == token[k] {
            k += 1;
        }
        fallback[i] = k;
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_split_across_chunks() {
        let mut scanner = ConfirmScanner::default();
        assert_eq!(scanner.scan(b"o"), 0);
        assert_eq!(scanner.matched(), 1);
        assert_eq!(scanner.scan(b"k\r\n"), 1);
        assert_eq!(scanner.matched(), 0);
    }

    #[test]
    fn one_byte_at_a_time() {
        let mut scanner = ConfirmScanner::default();
        let found: usize = b"ok\r\nok\r\n".iter().map(|b| scanner.scan(&[*b])).sum();
        assert_eq!(found, 2);
    }

    #[test]
    fn several_in_one_chunk_with_noise() {
        let mut scanner = ConfirmScanner::default();
        assert_eq!(scanner.scan(b"start\r\nok\r\necho: busy\r\nok\r\nok\r\n"), 3);
    }

    #[test]
    fn resynchronizes_on_first_byte() {
        let mut scanner = ConfirmScanner::default();
        assert_eq!(scanner.scan(b"ook\r\n"), 1);
        assert_eq!(scanner.scan(b"ok\rok\r\n"), 1);
    }

    #[test]
    fn near_misses_do_not_match() {
        let mut scanner = ConfirmScanner::default();
        assert_eq!(scanner.scan(b"ok\n"), 0);
        assert_eq!(scanner.scan(b"OK\r\n"), 0);
        assert_eq!(scanner.scan(b"o k\r\n"), 0);
    }

    #[test]
    fn self_overlapping_token() {
        let mut scanner = ConfirmScanner::new("aab");
        assert_eq!(scanner.scan(b"aa"), 0);
        assert_eq!(scanner.scan(b"aab"), 1);
    }

    #[test]
    fn empty_token_never_matches() {
        let mut scanner = ConfirmScanner::new(Vec::<u8>::new());
        assert_eq!(scanner.scan(b"ok\r\n"), 0);
    }
}
