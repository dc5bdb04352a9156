//! Reassembles H.264 Annex B NAL units from arbitrarily fragmented packets.
//!
//! The vehicle splits its elementary stream into datagrams without regard to
//! unit boundaries, while the decoder wants whole units. Units are delimited by
//! `00 00 01` or `00 00 00 01` start codes; a unit is complete once the next
//! start code has been seen.

#[derive(Debug, Default)]
pub struct NalAssembler {
    pending: Vec<u8>,
    /// Offset in `pending` to resume scanning for the next start code.
    scan_from: usize,
}

/// Finds the first start code at or after `from`. Returns (offset, length).
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                if i > 0 && data[i - 1] == 0 {
                    return Some((i - 1, 4));
                }
                return Some((i, 3));
            }
            if data[i + 2] == 0 && i + 3 < data.len() && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

impl NalAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Returns the next complete unit, including its leading start code.
    /// Bytes before the first start code are discarded, so a corrupt stretch
    /// never accumulates.
    pub fn next_unit(&mut self) -> Option<Vec<u8>> {
        let Some((first, first_len)) = find_start_code(&self.pending, 0) else {
            // Nothing decodable yet. Keep only what could be the start of a
            // start code split across packets.
            let keep = self.pending.len().min(3);
            self.pending.drain(..self.pending.len() - keep);
            self.scan_from = 0;
            return None;
        };
        if first > 0 {
            self.pending.drain(..first);
            self.scan_from = 0;
        }

        let from = self.scan_from.max(first_len);
        match find_start_code(&self.pending, from) {
            Some((next, _)) => {
                let unit: Vec<u8> = self.pending.drain(..next).collect();
                self.scan_from = 0;
                Some(unit)
            }
            None => {
                // A start code may straddle the next push; rescan the tail.
                self.scan_from = self.pending.len().saturating_sub(3).max(first_len);
                None
            }
        }
    }

    /// Hands out whatever is left once the stream has ended.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        self.scan_from = 0;
        let (first, _) = find_start_code(&self.pending, 0)?;
        let unit: Vec<u8> = self.pending.drain(first..).collect();
        self.pending.clear();
        Some(unit)
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}
