use bytes::{BufMut, Bytes, BytesMut};

use super::format_score;
use crate::scan::RangeSink;
use crate::types::ZMember;

/// RESP array whose length is only known once every element has been pushed.
///
/// Elements are encoded into a body buffer as they arrive; `finish` prepends
/// the array header with the final slot count.
pub struct PostponedArray {
    body: BytesMut,
    slots: usize,
    with_scores: bool,
}

impl PostponedArray {
    pub fn new(with_scores: bool) -> Self {
        Self {
            body: BytesMut::with_capacity(256),
            slots: 0,
            with_scores,
        }
    }

    /// Reply slots written so far
    pub fn len(&self) -> usize {
        self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots == 0
    }

    fn put_bulk(&mut self, data: &[u8]) {
        self.body.put_slice(format!("${}\r\n", data.len()).as_bytes());
        self.body.put_slice(data);
        self.body.put_slice(b"\r\n");
        self.slots += 1;
    }

    /// Fix the array length and return the complete reply
    pub fn finish(self) -> Bytes {
        let header = format!("*{}\r\n", self.slots);
        let mut out = BytesMut::with_capacity(header.len() + self.body.len());
        out.put_slice(header.as_bytes());
        out.put_slice(&self.body);
        out.freeze()
    }
}

impl RangeSink for PostponedArray {
    fn push(&mut self, entry: ZMember) {
        self.put_bulk(&entry.member);
        if self.with_scores {
            self.put_bulk(format_score(entry.score).as_bytes());
        }
    }
}
