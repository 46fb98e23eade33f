use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Schema version written into every checkpoint record.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Identity snapshot of the remote object taken at initiation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ObjectMeta {
    pub etag: String,
    pub size: u64,
}

/// Half-open byte range `[start, end)`. Serialized as `[start, end]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(from = "[u64; 2]", into = "[u64; 2]")]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<[u64; 2]> for ByteRange {
    fn from([start, end]: [u64; 2]) -> Self {
        Self { start, end }
    }
}

impl From<ByteRange> for [u64; 2] {
    fn from(range: ByteRange) -> Self {
        [range.start, range.end]
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Part {
    pub number: u32,
    pub range: ByteRange,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Part {
    pub fn new(number: u32, range: ByteRange) -> Self {
        Self {
            number,
            range,
            done: false,
            checksum: None,
        }
    }
}

/// Lifecycle position of a download transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fresh,
    Initiated,
    Planned,
    InProgress,
    AllDone,
    Committed,
}

/// Everything a checkpoint remembers about one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionState {
    pub id: String,
    pub destination: PathBuf,
    pub object_meta: ObjectMeta,
    pub parts: Vec<Part>,
}

impl TransactionState {
    pub fn new(id: impl Into<String>, destination: impl Into<PathBuf>, object_meta: ObjectMeta) -> Self {
        Self {
            id: id.into(),
            destination: destination.into(),
            object_meta,
            parts: Vec::new(),
        }
    }

    pub fn is_planned(&self) -> bool {
        !self.parts.is_empty()
    }

    pub fn all_done(&self) -> bool {
        self.is_planned() && self.parts.iter().all(|p| p.done)
    }

    /// Parts still to download, in ascending number order.
    pub fn undone_parts(&self) -> Vec<Part> {
        let mut parts: Vec<Part> = self.parts.iter().filter(|p| !p.done).cloned().collect();
        parts.sort_by_key(|p| p.number);
        parts
    }

    pub fn parts_done(&self) -> usize {
        self.parts.iter().filter(|p| p.done).count()
    }

    pub fn bytes_done(&self) -> u64 {
        self.parts.iter().filter(|p| p.done).map(|p| p.range.len()).sum()
    }

    /// Marks `number` done with its content checksum. Returns false if no such part exists.
    pub fn mark_done(&mut self, number: u32, checksum: String) -> bool {
        match self.parts.iter_mut().find(|p| p.number == number) {
            Some(part) => {
                part.done = true;
                part.checksum = Some(checksum);
                true
            }
            None => false,
        }
    }

    pub fn phase(&self) -> Phase {
        if !self.is_planned() {
            Phase::Initiated
        } else if self.all_done() {
            Phase::AllDone
        } else if self.parts_done() == 0 {
            Phase::Planned
        } else {
            Phase::InProgress
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ObjectMeta {
        ObjectMeta {
            etag: "\"e1\"".to_string(),
            size: 30,
        }
    }

    fn state_with_parts() -> TransactionState {
        let mut state = TransactionState::new("tx", "/tmp/out.bin", meta());
        state.parts = vec![
            Part::new(1, ByteRange::new(0, 10)),
            Part::new(2, ByteRange::new(10, 20)),
            Part::new(3, ByteRange::new(20, 30)),
        ];
        state
    }

    #[test]
    fn test_byte_range_serializes_as_pair() {
        let part = Part::new(2, ByteRange::new(10, 20));
        let json = serde_json::to_string(&part).unwrap();
        assert_eq!(json, r#"{"number":2,"range":[10,20],"done":false}"#);

        let back: Part = serde_json::from_str(&json).unwrap();
        assert_eq!(back, part);
    }

    #[test]
    fn test_empty_range() {
        let range = ByteRange::new(0, 0);
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);
    }

    #[test]
    fn test_phase_progression() {
        let mut state = TransactionState::new("tx", "/tmp/out.bin", meta());
        assert_eq!(state.phase(), Phase::Initiated);

        state = state_with_parts();
        assert_eq!(state.phase(), Phase::Planned);

        assert!(state.mark_done(2, "c2".to_string()));
        assert_eq!(state.phase(), Phase::InProgress);
        assert_eq!(state.bytes_done(), 10);

        state.mark_done(1, "c1".to_string());
        state.mark_done(3, "c3".to_string());
        assert_eq!(state.phase(), Phase::AllDone);
    }

    #[test]
    fn test_undone_parts_sorted() {
        let mut state = state_with_parts();
        state.parts.reverse();
        state.mark_done(2, "c2".to_string());

        let numbers: Vec<u32> = state.undone_parts().iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn test_mark_done_unknown_part() {
        let mut state = state_with_parts();
        assert!(!state.mark_done(9, "c".to_string()));
        assert_eq!(state.parts_done(), 0);
    }
}
