use crate::state::{ByteRange, Part};

/// 1 MiB.
pub const DEFAULT_PART_SIZE: u64 = 1024 * 1024;

/// Splits `[0, object_size)` into consecutive parts of `part_size` bytes, numbered from 1.
///
/// The last part may be shorter. A zero-byte object still gets one part with
/// the empty range `[0, 0)` so every transaction has something to commit.
/// `part_size` must be positive; `TransferConfig::validate` enforces that.
pub fn plan_parts(object_size: u64, part_size: u64) -> Vec<Part> {
    let part_size = part_size.max(1);

    if object_size == 0 {
        return vec![Part::new(1, ByteRange::new(0, 0))];
    }

    let count = object_size.div_ceil(part_size);
    (0..count)
        .map(|i| {
            let start = i * part_size;
            let end = (start + part_size).min(object_size);
            Part::new((i + 1) as u32, ByteRange::new(start, end))
        })
        .collect()
}
