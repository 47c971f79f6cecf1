//! Process memory snapshot for the status endpoint.
//!
//! The status contract carries a `mem` block; the numbers here are
//! sampled best-effort from `/proc/self/statm` at call time, with no
//! locking and no allocator instrumentation. Hosts without procfs report
//! zeros. `alloc`/`heapAlloc` map to resident bytes and `sys`/
//! `totalAlloc` to the virtual size; cumulative allocation is not
//! tracked.

use portway_proto::MemStats;

/// Assumed page size for converting statm's page counts.
const PAGE_SIZE: u64 = 4096;

/// Virtual and resident sizes in bytes, when the platform exposes them.
fn sample_statm() -> Option<(u64, u64)> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut fields = statm.split_whitespace();
    let size: u64 = fields.next()?.parse().ok()?;
    let resident: u64 = fields.next()?.parse().ok()?;
    Some((size * PAGE_SIZE, resident * PAGE_SIZE))
}

/// Current memory figures for `/api/status`.
pub fn snapshot() -> MemStats {
    let (size, resident) = sample_statm().unwrap_or((0, 0));
    MemStats {
        alloc: resident,
        total_alloc: size,
        sys: size,
        heap_alloc: resident,
    }
}
