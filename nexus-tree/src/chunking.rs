//! Chunk shape guess for extensible datasets created without usable chunk
//! dimensions. Sizes follow the usual container library banding: a target
//! between 8 KiB and 1 MiB that grows with the log of the data size.

pub const CHUNK_MIN: u64 = 8 * 1024;
pub const CHUNK_BASE: u64 = 16 * 1024;
pub const CHUNK_MAX: u64 = 1024 * 1024;
pub const DEFAULT_UNBOUNDED_ESTIMATE: u64 = 256;

pub fn estimate_chunking(shape: &[u64], max_shape: &[i64], element_size: u64) -> Vec<u64> {
    estimate_chunking_with(shape, max_shape, element_size, DEFAULT_UNBOUNDED_ESTIMATE)
}

pub fn estimate_chunking_with(
    shape: &[u64],
    max_shape: &[i64],
    element_size: u64,
    unbounded_estimate: u64,
) -> Vec<u64> {
    let rank = shape.len();
    let mut chunk = Vec::with_capacity(rank);
    let mut fixed = Vec::with_capacity(rank);

    for (i, extent) in shape.iter().enumerate() {
        let max = max_shape.get(i).copied().unwrap_or(*extent as i64);
        if max <= 0 {
            chunk.push(unbounded_estimate.max(1));
            fixed.push(false);
        } else if max == *extent as i64 {
            chunk.push((*extent).max(1));
            fixed.push(true);
        } else {
            chunk.push(max as u64);
            fixed.push(false);
        }
    }

    if fixed.iter().all(|f| *f) {
        return shape.to_vec();
    }

    let element_size = element_size.max(1);
    let target = target_chunk_bytes(chunk_bytes(&chunk, element_size));

    while chunk_bytes(&chunk, element_size) < target {
        for (extent, is_fixed) in chunk.iter_mut().zip(fixed.iter()) {
            if !is_fixed {
                *extent = extent.saturating_mul(2);
            }
        }
    }

    let mut next = 0usize;
    loop {
        let bytes = chunk_bytes(&chunk, element_size);
        let near_target = bytes <= target || (bytes as f64) < target as f64 * 1.5;
        if bytes <= CHUNK_MAX && near_target {
            break;
        }
        if chunk.iter().all(|c| *c <= 1) {
            break;
        }
        let i = next % rank;
        next += 1;
        if chunk[i] > 1 {
            chunk[i] = (chunk[i] + 1) / 2;
        }
    }

    for (i, extent) in chunk.iter_mut().enumerate() {
        if let Some(max) = max_shape.get(i) {
            if *max > 0 && (*max as u64) < *extent {
                *extent = *max as u64;
            }
        }
    }

    chunk
}

/// Non-empty, same rank as the data and no zero extent.
pub fn chunk_is_plausible(chunk: &[u64], shape: &[u64]) -> bool {
    !chunk.is_empty() && chunk.len() == shape.len() && chunk.iter().all(|c| *c > 0)
}

fn chunk_bytes(chunk: &[u64], element_size: u64) -> u64 {
    chunk
        .iter()
        .fold(element_size, |acc, extent| acc.saturating_mul(*extent))
}

fn target_chunk_bytes(raw_bytes: u64) -> u64 {
    let ratio = raw_bytes as f64 / CHUNK_MAX as f64;
    if ratio <= 0.0 {
        return CHUNK_MIN;
    }
    let target = CHUNK_BASE as f64 * 2f64.powf(ratio.log10());
    (target as u64).clamp(CHUNK_MIN, CHUNK_MAX)
}
