//! Sample content for an empty served directory.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::protocol::CHUNK_SIZE;

/// Size of the generated binary sample: two full chunks plus a tail
pub const LARGE_SAMPLE_SIZE: usize = 2 * CHUNK_SIZE + 50_000;

/// Create `root` if needed and, only if it holds no entries, write the
/// sample files. Returns the files written.
pub fn seed_samples(root: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("Failed to create root directory: {}", root.display()))?;
    let is_empty = std::fs::read_dir(root)
        .with_context(|| format!("Failed to read root directory: {}", root.display()))?
        .next()
        .is_none();
    if !is_empty {
        return Ok(Vec::new());
    }

    let mut written = Vec::new();

    let p = root.join("sample1.txt");
    std::fs::write(&p, "This is a sample file.")?;
    written.push(p);

    let p = root.join("sample_large_file.bin");
    let mut f = std::io::BufWriter::new(std::fs::File::create(&p)?);
    f.write_all(&pattern_bytes(LARGE_SAMPLE_SIZE, 0x9e37_79b9))?;
    f.flush()?;
    written.push(p);

    let p = root.join("image.jpg");
    std::fs::write(&p, "This is a placeholder for an image.")?;
    written.push(p);

    Ok(written)
}

/// Deterministic pseudo-random bytes (xorshift32)
fn pattern_bytes(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.max(1);
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let take = (len - out.len()).min(4);
        out.extend_from_slice(&state.to_le_bytes()[..take]);
    }
    out
}
