//! Content hashing.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use crate::error::{IndexError, Result};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Computes stable content identifiers for files.
pub trait ContentHasher: Send + Sync {
    fn hash_reader(&self, reader: &mut dyn io::Read) -> io::Result<String>;

    fn hash_file(&self, path: &Path) -> Result<String> {
        let file = File::open(path).map_err(|error| IndexError::io(path, error))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
        self.hash_reader(&mut reader)
            .map_err(|error| IndexError::io(path, error))
    }
}

/// BLAKE3 over the full file bytes, lower-case hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Hasher;

impl ContentHasher for Blake3Hasher {
    fn hash_reader(&self, reader: &mut dyn io::Read) -> io::Result<String> {
        let mut hasher = blake3::Hasher::new();
        io::copy(reader, &mut hasher)?;
        Ok(hasher.finalize().to_hex().to_string())
    }
}

/// Hashes a file with the default hasher.
pub fn hash_file(path: &Path) -> Result<String> {
    Blake3Hasher.hash_file(path)
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
