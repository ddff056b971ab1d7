// Shared file helpers.
//
// Pipeline artifacts may arrive gzip-compressed (the sampler writes
// `.smc.gz` by default), so every reader in this crate opens its input
// through `open_maybe_gz`.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

const BUFFER_SIZE: usize = 1024 * 1024; // 1MB buffer

/// Open a text file for buffered line reading, transparently
/// decompressing when the path ends in `.gz`.
pub fn open_maybe_gz(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(BufReader::with_capacity(
            BUFFER_SIZE,
            GzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(BUFFER_SIZE, file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::path::PathBuf;

    fn test_dir() -> PathBuf {
        let dir = PathBuf::from("target/test_utils");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_open_plain() {
        let path = test_dir().join("plain.txt");
        std::fs::write(&path, "hello\nworld\n").unwrap();
        let reader = open_maybe_gz(&path).unwrap();
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["hello", "world"]);
    }

    #[test]
    fn test_open_gzip() {
        let path = test_dir().join("compressed.txt.gz");
        let file = File::create(&path).unwrap();
        let mut enc = GzEncoder::new(file, Compression::default());
        enc.write_all(b"hello\nworld\n").unwrap();
        enc.finish().unwrap();

        let reader = open_maybe_gz(&path).unwrap();
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["hello", "world"]);
    }
}
