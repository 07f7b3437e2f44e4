//! Best-effort model warmup. Failures are logged, never fatal.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Warm the OS page cache by sequentially reading the whole model file.
pub fn prefetch_model(path: &Path) -> io::Result<()> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn prefetch_reads_to_eof() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![7u8; 3 << 20]).unwrap();
        prefetch_model(f.path()).unwrap();
    }

    #[test]
    fn prefetch_missing_file_errors() {
        assert!(prefetch_model(Path::new("/no/such/model.gguf")).is_err());
    }
}
