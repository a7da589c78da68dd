use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

/// Write `path` through a temporary file in the same directory.
///
/// The destination is replaced only after `write` succeeded and the data
/// reached disk; on any error the previous file, if any, is left untouched.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    {
        let mut out = BufWriter::new(tmp.as_file());
        write(&mut out)?;
        out.flush()
            .with_context(|| format!("failed to flush {}", path.display()))?;
    }
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[test]
    fn failed_write_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");
        fs::write(&path, "previous").unwrap();

        let err = write_atomic(&path, |out| {
            out.write_all(b"half a ta")?;
            bail!("disk full")
        })
        .unwrap_err();

        assert!(err.to_string().contains("disk full"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "previous");
        // No temporary file is left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("out.txt");

        write_atomic(&path, |out| Ok(out.write_all(b"ok")?)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "ok");
    }
}
