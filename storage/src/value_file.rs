// Append-only value files (§4.2, §4.6a). Each file holds many segments'
// sequence bytes end to end; a segment's content is recovered by seeking to
// the (offset, size) pairs recorded in its sequence rows. Grounded in
// submerge-coldb's FileReader/FileWriter split (open-for-write xor
// open-for-read, never both), adapted to append rather than rewrite.

use base::{adler32, Error, Md5Digest, RollingMd5};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Where value files live on disk: `repository_path/<hi>/<lo>/<value_file_id>`,
/// a two-level hash fanout so no single directory accumulates thousands of
/// entries as value_file_id climbs (§4.6a).
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, value_file_id: i64) -> PathBuf {
        let hi = (value_file_id >> 8) & 0xff;
        let lo = value_file_id & 0xff;
        self.root
            .join(format!("{:02x}", hi))
            .join(format!("{:02x}", lo))
            .join(value_file_id.to_string())
    }

    pub fn create_writer(&self, value_file_id: i64) -> Result<ValueFileWriter, Error> {
        let path = self.path_for(value_file_id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(ValueFileWriter {
            file: BufWriter::new(file),
            path,
            offset: 0,
            rolling: RollingMd5::new(),
        })
    }

    pub fn open_reader(&self, value_file_id: i64) -> Result<ValueFileReader, Error> {
        let path = self.path_for(value_file_id);
        let file = File::open(&path)?;
        Ok(ValueFileReader {
            file: BufReader::new(file),
            path,
        })
    }

    pub fn exists(&self, value_file_id: i64) -> bool {
        self.path_for(value_file_id).is_file()
    }

    pub fn remove(&self, value_file_id: i64) -> Result<(), Error> {
        let path = self.path_for(value_file_id);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// What a single append returns: where the bytes landed and their own
/// checksums, the exact fields a `sequence` row needs (§4.6a).
pub struct AppendResult {
    pub offset: i64,
    pub size: i64,
    pub hash: Md5Digest,
    pub adler32: u32,
}

/// One value file being written to by exactly one segment-writer at a time.
/// `offset`/`rolling` track the whole-file position and running hash so
/// sealing can finalize size/hash without a second read pass.
pub struct ValueFileWriter {
    file: BufWriter<File>,
    path: PathBuf,
    offset: i64,
    rolling: RollingMd5,
}

impl ValueFileWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current_size(&self) -> i64 {
        self.offset
    }

    /// Append one sequence's bytes, returning the (offset, size, hash,
    /// adler32) tuple to be stored as that sequence's row.
    pub fn append(&mut self, bytes: &[u8]) -> Result<AppendResult, Error> {
        let offset = self.offset;
        self.file.write_all(bytes)?;
        self.rolling.update(bytes);
        self.offset += bytes.len() as i64;
        Ok(AppendResult {
            offset,
            size: bytes.len() as i64,
            hash: Md5Digest::of(bytes),
            adler32: adler32(bytes),
        })
    }

    /// Flush, fsync and return the whole-file size and rolling hash, the
    /// values a caller stores on the `value_file` row when sealing it.
    pub fn seal(mut self) -> Result<(i64, Md5Digest), Error> {
        self.file.flush()?;
        let file = self.file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok((self.offset, self.rolling.digest()))
    }
}

/// A read-only handle on a sealed (or still-growing) value file.
pub struct ValueFileReader {
    file: BufReader<File>,
    path: PathBuf,
}

impl ValueFileReader {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_at(&mut self, offset: i64, size: i64) -> Result<Vec<u8>, Error> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        let mut buf = vec![0u8; size as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path());

        let mut writer = repo.create_writer(42).unwrap();
        let a = writer.append(b"hello ").unwrap();
        let b = writer.append(b"world").unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 6);
        assert_eq!(a.hash, Md5Digest::of(b"hello "));
        assert_eq!(b.adler32, adler32(b"world"));

        let (size, whole_hash) = writer.seal().unwrap();
        assert_eq!(size, 11);
        assert_eq!(whole_hash, Md5Digest::of(b"hello world"));

        let mut reader = repo.open_reader(42).unwrap();
        assert_eq!(reader.read_at(a.offset, a.size).unwrap(), b"hello ");
        assert_eq!(reader.read_at(b.offset, b.size).unwrap(), b"world");
    }

    #[test]
    fn path_layout_is_two_level_fanout() {
        let repo = Repository::new("/repo");
        let path = repo.path_for(0x0203);
        assert_eq!(path, Path::new("/repo/02/03/515"));
    }

    #[test]
    fn remove_is_idempotent_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path());
        assert!(!repo.exists(7));
        repo.remove(7).unwrap();
    }
}
