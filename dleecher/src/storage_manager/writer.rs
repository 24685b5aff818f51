use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;

trait WriteWithOffset {
    fn write_all_at(&mut self, buf: &[u8], offset: u64) -> Result<(), io::Error>;
}

impl WriteWithOffset for File {
    fn write_all_at(&mut self, buf: &[u8], offset: u64) -> Result<(), io::Error> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(buf)
    }
}

#[derive(Debug)]
struct FileEntry {
    path: PathBuf,
    length: u64,
    /// Absolute offset of this file's first byte within the payload.
    offset: u64,
}

/// Writes verified pieces into the torrent's file layout.
///
/// Built from the ordered `(path, length)` file map; a `write` at an
/// absolute payload offset fans out over as many files as it spans.
#[derive(Debug)]
pub struct Writer {
    files: Vec<FileEntry>,
}

impl Writer {
    pub fn new(file_map: Vec<(PathBuf, u64)>) -> Self {
        let mut files = Vec::with_capacity(file_map.len());
        let mut offset = 0;
        for (path, length) in file_map {
            files.push(FileEntry {
                path,
                length,
                offset,
            });
            offset += length;
        }
        Self { files }
    }

    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|file| file.length).sum()
    }

    /// Creates every file of the map, parents included, pre-allocated to
    /// its final size.
    pub fn create_files(&self) -> Result<(), io::Error> {
        for entry in &self.files {
            if let Some(parent) = entry.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&entry.path)?;
            file.set_len(entry.length)?;
        }
        Ok(())
    }

    /// Writes `data` at the given absolute payload offset, splitting it
    /// across file boundaries as needed.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), io::Error> {
        let mut remaining = data;
        let mut offset = offset;

        for entry in &self.files {
            if remaining.is_empty() {
                break;
            }
            let end = entry.offset + entry.length;
            if offset >= end {
                continue;
            }

            let within = offset - entry.offset;
            let room = (entry.length - within) as usize;
            let take = room.min(remaining.len());

            let mut file = OpenOptions::new().write(true).open(&entry.path)?;
            file.write_all_at(&remaining[..take], within)?;

            remaining = &remaining[take..];
            offset += take as u64;
        }

        if !remaining.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past the end of the file map",
            ));
        }
        Ok(())
    }
}
