use crate::error::Result;
use crate::table::Row;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy)]
struct PageSpan {
    offset: u64,
    len: usize,
}

/// Append-only page file backing the spilled prefix of a [`crate::SwapTable`].
///
/// Each page is stored as one JSON document. The file is an anonymous temp file, so it is
/// removed by the OS once the table (and therefore this handle) is dropped.
#[derive(Debug)]
pub(crate) struct SpillFile {
    file: File,
    pages: Vec<PageSpan>,
    end: u64,
}

impl SpillFile {
    pub(crate) fn create(dir: Option<&Path>) -> Result<Self> {
        let file = match dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        Ok(Self {
            file,
            pages: Vec::new(),
            end: 0,
        })
    }

    pub(crate) fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Append a page and return its index.
    pub(crate) fn write_page(&mut self, rows: &[Row]) -> Result<usize> {
        let bytes = serde_json::to_vec(rows)?;
        self.file.seek(SeekFrom::Start(self.end))?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;

        self.pages.push(PageSpan {
            offset: self.end,
            len: bytes.len(),
        });
        self.end += bytes.len() as u64;
        Ok(self.pages.len() - 1)
    }

    pub(crate) fn read_page(&mut self, page: usize) -> Result<Option<Vec<Row>>> {
        let Some(span) = self.pages.get(page).copied() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; span.len];
        self.file.seek(SeekFrom::Start(span.offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(Some(serde_json::from_slice(&buf)?))
    }
}
