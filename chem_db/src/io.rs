//! Append-only record file.
//!
//! Layout: magic, format version, a committed-entry count that is rewritten after
//! every append, then entries back to back. Each entry is
//! `[id u64][payload_len u32][payload][sim fp][screen fp]` with the fingerprint
//! widths coming from the database configuration. The file is opened per call;
//! the in-memory entry table holds ids, offsets and fingerprints but payloads stay
//! on disk until asked for.

use std::fs::OpenOptions;
use std::io::{Read, Write, Seek, SeekFrom};

use byteorder::{ByteOrder, BigEndian};

use crate::layout;
use crate::error::Error;
use crate::fingerprint::{Fingerprint, FingerprintSet, FingerprintConfig};

#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub id: u64,
    pub payload_offset: u64,
    pub payload_len: u32,
    pub sim: Fingerprint,
    pub screen: Fingerprint,
}

#[derive(Debug)]
pub struct RecordFile {
    pub path: String,
    pub config: FingerprintConfig,
    pub entries: Vec<StoredEntry>,
    write_offset: u64,
}

impl RecordFile {

    pub fn create(path: String, config: &FingerprintConfig) -> Result<RecordFile, Error> {

        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;

        let mut header = [0u8; layout::FILE_DATA_START];
        header[layout::MAGIC_START..layout::MAGIC_START + layout::MAGIC_SIZE].copy_from_slice(&layout::RECORD_MAGIC);
        BigEndian::write_u32(&mut header[layout::VERSION_START..layout::VERSION_START + layout::VERSION_SIZE], layout::FORMAT_VERSION);
        BigEndian::write_u64(&mut header[layout::COUNT_CURSOR_START..layout::COUNT_CURSOR_START + layout::COUNT_CURSOR_SIZE], 0);

        file.write_all(&header)?;

        return Ok(RecordFile {
            path,
            config: config.clone(),
            entries: Vec::new(),
            write_offset: layout::FILE_DATA_START as u64,
        });
    }

    /// Opens an existing record file and scans the committed entries into memory.
    /// Any short read or framing violation within the committed region is a
    /// `CorruptStore`.
    pub fn open(path: String, config: &FingerprintConfig) -> Result<RecordFile, Error> {

        let mut file = OpenOptions::new().read(true).open(&path)
            .map_err(|_| Error::CorruptStore(format!("missing record file: {}", path)))?;

        let mut header = [0u8; layout::FILE_DATA_START];
        file.read_exact(&mut header)
            .map_err(|_| Error::CorruptStore("record file too short for header".to_string()))?;

        if header[layout::MAGIC_START..layout::MAGIC_START + layout::MAGIC_SIZE] != layout::RECORD_MAGIC {
            return Err(Error::CorruptStore("bad record file magic".to_string()));
        }

        let version = BigEndian::read_u32(&header[layout::VERSION_START..layout::VERSION_START + layout::VERSION_SIZE]);
        if version != layout::FORMAT_VERSION {
            return Err(Error::CorruptStore(format!("record file format version {} (expected {})", version, layout::FORMAT_VERSION)));
        }

        let count = BigEndian::read_u64(&header[layout::COUNT_CURSOR_START..layout::COUNT_CURSOR_START + layout::COUNT_CURSOR_SIZE]);

        let sim_bytes = config.sim_words * 8;
        let screen_bytes = config.screen_words() * 8;

        let mut entries: Vec<StoredEntry> = Vec::with_capacity(count as usize);
        let mut offset = layout::FILE_DATA_START as u64;

        for _ in 0..count {

            let mut entry_header = [0u8; layout::ENTRY_HEADER_SIZE];
            file.read_exact(&mut entry_header)
                .map_err(|_| Error::CorruptStore("record file truncated".to_string()))?;

            let id = BigEndian::read_u64(&entry_header[0..layout::ENTRY_ID_SIZE]);
            let payload_len = BigEndian::read_u32(&entry_header[layout::ENTRY_ID_SIZE..layout::ENTRY_HEADER_SIZE]);

            let payload_offset = offset + layout::ENTRY_HEADER_SIZE as u64;

            file.seek(SeekFrom::Current(payload_len as i64))?;

            let mut fp_data = vec![0u8; sim_bytes + screen_bytes];
            file.read_exact(&mut fp_data)
                .map_err(|_| Error::CorruptStore("record file truncated".to_string()))?;

            let sim = Fingerprint::from_bytes(&fp_data[..sim_bytes], config.sim_words)?;
            let screen = Fingerprint::from_bytes(&fp_data[sim_bytes..], config.screen_words())?;

            entries.push(StoredEntry { id, payload_offset, payload_len, sim, screen });

            offset = payload_offset + payload_len as u64 + (sim_bytes + screen_bytes) as u64;
        }

        return Ok(RecordFile {
            path,
            config: config.clone(),
            entries,
            write_offset: offset,
        });
    }

    /// Appends one entry and commits it by bumping the count cursor. Returns the
    /// new entry's slot.
    pub fn append(&mut self, id: u64, payload: &[u8], fingerprints: &FingerprintSet) -> Result<usize, Error> {

        let mut file = OpenOptions::new().write(true).open(&self.path)?;

        let mut entry_header = [0u8; layout::ENTRY_HEADER_SIZE];
        BigEndian::write_u64(&mut entry_header[0..layout::ENTRY_ID_SIZE], id);
        BigEndian::write_u32(&mut entry_header[layout::ENTRY_ID_SIZE..layout::ENTRY_HEADER_SIZE], payload.len() as u32);

        file.seek(SeekFrom::Start(self.write_offset))?;
        file.write_all(&entry_header)?;
        file.write_all(payload)?;

        let sim_data = fingerprints.sim.to_bytes();
        let screen_data = fingerprints.screen.to_bytes();
        file.write_all(&sim_data)?;
        file.write_all(&screen_data)?;

        //entry is only visible once the count cursor includes it
        let mut count_data = [0u8; layout::COUNT_CURSOR_SIZE];
        BigEndian::write_u64(&mut count_data, self.entries.len() as u64 + 1);
        file.seek(SeekFrom::Start(layout::COUNT_CURSOR_START as u64))?;
        file.write_all(&count_data)?;

        let payload_offset = self.write_offset + layout::ENTRY_HEADER_SIZE as u64;

        self.entries.push(StoredEntry {
            id,
            payload_offset,
            payload_len: payload.len() as u32,
            sim: fingerprints.sim.clone(),
            screen: fingerprints.screen.clone(),
        });

        self.write_offset = payload_offset + payload.len() as u64 + (sim_data.len() + screen_data.len()) as u64;

        return Ok(self.entries.len() - 1);
    }

    pub fn read_payload(&self, slot: usize) -> Result<Vec<u8>, Error> {

        let entry = &self.entries[slot];

        let mut file = OpenOptions::new().read(true).open(&self.path)?;
        file.seek(SeekFrom::Start(entry.payload_offset))?;

        let mut payload = vec![0u8; entry.payload_len as usize];
        file.read_exact(&mut payload)
            .map_err(|_| Error::CorruptStore("record payload truncated".to_string()))?;

        return Ok(payload);
    }

    pub fn len(&self) -> usize {
        return self.entries.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }
}
