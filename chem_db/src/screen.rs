//! Transposed screening index.
//!
//! One bitmap per screening-fingerprint bit position, each bitmap covering the
//! record slots indexed at build time. Candidate generation for a query is the
//! AND of the bitmaps for the query's set bits, so a candidate slot is exactly a
//! slot whose stored screening fingerprint is a superset of the query's. Also
//! holds per-slot similarity popcounts for the metric bound. Built by `optimize`
//! and persisted with a write-temp-then-rename so a crash during save leaves
//! either the old index or the new one, never a torn file.

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};

use byteorder::{ByteOrder, BigEndian};

use crate::layout;
use crate::error::Error;
use crate::io::StoredEntry;
use crate::fingerprint::{Fingerprint, FingerprintConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenIndex {
    pub indexed_count: usize,
    pub screen_bits: usize,
    /// columns[bit] is a bitmap over slots 0..indexed_count.
    columns: Vec<Vec<u64>>,
    /// Set-bit count of each indexed slot's similarity fingerprint.
    pub sim_counts: Vec<u32>,
}

fn slot_words(indexed_count: usize) -> usize {
    return (indexed_count + 63) / 64;
}

impl ScreenIndex {

    pub fn build(entries: &[StoredEntry], config: &FingerprintConfig) -> ScreenIndex {

        let indexed_count = entries.len();
        let screen_bits = config.screen_bits();
        let words = slot_words(indexed_count);

        let mut columns = vec![vec![0u64; words]; screen_bits];
        let mut sim_counts = Vec::with_capacity(indexed_count);

        for (slot, entry) in entries.iter().enumerate() {
            for bit in entry.screen.set_bits() {
                columns[bit][slot / 64] |= 1u64 << (slot % 64);
            }
            sim_counts.push(entry.sim.popcount());
        }

        return ScreenIndex { indexed_count, screen_bits, columns, sim_counts };
    }

    /// Slots whose stored screening fingerprint covers every set bit of the query,
    /// ascending. A query with no set bits cannot rule anything out, so every
    /// indexed slot comes back.
    pub fn candidates(&self, query: &Fingerprint) -> Vec<usize> {

        if self.indexed_count == 0 {
            return Vec::new();
        }

        let words = slot_words(self.indexed_count);
        let mut accumulator = vec![u64::MAX; words];

        //mask the tail beyond indexed_count
        let tail_bits = self.indexed_count % 64;
        if tail_bits != 0 {
            accumulator[words - 1] = (1u64 << tail_bits) - 1;
        }

        for bit in query.set_bits() {
            if bit >= self.screen_bits {
                return Vec::new();
            }
            for (acc, column_word) in accumulator.iter_mut().zip(self.columns[bit].iter()) {
                *acc &= column_word;
            }
        }

        let mut slots = Vec::new();
        for (word_index, word) in accumulator.iter().enumerate() {
            let mut word = *word;
            while word != 0 {
                let bit = word.trailing_zeros() as usize;
                slots.push(word_index * 64 + bit);
                word &= word - 1;
            }
        }

        return slots;
    }

    pub fn to_file(&self, path: &str) -> Result<(), Error> {

        let temp_path = format!("{}.tmp", path);
        let _ = fs::remove_file(&temp_path);

        let mut file = OpenOptions::new().write(true).create_new(true).open(&temp_path)?;

        let words = slot_words(self.indexed_count);

        let mut data: Vec<u8> = Vec::with_capacity(
            layout::FILE_DATA_START + 8 + self.sim_counts.len() * 4 + self.screen_bits * words * 8
        );

        data.extend_from_slice(&layout::SCREEN_MAGIC);

        let mut buf4 = [0u8; 4];
        BigEndian::write_u32(&mut buf4, layout::FORMAT_VERSION);
        data.extend_from_slice(&buf4);

        let mut buf8 = [0u8; 8];
        BigEndian::write_u64(&mut buf8, self.indexed_count as u64);
        data.extend_from_slice(&buf8);
        BigEndian::write_u64(&mut buf8, self.screen_bits as u64);
        data.extend_from_slice(&buf8);

        for count in self.sim_counts.iter() {
            BigEndian::write_u32(&mut buf4, *count);
            data.extend_from_slice(&buf4);
        }

        for column in self.columns.iter() {
            for word in column.iter() {
                BigEndian::write_u64(&mut buf8, *word);
                data.extend_from_slice(&buf8);
            }
        }

        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, path)?;

        return Ok(());
    }

    pub fn from_file(path: &str, config: &FingerprintConfig) -> Result<ScreenIndex, Error> {

        let mut file = OpenOptions::new().read(true).open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let header_len = layout::MAGIC_SIZE + layout::VERSION_SIZE + 16;
        if data.len() < header_len {
            return Err(Error::CorruptStore("screen index too short for header".to_string()));
        }

        if data[..layout::MAGIC_SIZE] != layout::SCREEN_MAGIC {
            return Err(Error::CorruptStore("bad screen index magic".to_string()));
        }

        let version = BigEndian::read_u32(&data[layout::MAGIC_SIZE..layout::MAGIC_SIZE + 4]);
        if version != layout::FORMAT_VERSION {
            return Err(Error::CorruptStore(format!("screen index format version {} (expected {})", version, layout::FORMAT_VERSION)));
        }

        let indexed_count = BigEndian::read_u64(&data[8..16]) as usize;
        let screen_bits = BigEndian::read_u64(&data[16..24]) as usize;

        if screen_bits != config.screen_bits() {
            return Err(Error::CorruptStore(format!("screen index built for {} bits (configured {})", screen_bits, config.screen_bits())));
        }

        let words = slot_words(indexed_count);
        let expected_len = header_len + indexed_count * 4 + screen_bits * words * 8;
        if data.len() != expected_len {
            return Err(Error::CorruptStore("screen index truncated".to_string()));
        }

        let mut pos = header_len;

        let mut sim_counts = Vec::with_capacity(indexed_count);
        for _ in 0..indexed_count {
            sim_counts.push(BigEndian::read_u32(&data[pos..pos + 4]));
            pos += 4;
        }

        let mut columns = Vec::with_capacity(screen_bits);
        for _ in 0..screen_bits {
            let mut column = Vec::with_capacity(words);
            for _ in 0..words {
                column.push(BigEndian::read_u64(&data[pos..pos + 8]));
                pos += 8;
            }
            columns.push(column);
        }

        return Ok(ScreenIndex { indexed_count, screen_bits, columns, sim_counts });
    }
}
