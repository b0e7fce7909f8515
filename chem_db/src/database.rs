//! Database lifecycle and the public search API.
//!
//! A database is a directory: `header.yaml` (kind, fingerprint widths, format
//! version, id high-water mark), `records` (append-only record file), `screen`
//! (optional screening index, rebuilt by `optimize`) and `lock` (single-writer
//! guard). A read-only handle captures the committed record count at open and
//! never sees later appends.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Serialize, Deserialize};

use crate::layout;
use crate::error::Error;
use crate::fingerprint::{self, Fingerprint, FingerprintConfig, FingerprintSet};
use crate::graph::StructureGraph;
use crate::io::{RecordFile, StoredEntry};
use crate::screen::ScreenIndex;
use crate::matcher::{SubMatcher, SimMatcher, IdMatcher, SearchOptions};
use crate::metric::Metric;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum RecordKind {
    Molecule,
    Reaction,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpenMode {
    ReadWrite,
    ReadOnly,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatabaseConfig {
    pub directory: String,
    pub kind: RecordKind,
    pub fingerprint: FingerprintConfig,
}

impl DatabaseConfig {

    pub fn default() -> DatabaseConfig {
        return DatabaseConfig {
            directory: "/tmp/chem_db".to_string(),
            kind: RecordKind::Molecule,
            fingerprint: FingerprintConfig::default(),
        };
    }

    pub fn from_file(filename: &str) -> Result<DatabaseConfig, Error> {
        let serialized = fs::read_to_string(filename)?;
        return Ok(serde_yaml::from_str(&serialized)?);
    }

    pub fn to_file(&self, filename: &str) -> Result<(), Error> {
        let serialized = serde_yaml::to_string(self).unwrap();
        fs::write(filename, serialized)?;
        return Ok(());
    }

    pub fn get_header_filename(&self) -> String {
        return self.directory.clone() + "/header.yaml";
    }

    pub fn get_record_filename(&self) -> String {
        return self.directory.clone() + "/records";
    }

    pub fn get_screen_filename(&self) -> String {
        return self.directory.clone() + "/screen";
    }

    pub fn get_lock_filename(&self) -> String {
        return self.directory.clone() + "/lock";
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct DbHeader {
    format_version: u32,
    kind: RecordKind,
    fingerprint: FingerprintConfig,
    next_id: u64,
    num_records: u64,
}

fn write_header(config: &DatabaseConfig, next_id: u64, num_records: u64) -> Result<(), Error> {

    let header = DbHeader {
        format_version: layout::FORMAT_VERSION,
        kind: config.kind,
        fingerprint: config.fingerprint.clone(),
        next_id,
        num_records,
    };

    let serialized = serde_yaml::to_string(&header).unwrap();
    fs::write(config.get_header_filename(), serialized)?;

    return Ok(());
}

fn acquire_lock(filename: &str) -> Result<(), Error> {

    let result = fs::OpenOptions::new().write(true).create_new(true).open(filename);

    match result {
        Ok(_) => Ok(()),
        Err(_) => Err(Error::StateError("database is locked by another writer")),
    }
}

pub struct Database {
    pub config: DatabaseConfig,
    mode: OpenMode,
    records: RecordFile,
    index: Option<ScreenIndex>,
    id_to_slot: HashMap<u64, usize>,
    next_id: u64,
    snapshot_count: usize,
    closed: bool,
    has_lock: bool,
}

impl Database {

    /// Creates a new empty database. The directory must not exist yet.
    pub fn create(config: DatabaseConfig) -> Result<Database, Error> {

        if Path::new(&config.directory).exists() {
            return Err(Error::StateError("database directory already exists"));
        }

        fs::create_dir_all(&config.directory)?;
        acquire_lock(&config.get_lock_filename())?;

        let records = RecordFile::create(config.get_record_filename(), &config.fingerprint)?;
        write_header(&config, 0, 0)?;

        return Ok(Database {
            config,
            mode: OpenMode::ReadWrite,
            records,
            index: None,
            id_to_slot: HashMap::new(),
            next_id: 0,
            snapshot_count: 0,
            closed: false,
            has_lock: true,
        });
    }

    /// Wipes any existing database at the configured directory first. Test helper.
    pub fn force_create(config: DatabaseConfig) -> Result<Database, Error> {
        let _ = fs::remove_dir_all(&config.directory);
        return Database::create(config);
    }

    pub fn open(directory: &str, mode: OpenMode) -> Result<Database, Error> {

        let header_filename = directory.to_string() + "/header.yaml";
        let serialized = fs::read_to_string(&header_filename)
            .map_err(|_| Error::CorruptStore(format!("missing database header: {}", header_filename)))?;

        let header: DbHeader = serde_yaml::from_str(&serialized)?;

        if header.format_version != layout::FORMAT_VERSION {
            return Err(Error::CorruptStore(format!("database format version {} (expected {})", header.format_version, layout::FORMAT_VERSION)));
        }

        let config = DatabaseConfig {
            directory: directory.to_string(),
            kind: header.kind,
            fingerprint: header.fingerprint.clone(),
        };

        if mode == OpenMode::ReadWrite {
            acquire_lock(&config.get_lock_filename())?;
        }

        let opened = Database::open_scanned(config.clone(), mode, header);

        if opened.is_err() && mode == OpenMode::ReadWrite {
            let _ = fs::remove_file(config.get_lock_filename());
        }

        return opened;
    }

    fn open_scanned(config: DatabaseConfig, mode: OpenMode, header: DbHeader) -> Result<Database, Error> {

        let records = RecordFile::open(config.get_record_filename(), &config.fingerprint)?;

        let mut id_to_slot = HashMap::with_capacity(records.len());
        let mut max_id: Option<u64> = None;

        for (slot, entry) in records.entries.iter().enumerate() {
            if id_to_slot.insert(entry.id, slot).is_some() {
                return Err(Error::CorruptStore(format!("duplicate record id {} in store", entry.id)));
            }
            if max_id.map_or(true, |m| entry.id > m) {
                max_id = Some(entry.id);
            }
        }

        let next_id = std::cmp::max(header.next_id, max_id.map_or(0, |m| m + 1));

        let screen_filename = config.get_screen_filename();
        let index = match Path::new(&screen_filename).exists() {
            true => Some(ScreenIndex::from_file(&screen_filename, &config.fingerprint)?),
            false => None,
        };

        let snapshot_count = records.len();

        return Ok(Database {
            config,
            mode,
            records,
            index,
            id_to_slot,
            next_id,
            snapshot_count,
            closed: false,
            has_lock: mode == OpenMode::ReadWrite,
        });
    }

    /// Opens and verifies the header against an expected kind and fingerprint
    /// configuration.
    pub fn open_checked(directory: &str, mode: OpenMode, kind: RecordKind, expected: &FingerprintConfig) -> Result<Database, Error> {

        let mut db = Database::open(directory, mode)?;

        if db.config.kind != kind || db.config.fingerprint != *expected {
            let _ = db.close();
            return Err(Error::ConfigurationMismatch("database header does not match the expected configuration".to_string()));
        }

        return Ok(db);
    }

    fn check_open(&self) -> Result<(), Error> {
        match self.closed {
            true => Err(Error::StateError("database handle is closed")),
            false => Ok(()),
        }
    }

    fn check_writable(&self) -> Result<(), Error> {
        self.check_open()?;
        match self.mode {
            OpenMode::ReadOnly => Err(Error::StateError("read-only handle cannot modify the database")),
            OpenMode::ReadWrite => Ok(()),
        }
    }

    /// Inserts a record, returning its id. With no explicit id the next auto id
    /// (max of all ids ever seen, plus one) is assigned.
    pub fn insert(&mut self, graph: &StructureGraph, explicit_id: Option<u64>) -> Result<u64, Error> {
        self.check_writable()?;
        let fingerprints = fingerprint::encode(graph, &self.config.fingerprint);
        return self.insert_entry(graph, fingerprints, explicit_id);
    }

    /// Like `insert`, but the similarity fingerprint is supplied externally as
    /// big-endian bytes of exactly the configured width.
    pub fn insert_with_ext_fp(&mut self, graph: &StructureGraph, ext_sim: &[u8], explicit_id: Option<u64>) -> Result<u64, Error> {

        self.check_writable()?;

        let expected_bytes = self.config.fingerprint.sim_words * 8;
        if ext_sim.len() != expected_bytes {
            return Err(Error::ConfigurationMismatch(format!("external fingerprint is {} bytes (configured width is {})", ext_sim.len(), expected_bytes)));
        }

        let mut fingerprints = fingerprint::encode(graph, &self.config.fingerprint);
        fingerprints.sim = Fingerprint::from_bytes(ext_sim, self.config.fingerprint.sim_words)?;

        return self.insert_entry(graph, fingerprints, explicit_id);
    }

    fn insert_entry(&mut self, graph: &StructureGraph, fingerprints: FingerprintSet, explicit_id: Option<u64>) -> Result<u64, Error> {

        self.check_writable()?;

        if self.config.kind == RecordKind::Molecule && graph.component_count() > 1 {
            return Err(Error::StateError("molecule database cannot store multi-component records"));
        }

        let id = explicit_id.unwrap_or(self.next_id);

        if self.id_to_slot.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }

        let slot = self.records.append(id, &graph.serialize(), &fingerprints)?;

        self.id_to_slot.insert(id, slot);
        self.snapshot_count = self.records.len();

        if id + 1 > self.next_id {
            self.next_id = id + 1;
        }

        return Ok(id);
    }

    pub fn get_by_id(&self, id: u64) -> Result<StructureGraph, Error> {

        self.check_open()?;

        let slot = *self.id_to_slot.get(&id).ok_or(Error::NotFound(id))?;

        return self.load_graph(slot);
    }

    /// Rebuilds the screening index over everything inserted so far and swaps it
    /// in atomically. Searches work without it; optimize only makes them faster.
    pub fn optimize(&mut self) -> Result<(), Error> {

        self.check_writable()?;

        let index = ScreenIndex::build(&self.records.entries, &self.config.fingerprint);
        index.to_file(&self.config.get_screen_filename())?;
        self.index = Some(index);

        return Ok(());
    }

    pub fn search_substructure(&self, query: &StructureGraph, options: &SearchOptions) -> Result<SubMatcher, Error> {
        self.check_open()?;
        return SubMatcher::new(self, query, options);
    }

    /// Finds records that are the same structure as the query under the match
    /// flags, not merely containing it.
    pub fn search_exact(&self, query: &StructureGraph, options: &SearchOptions) -> Result<SubMatcher, Error> {
        self.check_open()?;
        return SubMatcher::new_exact(self, query, options);
    }

    pub fn search_similar(&self, query: &StructureGraph, min: f32, max: f32, metric: Metric, timeout: Option<Duration>) -> Result<SimMatcher, Error> {
        self.check_open()?;
        let sim = fingerprint::encode(query, &self.config.fingerprint).sim;
        return SimMatcher::new(self, sim, min, max, metric, timeout);
    }

    /// Similarity search with results ordered by score descending (ties broken by
    /// ascending id), optionally truncated to the best `limit`.
    pub fn search_similar_ranked(&self, query: &StructureGraph, min: f32, max: f32, metric: Metric, limit: Option<usize>, timeout: Option<Duration>) -> Result<SimMatcher, Error> {
        self.check_open()?;
        let sim = fingerprint::encode(query, &self.config.fingerprint).sim;
        return SimMatcher::new_ranked(self, sim, min, max, metric, limit, timeout);
    }

    /// Similarity search against an externally computed similarity fingerprint.
    pub fn search_similar_with_ext_fp(&self, ext_sim: &[u8], min: f32, max: f32, metric: Metric, timeout: Option<Duration>) -> Result<SimMatcher, Error> {

        self.check_open()?;

        let expected_bytes = self.config.fingerprint.sim_words * 8;
        if ext_sim.len() != expected_bytes {
            return Err(Error::ConfigurationMismatch(format!("external fingerprint is {} bytes (configured width is {})", ext_sim.len(), expected_bytes)));
        }

        let sim = Fingerprint::from_bytes(ext_sim, self.config.fingerprint.sim_words)?;

        return SimMatcher::new(self, sim, min, max, metric, timeout);
    }

    pub fn enumerate_ids(&self) -> Result<IdMatcher, Error> {

        self.check_open()?;

        let ids = self.records.entries[..self.snapshot_count].iter().map(|e| e.id).collect();

        return Ok(IdMatcher::new(ids));
    }

    /// Flushes the header, releases the writer lock and invalidates the handle.
    pub fn close(&mut self) -> Result<(), Error> {

        self.check_open()?;

        if self.mode == OpenMode::ReadWrite {
            write_header(&self.config, self.next_id, self.records.len() as u64)?;
            let _ = fs::remove_file(self.config.get_lock_filename());
        }

        self.closed = true;

        return Ok(());
    }

    pub fn num_records(&self) -> usize {
        return self.snapshot_count;
    }

    pub fn snapshot_count(&self) -> usize {
        return self.snapshot_count;
    }

    pub fn fingerprint_config(&self) -> &FingerprintConfig {
        return &self.config.fingerprint;
    }

    pub(crate) fn entry(&self, slot: usize) -> &StoredEntry {
        return &self.records.entries[slot];
    }

    pub(crate) fn screen_index(&self) -> Option<&ScreenIndex> {
        return self.index.as_ref();
    }

    pub(crate) fn load_graph(&self, slot: usize) -> Result<StructureGraph, Error> {
        let payload = self.records.read_payload(slot)?;
        return StructureGraph::deserialize(&payload);
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.closed && self.has_lock {
            let _ = fs::remove_file(self.config.get_lock_filename());
        }
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::graph::MatchFlags;
    use crate::matcher::Cursor;
    use kdam::tqdm;

    fn test_config(name: &str) -> DatabaseConfig {
        let _ = fs::create_dir_all("/tmp/chem_db_test_db");
        return DatabaseConfig {
            directory: format!("/tmp/chem_db_test_db/{}", name),
            kind: RecordKind::Molecule,
            fingerprint: FingerprintConfig::default(),
        };
    }

    fn graph(line: &str) -> StructureGraph {
        return StructureGraph::from_line(line).unwrap();
    }

    fn sub_ids(db: &Database, query: &StructureGraph) -> Vec<u64> {
        let matcher = db.search_substructure(query, &SearchOptions::default()).unwrap();
        return matcher.collect_ids(None).unwrap().ids;
    }

    #[test]
    fn insert_and_get_roundtrip() {

        let mut db = Database::force_create(test_config("roundtrip")).unwrap();

        let ethanol = graph("C,C,O|0-1:1,1-2:1");

        let id_a = db.insert(&ethanol, None).unwrap();
        let id_b = db.insert(&graph("N"), None).unwrap();

        assert_eq!(id_a, 0);
        assert_eq!(id_b, 1);

        let restored = db.get_by_id(id_a).unwrap();
        assert!(restored.exact_match(&ethanol, &MatchFlags::default()));

        assert!(matches!(db.get_by_id(99), Err(Error::NotFound(99))));
    }

    #[test]
    fn explicit_ids_and_duplicates() {

        let mut db = Database::force_create(test_config("explicit_ids")).unwrap();

        assert_eq!(db.insert(&graph("C"), Some(10)).unwrap(), 10);

        //auto ids continue above the highest id ever seen
        assert_eq!(db.insert(&graph("N"), None).unwrap(), 11);
        assert_eq!(db.insert(&graph("O"), Some(3)).unwrap(), 3);
        assert_eq!(db.insert(&graph("S"), None).unwrap(), 12);

        assert!(matches!(db.insert(&graph("P"), Some(10)), Err(Error::DuplicateId(10))));
    }

    #[test]
    fn ring_query_finds_only_ring_records() {

        let mut db = Database::force_create(test_config("ring_query")).unwrap();

        let ring_bearing = graph("C,C,C,C|0-1:1,1-2:1,2-0:1,2-3:1");
        let chain = graph("C,C,C,C|0-1:1,1-2:1,2-3:1");

        db.insert(&ring_bearing, None).unwrap();
        db.insert(&ring_bearing, None).unwrap();
        db.insert(&chain, None).unwrap();

        db.optimize().unwrap();

        let ring = graph("C,C,C|0-1:1,1-2:1,2-0:1");

        //the chain passes screening but fails verification
        assert_eq!(sub_ids(&db, &ring), vec![0, 1]);
    }

    #[test]
    fn substructure_mapping_is_valid() {

        let mut db = Database::force_create(test_config("mapping")).unwrap();

        let acetic = graph("C,C,O,O|0-1:1,1-2:2,1-3:1");
        db.insert(&acetic, None).unwrap();

        let carbonyl = graph("C,O|0-1:2");

        let mut matcher = db.search_substructure(&carbonyl, &SearchOptions::default()).unwrap();
        assert!(matcher.next().unwrap());

        let mapping = matcher.current_mapping().unwrap().to_vec();
        assert_eq!(mapping.len(), 2);

        let stored = db.get_by_id(matcher.current_id().unwrap()).unwrap();
        assert_eq!(stored.atoms[mapping[0]].element, "C");
        assert_eq!(stored.atoms[mapping[1]].element, "O");
        assert!(stored.bond_between(mapping[0], mapping[1]).is_some());
    }

    #[test]
    fn search_works_without_optimize() {

        let config = test_config("no_optimize");
        let mut db = Database::force_create(config.clone()).unwrap();

        db.insert(&graph("C,C,O|0-1:1,1-2:1"), None).unwrap();
        db.insert(&graph("N,N|0-1:2"), None).unwrap();
        db.close().unwrap();

        let db = Database::open(&config.directory, OpenMode::ReadOnly).unwrap();

        assert_eq!(sub_ids(&db, &graph("C,O|0-1:1")), vec![0]);
        assert_eq!(sub_ids(&db, &graph("N,N|0-1:2")), vec![1]);
    }

    #[test]
    fn optimize_does_not_change_results() {

        let mut db = Database::force_create(test_config("optimize_equiv")).unwrap();

        let mut stored = Vec::new();
        for _ in tqdm!(0..100) {
            stored.push(StructureGraph::random(8));
            db.insert(stored.last().unwrap(), None).unwrap();
        }

        let queries: Vec<StructureGraph> = stored.iter().step_by(20).cloned().collect();

        let before: Vec<Vec<u64>> = queries.iter().map(|q| sub_ids(&db, q)).collect();

        db.optimize().unwrap();

        let after: Vec<Vec<u64>> = queries.iter().map(|q| sub_ids(&db, q)).collect();
        assert_eq!(before, after);

        //a stored record always contains itself
        for (i, query) in queries.iter().enumerate() {
            assert!(after[i].contains(&(i as u64 * 20)));
        }
    }

    #[test]
    fn records_after_optimize_are_still_found() {

        let mut db = Database::force_create(test_config("degraded_tail")).unwrap();

        db.insert(&graph("C,C,O|0-1:1,1-2:1"), None).unwrap();
        db.optimize().unwrap();
        db.insert(&graph("C,C,O,N|0-1:1,1-2:1,1-3:1"), None).unwrap();

        assert_eq!(sub_ids(&db, &graph("C,O|0-1:1")), vec![0, 1]);
    }

    #[test]
    fn self_similarity_is_exactly_one() {

        let mut db = Database::force_create(test_config("self_sim")).unwrap();

        let caffeine_like = graph("c,n,c,n,c,c,O|0-1:a,1-2:a,2-3:a,3-4:a,4-5:a,5-0:a,5-6:2");
        let id = db.insert(&caffeine_like, None).unwrap();
        db.insert(&graph("C,C|0-1:1"), None).unwrap();

        for metric in [Metric::Tanimoto, Metric::Tversky { alpha: 0.4, beta: 0.9 }] {

            let mut matcher = db.search_similar(&caffeine_like, 1.0, 1.0, metric, None).unwrap();

            assert!(matcher.next().unwrap());
            assert_eq!(matcher.current_id(), Some(id));
            assert_eq!(matcher.current_score(), Some(1.0));
        }
    }

    #[test]
    fn single_record_full_window() {

        let mut db = Database::force_create(test_config("single_record")).unwrap();

        let compound = graph("C,C,N|0-1:1,1-2:3");
        let id = db.insert(&compound, None).unwrap();

        let matcher = db.search_similar(&compound, 0.0, 1.0, Metric::Tanimoto, None).unwrap();
        let results = matcher.collect(None).unwrap();

        assert_eq!(results.ids, vec![id]);
        assert_eq!(results.scores, Some(vec![1.0]));
    }

    #[test]
    fn full_window_returns_every_record_once() {

        let mut db = Database::force_create(test_config("full_window")).unwrap();

        for _ in 0..20 {
            db.insert(&StructureGraph::random(6), None).unwrap();
        }

        let matcher = db.search_similar(&StructureGraph::random(6), 0.0, 1.0, Metric::Tanimoto, None).unwrap();
        let results = matcher.collect(None).unwrap();

        let mut ids = results.ids.clone();
        ids.sort();
        ids.dedup();

        assert_eq!(ids, (0..20).collect::<Vec<u64>>());

        for score in results.scores.unwrap() {
            assert!((0.0..=1.0).contains(&score));
        }
    }

    #[test]
    fn window_bounds_are_inclusive() {

        let mut db = Database::force_create(test_config("inclusive_window")).unwrap();

        let compound = graph("C,C,C,O|0-1:1,1-2:1,2-3:1");
        let id = db.insert(&compound, None).unwrap();

        //a [1.0, 1.0] window keeps the exact self match
        let results = db.search_similar(&compound, 1.0, 1.0, Metric::Tanimoto, None).unwrap().collect(None).unwrap();
        assert_eq!(results.ids, vec![id]);

        //an exclusive-looking window just below it drops it
        let results = db.search_similar(&compound, 0.0, 0.999, Metric::Tanimoto, None).unwrap().collect(None).unwrap();
        assert!(results.ids.is_empty());
    }

    #[test]
    fn ranked_results_are_deterministic() {

        let mut db = Database::force_create(test_config("ranked")).unwrap();

        db.insert(&graph("C,C,C,O|0-1:1,1-2:1,2-3:1"), None).unwrap();
        db.insert(&graph("C,C,O|0-1:1,1-2:1"), None).unwrap();
        db.insert(&graph("C,C,O|0-1:1,1-2:1"), None).unwrap(); //duplicate structure, tie on score
        db.insert(&graph("N,N|0-1:3"), None).unwrap();

        let query = graph("C,C,O|0-1:1,1-2:1");

        let first = db.search_similar_ranked(&query, 0.0, 1.0, Metric::Tanimoto, None, None).unwrap().collect(None).unwrap();
        let second = db.search_similar_ranked(&query, 0.0, 1.0, Metric::Tanimoto, None, None).unwrap().collect(None).unwrap();

        assert_eq!(first.ids, second.ids);

        //exact matches first, ties in ascending id order
        assert_eq!(&first.ids[..2], &[1, 2]);

        let scores = first.scores.unwrap();
        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1]);
        }

        let limited = db.search_similar_ranked(&query, 0.0, 1.0, Metric::Tanimoto, Some(2), None).unwrap().collect(None).unwrap();
        assert_eq!(limited.ids, vec![1, 2]);
    }

    #[test]
    fn external_fingerprints() {

        let mut db = Database::force_create(test_config("ext_fp")).unwrap();

        let config_words = db.fingerprint_config().sim_words;
        let mut ext = vec![0u8; config_words * 8];
        ext[0] = 0xff;
        ext[17] = 0x0f;

        let compound = graph("C,C|0-1:1");

        assert!(matches!(
            db.insert_with_ext_fp(&compound, &ext[1..], None),
            Err(Error::ConfigurationMismatch(_))
        ));

        let id = db.insert_with_ext_fp(&compound, &ext, None).unwrap();

        let results = db.search_similar_with_ext_fp(&ext, 1.0, 1.0, Metric::Tanimoto, None).unwrap().collect(None).unwrap();
        assert_eq!(results.ids, vec![id]);
        assert_eq!(results.scores, Some(vec![1.0]));

        assert!(matches!(
            db.search_similar_with_ext_fp(&ext[1..], 0.0, 1.0, Metric::Tanimoto, None),
            Err(Error::ConfigurationMismatch(_))
        ));
    }

    #[test]
    fn enumerate_ids_ascending() {

        let mut db = Database::force_create(test_config("enumerate")).unwrap();

        db.insert(&graph("C"), Some(7)).unwrap();
        db.insert(&graph("N"), Some(2)).unwrap();
        db.insert(&graph("O"), None).unwrap(); //8

        let mut matcher = db.enumerate_ids().unwrap();
        let mut seen = Vec::new();
        while matcher.next().unwrap() {
            seen.push(matcher.current_id().unwrap());
        }

        assert_eq!(seen, vec![2, 7, 8]);
    }

    #[test]
    fn read_only_handles_cannot_modify() {

        let config = test_config("read_only");
        let mut db = Database::force_create(config.clone()).unwrap();
        db.insert(&graph("C"), None).unwrap();
        db.close().unwrap();

        let mut db = Database::open(&config.directory, OpenMode::ReadOnly).unwrap();

        assert!(matches!(db.insert(&graph("N"), None), Err(Error::StateError(_))));
        assert!(matches!(db.optimize(), Err(Error::StateError(_))));

        //reads still work
        assert!(db.get_by_id(0).is_ok());
    }

    #[test]
    fn closed_handles_reject_everything() {

        let mut db = Database::force_create(test_config("closed")).unwrap();
        db.insert(&graph("C"), None).unwrap();
        db.close().unwrap();

        assert!(matches!(db.close(), Err(Error::StateError(_))));
        assert!(matches!(db.get_by_id(0), Err(Error::StateError(_))));
        assert!(matches!(db.insert(&graph("N"), None), Err(Error::StateError(_))));
        assert!(matches!(db.search_substructure(&graph("C"), &SearchOptions::default()), Err(Error::StateError(_))));
    }

    #[test]
    fn single_writer_lock() {

        let config = test_config("writer_lock");
        let mut db = Database::force_create(config.clone()).unwrap();

        assert!(matches!(
            Database::open(&config.directory, OpenMode::ReadWrite),
            Err(Error::StateError(_))
        ));

        //read-only handles are allowed next to a writer
        assert!(Database::open(&config.directory, OpenMode::ReadOnly).is_ok());

        db.close().unwrap();
        let mut reopened = Database::open(&config.directory, OpenMode::ReadWrite).unwrap();
        reopened.close().unwrap();
    }

    #[test]
    fn readers_see_a_snapshot() {

        let config = test_config("snapshot");
        let mut writer = Database::force_create(config.clone()).unwrap();

        writer.insert(&graph("C,C,O|0-1:1,1-2:1"), None).unwrap();

        let reader = Database::open(&config.directory, OpenMode::ReadOnly).unwrap();
        assert_eq!(reader.num_records(), 1);

        writer.insert(&graph("C,C,O|0-1:1,1-2:1"), None).unwrap();

        //the reader still answers from its snapshot
        assert_eq!(reader.num_records(), 1);
        assert_eq!(sub_ids(&reader, &graph("C,O|0-1:1")), vec![0]);

        //the writer sees its own append
        assert_eq!(sub_ids(&writer, &graph("C,O|0-1:1")), vec![0, 1]);
    }

    #[test]
    fn reopen_preserves_id_counter() {

        let config = test_config("id_counter");
        let mut db = Database::force_create(config.clone()).unwrap();

        db.insert(&graph("C"), Some(100)).unwrap();
        db.close().unwrap();

        let mut db = Database::open(&config.directory, OpenMode::ReadWrite).unwrap();
        assert_eq!(db.insert(&graph("N"), None).unwrap(), 101);
        db.close().unwrap();
    }

    #[test]
    fn open_checked_verifies_configuration() {

        let config = test_config("open_checked");
        let mut db = Database::force_create(config.clone()).unwrap();
        db.close().unwrap();

        assert!(Database::open_checked(&config.directory, OpenMode::ReadOnly, RecordKind::Molecule, &config.fingerprint).is_ok());

        assert!(matches!(
            Database::open_checked(&config.directory, OpenMode::ReadOnly, RecordKind::Reaction, &config.fingerprint),
            Err(Error::ConfigurationMismatch(_))
        ));

        let narrow = FingerprintConfig { sim_words: 4, ..config.fingerprint.clone() };
        assert!(matches!(
            Database::open_checked(&config.directory, OpenMode::ReadOnly, RecordKind::Molecule, &narrow),
            Err(Error::ConfigurationMismatch(_))
        ));
    }

    #[test]
    fn garbage_header_is_corrupt() {

        let config = test_config("garbage_header");
        let mut db = Database::force_create(config.clone()).unwrap();
        db.close().unwrap();

        fs::write(config.get_header_filename(), "not: [valid").unwrap();

        assert!(matches!(
            Database::open(&config.directory, OpenMode::ReadOnly),
            Err(Error::CorruptStore(_))
        ));
    }

    #[test]
    fn reaction_databases_allow_components() {

        let mut db = Database::force_create(test_config("molecule_components")).unwrap();
        let reaction = graph("C,C;O|0-1:2");

        assert!(matches!(db.insert(&reaction, None), Err(Error::StateError(_))));

        let mut config = test_config("reaction_components");
        config.kind = RecordKind::Reaction;
        let mut db = Database::force_create(config).unwrap();

        let id = db.insert(&reaction, None).unwrap();
        assert!(db.get_by_id(id).unwrap().exact_match(&reaction, &MatchFlags::default()));
    }

    #[test]
    fn timeout_exhausts_cursor_but_not_handle() {

        let mut db = Database::force_create(test_config("timeout")).unwrap();

        let big = StructureGraph::random(40);
        db.insert(&big, None).unwrap();

        let options = SearchOptions {
            flags: MatchFlags::default(),
            timeout: Some(Duration::from_nanos(1)),
        };

        let mut matcher = db.search_substructure(&big, &options).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert!(matches!(matcher.next(), Err(Error::Timeout)));
        assert!(!matcher.next().unwrap());

        //the handle is unaffected
        assert!(db.get_by_id(0).is_ok());
        assert_eq!(sub_ids(&db, &big), vec![0]);
    }

    #[test]
    fn similarity_timeout_exhausts_cursor_but_not_handle() {

        let mut db = Database::force_create(test_config("sim_timeout")).unwrap();

        for _ in 0..5 {
            db.insert(&StructureGraph::random(8), None).unwrap();
        }

        let query = StructureGraph::random(8);

        let mut matcher = db.search_similar(&query, 0.0, 1.0, Metric::Tanimoto, Some(Duration::from_nanos(1))).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert!(matches!(matcher.next(), Err(Error::Timeout)));
        assert!(!matcher.next().unwrap());
        assert_eq!(matcher.current_id(), None);

        //the handle still answers
        let results = db.search_similar(&query, 0.0, 1.0, Metric::Tanimoto, None).unwrap().collect(None).unwrap();
        assert_eq!(results.ids.len(), 5);
    }

    #[test]
    fn exact_search_excludes_proper_superstructures() {

        let mut db = Database::force_create(test_config("exact_search")).unwrap();

        let ethanol = graph("C,C,O|0-1:1,1-2:1");
        let propanol = graph("C,C,C,O|0-1:1,1-2:1,2-3:1");

        let id_a = db.insert(&ethanol, None).unwrap();
        db.insert(&propanol, None).unwrap();
        let id_b = db.insert(&ethanol, None).unwrap();

        //substructure search sees all three, exact search only the two ethanols
        assert_eq!(sub_ids(&db, &ethanol), vec![0, 1, 2]);

        let matcher = db.search_exact(&ethanol, &SearchOptions::default()).unwrap();
        assert_eq!(matcher.collect_ids(None).unwrap().ids, vec![id_a, id_b]);

        //the screening index does not change the answer
        db.optimize().unwrap();
        let matcher = db.search_exact(&ethanol, &SearchOptions::default()).unwrap();
        assert_eq!(matcher.collect_ids(None).unwrap().ids, vec![id_a, id_b]);

        //same atom counts but different bond order is not exact under strict flags
        let ethenol = graph("C,C,O|0-1:2,1-2:1");
        let matcher = db.search_exact(&ethenol, &SearchOptions::default()).unwrap();
        assert!(matcher.collect_ids(None).unwrap().ids.is_empty());

        let relaxed = SearchOptions {
            flags: MatchFlags { ignore_bond_order: true, ..Default::default() },
            ..Default::default()
        };
        let matcher = db.search_exact(&ethenol, &relaxed).unwrap();
        assert_eq!(matcher.collect_ids(None).unwrap().ids, vec![id_a, id_b]);
    }

    #[test]
    fn state_errors_win_over_width_errors() {

        let config = test_config("state_before_width");
        let mut db = Database::force_create(config.clone()).unwrap();
        db.insert(&graph("C"), None).unwrap();
        db.close().unwrap();

        let bad_width = vec![0u8; 3];

        //closed handle: the state error fires before the width check
        assert!(matches!(db.insert(&graph("N"), None), Err(Error::StateError(_))));
        assert!(matches!(db.insert_with_ext_fp(&graph("N"), &bad_width, None), Err(Error::StateError(_))));

        //read-only handle: same ordering
        let mut db = Database::open(&config.directory, OpenMode::ReadOnly).unwrap();
        assert!(matches!(db.insert_with_ext_fp(&graph("N"), &bad_width, None), Err(Error::StateError(_))));
    }
}
