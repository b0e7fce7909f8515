//! Fingerprints: fixed-width bit vectors computed deterministically from a
//! structure graph.
//!
//! Every record stores two of them. The similarity fingerprint feeds
//! Tanimoto/Tversky scoring. The screening fingerprint is segmented (ord / any /
//! tau / ext, widths in 64-bit words fixed at database creation) and upholds the
//! screening invariant: if a query is a substructure of a record under the match
//! flags, every bit of the query screening fingerprint is set in the record's.
//! Features are linear atom paths (up to `MAX_PATH_ATOMS` atoms, no repeats)
//! hashed per segment:
//!
//! - ord: elements + aromaticity + charges + isotopes + bond orders
//! - any: bond orders only (path shape regardless of elements)
//! - tau: elements + aromaticity only, so queries matched with relaxed bond or
//!   charge flags can screen on this segment alone
//! - ext: reserved, never set by this encoder
//!
//! Hashing is FNV-1a written out here because the bit positions are persisted;
//! std's hasher is allowed to change between releases.

use byteorder::{ByteOrder, BigEndian};
use serde::{Serialize, Deserialize};

use crate::error::Error;
use crate::graph::{StructureGraph, MatchFlags};

pub const MAX_PATH_ATOMS: usize = 5;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

const SEED_SIM: u8 = b's';
const SEED_ORD: u8 = b'o';
const SEED_ANY: u8 = b'y';
const SEED_TAU: u8 = b't';
const SEED_CIRCULAR: u8 = b'c';

fn fnv1a64(seed: u8, data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    hash ^= seed as u64;
    hash = hash.wrapping_mul(FNV_PRIME);
    for &byte in data.iter() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    return hash;
}

/// Segment widths in 64-bit words. Fixed when a database is created and stored in
/// its header; a query fingerprint is only comparable against records encoded with
/// the same widths.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FingerprintConfig {
    pub sim_words: usize,
    pub ord_words: usize,
    pub any_words: usize,
    pub tau_words: usize,
    pub ext_words: usize,
}

impl FingerprintConfig {

    pub fn default() -> FingerprintConfig {
        return FingerprintConfig {
            sim_words: 8,
            ord_words: 16,
            any_words: 4,
            tau_words: 4,
            ext_words: 0,
        };
    }

    pub fn screen_words(&self) -> usize {
        return self.ord_words + self.any_words + self.tau_words + self.ext_words;
    }

    pub fn sim_bits(&self) -> usize {
        return self.sim_words * 64;
    }

    pub fn screen_bits(&self) -> usize {
        return self.screen_words() * 64;
    }

    fn ord_range(&self) -> (usize, usize) {
        return (0, self.ord_words * 64);
    }

    fn any_range(&self) -> (usize, usize) {
        let start = self.ord_words * 64;
        return (start, start + self.any_words * 64);
    }

    fn tau_range(&self) -> (usize, usize) {
        let start = (self.ord_words + self.any_words) * 64;
        return (start, start + self.tau_words * 64);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub words: Vec<u64>,
}

impl Fingerprint {

    pub fn zeros(num_words: usize) -> Fingerprint {
        return Fingerprint { words: vec![0u64; num_words] };
    }

    pub fn num_bits(&self) -> usize {
        return self.words.len() * 64;
    }

    pub fn set_bit(&mut self, bit: usize) {
        self.words[bit / 64] |= 1u64 << (bit % 64);
    }

    pub fn get_bit(&self, bit: usize) -> bool {
        return self.words[bit / 64] & (1u64 << (bit % 64)) != 0;
    }

    pub fn popcount(&self) -> u32 {
        return self.words.iter().map(|w| w.count_ones()).sum();
    }

    /// Every bit set in `other` is also set in `self`.
    pub fn is_superset_of(&self, other: &Fingerprint) -> bool {
        for (word, other_word) in self.words.iter().zip(other.words.iter()) {
            if word & other_word != *other_word {
                return false;
            }
        }
        return true;
    }

    pub fn common_bits(&self, other: &Fingerprint) -> u32 {
        return self.words.iter().zip(other.words.iter()).map(|(a, b)| (a & b).count_ones()).sum();
    }

    pub fn set_bits(&self) -> Vec<usize> {
        let mut bits = Vec::new();
        for bit in 0..self.num_bits() {
            if self.get_bit(bit) {
                bits.push(bit);
            }
        }
        return bits;
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; self.words.len() * 8];
        for (i, word) in self.words.iter().enumerate() {
            BigEndian::write_u64(&mut data[i * 8..(i + 1) * 8], *word);
        }
        return data;
    }

    pub fn from_bytes(data: &[u8], num_words: usize) -> Result<Fingerprint, Error> {

        if data.len() != num_words * 8 {
            return Err(Error::CorruptStore(format!("bad fingerprint width: {} bytes for {} words", data.len(), num_words)));
        }

        let mut words = vec![0u64; num_words];
        for i in 0..num_words {
            words[i] = BigEndian::read_u64(&data[i * 8..(i + 1) * 8]);
        }

        return Ok(Fingerprint { words });
    }
}

/// Similarity + screening fingerprint pair stored with every record.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintSet {
    pub sim: Fingerprint,
    pub screen: Fingerprint,
}

#[derive(Debug, Clone, Copy)]
pub enum FingerprintKind {
    Similarity,
    Screening,
    Tautomer,
    /// Morgan-style circular fingerprint with the given radius, at similarity width.
    Circular(u32),
}

/// Computes the stored fingerprint pair for a record.
pub fn encode(graph: &StructureGraph, config: &FingerprintConfig) -> FingerprintSet {

    let paths = enumerate_paths(graph);

    let mut sim = Fingerprint::zeros(config.sim_words);
    let mut screen = Fingerprint::zeros(config.screen_words());

    for path in paths.iter() {
        hash_path_sim(graph, path, config, &mut sim);
        hash_path_screen(graph, path, config, &mut screen, true);
    }

    return FingerprintSet { sim, screen };
}

/// Single-kind encoder used by the tools and tests.
pub fn encode_kind(graph: &StructureGraph, config: &FingerprintConfig, kind: FingerprintKind) -> Fingerprint {

    match kind {
        FingerprintKind::Similarity => encode(graph, config).sim,
        FingerprintKind::Screening => encode(graph, config).screen,
        FingerprintKind::Tautomer => {
            let mut screen = Fingerprint::zeros(config.screen_words());
            for path in enumerate_paths(graph).iter() {
                hash_path_screen(graph, path, config, &mut screen, false);
            }
            screen
        },
        FingerprintKind::Circular(radius) => circular(graph, config, radius),
    }
}

/// Query-side screening fingerprint. When the match flags relax bond orders or
/// charges, only the tau segment is populated; ord/any features depend on exactly
/// the attributes the flags ignore and would produce screening false negatives.
pub fn encode_query_screen(graph: &StructureGraph, config: &FingerprintConfig, flags: &MatchFlags) -> Fingerprint {

    let all_segments = !flags.ignore_bond_order && !flags.ignore_charges;

    let mut screen = Fingerprint::zeros(config.screen_words());
    for path in enumerate_paths(graph).iter() {
        hash_path_screen(graph, path, config, &mut screen, all_segments);
    }

    return screen;
}

/// Circular fingerprint: iterated neighborhood invariants, one bit per atom per
/// iteration round.
pub fn circular(graph: &StructureGraph, config: &FingerprintConfig, radius: u32) -> Fingerprint {

    let mut fp = Fingerprint::zeros(config.sim_words);
    let num_bits = config.sim_bits();

    if graph.is_empty() || num_bits == 0 {
        return fp;
    }

    let mut invariants: Vec<u64> = (0..graph.atom_count())
        .map(|a| fnv1a64(SEED_CIRCULAR, &ord_atom_code(graph, a)))
        .collect();

    for inv in invariants.iter() {
        fp.set_bit((inv % num_bits as u64) as usize);
    }

    for _ in 0..radius {

        let mut next = vec![0u64; invariants.len()];

        for atom in 0..graph.atom_count() {

            let mut environment: Vec<[u8; 9]> = Vec::new();
            for &(neighbor, bond) in graph.neighbors(atom) {
                let mut entry = [0u8; 9];
                entry[0] = graph.bonds[bond].order.to_byte();
                BigEndian::write_u64(&mut entry[1..9], invariants[neighbor]);
                environment.push(entry);
            }
            environment.sort();

            let mut data = Vec::with_capacity(8 + environment.len() * 9);
            let mut buf8 = [0u8; 8];
            BigEndian::write_u64(&mut buf8, invariants[atom]);
            data.extend_from_slice(&buf8);
            for entry in environment.iter() {
                data.extend_from_slice(entry);
            }

            next[atom] = fnv1a64(SEED_CIRCULAR, &data);
            fp.set_bit((next[atom] % num_bits as u64) as usize);
        }

        invariants = next;
    }

    return fp;
}

/// All simple paths (no repeated atoms) of 1..=MAX_PATH_ATOMS atoms. Each path also
/// appears reversed; the feature builders canonicalize, so the duplicate work only
/// costs time, never bits.
fn enumerate_paths(graph: &StructureGraph) -> Vec<Vec<usize>> {

    let mut paths: Vec<Vec<usize>> = Vec::new();

    for start in 0..graph.atom_count() {
        let mut current = vec![start];
        grow_path(graph, &mut current, &mut paths);
    }

    return paths;
}

fn grow_path(graph: &StructureGraph, current: &mut Vec<usize>, paths: &mut Vec<Vec<usize>>) {

    paths.push(current.clone());

    if current.len() == MAX_PATH_ATOMS {
        return;
    }

    let last = *current.last().unwrap();

    for &(neighbor, _) in graph.neighbors(last) {
        if current.contains(&neighbor) {
            continue;
        }
        current.push(neighbor);
        grow_path(graph, current, paths);
        current.pop();
    }
}

fn ord_atom_code(graph: &StructureGraph, atom: usize) -> Vec<u8> {

    let a = &graph.atoms[atom];
    let mut code = Vec::with_capacity(a.element.len() + 4);

    code.extend_from_slice(a.element.as_bytes());
    code.push(a.aromatic as u8);
    code.push(a.charge as u8);

    let mut buf2 = [0u8; 2];
    BigEndian::write_u16(&mut buf2, a.isotope);
    code.extend_from_slice(&buf2);

    return code;
}

fn tau_atom_code(graph: &StructureGraph, atom: usize) -> Vec<u8> {

    let a = &graph.atoms[atom];
    let mut code = Vec::with_capacity(a.element.len() + 1);

    code.extend_from_slice(a.element.as_bytes());
    code.push(a.aromatic as u8);

    return code;
}

fn path_feature(graph: &StructureGraph, path: &[usize], atom_code: fn(&StructureGraph, usize) -> Vec<u8>, with_orders: bool) -> Vec<u8> {

    let forward = path_feature_directed(graph, path.iter().copied(), atom_code, with_orders);

    let reversed = path_feature_directed(graph, path.iter().rev().copied(), atom_code, with_orders);

    return std::cmp::min(forward, reversed);
}

fn path_feature_directed(graph: &StructureGraph, path: impl Iterator<Item = usize>, atom_code: fn(&StructureGraph, usize) -> Vec<u8>, with_orders: bool) -> Vec<u8> {

    let mut feature = Vec::new();
    let mut previous: Option<usize> = None;

    for atom in path {
        if let Some(previous) = previous {
            if with_orders {
                let bond = graph.bond_between(previous, atom).unwrap();
                feature.push(bond.order.to_byte());
            }
            feature.push(b'/');
        }
        feature.extend_from_slice(&atom_code(graph, atom));
        previous = Some(atom);
    }

    return feature;
}

fn order_feature(graph: &StructureGraph, path: &[usize]) -> Vec<u8> {

    let mut forward = Vec::with_capacity(path.len());
    for window in path.windows(2) {
        forward.push(graph.bond_between(window[0], window[1]).unwrap().order.to_byte());
    }

    let mut reversed = forward.clone();
    reversed.reverse();

    let mut feature = std::cmp::min(forward, reversed);
    feature.push(path.len() as u8);

    return feature;
}

fn set_segment_bit(fp: &mut Fingerprint, range: (usize, usize), hash: u64) {
    let (start, end) = range;
    if end == start {
        return;
    }
    let width = (end - start) as u64;
    fp.set_bit(start + (hash % width) as usize);
}

fn hash_path_screen(graph: &StructureGraph, path: &[usize], config: &FingerprintConfig, screen: &mut Fingerprint, all_segments: bool) {

    let tau_feature = path_feature(graph, path, tau_atom_code, false);
    set_segment_bit(screen, config.tau_range(), fnv1a64(SEED_TAU, &tau_feature));

    if !all_segments {
        return;
    }

    let ord_feature = path_feature(graph, path, ord_atom_code, true);
    set_segment_bit(screen, config.ord_range(), fnv1a64(SEED_ORD, &ord_feature));

    if path.len() >= 2 {
        let any_feature = order_feature(graph, path);
        set_segment_bit(screen, config.any_range(), fnv1a64(SEED_ANY, &any_feature));
    }
}

fn hash_path_sim(graph: &StructureGraph, path: &[usize], config: &FingerprintConfig, sim: &mut Fingerprint) {

    if config.sim_bits() == 0 {
        return;
    }

    let feature = path_feature(graph, path, ord_atom_code, true);
    let hash = fnv1a64(SEED_SIM, &feature);
    sim.set_bit((hash % config.sim_bits() as u64) as usize);
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::graph::MatchFlags;

    #[test]
    fn encode_is_deterministic() {

        let graph = StructureGraph::from_line("C,C,O,N|0-1:1,1-2:2,1-3:1").unwrap();
        let config = FingerprintConfig::default();

        let first = encode(&graph, &config);
        let second = encode(&graph, &config);

        assert_eq!(first, second);
        assert!(first.sim.popcount() > 0);
        assert!(first.screen.popcount() > 0);
    }

    #[test]
    fn empty_graph_is_all_zero() {

        let config = FingerprintConfig::default();
        let set = encode(&StructureGraph::new(), &config);

        assert_eq!(set.sim.popcount(), 0);
        assert_eq!(set.screen.popcount(), 0);
    }

    #[test]
    fn substructure_screen_is_subset() {

        let config = FingerprintConfig::default();
        let flags = MatchFlags::default();

        let target = StructureGraph::from_line("C,C,C,O,N|0-1:1,1-2:1,2-3:2,2-4:1").unwrap();
        let queries = ["C,C|0-1:1", "C,O|0-1:2", "C,C,C|0-1:1,1-2:1", "N"];

        for line in queries.iter() {

            let query = StructureGraph::from_line(line).unwrap();
            assert!(target.matches_substructure(&query, &flags, None).unwrap().is_some());

            let target_fp = encode(&target, &config).screen;
            let query_fp = encode_query_screen(&query, &config, &flags);

            assert!(target_fp.is_superset_of(&query_fp), "false negative for query {}", line);
        }
    }

    #[test]
    fn relaxed_flags_screen_on_tau_only() {

        let config = FingerprintConfig::default();

        //stored with a double bond, queried with a single bond under ignore_bond_order
        let target = StructureGraph::from_line("C,C,O|0-1:1,1-2:2").unwrap();
        let query = StructureGraph::from_line("C,O|0-1:1").unwrap();

        let flags = MatchFlags { ignore_bond_order: true, ..Default::default() };
        assert!(target.matches_substructure(&query, &flags, None).unwrap().is_some());

        let target_fp = encode(&target, &config).screen;
        let query_fp = encode_query_screen(&query, &config, &flags);

        assert!(target_fp.is_superset_of(&query_fp));

        //tau-only fingerprints stay inside the tau segment
        let (tau_start, tau_end) = (config.ord_range().1 + config.any_words * 64, config.screen_bits());
        for bit in query_fp.set_bits() {
            assert!(bit >= tau_start && bit < tau_end);
        }
    }

    #[test]
    fn fingerprint_bytes_roundtrip() {

        let config = FingerprintConfig::default();
        let graph = StructureGraph::random(12);

        let fp = encode(&graph, &config).sim;
        let restored = Fingerprint::from_bytes(&fp.to_bytes(), config.sim_words).unwrap();

        assert_eq!(fp, restored);

        let bad = Fingerprint::from_bytes(&fp.to_bytes()[1..], config.sim_words);
        assert!(matches!(bad, Err(crate::error::Error::CorruptStore(_))));
    }

    #[test]
    fn circular_is_deterministic_and_radius_sensitive() {

        let config = FingerprintConfig::default();
        let graph = StructureGraph::from_line("C,C,C,O|0-1:1,1-2:1,2-3:1").unwrap();

        assert_eq!(circular(&graph, &config, 2), circular(&graph, &config, 2));
        assert!(circular(&graph, &config, 2).popcount() >= circular(&graph, &config, 0).popcount());
        assert_eq!(encode_kind(&graph, &config, FingerprintKind::Circular(2)), circular(&graph, &config, 2));
    }

    #[test]
    fn superset_and_common_bits() {

        let mut a = Fingerprint::zeros(2);
        let mut b = Fingerprint::zeros(2);

        a.set_bit(3);
        a.set_bit(70);
        b.set_bit(3);

        assert!(a.is_superset_of(&b));
        assert!(!b.is_superset_of(&a));
        assert_eq!(a.common_bits(&b), 1);
        assert_eq!(a.popcount(), 2);
    }
}
