//! Structure graphs: typed atoms, typed bonds, adjacency, a binary codec for the
//! record store and a line-oriented text codec for the CLI tools.
//!
//! Matching lives here too: `exact_match` and `matches_substructure`, a
//! backtracking subgraph-isomorphism search that tries query atoms in descending
//! degree order and extends a partial query->target mapping one atom at a time.

use std::time::Instant;

use byteorder::{ByteOrder, BigEndian};
use rand::Rng;

use crate::error::Error;

/// Longest element symbol we accept (e.g. "Cl", "Br").
pub const MAX_SYMBOL_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub element: String,
    pub charge: i8,
    pub isotope: u16,
    pub parity: u8,
    pub aromatic: bool,
    /// Connected-component tag, used to keep reaction sides apart.
    pub component: u8,
}

impl Atom {

    pub fn new(element: &str) -> Atom {
        return Atom {
            element: element.to_string(),
            charge: 0,
            isotope: 0,
            parity: 0,
            aromatic: false,
            component: 0,
        };
    }

    /// Parses one atom token of the text codec, e.g. `C`, `c`, `N+1`, `O-1`, `C#13@1`.
    /// A lowercase leading letter marks the atom aromatic.
    pub fn from_token(token: &str) -> Result<Atom, Error> {

        let chars: Vec<char> = token.chars().collect();

        let mut symbol = String::new();
        let mut pos = 0;
        while pos < chars.len() && chars[pos].is_ascii_alphabetic() && symbol.len() < MAX_SYMBOL_LEN {
            symbol.push(chars[pos]);
            pos += 1;
        }

        if symbol.is_empty() {
            return Err(Error::CorruptStore(format!("bad atom token: '{}'", token)));
        }

        let aromatic = symbol.chars().next().unwrap().is_ascii_lowercase();

        let mut element = String::new();
        for (i, c) in symbol.chars().enumerate() {
            match i == 0 {
                true => element.push(c.to_ascii_uppercase()),
                false => element.push(c.to_ascii_lowercase()),
            }
        }

        let mut atom = Atom::new(&element);
        atom.aromatic = aromatic;

        while pos < chars.len() {

            let marker = chars[pos];
            pos += 1;

            let mut digits = String::new();
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                digits.push(chars[pos]);
                pos += 1;
            }

            if digits.is_empty() {
                return Err(Error::CorruptStore(format!("bad atom token: '{}'", token)));
            }

            match marker {
                '+' => atom.charge = digits.parse::<i8>().map_err(|_| Error::CorruptStore(format!("bad charge in '{}'", token)))?,
                '-' => atom.charge = -digits.parse::<i8>().map_err(|_| Error::CorruptStore(format!("bad charge in '{}'", token)))?,
                '#' => atom.isotope = digits.parse::<u16>().map_err(|_| Error::CorruptStore(format!("bad isotope in '{}'", token)))?,
                '@' => atom.parity = digits.parse::<u8>().map_err(|_| Error::CorruptStore(format!("bad parity in '{}'", token)))?,
                _ => return Err(Error::CorruptStore(format!("bad atom token: '{}'", token))),
            }
        }

        return Ok(atom);
    }

    pub fn to_token(&self) -> String {

        let mut token = String::new();

        match self.aromatic {
            true => {
                for (i, c) in self.element.chars().enumerate() {
                    match i == 0 {
                        true => token.push(c.to_ascii_lowercase()),
                        false => token.push(c),
                    }
                }
            },
            false => token.push_str(&self.element),
        }

        if self.charge > 0 {
            token.push_str(&format!("+{}", self.charge));
        }
        if self.charge < 0 {
            token.push_str(&format!("-{}", -(self.charge as i16)));
        }
        if self.isotope != 0 {
            token.push_str(&format!("#{}", self.isotope));
        }
        if self.parity != 0 {
            token.push_str(&format!("@{}", self.parity));
        }

        return token;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondOrder {
    Single,
    Double,
    Triple,
    Aromatic,
}

impl BondOrder {

    pub fn to_byte(&self) -> u8 {
        match self {
            BondOrder::Single => 1,
            BondOrder::Double => 2,
            BondOrder::Triple => 3,
            BondOrder::Aromatic => 4,
        }
    }

    pub fn from_byte(byte: u8) -> Result<BondOrder, Error> {
        match byte {
            1 => Ok(BondOrder::Single),
            2 => Ok(BondOrder::Double),
            3 => Ok(BondOrder::Triple),
            4 => Ok(BondOrder::Aromatic),
            _ => Err(Error::CorruptStore(format!("bad bond order byte: {}", byte))),
        }
    }

    pub fn from_char(c: char) -> Result<BondOrder, Error> {
        match c {
            '1' => Ok(BondOrder::Single),
            '2' => Ok(BondOrder::Double),
            '3' => Ok(BondOrder::Triple),
            'a' => Ok(BondOrder::Aromatic),
            _ => Err(Error::CorruptStore(format!("bad bond order char: '{}'", c))),
        }
    }

    pub fn to_char(&self) -> char {
        match self {
            BondOrder::Single => '1',
            BondOrder::Double => '2',
            BondOrder::Triple => '3',
            BondOrder::Aromatic => 'a',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bond {
    pub from: usize,
    pub to: usize,
    pub order: BondOrder,
}

/// Knobs for the match predicates. Defaults give strict matching; `ignore_bond_order`
/// covers tautomer/resonance-style queries, `ignore_charges` drops charge and isotope
/// from the atom test, `strict_stereo` additionally requires parity to agree.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchFlags {
    pub ignore_bond_order: bool,
    pub ignore_charges: bool,
    pub strict_stereo: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructureGraph {
    pub atoms: Vec<Atom>,
    pub bonds: Vec<Bond>,
    adjacency: Vec<Vec<(usize, usize)>>, //(neighbor atom index, bond index)
}

impl StructureGraph {

    pub fn new() -> StructureGraph {
        return StructureGraph {
            atoms: Vec::new(),
            bonds: Vec::new(),
            adjacency: Vec::new(),
        };
    }

    pub fn add_atom(&mut self, atom: Atom) -> usize {
        self.atoms.push(atom);
        self.adjacency.push(Vec::new());
        return self.atoms.len() - 1;
    }

    pub fn add_bond(&mut self, from: usize, to: usize, order: BondOrder) -> Result<usize, Error> {

        if from >= self.atoms.len() || to >= self.atoms.len() || from == to {
            return Err(Error::CorruptStore(format!("bad bond endpoints: {}-{}", from, to)));
        }

        if self.bond_between(from, to).is_some() {
            return Err(Error::CorruptStore(format!("duplicate bond: {}-{}", from, to)));
        }

        let index = self.bonds.len();
        self.bonds.push(Bond { from, to, order });
        self.adjacency[from].push((to, index));
        self.adjacency[to].push((from, index));

        return Ok(index);
    }

    pub fn atom_count(&self) -> usize {
        return self.atoms.len();
    }

    pub fn bond_count(&self) -> usize {
        return self.bonds.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.atoms.is_empty();
    }

    pub fn neighbors(&self, atom: usize) -> &[(usize, usize)] {
        return &self.adjacency[atom];
    }

    pub fn degree(&self, atom: usize) -> usize {
        return self.adjacency[atom].len();
    }

    pub fn bond_between(&self, a: usize, b: usize) -> Option<&Bond> {
        for &(neighbor, bond_index) in self.adjacency[a].iter() {
            if neighbor == b {
                return Some(&self.bonds[bond_index]);
            }
        }
        return None;
    }

    pub fn component_count(&self) -> usize {
        let mut max_component = 0;
        for atom in self.atoms.iter() {
            if atom.component as usize + 1 > max_component {
                max_component = atom.component as usize + 1;
            }
        }
        return max_component;
    }

    //binary codec

    pub fn serialize(&self) -> Vec<u8> {

        let mut data: Vec<u8> = Vec::new();
        let mut buf4 = [0u8; 4];
        let mut buf2 = [0u8; 2];

        BigEndian::write_u32(&mut buf4, self.atoms.len() as u32);
        data.extend_from_slice(&buf4);

        for atom in self.atoms.iter() {

            data.push(atom.element.len() as u8);
            data.extend_from_slice(atom.element.as_bytes());
            data.push(atom.charge as u8);

            BigEndian::write_u16(&mut buf2, atom.isotope);
            data.extend_from_slice(&buf2);

            data.push(atom.parity);
            data.push(atom.aromatic as u8);
            data.push(atom.component);
        }

        BigEndian::write_u32(&mut buf4, self.bonds.len() as u32);
        data.extend_from_slice(&buf4);

        for bond in self.bonds.iter() {

            BigEndian::write_u32(&mut buf4, bond.from as u32);
            data.extend_from_slice(&buf4);

            BigEndian::write_u32(&mut buf4, bond.to as u32);
            data.extend_from_slice(&buf4);

            data.push(bond.order.to_byte());
        }

        return data;
    }

    pub fn deserialize(data: &[u8]) -> Result<StructureGraph, Error> {

        let mut reader = Reader { data, pos: 0 };
        let mut graph = StructureGraph::new();

        let num_atoms = reader.read_u32()? as usize;

        for _ in 0..num_atoms {

            let symbol_len = reader.read_u8()? as usize;
            if symbol_len == 0 || symbol_len > MAX_SYMBOL_LEN {
                return Err(Error::CorruptStore(format!("bad element symbol length: {}", symbol_len)));
            }

            let symbol_bytes = reader.take(symbol_len)?;
            let element = std::str::from_utf8(symbol_bytes)
                .map_err(|_| Error::CorruptStore("element symbol is not utf8".to_string()))?
                .to_string();

            let charge = reader.read_u8()? as i8;
            let isotope = reader.read_u16()?;
            let parity = reader.read_u8()?;
            let aromatic = reader.read_u8()? != 0;
            let component = reader.read_u8()?;

            graph.add_atom(Atom { element, charge, isotope, parity, aromatic, component });
        }

        let num_bonds = reader.read_u32()? as usize;

        for _ in 0..num_bonds {

            let from = reader.read_u32()? as usize;
            let to = reader.read_u32()? as usize;
            let order = BondOrder::from_byte(reader.read_u8()?)?;

            graph.add_bond(from, to, order)?;
        }

        return Ok(graph);
    }

    //text codec: "C,C,O|0-1:1,1-2:1", components split with ';' in the atom part

    pub fn from_line(line: &str) -> Result<StructureGraph, Error> {

        let line = line.trim();

        let (atom_part, bond_part) = match line.split_once('|') {
            Some((atoms, bonds)) => (atoms, bonds),
            None => (line, ""),
        };

        let mut graph = StructureGraph::new();

        for (component, chunk) in atom_part.split(';').enumerate() {
            if component > u8::MAX as usize {
                return Err(Error::CorruptStore("too many components".to_string()));
            }
            for token in chunk.split(',') {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                let mut atom = Atom::from_token(token)?;
                atom.component = component as u8;
                graph.add_atom(atom);
            }
        }

        for token in bond_part.split(',') {

            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            let (endpoints, order_str) = token.split_once(':')
                .ok_or_else(|| Error::CorruptStore(format!("bad bond token: '{}'", token)))?;
            let (from_str, to_str) = endpoints.split_once('-')
                .ok_or_else(|| Error::CorruptStore(format!("bad bond token: '{}'", token)))?;

            let from = from_str.parse::<usize>().map_err(|_| Error::CorruptStore(format!("bad bond token: '{}'", token)))?;
            let to = to_str.parse::<usize>().map_err(|_| Error::CorruptStore(format!("bad bond token: '{}'", token)))?;

            let order_char = match order_str.len() == 1 {
                true => order_str.chars().next().unwrap(),
                false => return Err(Error::CorruptStore(format!("bad bond token: '{}'", token))),
            };

            graph.add_bond(from, to, BondOrder::from_char(order_char)?)?;
        }

        return Ok(graph);
    }

    pub fn to_line(&self) -> String {

        let mut atom_tokens: Vec<String> = Vec::new();
        let mut previous_component = 0;

        for atom in self.atoms.iter() {
            let mut token = atom.to_token();
            if atom.component != previous_component {
                token = format!(";{}", token);
                previous_component = atom.component;
            }
            atom_tokens.push(token);
        }

        let mut line = atom_tokens.join(",").replace(",;", ";");

        if !self.bonds.is_empty() {
            let bond_tokens: Vec<String> = self.bonds.iter()
                .map(|b| format!("{}-{}:{}", b.from, b.to, b.order.to_char()))
                .collect();
            line.push('|');
            line.push_str(&bond_tokens.join(","));
        }

        return line;
    }

    /// True when `other` and `self` are the same structure under `flags`.
    pub fn exact_match(&self, other: &StructureGraph, flags: &MatchFlags) -> bool {

        if self.atoms.len() != other.atoms.len() || self.bonds.len() != other.bonds.len() {
            return false;
        }

        match self.matches_substructure(other, flags, None) {
            Ok(Some(_)) => true,
            _ => false,
        }
    }

    /// Searches for an embedding of `query` in `self`. On success returns the mapping
    /// from query atom index to target atom index. An empty query matches anything
    /// with an empty mapping. The optional deadline is checked on every extension
    /// step and surfaces as `Error::Timeout`.
    pub fn matches_substructure(&self, query: &StructureGraph, flags: &MatchFlags, deadline: Option<Instant>) -> Result<Option<Vec<usize>>, Error> {

        if query.atoms.len() > self.atoms.len() || query.bonds.len() > self.bonds.len() {
            return Ok(None);
        }

        //atoms with many bonds fail fast, so try them first
        let mut query_order: Vec<usize> = (0..query.atoms.len()).collect();
        query_order.sort_by_key(|&a| std::cmp::Reverse(query.degree(a)));

        let mut search = SubstructureSearch {
            target: self,
            query,
            flags,
            deadline,
            query_order,
            query_map: vec![None; query.atoms.len()],
            target_used: vec![false; self.atoms.len()],
        };

        match search.extend(0)? {
            true => {
                let mapping = search.query_map.iter().map(|m| m.unwrap()).collect();
                return Ok(Some(mapping));
            },
            false => return Ok(None),
        }
    }

    /// Random connected chain graph over a few common elements, for tests and the
    /// query driver.
    pub fn random(num_atoms: usize) -> StructureGraph {

        let elements = ["C", "C", "C", "N", "O", "S", "P"];
        let mut rng = rand::thread_rng();
        let mut graph = StructureGraph::new();

        for _ in 0..num_atoms {
            let element = elements[rng.gen_range(0..elements.len())];
            graph.add_atom(Atom::new(element));
        }

        for i in 1..num_atoms {
            let order = match rng.gen_range(0..5) {
                0 => BondOrder::Double,
                _ => BondOrder::Single,
            };
            graph.add_bond(i - 1, i, order).unwrap();
        }

        return graph;
    }
}

struct SubstructureSearch<'a> {
    target: &'a StructureGraph,
    query: &'a StructureGraph,
    flags: &'a MatchFlags,
    deadline: Option<Instant>,
    query_order: Vec<usize>,
    query_map: Vec<Option<usize>>,
    target_used: Vec<bool>,
}

impl<'a> SubstructureSearch<'a> {

    fn atoms_match(&self, target_atom: usize, query_atom: usize) -> bool {

        let t = &self.target.atoms[target_atom];
        let q = &self.query.atoms[query_atom];

        if t.element != q.element || t.aromatic != q.aromatic {
            return false;
        }

        if !self.flags.ignore_charges && (t.charge != q.charge || t.isotope != q.isotope) {
            return false;
        }

        if self.flags.strict_stereo && t.parity != q.parity {
            return false;
        }

        return true;
    }

    fn bonds_match(&self, target_order: BondOrder, query_order: BondOrder) -> bool {
        match self.flags.ignore_bond_order {
            true => true,
            false => target_order == query_order,
        }
    }

    /// Checks that mapping `query_atom` onto `target_atom` keeps every bond to an
    /// already-mapped query neighbor intact.
    fn is_feasible(&self, target_atom: usize, query_atom: usize) -> bool {

        if !self.atoms_match(target_atom, query_atom) {
            return false;
        }

        if self.target.degree(target_atom) < self.query.degree(query_atom) {
            return false;
        }

        for &(query_neighbor, query_bond) in self.query.neighbors(query_atom) {

            let mapped = match self.query_map[query_neighbor] {
                Some(mapped) => mapped,
                None => continue,
            };

            let target_bond = match self.target.bond_between(target_atom, mapped) {
                Some(bond) => bond,
                None => return false,
            };

            if !self.bonds_match(target_bond.order, self.query.bonds[query_bond].order) {
                return false;
            }
        }

        return true;
    }

    fn extend(&mut self, depth: usize) -> Result<bool, Error> {

        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(Error::Timeout);
            }
        }

        if depth == self.query_order.len() {
            return Ok(true);
        }

        let query_atom = self.query_order[depth];

        for target_atom in 0..self.target.atoms.len() {

            if self.target_used[target_atom] {
                continue;
            }

            if !self.is_feasible(target_atom, query_atom) {
                continue;
            }

            self.query_map[query_atom] = Some(target_atom);
            self.target_used[target_atom] = true;

            if self.extend(depth + 1)? {
                return Ok(true);
            }

            self.query_map[query_atom] = None;
            self.target_used[target_atom] = false;
        }

        return Ok(false);
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.pos + n > self.data.len() {
            return Err(Error::CorruptStore("truncated structure payload".to_string()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        return Ok(slice);
    }

    fn read_u8(&mut self) -> Result<u8, Error> {
        return Ok(self.take(1)?[0]);
    }

    fn read_u16(&mut self) -> Result<u16, Error> {
        return Ok(BigEndian::read_u16(self.take(2)?));
    }

    fn read_u32(&mut self) -> Result<u32, Error> {
        return Ok(BigEndian::read_u32(self.take(4)?));
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use std::time::Duration;

    fn ethanol() -> StructureGraph {
        return StructureGraph::from_line("C,C,O|0-1:1,1-2:1").unwrap();
    }

    fn acetic_acid() -> StructureGraph {
        return StructureGraph::from_line("C,C,O,O|0-1:1,1-2:2,1-3:1").unwrap();
    }

    fn benzene() -> StructureGraph {
        return StructureGraph::from_line("c,c,c,c,c,c|0-1:a,1-2:a,2-3:a,3-4:a,4-5:a,5-0:a").unwrap();
    }

    #[test]
    fn line_roundtrip() {

        let graph = StructureGraph::from_line("N+1,C,O-1#18@1|0-1:1,1-2:2").unwrap();

        assert_eq!(graph.atoms[0].charge, 1);
        assert_eq!(graph.atoms[2].charge, -1);
        assert_eq!(graph.atoms[2].isotope, 18);
        assert_eq!(graph.atoms[2].parity, 1);
        assert_eq!(graph.bonds[1].order, BondOrder::Double);

        let reparsed = StructureGraph::from_line(&graph.to_line()).unwrap();
        assert_eq!(graph, reparsed);
    }

    #[test]
    fn line_roundtrip_components() {

        let graph = StructureGraph::from_line("C,C;O,O|0-1:1,2-3:2").unwrap();

        assert_eq!(graph.component_count(), 2);
        assert_eq!(graph.atoms[1].component, 0);
        assert_eq!(graph.atoms[2].component, 1);

        let reparsed = StructureGraph::from_line(&graph.to_line()).unwrap();
        assert_eq!(graph, reparsed);
    }

    #[test]
    fn binary_roundtrip() {

        let graph = acetic_acid();
        let data = graph.serialize();
        let reparsed = StructureGraph::deserialize(&data).unwrap();

        assert_eq!(graph, reparsed);
        assert!(graph.exact_match(&reparsed, &MatchFlags::default()));
    }

    #[test]
    fn binary_truncated_is_corrupt() {

        let data = acetic_acid().serialize();

        let result = StructureGraph::deserialize(&data[..data.len() - 3]);
        assert!(matches!(result, Err(Error::CorruptStore(_))));
    }

    #[test]
    fn ethane_in_ethanol() {

        let target = ethanol();
        let query = StructureGraph::from_line("C,C|0-1:1").unwrap();

        let mapping = target.matches_substructure(&query, &MatchFlags::default(), None).unwrap();
        assert_eq!(mapping, Some(vec![0, 1]));
    }

    #[test]
    fn carbonyl_in_acetic_acid() {

        let target = acetic_acid();
        let query = StructureGraph::from_line("C,O|0-1:2").unwrap();

        let mapping = target.matches_substructure(&query, &MatchFlags::default(), None).unwrap();
        assert_eq!(mapping, Some(vec![1, 2]));
    }

    #[test]
    fn bond_order_respected() {

        let target = ethanol();
        let query = StructureGraph::from_line("C,O|0-1:2").unwrap();

        let mapping = target.matches_substructure(&query, &MatchFlags::default(), None).unwrap();
        assert_eq!(mapping, None);

        let flags = MatchFlags { ignore_bond_order: true, ..Default::default() };
        let mapping = target.matches_substructure(&query, &flags, None).unwrap();
        assert!(mapping.is_some());
    }

    #[test]
    fn aromatic_atoms_do_not_match_plain() {

        let target = benzene();
        let query = StructureGraph::from_line("C,C|0-1:1").unwrap();

        let mapping = target.matches_substructure(&query, &MatchFlags::default(), None).unwrap();
        assert_eq!(mapping, None);
    }

    #[test]
    fn charge_flag() {

        let target = StructureGraph::from_line("N+1,C|0-1:1").unwrap();
        let query = StructureGraph::from_line("N,C|0-1:1").unwrap();

        let strict = target.matches_substructure(&query, &MatchFlags::default(), None).unwrap();
        assert_eq!(strict, None);

        let flags = MatchFlags { ignore_charges: true, ..Default::default() };
        let loose = target.matches_substructure(&query, &flags, None).unwrap();
        assert!(loose.is_some());
    }

    #[test]
    fn empty_query_matches() {

        let target = ethanol();
        let query = StructureGraph::new();

        let mapping = target.matches_substructure(&query, &MatchFlags::default(), None).unwrap();
        assert_eq!(mapping, Some(vec![]));
    }

    #[test]
    fn query_larger_than_target() {

        let target = StructureGraph::from_line("C,C|0-1:1").unwrap();
        let query = ethanol();

        let mapping = target.matches_substructure(&query, &MatchFlags::default(), None).unwrap();
        assert_eq!(mapping, None);
    }

    #[test]
    fn exact_match_rejects_substructure() {

        let target = ethanol();
        let query = StructureGraph::from_line("C,C|0-1:1").unwrap();

        assert!(!target.exact_match(&query, &MatchFlags::default()));
        assert!(target.exact_match(&target.clone(), &MatchFlags::default()));
    }

    #[test]
    fn ring_not_found_in_chain() {

        let chain = StructureGraph::from_line("C,C,C,C|0-1:1,1-2:1,2-3:1").unwrap();
        let ring = StructureGraph::from_line("C,C,C|0-1:1,1-2:1,2-0:1").unwrap();

        let mapping = chain.matches_substructure(&ring, &MatchFlags::default(), None).unwrap();
        assert_eq!(mapping, None);
    }

    #[test]
    fn expired_deadline_times_out() {

        let target = StructureGraph::random(30);
        let query = StructureGraph::random(5);

        let expired = Instant::now().checked_sub(Duration::from_secs(1)).unwrap();
        let result = target.matches_substructure(&query, &MatchFlags::default(), Some(expired));

        assert!(matches!(result, Err(Error::Timeout)));
    }
}
