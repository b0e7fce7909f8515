//! Search cursors.
//!
//! All searches go through a cursor: `next()` advances to the following result
//! (screening out false positives internally), `current_id()` and
//! `current_score()` expose the result the cursor is parked on. A substructure
//! cursor moves Start -> Screening (at construction) -> Verifying -> Exhausted;
//! an expired per-query deadline surfaces as `Err(Error::Timeout)` from `next()`
//! and exhausts the cursor without touching the database handle.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::Error;
use crate::database::Database;
use crate::fingerprint::{encode_query_screen, Fingerprint};
use crate::graph::{StructureGraph, MatchFlags};
use crate::metric::Metric;

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub flags: MatchFlags,
    pub timeout: Option<Duration>,
}

impl SearchOptions {
    fn deadline(&self) -> Option<Instant> {
        return self.timeout.map(|t| Instant::now() + t);
    }
}

pub trait Cursor {
    /// Advances to the next result. `Ok(false)` means exhausted.
    fn next(&mut self) -> Result<bool, Error>;
    fn current_id(&self) -> Option<u64>;
    fn current_score(&self) -> Option<f32>;
}

/// Flat result set, shared by the binaries for JSON output.
#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub ids: Vec<u64>,
    pub scores: Option<Vec<f32>>,
}

impl SearchResults {
    pub fn to_json(&self) -> String {
        return serde_json::to_string(self).unwrap();
    }
}

/// Substructure search: screening candidates are gathered up front (transposed
/// index for optimized slots, linear superset scan for the unoptimized tail) and
/// ordered by id; verification runs lazily in `next()`.
pub struct SubMatcher<'a> {
    db: &'a Database,
    query: StructureGraph,
    flags: MatchFlags,
    deadline: Option<Instant>,
    /// Require the whole record to match, not just a subgraph.
    exact: bool,
    candidates: Vec<(u64, usize)>,
    position: usize,
    current: Option<(u64, Vec<usize>)>,
    exhausted: bool,
}

impl<'a> SubMatcher<'a> {

    pub(crate) fn new(db: &'a Database, query: &StructureGraph, options: &SearchOptions) -> Result<SubMatcher<'a>, Error> {

        let query_screen = encode_query_screen(query, db.fingerprint_config(), &options.flags);
        let snapshot = db.snapshot_count();

        let mut slots: Vec<usize> = match db.screen_index() {
            Some(index) => index.candidates(&query_screen),
            None => Vec::new(),
        };
        slots.retain(|&slot| slot < snapshot);

        let indexed = match db.screen_index() {
            Some(index) => std::cmp::min(index.indexed_count, snapshot),
            None => 0,
        };

        //records appended since the last optimize are screened directly
        for slot in indexed..snapshot {
            if db.entry(slot).screen.is_superset_of(&query_screen) {
                slots.push(slot);
            }
        }

        let mut candidates: Vec<(u64, usize)> = slots.into_iter()
            .map(|slot| (db.entry(slot).id, slot))
            .collect();
        candidates.sort();

        return Ok(SubMatcher {
            db,
            query: query.clone(),
            flags: options.flags,
            deadline: options.deadline(),
            exact: false,
            candidates,
            position: 0,
            current: None,
            exhausted: false,
        });
    }

    /// Exact-structure search: same screening as a substructure query (an exact
    /// match is in particular a substructure match, so the superset pre-filter
    /// keeps every true hit), verification additionally requires the record and
    /// the query to have the same atom and bond counts.
    pub(crate) fn new_exact(db: &'a Database, query: &StructureGraph, options: &SearchOptions) -> Result<SubMatcher<'a>, Error> {
        let mut matcher = SubMatcher::new(db, query, options)?;
        matcher.exact = true;
        return Ok(matcher);
    }

    /// Query-atom to record-atom mapping for the current result.
    pub fn current_mapping(&self) -> Option<&[usize]> {
        return self.current.as_ref().map(|(_, mapping)| mapping.as_slice());
    }

    pub fn close(self) {}

    pub fn collect_ids(mut self, limit: Option<usize>) -> Result<SearchResults, Error> {

        let mut ids = Vec::new();

        while self.next()? {
            ids.push(self.current_id().unwrap());
            if let Some(limit) = limit {
                if ids.len() >= limit {
                    break;
                }
            }
        }

        return Ok(SearchResults { ids, scores: None });
    }
}

impl<'a> Cursor for SubMatcher<'a> {

    fn next(&mut self) -> Result<bool, Error> {

        self.current = None;

        if self.exhausted {
            return Ok(false);
        }

        while self.position < self.candidates.len() {

            if let Some(deadline) = self.deadline {
                if Instant::now() > deadline {
                    self.exhausted = true;
                    return Err(Error::Timeout);
                }
            }

            let (id, slot) = self.candidates[self.position];
            self.position += 1;

            let target = self.db.load_graph(slot)?;

            if self.exact && (target.atom_count() != self.query.atom_count() || target.bond_count() != self.query.bond_count()) {
                continue;
            }

            match target.matches_substructure(&self.query, &self.flags, self.deadline) {
                Ok(Some(mapping)) => {
                    self.current = Some((id, mapping));
                    return Ok(true);
                },
                Ok(None) => continue, //screening false positive
                Err(e) => {
                    self.exhausted = true;
                    return Err(e);
                },
            }
        }

        self.exhausted = true;
        return Ok(false);
    }

    fn current_id(&self) -> Option<u64> {
        return self.current.as_ref().map(|(id, _)| *id);
    }

    fn current_score(&self) -> Option<f32> {
        return None;
    }
}

/// Similarity search over the inclusive [min, max] window. Unranked cursors walk
/// slots in storage order and score lazily with a popcount bound to skip slots
/// that cannot reach `min`; ranked cursors materialize the window up front,
/// ordered by score descending then id ascending, optionally truncated.
pub struct SimMatcher<'a> {
    db: &'a Database,
    query_sim: Fingerprint,
    metric: Metric,
    min: f32,
    max: f32,
    deadline: Option<Instant>,
    snapshot: usize,
    position: usize,
    ranked: Option<Vec<(u64, f32)>>,
    current: Option<(u64, f32)>,
    exhausted: bool,
}

impl<'a> SimMatcher<'a> {

    pub(crate) fn new(db: &'a Database, query_sim: Fingerprint, min: f32, max: f32, metric: Metric, timeout: Option<Duration>) -> Result<SimMatcher<'a>, Error> {

        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) || min > max {
            return Err(Error::ConfigurationMismatch(format!("bad similarity window: [{}, {}]", min, max)));
        }

        return Ok(SimMatcher {
            db,
            query_sim,
            metric,
            min,
            max,
            deadline: timeout.map(|t| Instant::now() + t),
            snapshot: db.snapshot_count(),
            position: 0,
            ranked: None,
            current: None,
            exhausted: false,
        });
    }

    pub(crate) fn new_ranked(db: &'a Database, query_sim: Fingerprint, min: f32, max: f32, metric: Metric, limit: Option<usize>, timeout: Option<Duration>) -> Result<SimMatcher<'a>, Error> {

        let mut matcher = SimMatcher::new(db, query_sim, min, max, metric, timeout)?;

        let mut hits: Vec<(u64, f32)> = Vec::new();
        while matcher.step()? {
            hits.push(matcher.current.unwrap());
        }

        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        if let Some(limit) = limit {
            hits.truncate(limit);
        }

        matcher.ranked = Some(hits);
        matcher.position = 0;
        matcher.current = None;
        matcher.exhausted = false;

        return Ok(matcher);
    }

    fn step(&mut self) -> Result<bool, Error> {

        self.current = None;

        let query_count = self.query_sim.popcount();

        while self.position < self.snapshot {

            if let Some(deadline) = self.deadline {
                if Instant::now() > deadline {
                    self.exhausted = true;
                    return Err(Error::Timeout);
                }
            }

            let slot = self.position;
            self.position += 1;

            let entry = self.db.entry(slot);

            if self.min > 0.0 && self.metric.upper_bound(query_count, entry.sim.popcount()) < self.min {
                continue;
            }

            let score = self.metric.score(&self.query_sim, &entry.sim);

            if score >= self.min && score <= self.max {
                self.current = Some((entry.id, score));
                return Ok(true);
            }
        }

        self.exhausted = true;
        return Ok(false);
    }

    pub fn close(self) {}

    pub fn collect(mut self, limit: Option<usize>) -> Result<SearchResults, Error> {

        let mut ids = Vec::new();
        let mut scores = Vec::new();

        while self.next()? {
            ids.push(self.current_id().unwrap());
            scores.push(self.current_score().unwrap());
            if let Some(limit) = limit {
                if ids.len() >= limit {
                    break;
                }
            }
        }

        return Ok(SearchResults { ids, scores: Some(scores) });
    }
}

impl<'a> Cursor for SimMatcher<'a> {

    fn next(&mut self) -> Result<bool, Error> {

        self.current = None;

        if self.exhausted {
            return Ok(false);
        }

        if let Some(hits) = self.ranked.as_ref() {

            if self.position < hits.len() {
                let hit = hits[self.position];
                self.position += 1;
                self.current = Some(hit);
                return Ok(true);
            }

            self.exhausted = true;
            return Ok(false);
        }

        return self.step();
    }

    fn current_id(&self) -> Option<u64> {
        return self.current.map(|(id, _)| id);
    }

    fn current_score(&self) -> Option<f32> {
        return self.current.map(|(_, score)| score);
    }
}

/// Ascending enumeration of every record id in the open snapshot.
pub struct IdMatcher {
    ids: Vec<u64>,
    position: usize,
    current: Option<u64>,
}

impl IdMatcher {

    pub(crate) fn new(mut ids: Vec<u64>) -> IdMatcher {
        ids.sort();
        return IdMatcher { ids, position: 0, current: None };
    }

    pub fn close(self) {}
}

impl Cursor for IdMatcher {

    fn next(&mut self) -> Result<bool, Error> {

        self.current = None;

        if self.position < self.ids.len() {
            self.current = Some(self.ids[self.position]);
            self.position += 1;
            return Ok(true);
        }

        return Ok(false);
    }

    fn current_id(&self) -> Option<u64> {
        return self.current;
    }

    fn current_score(&self) -> Option<f32> {
        return None;
    }
}
