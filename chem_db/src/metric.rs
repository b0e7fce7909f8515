//! Similarity metrics over similarity fingerprints.

use crate::error::Error;
use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    Tanimoto,
    Tversky { alpha: f32, beta: f32 },
}

impl Metric {

    /// Parses "tanimoto", "tversky" (alpha = beta = 1) or "tversky:<alpha>:<beta>".
    pub fn parse(spec: &str) -> Result<Metric, Error> {

        let mut items = spec.split(':');

        match items.next() {
            Some("tanimoto") => {
                match items.next() {
                    None => Ok(Metric::Tanimoto),
                    Some(_) => Err(Error::ConfigurationMismatch(format!("bad metric spec: '{}'", spec))),
                }
            },
            Some("tversky") => {
                let alpha = match items.next() {
                    None => return Ok(Metric::Tversky { alpha: 1.0, beta: 1.0 }),
                    Some(s) => s.parse::<f32>().map_err(|_| Error::ConfigurationMismatch(format!("bad metric spec: '{}'", spec)))?,
                };
                let beta = items.next()
                    .ok_or_else(|| Error::ConfigurationMismatch(format!("bad metric spec: '{}'", spec)))?
                    .parse::<f32>().map_err(|_| Error::ConfigurationMismatch(format!("bad metric spec: '{}'", spec)))?;

                //negative weights put scores outside [0, 1] and break the popcount bound
                if alpha < 0.0 || beta < 0.0 || !alpha.is_finite() || !beta.is_finite() {
                    return Err(Error::ConfigurationMismatch(format!("bad metric spec: '{}'", spec)));
                }

                return Ok(Metric::Tversky { alpha, beta });
            },
            _ => Err(Error::ConfigurationMismatch(format!("bad metric spec: '{}'", spec))),
        }
    }

    /// Score in [0, 1]. A fingerprint scored against itself is exactly 1.0; two
    /// all-zero fingerprints count as identical.
    pub fn score(&self, query: &Fingerprint, record: &Fingerprint) -> f32 {

        let common = query.common_bits(record) as f32;
        let query_count = query.popcount() as f32;
        let record_count = record.popcount() as f32;

        match self {
            Metric::Tanimoto => {
                let union = query_count + record_count - common;
                match union == 0.0 {
                    true => 1.0,
                    false => common / union,
                }
            },
            Metric::Tversky { alpha, beta } => {
                let denominator = alpha * (query_count - common) + beta * (record_count - common) + common;
                match denominator == 0.0 {
                    true => 1.0,
                    false => common / denominator,
                }
            },
        }
    }

    /// Best score any record with `record_count` set bits could reach against a
    /// query with `query_count` set bits (common bits capped by the smaller count).
    /// Used to skip records below the window minimum without touching their words.
    pub fn upper_bound(&self, query_count: u32, record_count: u32) -> f32 {

        let common = std::cmp::min(query_count, record_count) as f32;
        let query_count = query_count as f32;
        let record_count = record_count as f32;

        match self {
            Metric::Tanimoto => {
                let union = query_count + record_count - common;
                match union == 0.0 {
                    true => 1.0,
                    false => common / union,
                }
            },
            Metric::Tversky { alpha, beta } => {
                let denominator = alpha * (query_count - common) + beta * (record_count - common) + common;
                match denominator == 0.0 {
                    true => 1.0,
                    false => common / denominator,
                }
            },
        }
    }
}
