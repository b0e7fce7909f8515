use chem_db::database::{Database, OpenMode};
use chem_db::graph::StructureGraph;
use chem_db::matcher::SearchOptions;
use chem_db::metric::Metric;

use std::time::Instant;
use log::info;
use rand::Rng;

fn main() {

    env_logger::init();

    let directory = std::env::args().nth(1).expect("No directory specified");

    let db = Database::open(&directory, OpenMode::ReadOnly).unwrap();
    info!("{}: {} records", &directory, db.num_records());

    let mut rng = rand::thread_rng();

    for _ in 0..10 {
        for num_atoms in [3, 5, 8].into_iter() {

            let query = StructureGraph::random(num_atoms);

            let start = Instant::now();
            let hits = db.search_substructure(&query, &SearchOptions::default()).unwrap()
                .collect_ids(Some(1000)).unwrap();
            info!("sub {} atoms: {} hits: {}", num_atoms, hits.ids.len(), start.elapsed().as_secs_f64());

            let min = rng.gen_range(0.3..0.9);

            let start = Instant::now();
            let hits = db.search_similar(&query, min, 1.0, Metric::Tanimoto, None).unwrap()
                .collect(Some(1000)).unwrap();
            info!("sim {} atoms min {:.2}: {} hits: {}", num_atoms, min, hits.ids.len(), start.elapsed().as_secs_f64());
        }
    }
}
