use chem_db::database::{Database, DatabaseConfig, OpenMode, RecordKind};
use chem_db::graph::StructureGraph;

use kdam::tqdm;
use glob::glob;
use log::{info, warn};
use rand::Rng;
use::std::fs::File;
use std::io::{self, BufRead};
use std::path::Path;


// The output is wrapped in a Result to allow matching on errors
// Returns an Iterator to the Reader of the lines of the file.
fn read_lines<P>(filename: P) -> io::Result<io::Lines<io::BufReader<File>>>
where P: AsRef<Path>, {
    let file = File::open(filename)?;
    Ok(io::BufReader::new(file).lines())
}


use clap::Parser;
#[derive(Parser, Debug)] #[command(author, version, about, long_about = None)]
struct Args {

    //Which task to carry out
    #[arg(short, long)]
    task: String,

    //Database directory
    #[arg(short, long)]
    directory: String,

    //Glob of input structure files for build_from_file
    #[arg(short, long)]
    input_glob: Option<String>,

    //Store reactions instead of molecules
    #[arg(short, long, default_value_t = false)]
    reactions: bool,

    //Number of records for build_random
    #[arg(short, long)]
    num_records: Option<usize>,
}

fn main() {

    env_logger::init();

    let args = Args::parse();

    match args.task.as_str() {
        "build_from_file" => build_from_file(args),
        "build_random" => build_random(args),
        "optimize" => optimize(args),
        _ => panic!("Unknown task: {}", args.task),
    }
}

fn make_config(args: &Args) -> DatabaseConfig {

    let mut config = DatabaseConfig::default();
    config.directory = args.directory.clone();

    if args.reactions {
        config.kind = RecordKind::Reaction;
    }

    return config;
}

fn build_from_file(args: Args) {

    let pattern = args.input_glob.clone().expect("build_from_file needs --input-glob");

    let config = make_config(&args);
    let mut db = Database::create(config).unwrap();

    let mut filenames: Vec<String> = glob(&pattern).expect("Glob failed").map(|x| x.unwrap().into_os_string().into_string().unwrap()).collect();
    filenames.sort();

    for filename in filenames.iter() {

        info!("loading {}", filename);

        let lines = read_lines(filename).unwrap();

        for line in tqdm!(lines) {

            if let Ok(good_line) = line {

                if good_line.trim().is_empty() {
                    continue;
                }

                let structure = match StructureGraph::from_line(&good_line) {
                    Ok(structure) => structure,
                    Err(e) => {
                        warn!("skipping unparseable line: {:?}", e);
                        continue;
                    }
                };

                match db.insert(&structure, None) {
                    Ok(_) => {},
                    Err(e) => {
                        warn!("skipping record: {:?}", e);
                        continue;
                    }
                }
            }
        }
    }

    info!("inserted {} records, building screening index", db.num_records());

    db.optimize().unwrap();
    db.close().unwrap();
}

fn build_random(args: Args) {

    let num_records = args.num_records.expect("build_random needs --num-records");

    let config = make_config(&args);
    let mut db = Database::force_create(config).unwrap();

    let mut rng = rand::thread_rng();

    for _ in tqdm!(0..num_records) {
        let structure = StructureGraph::random(rng.gen_range(4..20));
        db.insert(&structure, None).unwrap();
    }

    db.optimize().unwrap();
    db.close().unwrap();
}

fn optimize(args: Args) {

    let mut db = Database::open(&args.directory, OpenMode::ReadWrite).unwrap();

    info!("rebuilding screening index over {} records", db.num_records());

    db.optimize().unwrap();
    db.close().unwrap();
}
