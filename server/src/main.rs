use chem_db::database::{Database, OpenMode};
use chem_db::graph::StructureGraph;
use chem_db::matcher::SearchOptions;
use chem_db::metric::Metric;

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response};
use hyper::server::Server;

use clap::Parser;

const MAX_RESULTS: usize = 1000;
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)] #[command(author, version, about, long_about = None)]
struct Args {

    //Directory of the database to serve
    #[arg()]
    directory: String,

    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

fn plain(message: &str) -> Result<Response<Body>, Infallible> {
    return Ok(Response::new(Body::from(message.to_string())));
}

async fn handle(req: Request<Body>, db: Arc<Mutex<Database>>) -> Result<Response<Body>, Infallible> {

    let path = req.uri().path().to_string();

    let mut items = path.split("/");

    let method = items.nth(1).unwrap_or("");
    let rest: Vec<&str> = items.collect();

    let retval = match method {

        "sub" => query_substructure(&rest, db),
        "sim" => query_similarity(&rest, db),
        "get" => get_record(&rest, db),
        _ => plain("method not recognized"),
    };

    return retval;
}

// /sub/<structure line>
fn query_substructure(rest: &[&str], db: Arc<Mutex<Database>>) -> Result<Response<Body>, Infallible> {

    let line = match rest.first() {
        Some(line) => *line,
        None => return plain("missing query structure"),
    };

    let query = match StructureGraph::from_line(line) {
        Ok(query) => query,
        Err(_) => return plain("invalid query structure"),
    };

    let options = SearchOptions {
        timeout: Some(QUERY_TIMEOUT),
        ..Default::default()
    };

    let mg = db.lock().unwrap();

    let results = mg.search_substructure(&query, &options)
        .and_then(|matcher| matcher.collect_ids(Some(MAX_RESULTS)));

    match results {
        Ok(results) => plain(&results.to_json()),
        Err(e) => plain(&format!("query failed: {:?}", e)),
    }
}

// /sim/<min>/<max>/<metric>/<structure line>
fn query_similarity(rest: &[&str], db: Arc<Mutex<Database>>) -> Result<Response<Body>, Infallible> {

    if rest.len() != 4 {
        return plain("expected /sim/<min>/<max>/<metric>/<structure>");
    }

    let min = match rest[0].parse::<f32>() {
        Ok(min) => min,
        Err(_) => return plain("invalid window minimum"),
    };

    let max = match rest[1].parse::<f32>() {
        Ok(max) => max,
        Err(_) => return plain("invalid window maximum"),
    };

    let metric = match Metric::parse(rest[2]) {
        Ok(metric) => metric,
        Err(_) => return plain("invalid metric"),
    };

    let query = match StructureGraph::from_line(rest[3]) {
        Ok(query) => query,
        Err(_) => return plain("invalid query structure"),
    };

    let mg = db.lock().unwrap();

    let results = mg.search_similar_ranked(&query, min, max, metric, Some(MAX_RESULTS), Some(QUERY_TIMEOUT))
        .and_then(|matcher| matcher.collect(None));

    match results {
        Ok(results) => plain(&results.to_json()),
        Err(e) => plain(&format!("query failed: {:?}", e)),
    }
}

// /get/<id>
fn get_record(rest: &[&str], db: Arc<Mutex<Database>>) -> Result<Response<Body>, Infallible> {

    let id = match rest.first().map(|s| s.parse::<u64>()) {
        Some(Ok(id)) => id,
        _ => return plain("invalid record id"),
    };

    let mg = db.lock().unwrap();

    match mg.get_by_id(id) {
        Ok(structure) => {
            let body = serde_json::json!({
                "id": id,
                "structure": structure.to_line(),
            });
            plain(&body.to_string())
        },
        Err(e) => plain(&format!("query failed: {:?}", e)),
    }
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {

    let args = Args::parse();

    let db = Database::open(&args.directory, OpenMode::ReadOnly).expect("failed to open database");
    println!("serving {} records from {}", db.num_records(), &args.directory);

    let db = Arc::new(Mutex::new(db));

    // For every connection, we must make a `Service` to handle all
    // incoming HTTP requests on said connection.
    let make_svc = make_service_fn(move |_conn| {
        let db = db.clone();
        async move { Ok::<_, Infallible>(service_fn( move |req| {
            let db = db.clone();
            handle(req, db)
        }
            ))}
    });

    let addr = ([127, 0, 0, 1], args.port).into();

    let server = Server::bind(&addr).serve(make_svc);

    println!("Listening on http://{}", addr);

    server.await?;

    Ok(())
}
