//! A harness that loads a filter-stack configuration and a list of object
//! ids from disk, runs them through the engine, and prints accept/drop
//! decisions plus statistics as JSON. External collaborators the engine
//! doesn't implement itself (session resource provisioning, the cache
//! server, the blast channel) are backed by the engine's own in-memory
//! reference implementations rather than real infrastructure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::Parser;
use filterstack::external::{BlobCache, ScopeList};
use filterstack::hash::sha256_hex;
use filterstack::stats::Statistics;
use filterstack::testutil::{InMemoryCacheStore, NullObjectLoader, NullSessionContext, RecordingBlastChannel};
use filterstack::{FilterStack, Object};
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(name = "filterstack-cli", about = "Run a filter stack over a batch of objects and print decisions")]
struct Args {
    /// Path to a JSON array of filter descriptors.
    #[arg(long)]
    config: PathBuf,

    /// Path to a JSON array of objects (id + attributes).
    #[arg(long)]
    objects: PathBuf,

    /// Directory of content-addressed blobs, one file per SHA-256 digest.
    #[arg(long)]
    blobs: PathBuf,

    /// Number of worker threads evaluating the scope list concurrently.
    #[arg(long, default_value_t = 1)]
    threads: usize,
}

#[derive(Debug, Deserialize)]
struct DescriptorConfig {
    name: String,
    code_source: String,
    blob_source: String,
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    min_score: f64,
    #[serde(default = "default_max_score")]
    max_score: f64,
}

fn default_max_score() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct ObjectConfig {
    id: String,
    #[serde(default)]
    attrs: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct Report {
    decisions: HashMap<String, &'static str>,
    stats: StatsReport,
}

#[derive(Debug, Serialize)]
struct StatsReport {
    objs_processed: u64,
    objs_dropped: u64,
    objs_passed: u64,
    objs_cache_dropped: u64,
    objs_cache_passed: u64,
    objs_unloadable: u64,
    objs_terminate: u64,
}

/// A content-addressed blob store backed by a directory whose file names
/// are the lowercase hex SHA-256 digest of their contents.
struct FileBlobCache {
    dir: PathBuf,
}

impl BlobCache for FileBlobCache {
    fn get(&self, digest: &str) -> Option<Vec<u8>> {
        std::fs::read(self.dir.join(digest)).ok()
    }

    fn executable_path(&self, digest: &str) -> Option<PathBuf> {
        let path = self.dir.join(digest);
        path.is_file().then_some(path)
    }

    fn contains(&self, digest: &str) -> bool {
        self.dir.join(digest).is_file()
    }

    fn add(&self, data: &[u8]) -> String {
        let digest = sha256_hex(data);
        let _ = std::fs::write(self.dir.join(&digest), data);
        digest
    }
}

fn load_descriptors(path: &Path) -> Result<Vec<filterstack::descriptor::FilterDescriptor>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let configs: Vec<DescriptorConfig> = serde_json::from_str(&raw)?;
    Ok(configs
        .into_iter()
        .map(|c| {
            filterstack::descriptor::FilterDescriptor::new(
                c.name,
                c.code_source,
                c.blob_source,
                c.arguments,
                c.dependencies,
                c.min_score,
                c.max_score,
            )
        })
        .collect())
}

fn load_objects(path: &Path) -> Result<Vec<Object>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let configs: Vec<ObjectConfig> = serde_json::from_str(&raw)?;
    Ok(configs
        .into_iter()
        .map(|c| {
            let mut obj = Object::new(c.id.into_bytes());
            for (k, v) in c.attrs {
                obj.set(k.into_bytes(), v.into_bytes()).expect("freshly constructed object is valid");
            }
            obj
        })
        .collect())
}

fn run() -> Result<Report, Box<dyn std::error::Error>> {
    let args = Args::parse();

    let blobs = FileBlobCache { dir: args.blobs };
    let descriptors = load_descriptors(&args.config)?;
    let objects = load_objects(&args.objects)?;
    let all_ids: Vec<String> = objects
        .iter()
        .map(|o| String::from_utf8_lossy(o.id()).into_owned())
        .collect();

    let stack = FilterStack::build(
        descriptors,
        &blobs,
        Arc::new(NullSessionContext),
        Arc::new(InMemoryCacheStore::new()),
        Arc::new(NullObjectLoader),
    )
    .map_err(|e| -> Box<dyn std::error::Error> { Box::new(e) })?;

    let scope: ScopeList = Box::new(objects.into_iter());
    let blast = Arc::new(RecordingBlastChannel::new());
    let stats = Arc::new(Statistics::new());

    let handles = Arc::new(stack).start_threads(
        args.threads.max(1),
        Arc::new(Mutex::new(scope)),
        blast.clone(),
        stats.clone(),
    );
    for handle in handles {
        let _ = handle.join();
    }

    let accepted: std::collections::HashSet<String> = blast
        .sent_ids()
        .into_iter()
        .map(|id| String::from_utf8_lossy(&id).into_owned())
        .collect();
    let decisions = all_ids
        .into_iter()
        .map(|id| {
            let decision = if accepted.contains(&id) { "accept" } else { "drop" };
            (id, decision)
        })
        .collect();

    let snapshot = stats.snapshot();
    Ok(Report {
        decisions,
        stats: StatsReport {
            objs_processed: snapshot.objs_processed,
            objs_dropped: snapshot.objs_dropped,
            objs_passed: snapshot.objs_passed,
            objs_cache_dropped: snapshot.objs_cache_dropped,
            objs_cache_passed: snapshot.objs_cache_passed,
            objs_unloadable: snapshot.objs_unloadable,
            objs_terminate: snapshot.objs_terminate,
        },
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(report) => {
            let json = serde_json::to_string_pretty(&report).expect("Report is always serializable");
            println!("{json}");
        }
        Err(e) => {
            eprintln!("filterstack-cli: {e}");
            std::process::exit(1);
        }
    }
}
