use crate::model::TopologyInput;
use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Reads a topology from `.json` or from a `.bin` snapshot.
pub fn load_topology_file(path: impl AsRef<Path>) -> Result<TopologyInput> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening topology {}", path.display()))?;
    let reader = BufReader::new(file);

    let input: TopologyInput = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_reader(reader)
            .with_context(|| format!("parsing topology json {}", path.display()))?,
        Some("bin") => bincode::deserialize_from(reader)
            .with_context(|| format!("decoding topology snapshot {}", path.display()))?,
        _ => bail!("unsupported topology file {}, expected .json or .bin", path.display()),
    };

    log::info!(
        "read {} stops, {} routes, {} connections from {}",
        input.stops.len(),
        input.routes.len(),
        input.connections.len(),
        path.display()
    );
    Ok(input)
}

/// Writes `input` as a bincode snapshot for fast restarts.
pub fn save_topology_snapshot(input: &TopologyInput, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    bincode::serialize_into(BufWriter::new(file), input)
        .with_context(|| format!("writing topology snapshot {}", path.display()))?;
    Ok(())
}
