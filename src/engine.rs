use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info};

use crate::common::{KeyValue, MapReduceApp};
use crate::files::{self, create_key_value_file, merge_name, reduce_name, shard_for};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to read input file {path}: {source}")]
    ReadInput { path: PathBuf, source: io::Error },
    #[error("failed to create {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("failed to write records to {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to merge into {path}: {source}")]
    Merge { path: PathBuf, source: io::Error },
}

/// Runs map task `map_task` over `in_file` and writes one intermediate file
/// per reduce shard into `work_dir`. All `n_reduce` files are (re)created,
/// so rerunning a task overwrites its previous output.
pub fn do_map(
    work_dir: &Path,
    job_name: &str,
    map_task: usize,
    in_file: &Path,
    n_reduce: usize,
    mr_app: &dyn MapReduceApp,
) -> Result<(), EngineError> {
    let contents = fs::read_to_string(in_file).map_err(|source| EngineError::ReadInput {
        path: in_file.to_path_buf(),
        source,
    })?;
    debug!(job = job_name, map_task, file = %in_file.display(), "map read");

    let key_values = mr_app.map(&contents);

    let paths: Vec<PathBuf> = (0..n_reduce)
        .map(|r| work_dir.join(reduce_name(job_name, map_task, r)))
        .collect();
    let mut writers = paths
        .iter()
        .map(|path| create_key_value_file(path))
        .collect::<Result<Vec<_>, _>>()?;

    for kv in &key_values {
        let r = shard_for(&kv.key, n_reduce);
        writers[r].write(kv).map_err(|source| EngineError::Write {
            path: paths[r].clone(),
            source,
        })?;
    }

    for (writer, path) in writers.into_iter().zip(&paths) {
        writer.finish().map_err(|source| EngineError::Write {
            path: path.clone(),
            source,
        })?;
    }

    info!(
        job = job_name,
        map_task,
        records = key_values.len(),
        shards = n_reduce,
        "map write"
    );
    Ok(())
}

/// Runs reduce task `reduce_task`: gathers its shard from all `n_map`
/// intermediate files, groups values by key and writes one record per key,
/// keys in ascending byte order.
pub fn do_reduce(
    work_dir: &Path,
    job_name: &str,
    reduce_task: usize,
    n_map: usize,
    mr_app: &dyn MapReduceApp,
) -> Result<(), EngineError> {
    let mut grouped_key_values: HashMap<String, Vec<String>> = HashMap::new();
    for m in 0..n_map {
        let path = work_dir.join(reduce_name(job_name, m, reduce_task));
        let key_values = files::read_key_value_file(&path)?;
        debug!(job = job_name, reduce_task, map_task = m, records = key_values.len(), "reduce read");
        for KeyValue { key, value } in key_values {
            grouped_key_values.entry(key).or_default().push(value);
        }
    }

    let mut keys: Vec<&String> = grouped_key_values.keys().collect();
    keys.sort();

    let output_path = work_dir.join(merge_name(job_name, reduce_task));
    let mut writer = create_key_value_file(&output_path)?;
    let write_err = |source: io::Error| EngineError::Write {
        path: output_path.clone(),
        source,
    };
    for key in &keys {
        let value = mr_app.reduce(key, &grouped_key_values[*key]);
        writer
            .write(&KeyValue::new(key.as_str(), value))
            .map_err(write_err)?;
    }
    writer.finish().map_err(write_err)?;

    info!(job = job_name, reduce_task, keys = keys.len(), "reduce write");
    Ok(())
}
