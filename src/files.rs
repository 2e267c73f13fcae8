//! Naming and record format shared by every map, reduce and merge step.
//!
//! All files of a job sit in one directory and share the `mrtmp.` prefix:
//!
//! - `mrtmp.<job>-<map>-<reduce>`: output of map task `<map>` for shard `<reduce>`
//! - `mrtmp.<job>-res-<reduce>`: output of reduce task `<reduce>`
//! - `mrtmp.<job>`: the final answer
//!
//! Each file is a stream of JSON objects, one `KeyValue` per line.

use std::{
    fs::{self, File},
    hash::Hasher,
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::common::KeyValue;
use crate::engine::EngineError;

pub const PREFIX: &str = "mrtmp.";

/// Intermediate file that map task `map_task` produces for reduce task `reduce_task`.
pub fn reduce_name(job_name: &str, map_task: usize, reduce_task: usize) -> String {
    format!("{PREFIX}{job_name}-{map_task}-{reduce_task}")
}

/// Output file of reduce task `reduce_task`.
pub fn merge_name(job_name: &str, reduce_task: usize) -> String {
    format!("{PREFIX}{job_name}-res-{reduce_task}")
}

/// Final answer file of the job.
pub fn ans_name(job_name: &str) -> String {
    format!("{PREFIX}{job_name}")
}

/// Hashes an intermediate key (FNV-1a).
pub fn ihash(key: &str) -> u32 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(key.as_bytes());
    (hasher.finish() & 0x7fff_ffff) as u32
}

/// Reduce shard a key is routed to.
pub fn shard_for(key: &str, n_reduce: usize) -> usize {
    ihash(key) as usize % n_reduce
}

pub struct KeyValueWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> KeyValueWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    pub fn write(&mut self, kv: &KeyValue) -> io::Result<()> {
        serde_json::to_writer(&mut self.inner, kv)?;
        self.inner.write_all(b"\n")
    }

    pub fn finish(mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Creates (truncating) `path` for writing records.
pub fn create_key_value_file(path: &Path) -> Result<KeyValueWriter<File>, EngineError> {
    let file = File::create(path).map_err(|source| EngineError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(KeyValueWriter::new(file))
}

/// Decodes records until end of stream. A malformed or truncated record ends
/// the stream; everything before it is kept.
pub fn read_key_values<R: Read>(reader: R) -> Vec<KeyValue> {
    serde_json::Deserializer::from_reader(BufReader::new(reader))
        .into_iter::<KeyValue>()
        .map_while(Result::ok)
        .collect()
}

/// Reads every record of the file at `path`.
pub fn read_key_value_file(path: &Path) -> Result<Vec<KeyValue>, EngineError> {
    let file = File::open(path).map_err(|source| EngineError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(read_key_values(file))
}

/// Writes `sources`, in order, into a freshly created `destination`.
pub fn concat_files(destination: &Path, sources: &[PathBuf]) -> Result<(), EngineError> {
    let merge_err = |source: io::Error| EngineError::Merge {
        path: destination.to_path_buf(),
        source,
    };
    let mut dest = BufWriter::new(File::create(destination).map_err(merge_err)?);
    for src in sources {
        let mut src_file = File::open(src).map_err(|source| EngineError::Open {
            path: src.clone(),
            source,
        })?;
        io::copy(&mut src_file, &mut dest).map_err(merge_err)?;
    }
    dest.flush().map_err(merge_err)?;
    debug!(destination = %destination.display(), sources = sources.len(), "merged files");
    Ok(())
}

/// Merges the reduce outputs `0..n_reduce` of a job into its answer file.
pub fn merge_reduce_outputs(
    work_dir: &Path,
    job_name: &str,
    n_reduce: usize,
) -> Result<PathBuf, EngineError> {
    let res_files: Vec<PathBuf> = (0..n_reduce)
        .map(|r| work_dir.join(merge_name(job_name, r)))
        .collect();
    let answer = work_dir.join(ans_name(job_name));
    concat_files(&answer, &res_files)?;
    Ok(answer)
}

/// Removes every intermediate and reduce output file of a job. Files that
/// are already gone are skipped.
pub fn clean_intermediary(work_dir: &Path, job_name: &str, n_map: usize, n_reduce: usize) {
    for r in 0..n_reduce {
        for m in 0..n_map {
            remove_if_exists(&work_dir.join(reduce_name(job_name, m, r)));
        }
        remove_if_exists(&work_dir.join(merge_name(job_name, r)));
    }
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
