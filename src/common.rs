use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// One record of every intermediate, reduce output and answer file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The user-supplied pair of functions a job runs.
pub trait MapReduceApp: Send + Sync {
    fn map(&self, contents: &str) -> Vec<KeyValue>;
    fn reduce(&self, key: &str, values: &[String]) -> String;
}

/// A fully described job: name, input files (one map task each) and shard count.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub files: Vec<PathBuf>,
    pub n_reduce: usize,
    /// Directory all `mrtmp.*` files of the job live in.
    pub work_dir: PathBuf,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        files: Vec<PathBuf>,
        n_reduce: usize,
        work_dir: impl Into<PathBuf>,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            bail!("job name must not be empty");
        }
        if files.is_empty() {
            bail!("no input files provided");
        }
        if n_reduce == 0 {
            bail!("nreduce must be at least 1");
        }
        Ok(Self {
            name,
            files,
            n_reduce,
            work_dir: work_dir.into(),
        })
    }

    pub fn n_map(&self) -> usize {
        self.files.len()
    }
}

#[async_trait]
pub trait MapReduce {
    fn new(job: Job, mr_app: Box<dyn MapReduceApp>) -> Self;
    async fn run(self) -> anyhow::Result<PathBuf>;
}

/// Splits a comma-separated input list, skipping empty entries.
pub fn parse_file_list(files: &str) -> Vec<PathBuf> {
    files
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Regular files of `input_dir`, sorted so map task numbers are stable.
pub fn read_files_from_dir(input_dir: impl AsRef<Path>) -> anyhow::Result<Vec<PathBuf>> {
    let input_dir = input_dir.as_ref();
    let mut input: Vec<_> = Vec::new();
    for entry in fs::read_dir(input_dir)
        .with_context(|| format!("failed to read input dir {}", input_dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() {
            input.push(path);
        }
    }
    input.sort();
    Ok(input)
}
