use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use crate::common::{Job, MapReduce, MapReduceApp};
use crate::engine::{do_map, do_reduce};
use crate::files::merge_reduce_outputs;

/// Runs every map task, then every reduce task, in the calling thread.
pub struct SequentialMapReduce {
    job: Job,
    mr_app: Box<dyn MapReduceApp>,
}

impl SequentialMapReduce {
    pub fn run_sync(self) -> anyhow::Result<PathBuf> {
        let job = &self.job;
        for (i, file) in job.files.iter().enumerate() {
            do_map(
                &job.work_dir,
                &job.name,
                i,
                file,
                job.n_reduce,
                self.mr_app.as_ref(),
            )
            .with_context(|| format!("map task {i} failed"))?;
        }

        for r in 0..job.n_reduce {
            do_reduce(&job.work_dir, &job.name, r, job.n_map(), self.mr_app.as_ref())
                .with_context(|| format!("reduce task {r} failed"))?;
        }

        let answer = merge_reduce_outputs(&job.work_dir, &job.name, job.n_reduce)
            .context("cannot merge output files")?;
        info!(job = %job.name, answer = %answer.display(), "sequential job done");
        Ok(answer)
    }
}

#[async_trait]
impl MapReduce for SequentialMapReduce {
    fn new(job: Job, mr_app: Box<dyn MapReduceApp>) -> Self {
        Self { job, mr_app }
    }

    async fn run(self) -> anyhow::Result<PathBuf> {
        tokio::task::spawn_blocking(move || self.run_sync()).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::{self, ans_name, merge_name, read_key_value_file, reduce_name};
    use crate::map_reduce_apps::WordCount;
    use std::collections::HashMap;
    use std::fs;

    #[tokio::test]
    async fn sequential_word_count_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input_test.txt");
        fs::write(&input, "foo bar foo baz foo bar").unwrap();
        let job = Job::new("testjob", vec![input], 2, dir.path()).unwrap();

        let answer = SequentialMapReduce::new(job, Box::new(WordCount::new()))
            .run()
            .await
            .unwrap();
        assert_eq!(answer, dir.path().join(ans_name("testjob")));

        let got: HashMap<_, _> = read_key_value_file(&answer)
            .unwrap()
            .into_iter()
            .map(|kv| (kv.key, kv.value))
            .collect();
        let expected: HashMap<String, String> = [("foo", "3"), ("bar", "2"), ("baz", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(got, expected);

        files::clean_intermediary(dir.path(), "testjob", 1, 2);
        for r in 0..2 {
            assert!(!dir.path().join(reduce_name("testjob", 0, r)).exists());
            assert!(!dir.path().join(merge_name("testjob", r)).exists());
        }
        assert!(answer.exists());
    }

    #[test]
    fn sequential_multi_file_keys_sorted_per_shard() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "delta alpha charlie").unwrap();
        fs::write(&b, "alpha bravo delta delta").unwrap();
        let job = Job::new("multi", vec![a, b], 3, dir.path()).unwrap();

        let answer = SequentialMapReduce::new(job, Box::new(WordCount::new()))
            .run_sync()
            .unwrap();

        let kvs = read_key_value_file(&answer).unwrap();
        let got: HashMap<_, _> = kvs.iter().map(|kv| (kv.key.as_str(), kv.value.as_str())).collect();
        assert_eq!(got["alpha"], "2");
        assert_eq!(got["bravo"], "1");
        assert_eq!(got["charlie"], "1");
        assert_eq!(got["delta"], "3");
        assert_eq!(kvs.len(), 4);

        // The answer is the shard outputs back to back, each in key order.
        for r in 0..3 {
            let shard = read_key_value_file(&dir.path().join(merge_name("multi", r))).unwrap();
            let keys: Vec<_> = shard.iter().map(|kv| kv.key.clone()).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(keys, sorted);
        }
    }
}
