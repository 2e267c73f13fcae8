use std::collections::BTreeMap;

use crate::common::{KeyValue, MapReduceApp};
use regex::Regex;

/// Counts lowercase alphanumeric words. `map` pre-aggregates per input, so
/// every word appears once per map task; `reduce` sums the partial counts.
pub struct WordCount {
    words_regex: Regex,
}

impl WordCount {
    pub fn new() -> Self {
        Self {
            words_regex: Regex::new(r"[a-zA-Z0-9]+").expect("invalid regex"),
        }
    }
}

impl Default for WordCount {
    fn default() -> Self {
        Self::new()
    }
}

impl MapReduceApp for WordCount {
    fn map(&self, contents: &str) -> Vec<KeyValue> {
        let counts = self
            .words_regex
            .find_iter(contents)
            .fold(BTreeMap::new(), |mut acc, w| {
                *acc.entry(w.as_str().to_lowercase()).or_insert(0u64) += 1;
                acc
            });
        counts
            .into_iter()
            .map(|(word, count)| KeyValue::new(word, count.to_string()))
            .collect()
    }

    fn reduce(&self, _key: &str, values: &[String]) -> String {
        values
            .iter()
            .filter_map(|v| v.parse::<u64>().ok())
            .sum::<u64>()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn as_map(kvs: Vec<KeyValue>) -> HashMap<String, String> {
        kvs.into_iter().map(|kv| (kv.key, kv.value)).collect()
    }

    #[test]
    fn map_counts_words() {
        let got = as_map(WordCount::new().map("orange banana banana apple orange banana"));
        let expected: HashMap<String, String> = [("banana", "3"), ("orange", "2"), ("apple", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn map_is_case_insensitive() {
        let got = as_map(WordCount::new().map("ORANGE Banana bananA ApplE orange baNana"));
        assert_eq!(got["banana"], "3");
        assert_eq!(got["orange"], "2");
        assert_eq!(got["apple"], "1");
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn reduce_sums_partial_counts() {
        let values = vec!["1".to_string(), "2".to_string(), "1".to_string()];
        assert_eq!(WordCount::new().reduce("dummy", &values), "4");
    }
}
