//! 结果收集
//!
//! Folds the response stream of one query into the set of hits still
//! standing when it ends.

use std::cmp::Ordering;
use std::collections::HashMap;

use rpc::{Hit, Response};

#[derive(Debug, Default)]
pub struct HitCollector {
    hits: HashMap<String, Hit>,
    outcome: Option<Response>,
}

impl HitCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one response; returns true once the stream has ended.
    pub fn apply(&mut self, response: Response) -> bool {
        match response {
            Response::HitsAdded { hits } => {
                for hit in hits {
                    self.hits.insert(hit.uri.clone(), hit);
                }
            }
            Response::HitsSubtracted { uris } => {
                for uri in &uris {
                    self.hits.remove(uri);
                }
            }
            Response::Finished | Response::Cancelled => {
                self.outcome = Some(response);
            }
            other => tracing::warn!("ignoring unexpected {} response", other.kind()),
        }
        self.is_done()
    }

    pub fn is_done(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(self.outcome, Some(Response::Cancelled))
    }

    /// Best score first; equal scores by URI.
    pub fn ranked(&self) -> Vec<&Hit> {
        let mut hits: Vec<&Hit> = self.hits.values().collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.uri.cmp(&b.uri))
        });
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(uri: &str, score: f32) -> Hit {
        Hit::new(uri, score, "NameIndex")
    }

    #[test]
    fn test_applies_adds_and_subtractions() {
        let mut collector = HitCollector::new();
        assert!(!collector.apply(Response::HitsAdded {
            hits: vec![hit("file:///a", 0.2), hit("file:///b", 0.9), hit("file:///c", 0.5)],
        }));
        assert!(!collector.apply(Response::HitsSubtracted {
            uris: vec!["file:///c".to_string(), "file:///never".to_string()],
        }));
        assert!(collector.apply(Response::Finished));

        let ids: Vec<_> = collector.ranked().iter().map(|h| h.short_id()).collect();
        assert_eq!(ids, vec!["/b", "/a"]);
        assert!(!collector.was_cancelled());
    }

    #[test]
    fn test_replacement_keeps_latest_score() {
        let mut collector = HitCollector::new();
        collector.apply(Response::HitsAdded { hits: vec![hit("file:///a", 0.1)] });
        collector.apply(Response::HitsSubtracted { uris: vec!["file:///a".to_string()] });
        collector.apply(Response::HitsAdded { hits: vec![hit("file:///a", 0.7)] });

        assert_eq!(collector.ranked()[0].score, 0.7);
    }

    #[test]
    fn test_ties_ordered_by_uri() {
        let mut collector = HitCollector::new();
        collector.apply(Response::HitsAdded {
            hits: vec![hit("file:///z", 0.5), hit("file:///m", 0.5)],
        });
        assert!(collector.apply(Response::Cancelled));

        let ids: Vec<_> = collector.ranked().iter().map(|h| h.short_id()).collect();
        assert_eq!(ids, vec!["/m", "/z"]);
        assert!(collector.was_cancelled());
    }
}
