//! Merging of node and chunk hits into one ranked context list.

use std::cmp::Ordering;
use std::collections::HashSet;

use coderag_memory::QueryHit;

/// Which collection (or graph expansion) a context item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSource {
    Node,
    Chunk,
    Neighbor,
}

impl ContextSource {
    #[must_use]
    pub fn citation_prefix(self) -> &'static str {
        match self {
            Self::Node | Self::Neighbor => "node",
            Self::Chunk => "chunk",
        }
    }
}

/// One piece of retrieved context, cited by [`ContextItem::citation`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContextItem {
    pub id: String,
    pub source: ContextSource,
    pub similarity: f32,
    pub text: String,
}

impl ContextItem {
    fn from_hit(hit: QueryHit, source: ContextSource) -> Self {
        Self {
            text: hit.document.unwrap_or_default(),
            id: hit.id,
            source,
            similarity: hit.similarity,
        }
    }

    /// `[node:<id>]` or `[chunk:<id>]`.
    #[must_use]
    pub fn citation(&self) -> String {
        format!("[{}:{}]", self.source.citation_prefix(), self.id)
    }
}

fn compare(a: &ContextItem, b: &ContextItem) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.id.cmp(&b.id))
}

/// Merge both result lists: similarity descending, ties by ascending id, one
/// entry per id keeping its highest-similarity occurrence.
#[must_use]
pub fn merge_hits(nodes: Vec<QueryHit>, chunks: Vec<QueryHit>) -> Vec<ContextItem> {
    let mut items: Vec<ContextItem> = nodes
        .into_iter()
        .map(|h| ContextItem::from_hit(h, ContextSource::Node))
        .chain(
            chunks
                .into_iter()
                .map(|h| ContextItem::from_hit(h, ContextSource::Chunk)),
        )
        .collect();
    items.sort_by(compare);

    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.id.clone()));
    items
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn hit(id: &str, similarity: f32) -> QueryHit {
        QueryHit {
            id: id.into(),
            similarity,
            document: Some(format!("text of {id}")),
            metadata: Default::default(),
        }
    }

    #[test]
    fn duplicate_keeps_higher_occurrence() {
        let merged = merge_hits(
            vec![hit("a", 0.9), hit("b", 0.7)],
            vec![hit("b", 0.8), hit("c", 0.6)],
        );
        let got: Vec<_> = merged.iter().map(|i| (i.id.as_str(), i.similarity)).collect();
        assert_eq!(got, vec![("a", 0.9), ("b", 0.8), ("c", 0.6)]);
        assert_eq!(merged[1].source, ContextSource::Chunk);
        assert_eq!(merged[1].citation(), "[chunk:b]");
        assert_eq!(merged[0].citation(), "[node:a]");
    }

    #[test]
    fn equal_scores_order_by_id() {
        let merged = merge_hits(vec![hit("z", 0.5)], vec![hit("m", 0.5), hit("a", 0.5)]);
        let ids: Vec<_> = merged.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[test]
    fn empty_inputs() {
        assert!(merge_hits(Vec::new(), Vec::new()).is_empty());
    }

    fn hits_strategy() -> impl Strategy<Value = Vec<QueryHit>> {
        prop::collection::vec(("[a-f]", 0.0f32..1.0), 0..12)
            .prop_map(|v| v.into_iter().map(|(id, s)| hit(&id, s)).collect())
    }

    proptest! {
        #[test]
        fn merged_is_sorted_unique_and_keeps_max(
            nodes in hits_strategy(),
            chunks in hits_strategy(),
        ) {
            let all: Vec<QueryHit> = nodes.iter().chain(chunks.iter()).cloned().collect();
            let merged = merge_hits(nodes, chunks);

            let ids: HashSet<_> = merged.iter().map(|i| i.id.clone()).collect();
            prop_assert_eq!(ids.len(), merged.len());
            let expected: HashSet<_> = all.iter().map(|h| h.id.clone()).collect();
            prop_assert_eq!(&ids, &expected);

            for pair in merged.windows(2) {
                prop_assert!(compare(&pair[0], &pair[1]) != Ordering::Greater);
            }
            for item in &merged {
                let max = all
                    .iter()
                    .filter(|h| h.id == item.id)
                    .map(|h| h.similarity)
                    .fold(f32::MIN, f32::max);
                prop_assert!((item.similarity - max).abs() < f32::EPSILON);
            }
        }
    }
}
