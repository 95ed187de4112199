//! Unification clusters: a disjoint-set of terms that may denote the same
//! entity, with a `term -> cluster` map and a `cluster -> term set` view.
//!
//! Clusters grow monotonically while the graph is enumerated; they are never
//! split. Membership answers "could these two terms co-refer in some
//! solution", not "do they co-refer"; the ILP decides the latter.

use crate::ast::Term;
use std::collections::{BTreeSet, HashMap};

/// Dense id of one equivalence class.
pub type ClusterId = usize;

#[derive(Debug, Default)]
pub struct ClusterSet {
    term_to_cluster: HashMap<Term, ClusterId>,
    clusters: HashMap<ClusterId, BTreeSet<Term>>,
    next_id: ClusterId,
}

impl ClusterSet {
    pub fn new() -> Self {
        ClusterSet::default()
    }

    /// Record that `t1` and `t2` are unifiable, merging clusters as needed.
    pub fn add(&mut self, t1: &Term, t2: &Term) {
        match (
            self.term_to_cluster.get(t1).copied(),
            self.term_to_cluster.get(t2).copied(),
        ) {
            (None, None) => {
                let id = self.next_id;
                self.next_id += 1;
                let mut set = BTreeSet::new();
                set.insert(t1.clone());
                set.insert(t2.clone());
                self.clusters.insert(id, set);
                self.term_to_cluster.insert(t1.clone(), id);
                self.term_to_cluster.insert(t2.clone(), id);
            }
            (Some(id), None) => {
                self.insert_into(id, t2.clone());
            }
            (None, Some(id)) => {
                self.insert_into(id, t1.clone());
            }
            (Some(a), Some(b)) if a != b => self.merge(a, b),
            (Some(_), Some(_)) => {}
        }
    }

    fn insert_into(&mut self, id: ClusterId, term: Term) {
        self.term_to_cluster.insert(term.clone(), id);
        self.clusters.entry(id).or_default().insert(term);
    }

    /// Merge the smaller cluster into the larger.
    fn merge(&mut self, a: ClusterId, b: ClusterId) {
        let (keep, drop) = {
            let la = self.clusters.get(&a).map_or(0, BTreeSet::len);
            let lb = self.clusters.get(&b).map_or(0, BTreeSet::len);
            if la >= lb {
                (a, b)
            } else {
                (b, a)
            }
        };
        let Some(moved) = self.clusters.remove(&drop) else {
            return;
        };
        for term in &moved {
            self.term_to_cluster.insert(term.clone(), keep);
        }
        self.clusters.entry(keep).or_default().extend(moved);
    }

    pub fn cluster_of(&self, term: &Term) -> Option<ClusterId> {
        self.term_to_cluster.get(term).copied()
    }

    pub fn find_cluster(&self, term: &Term) -> Option<&BTreeSet<Term>> {
        let id = self.term_to_cluster.get(term)?;
        self.clusters.get(id)
    }

    pub fn in_same_cluster(&self, t1: &Term, t2: &Term) -> bool {
        match (self.term_to_cluster.get(t1), self.term_to_cluster.get(t2)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn clusters(&self) -> &HashMap<ClusterId, BTreeSet<Term>> {
        &self.clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Term {
        Term::new(s)
    }

    #[test]
    fn pairs_form_and_merge_clusters() {
        let mut cs = ClusterSet::new();
        cs.add(&t("x"), &t("y"));
        cs.add(&t("a"), &t("b"));
        assert!(cs.in_same_cluster(&t("x"), &t("y")));
        assert!(!cs.in_same_cluster(&t("x"), &t("a")));

        cs.add(&t("y"), &t("a"));
        assert!(cs.in_same_cluster(&t("x"), &t("b")));
        let cluster = cs.find_cluster(&t("x")).expect("cluster");
        assert_eq!(cluster.len(), 4);
    }

    #[test]
    fn unknown_terms_are_not_clustered() {
        let cs = ClusterSet::new();
        assert!(cs.find_cluster(&t("z")).is_none());
        assert!(!cs.in_same_cluster(&t("z"), &t("z")));
    }

    #[test]
    fn growth_is_monotone() {
        let mut cs = ClusterSet::new();
        cs.add(&t("x"), &t("y"));
        let id = cs.cluster_of(&t("x")).expect("id");
        cs.add(&t("x"), &t("z"));
        assert_eq!(cs.cluster_of(&t("x")), Some(id));
        assert_eq!(cs.cluster_of(&t("z")), Some(id));
    }
}
