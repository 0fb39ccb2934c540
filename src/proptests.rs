use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::dict_buffers::DictBuffers;
use crate::encoding::code_points_to_word;
use crate::search::{predict, SearchOptions};
use crate::trie::node::{read_array_chain, PtNodeFlags, ROOT_POS};
use crate::{Config, DictPos, Dictionary, HeaderPolicy, UnigramProperty};

/// Walk the whole trie and check structural invariants against the
/// terminal table and header.
fn validate_dictionary(dict: &Dictionary, compacted: bool) {
    let buffers = dict.buffers();
    let mut stack = vec![(ROOT_POS, DictPos::NULL, 0usize)];
    let mut words = 0u32;
    while let Some((array, parent, depth)) = stack.pop() {
        let chain = read_array_chain(&buffers.trie, array).unwrap();
        if compacted {
            assert_eq!(chain.segments, 1, "compacted arrays are never chained");
            assert!(chain.nodes.iter().all(|n| !n.is_deleted()), "compacted trie has deleted nodes");
            assert!(array == ROOT_POS || !chain.nodes.is_empty(), "compacted trie has an empty array");
        }
        let mut first = Vec::new();
        for node in chain.live_nodes() {
            assert_eq!(node.parent_pos, parent, "parent of node {}", node.pos.raw());
            assert!(!first.contains(&node.code_points[0]), "siblings share a first code point");
            first.push(node.code_points[0]);
            let depth = depth + node.code_points.len();
            assert!(depth <= crate::MAX_WORD_LENGTH);

            if node.is_terminal() {
                let pos = buffers.terminals.position_of(node.terminal_id).unwrap();
                assert_eq!(pos, Some(node.pos), "terminal {} does not point back", node.terminal_id);
            }
            if node.represents_word() {
                words += 1;
            }
            if compacted {
                assert!(!node.will_become_non_terminal());
                assert_eq!(
                    node.flags.contains(PtNodeFlags::HAS_BIGRAMS),
                    node.is_terminal() && buffers.bigrams.get_list_head_pos(node.terminal_id).unwrap().is_some()
                );
            }
            if node.has_children() {
                stack.push((node.children_pos, node.pos, depth));
            }
        }
    }
    assert_eq!(words, dict.header().unigram_count, "header unigram count");
    if compacted {
        assert_eq!(buffers.terminals.next_terminal_id(), words, "terminal ids are dense");
    }
}

fn snapshot(buffers: &DictBuffers) -> Vec<Vec<u8>> {
    vec![
        buffers.trie.to_vec(),
        buffers.terminals.buffer().to_vec(),
        buffers.probabilities.buffer().to_vec(),
        buffers.bigrams.table().lookup_buffer().to_vec(),
        buffers.bigrams.table().address_buffer().to_vec(),
        buffers.bigrams.content_buffer().to_vec(),
        buffers.shortcuts.table().lookup_buffer().to_vec(),
        buffers.shortcuts.table().address_buffer().to_vec(),
        buffers.shortcuts.content_buffer().to_vec(),
    ]
}

#[derive(Clone, Debug)]
enum Op {
    AddUnigram(String, i32),
    RemoveUnigram(String),
    AddBigram(String, String, i32),
    Get(String),
    Compact,
}

fn word_strategy() -> impl Strategy<Value = String> + Clone {
    // A small alphabet so words share prefixes and edges get split.
    "[a-d]{1,6}"
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let word = word_strategy();
    let op = prop_oneof![
        40 => (word.clone(), 0..=255i32).prop_map(|(w, p)| Op::AddUnigram(w, p)),
        15 => word.clone().prop_map(Op::RemoveUnigram),
        20 => (word.clone(), word.clone(), 0..=255i32).prop_map(|(a, b, p)| Op::AddBigram(a, b, p)),
        23 => word.clone().prop_map(Op::Get),
        2 => Just(Op::Compact),
    ];
    prop::collection::vec(op, 0..=300)
}

/// The dictionary and a model of its expected contents.
struct Harness {
    dict: Dictionary,
    unigrams: BTreeMap<String, i32>,
    bigrams: BTreeMap<(String, String), i32>,
}

impl Harness {
    fn new() -> Self {
        Self {
            dict: Dictionary::create(HeaderPolicy::new_static("en"), Config::default()).unwrap(),
            unigrams: BTreeMap::new(),
            bigrams: BTreeMap::new(),
        }
    }

    fn apply(&mut self, op: Op) -> Result<(), TestCaseError> {
        match op {
            Op::AddUnigram(w, p) => {
                let added = self.dict.add_unigram(&w, &UnigramProperty::new(p)).unwrap();
                prop_assert_eq!(added, self.unigrams.insert(w, p).is_none());
            }
            Op::RemoveUnigram(w) => {
                // Drop the word's bigrams first so a later revival starts clean.
                let linked: Vec<_> = self
                    .bigrams
                    .keys()
                    .filter(|(a, b)| *a == w || *b == w)
                    .cloned()
                    .collect();
                for (a, b) in linked {
                    prop_assert!(self.dict.remove_bigram(&a, &b).unwrap());
                    self.bigrams.remove(&(a, b));
                }
                let removed = self.dict.remove_unigram(&w).unwrap();
                prop_assert_eq!(removed, self.unigrams.remove(&w).is_some());
            }
            Op::AddBigram(a, b, p) => {
                let result = self.dict.add_bigram(&a, &b, p, 0);
                if self.unigrams.contains_key(&a) && self.unigrams.contains_key(&b) {
                    let added = result.unwrap();
                    prop_assert_eq!(added, self.bigrams.insert((a, b), p).is_none());
                } else {
                    prop_assert!(result.is_err());
                }
            }
            Op::Get(w) => {
                prop_assert_eq!(self.dict.get_probability(&w).unwrap(), self.unigrams.get(&w).copied());
                let mut got: Vec<_> = self
                    .dict
                    .get_bigrams(&w)
                    .unwrap()
                    .into_iter()
                    .map(|b| (b.word, b.probability))
                    .collect();
                got.sort();
                let expected: Vec<_> = self
                    .bigrams
                    .iter()
                    .filter(|((a, _), _)| *a == w)
                    .map(|((_, b), p)| (b.clone(), *p))
                    .collect();
                prop_assert_eq!(got, expected);
            }
            Op::Compact => {
                self.dict.compact().unwrap();
                validate_dictionary(&self.dict, true);
            }
        }
        prop_assert_eq!(self.dict.header().unigram_count as usize, self.unigrams.len());
        prop_assert_eq!(self.dict.header().bigram_count as usize, self.bigrams.len());
        Ok(())
    }

    fn check_contents(&self) -> Result<(), TestCaseError> {
        for (w, p) in &self.unigrams {
            prop_assert_eq!(self.dict.get_probability(w).unwrap(), Some(*p));
            let id = self.dict.get_terminal_id(w).unwrap().unwrap();
            let word = self.dict.word_of(id).unwrap();
            prop_assert_eq!(word.as_deref(), Some(w.as_str()));
        }
        for ((a, b), p) in &self.bigrams {
            let found = self.dict.get_bigrams(a).unwrap().into_iter().find(|x| x.word == *b);
            prop_assert_eq!(found.map(|x| x.probability), Some(*p));
        }
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in ops_strategy()) {
        let mut h = Harness::new();
        for op in ops {
            h.apply(op)?;
        }
        validate_dictionary(&h.dict, false);
        h.check_contents()?;

        h.dict.compact().unwrap();
        validate_dictionary(&h.dict, true);
        h.check_contents()?;
    }

    #[test]
    fn prop_compaction_idempotent(ops in ops_strategy()) {
        let mut h = Harness::new();
        for op in ops {
            h.apply(op)?;
        }
        h.dict.compact().unwrap();
        let first = snapshot(h.dict.buffers());
        let header = h.dict.header().clone();
        h.dict.compact().unwrap();
        prop_assert_eq!(snapshot(h.dict.buffers()), first);
        prop_assert_eq!(h.dict.header(), &header);
    }

    #[test]
    fn prop_predict_matches_prefix_scan(ops in ops_strategy(), prefix in "[a-d]{0,3}") {
        let mut h = Harness::new();
        for op in ops {
            h.apply(op)?;
        }
        let mut out = Vec::new();
        predict(&h.dict, &prefix, None, &SearchOptions::default(), 0.0, &mut out).unwrap();
        let mut got: Vec<String> = out
            .iter()
            .map(|c| code_points_to_word(&c.code_points).unwrap())
            .collect();
        got.sort();
        let expected: Vec<String> = h.unigrams.keys().filter(|w| w.starts_with(&prefix)).cloned().collect();
        prop_assert_eq!(got, expected);
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

const SMALL_SET: [&str; 6] = ["a", "ab", "abc", "b", "ba", "bab"];

#[test]
fn exhaustive_insert_order_small_set() {
    for_each_permutation(&SMALL_SET, |perm| {
        let mut dict = Dictionary::create(HeaderPolicy::new_static("en"), Config::default()).unwrap();
        for w in &perm {
            dict.add_unigram(w, &UnigramProperty::new(w.len() as i32)).unwrap();
        }
        validate_dictionary(&dict, false);
        dict.compact().unwrap();
        validate_dictionary(&dict, true);
        for w in SMALL_SET {
            assert_eq!(dict.get_probability(w).unwrap(), Some(w.len() as i32), "{perm:?}");
        }
        assert_eq!(dict.get_probability("bb").unwrap(), None);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    for_each_permutation(&SMALL_SET, |perm| {
        let mut dict = Dictionary::create(HeaderPolicy::new_static("en"), Config::default()).unwrap();
        for w in SMALL_SET {
            dict.add_unigram(w, &UnigramProperty::new(1)).unwrap();
        }
        let mut left: Vec<_> = SMALL_SET.to_vec();
        for (i, w) in perm.iter().enumerate() {
            assert!(dict.remove_unigram(w).unwrap());
            left.retain(|x| x != w);
            if i % 2 == 0 {
                dict.compact().unwrap();
                validate_dictionary(&dict, true);
            } else {
                validate_dictionary(&dict, false);
            }
            for x in &left {
                assert!(dict.get_probability(x).unwrap().is_some(), "{x} lost after removing {perm:?}");
            }
        }
        dict.compact().unwrap();
        let root = read_array_chain(&dict.buffers().trie, ROOT_POS).unwrap();
        assert!(root.nodes.is_empty());
        assert_eq!(dict.buffers().terminals.next_terminal_id(), 0);
    });
}
