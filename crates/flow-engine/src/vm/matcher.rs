//! Match-table dispatch
//!
//! Each `match` statement compiles to a [`MatchDef`] in the constant pool.
//! When a program is assembled every table is turned into a [`Match`], the
//! lookup structure the runner evaluates the subject string against:
//!
//! - `Same`: hash lookup of the whole subject
//! - `Head`: longest label that is a prefix of the subject (prefix tree)
//! - `Tail`: longest label that is a suffix of the subject (prefix tree over
//!   reversed bytes)
//! - `RegExp`: first pattern in case order that matches; its captures become
//!   visible to `sreggroup`
//!
//! With duplicate labels the earliest case wins. No match yields the table's
//! else target.

use std::sync::Arc;

use regex::{Captures, Regex};
use rustc_hash::FxHashMap;

use super::constants::{ConstantPool, MatchDef};
use super::{VmError, VmResult};
use crate::types::MatchClass;

/// Capture groups of the most recent successful regex match
#[derive(Debug, Clone, Default)]
pub struct RegExpContext {
    groups: Vec<Option<Arc<str>>>,
}

impl RegExpContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the groups of `captures`
    pub fn set(&mut self, captures: &Captures<'_>) {
        self.groups = captures
            .iter()
            .map(|m| m.map(|m| Arc::from(m.as_str())))
            .collect();
    }

    /// Forget any previous match
    pub fn clear(&mut self) {
        self.groups.clear();
    }

    /// Group `index`; empty when absent or unmatched
    pub fn group(&self, index: usize) -> Arc<str> {
        self.groups
            .get(index)
            .and_then(Clone::clone)
            .unwrap_or_else(|| Arc::from(""))
    }

    /// Number of groups including group 0
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no match is remembered
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Exact-string dispatch
#[derive(Debug, Clone, Default)]
pub struct MatchSame {
    map: FxHashMap<Arc<str>, usize>,
}

impl MatchSame {
    fn insert(&mut self, label: Arc<str>, pc: usize) {
        self.map.entry(label).or_insert(pc);
    }

    fn evaluate(&self, subject: &str) -> Option<usize> {
        self.map.get(subject).copied()
    }
}

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: FxHashMap<u8, usize>,
    pc: Option<usize>,
}

/// Byte-wise prefix tree; node 0 is the root
#[derive(Debug, Clone)]
struct PrefixTree {
    nodes: Vec<TrieNode>,
}

impl Default for PrefixTree {
    fn default() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
        }
    }
}

impl PrefixTree {
    fn insert(&mut self, key: impl Iterator<Item = u8>, pc: usize) {
        let mut node = 0;
        for byte in key {
            node = match self.nodes[node].children.get(&byte) {
                Some(&next) => next,
                None => {
                    self.nodes.push(TrieNode::default());
                    let next = self.nodes.len() - 1;
                    self.nodes[node].children.insert(byte, next);
                    next
                }
            };
        }
        self.nodes[node].pc.get_or_insert(pc);
    }

    /// Target of the longest inserted key that prefixes `subject`
    fn longest(&self, subject: impl Iterator<Item = u8>) -> Option<usize> {
        let mut node = 0;
        let mut best = self.nodes[0].pc;
        for byte in subject {
            match self.nodes[node].children.get(&byte) {
                Some(&next) => node = next,
                None => break,
            }
            if let Some(pc) = self.nodes[node].pc {
                best = Some(pc);
            }
        }
        best
    }
}

/// Longest-prefix dispatch
#[derive(Debug, Clone, Default)]
pub struct MatchHead {
    tree: PrefixTree,
}

impl MatchHead {
    fn insert(&mut self, label: &str, pc: usize) {
        self.tree.insert(label.bytes(), pc);
    }

    fn evaluate(&self, subject: &str) -> Option<usize> {
        self.tree.longest(subject.bytes())
    }
}

/// Longest-suffix dispatch
#[derive(Debug, Clone, Default)]
pub struct MatchTail {
    tree: PrefixTree,
}

impl MatchTail {
    fn insert(&mut self, label: &str, pc: usize) {
        self.tree.insert(label.bytes().rev(), pc);
    }

    fn evaluate(&self, subject: &str) -> Option<usize> {
        self.tree.longest(subject.bytes().rev())
    }
}

/// Sequential regex dispatch
#[derive(Debug, Clone, Default)]
pub struct MatchRegExp {
    cases: Vec<(Arc<Regex>, usize)>,
}

impl MatchRegExp {
    fn evaluate(&self, subject: &str, cx: &mut RegExpContext) -> Option<usize> {
        for (re, pc) in &self.cases {
            if let Some(captures) = re.captures(subject) {
                cx.set(&captures);
                return Some(*pc);
            }
        }
        cx.clear();
        None
    }
}

#[derive(Debug, Clone)]
enum Table {
    Same(MatchSame),
    Head(MatchHead),
    Tail(MatchTail),
    RegExp(MatchRegExp),
}

/// A match table ready for evaluation
#[derive(Debug, Clone)]
pub struct Match {
    def: MatchDef,
    table: Table,
}

impl Match {
    /// Build the lookup structure for `def`, resolving labels through `pool`
    pub fn new(def: MatchDef, pool: &ConstantPool) -> VmResult<Self> {
        let label_error =
            |label: usize| VmError::InvalidState(format!("match label {} out of range", label));
        let table = match def.class {
            MatchClass::Same => {
                let mut t = MatchSame::default();
                for case in &def.cases {
                    let label = pool
                        .get_string(case.label)
                        .ok_or_else(|| label_error(case.label))?;
                    t.insert(label.clone(), case.pc);
                }
                Table::Same(t)
            }
            MatchClass::Head => {
                let mut t = MatchHead::default();
                for case in &def.cases {
                    let label = pool
                        .get_string(case.label)
                        .ok_or_else(|| label_error(case.label))?;
                    t.insert(label, case.pc);
                }
                Table::Head(t)
            }
            MatchClass::Tail => {
                let mut t = MatchTail::default();
                for case in &def.cases {
                    let label = pool
                        .get_string(case.label)
                        .ok_or_else(|| label_error(case.label))?;
                    t.insert(label, case.pc);
                }
                Table::Tail(t)
            }
            MatchClass::RegExp => {
                let mut t = MatchRegExp::default();
                for case in &def.cases {
                    let re = pool
                        .get_regexp(case.label)
                        .ok_or_else(|| label_error(case.label))?;
                    t.cases.push((re.clone(), case.pc));
                }
                Table::RegExp(t)
            }
        };
        Ok(Self { def, table })
    }

    /// The table's definition
    pub fn def(&self) -> &MatchDef {
        &self.def
    }

    /// Match class
    pub fn class(&self) -> MatchClass {
        self.def.class
    }

    /// Jump target for `subject`
    pub fn evaluate(&self, subject: &str, cx: &mut RegExpContext) -> usize {
        let hit = match &self.table {
            Table::Same(t) => t.evaluate(subject),
            Table::Head(t) => t.evaluate(subject),
            Table::Tail(t) => t.evaluate(subject),
            Table::RegExp(t) => t.evaluate(subject, cx),
        };
        hit.unwrap_or(self.def.else_pc)
    }
}
