//! Constant pool for compiled programs
//!
//! Every table is append-only and deduplicated, so an index handed out by an
//! `add_*` method stays valid for the lifetime of the pool. Values are kept in
//! their runtime representation; loading one into a register is a cheap clone.

use std::net::IpAddr;
use std::sync::Arc;

use regex::Regex;

use crate::types::{Cidr, FlowNumber, MatchClass};
use crate::vm::signature::Signature;

/// One `label => pc` entry of a match table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCaseDef {
    /// Index into `strings`, or into `regexps` for regex tables
    pub label: usize,
    /// Jump target
    pub pc: usize,
}

/// A match table as emitted by the code generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchDef {
    /// Index of the handler the table belongs to
    pub handler: usize,
    /// How labels are compared against the subject
    pub class: MatchClass,
    /// Cases in source order
    pub cases: Vec<MatchCaseDef>,
    /// Target when no case matches
    pub else_pc: usize,
}

/// Literal tables referenced by bytecode
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    numbers: Vec<FlowNumber>,
    strings: Vec<Arc<str>>,
    ipaddrs: Vec<IpAddr>,
    cidrs: Vec<Cidr>,
    regexps: Vec<Arc<Regex>>,
    int_arrays: Vec<Arc<Vec<FlowNumber>>>,
    string_arrays: Vec<Arc<Vec<Arc<str>>>>,
    ipaddr_arrays: Vec<Arc<Vec<IpAddr>>>,
    cidr_arrays: Vec<Arc<Vec<Cidr>>>,
    match_defs: Vec<MatchDef>,
    native_handlers: Vec<Signature>,
    native_functions: Vec<Signature>,
}

fn intern<T, Q>(
    table: &mut Vec<T>,
    value: Q,
    eq: impl Fn(&T, &Q) -> bool,
    make: impl FnOnce(Q) -> T,
) -> usize {
    if let Some(index) = table.iter().position(|t| eq(t, &value)) {
        return index;
    }
    table.push(make(value));
    table.len() - 1
}

impl ConstantPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a number constant and return its index
    pub fn add_number(&mut self, n: FlowNumber) -> usize {
        intern(&mut self.numbers, n, |a, b| a == b, |n| n)
    }

    /// Add a string constant and return its index
    pub fn add_string(&mut self, s: &str) -> usize {
        intern(&mut self.strings, s, |a, b| &**a == *b, Arc::from)
    }

    /// Add an IP address constant and return its index
    pub fn add_ipaddr(&mut self, ip: IpAddr) -> usize {
        intern(&mut self.ipaddrs, ip, |a, b| a == b, |ip| ip)
    }

    /// Add a CIDR constant and return its index
    pub fn add_cidr(&mut self, cidr: Cidr) -> usize {
        intern(&mut self.cidrs, cidr, |a, b| a == b, |c| c)
    }

    /// Add a compiled regex and return its index; regexes dedup by pattern
    pub fn add_regexp(&mut self, re: Regex) -> usize {
        intern(&mut self.regexps, re, |a, b| a.as_str() == b.as_str(), Arc::new)
    }

    /// Add a number array and return its index
    pub fn add_int_array(&mut self, values: Vec<FlowNumber>) -> usize {
        intern(&mut self.int_arrays, values, |a, b| **a == *b, Arc::new)
    }

    /// Add a string array and return its index
    pub fn add_string_array(&mut self, values: Vec<Arc<str>>) -> usize {
        intern(&mut self.string_arrays, values, |a, b| **a == *b, Arc::new)
    }

    /// Add an IP address array and return its index
    pub fn add_ipaddr_array(&mut self, values: Vec<IpAddr>) -> usize {
        intern(&mut self.ipaddr_arrays, values, |a, b| **a == *b, Arc::new)
    }

    /// Add a CIDR array and return its index
    pub fn add_cidr_array(&mut self, values: Vec<Cidr>) -> usize {
        intern(&mut self.cidr_arrays, values, |a, b| **a == *b, Arc::new)
    }

    /// Add a match table and return its index; tables are never shared
    pub fn add_match_def(&mut self, def: MatchDef) -> usize {
        self.match_defs.push(def);
        self.match_defs.len() - 1
    }

    /// Add a native handler signature and return its local id
    pub fn add_native_handler(&mut self, signature: Signature) -> usize {
        intern(&mut self.native_handlers, signature, |a, b| a == b, |s| s)
    }

    /// Add a native function signature and return its local id
    pub fn add_native_function(&mut self, signature: Signature) -> usize {
        intern(&mut self.native_functions, signature, |a, b| a == b, |s| s)
    }

    /// Number constant
    pub fn get_number(&self, index: usize) -> Option<FlowNumber> {
        self.numbers.get(index).copied()
    }

    /// String constant
    pub fn get_string(&self, index: usize) -> Option<&Arc<str>> {
        self.strings.get(index)
    }

    /// IP address constant
    pub fn get_ipaddr(&self, index: usize) -> Option<IpAddr> {
        self.ipaddrs.get(index).copied()
    }

    /// CIDR constant
    pub fn get_cidr(&self, index: usize) -> Option<Cidr> {
        self.cidrs.get(index).copied()
    }

    /// Regex constant
    pub fn get_regexp(&self, index: usize) -> Option<&Arc<Regex>> {
        self.regexps.get(index)
    }

    /// Number array constant
    pub fn get_int_array(&self, index: usize) -> Option<&Arc<Vec<FlowNumber>>> {
        self.int_arrays.get(index)
    }

    /// String array constant
    pub fn get_string_array(&self, index: usize) -> Option<&Arc<Vec<Arc<str>>>> {
        self.string_arrays.get(index)
    }

    /// IP address array constant
    pub fn get_ipaddr_array(&self, index: usize) -> Option<&Arc<Vec<IpAddr>>> {
        self.ipaddr_arrays.get(index)
    }

    /// CIDR array constant
    pub fn get_cidr_array(&self, index: usize) -> Option<&Arc<Vec<Cidr>>> {
        self.cidr_arrays.get(index)
    }

    /// Match table
    pub fn get_match_def(&self, index: usize) -> Option<&MatchDef> {
        self.match_defs.get(index)
    }

    pub(crate) fn get_match_def_mut(&mut self, index: usize) -> Option<&mut MatchDef> {
        self.match_defs.get_mut(index)
    }

    /// All match tables in index order
    pub fn match_defs(&self) -> &[MatchDef] {
        &self.match_defs
    }

    /// Native handler signatures by local id
    pub fn native_handler_signatures(&self) -> &[Signature] {
        &self.native_handlers
    }

    /// Native function signatures by local id
    pub fn native_function_signatures(&self) -> &[Signature] {
        &self.native_functions
    }

    /// Strings in index order
    pub fn strings(&self) -> &[Arc<str>] {
        &self.strings
    }

    /// Regexes in index order
    pub fn regexps(&self) -> &[Arc<Regex>] {
        &self.regexps
    }
}
