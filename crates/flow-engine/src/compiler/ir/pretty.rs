//! Pretty-printing for IR
//!
//! Provides human-readable output for debugging IR structures.

use std::fmt::Write;

use super::constant::IrConstantPool;
use super::handler::IrHandler;
use super::instr::{InstrKind, Instruction};
use super::program::IrProgram;
use super::value::{BlockId, ValueRef};

/// Trait for pretty-printing IR constructs
pub trait PrettyPrint {
    /// Render as text
    fn pretty_print(&self) -> String;
}

impl PrettyPrint for IrProgram {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        for handler in self.handlers() {
            output.push_str(&format_handler(handler, self.constants()));
            writeln!(output).unwrap();
        }
        output
    }
}

/// Render one handler, resolving constant operands through `constants`
pub fn format_handler(handler: &IrHandler, constants: &IrConstantPool) -> String {
    let mut output = String::new();
    writeln!(output, "handler {} {{", handler.name()).unwrap();
    for &b in handler.blocks() {
        output.push_str(&format_block(handler, constants, b));
    }
    writeln!(output, "}}").unwrap();
    output
}

fn format_block(handler: &IrHandler, constants: &IrConstantPool, b: BlockId) -> String {
    let mut output = String::new();
    let name = handler.block(b).map(|blk| blk.name()).unwrap_or("?");
    let list = |ids: Vec<BlockId>| {
        ids.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    writeln!(
        output,
        "  {} ({}):  ; preds: [{}] succs: [{}]",
        b,
        name,
        list(handler.predecessors(b)),
        list(handler.successors(b))
    )
    .unwrap();
    for &id in handler.block_instrs(b) {
        if let Some(instr) = handler.instr(id) {
            writeln!(output, "    {}", format_instr(handler, constants, instr)).unwrap();
        }
    }
    output
}

/// Render one instruction as `%name = op operands`
pub fn format_instr(handler: &IrHandler, constants: &IrConstantPool, instr: &Instruction) -> String {
    let operands: Vec<String> = if instr.kind == InstrKind::Phi {
        instr
            .phi_incoming()
            .into_iter()
            .map(|(v, pred)| format!("[{}, {}]", format_value(handler, constants, v), pred))
            .collect()
    } else {
        instr
            .operands()
            .iter()
            .map(|&v| format_value(handler, constants, v))
            .collect()
    };
    let body = if operands.is_empty() {
        instr.kind.mnemonic().to_string()
    } else {
        format!("{} {}", instr.kind.mnemonic(), operands.join(", "))
    };
    if instr.produces_value() {
        format!("%{} = {}", instr.name, body)
    } else {
        body
    }
}

fn format_value(handler: &IrHandler, constants: &IrConstantPool, value: ValueRef) -> String {
    match value {
        ValueRef::Const(c) => constants
            .kind(c)
            .map(|k| k.to_string())
            .unwrap_or_else(|| c.to_string()),
        ValueRef::Instr(i) => match handler.instr(i) {
            Some(instr) if !instr.name.is_empty() => format!("%{}", instr.name),
            _ => format!("%{}", i),
        },
        ValueRef::Block(b) => b.to_string(),
    }
}
