//! IR and optimization pass integration tests
//!
//! Run with: cargo test -p flow-engine --test ir_passes

use flow_engine::compiler::ir::{ConstantArray, ConstantKind, InstrKind, IrHandler, ValueRef};
use flow_engine::compiler::optimize::{
    EmptyBlockElimination, InstructionElimination, MergeBlockPass, UnusedBlockPass,
};
use flow_engine::vm::Attributes;
use flow_engine::{
    CompileError, HandlerPass, IrBuilder, IrProgram, LiteralType, PassManager, PrettyPrint,
    Signature,
};

/// Every operand slot of every live instruction is recorded in the use-list
fn assert_use_def_consistent(handler: &IrHandler) {
    for &block in handler.blocks() {
        for &id in handler.block_instrs(block) {
            for &op in handler[id].operands() {
                let slots = handler[id].operands().iter().filter(|&&v| v == op).count();
                let recorded = handler.uses(op).iter().filter(|&&u| u == id).count();
                assert_eq!(slots, recorded, "{} uses {} {} times", id, op, slots);
            }
        }
    }
}

fn assert_terminated(handler: &IrHandler) {
    for &block in handler.blocks() {
        let instrs = handler.block_instrs(block);
        assert!(!instrs.is_empty(), "block {} is empty", block);
        let terminators = instrs.iter().filter(|&&i| handler[i].is_terminator()).count();
        assert_eq!(terminators, 1, "block {} has {} terminators", block, terminators);
        assert!(handler[*instrs.last().unwrap()].is_terminator());
    }
}

/// entry -> (a | c) -> join -> exit, with a forwarding block and a dead block
fn diamond() -> IrProgram {
    let mut program = IrProgram::new();
    let log = program.get_builtin_handler(
        Signature::with("log", LiteralType::Boolean, vec![LiteralType::String]),
        Attributes::empty(),
    );
    let mut b = IrBuilder::new(&mut program);
    b.create_handler("main");
    let entry = b.create_block("entry");
    let a = b.create_block("a");
    let c = b.create_block("c");
    let forward = b.create_block("forward");
    let join = b.create_block("join");
    let dead = b.create_block("dead");
    let exit = b.create_block("exit");

    let one = b.get_number(1);
    let t = b.get_boolean(true);
    let f = b.get_boolean(false);
    let msg = b.get_string("join");

    b.set_insert_point(entry);
    let var = b.create_alloca(LiteralType::Boolean, one, "flag");
    let cond = b.create_load(var, "cond");
    b.create_cond_br(cond, a, c);

    b.set_insert_point(a);
    b.create_br(forward);
    b.set_insert_point(forward);
    b.create_br(join);

    b.set_insert_point(c);
    b.create_cond_br(t, join, dead);

    b.set_insert_point(join);
    b.create_invoke_handler(log, vec![msg]);
    b.create_br(exit);

    b.set_insert_point(dead);
    b.create_ret(f);

    b.set_insert_point(exit);
    b.create_ret(t);
    program
}

fn all_passes() -> Vec<Box<dyn HandlerPass>> {
    vec![
        Box::new(UnusedBlockPass),
        Box::new(MergeBlockPass),
        Box::new(EmptyBlockElimination),
        Box::new(InstructionElimination),
    ]
}

// =============================================================================
// USE-DEF
// =============================================================================

mod use_def {
    use super::*;

    #[test]
    fn test_builder_keeps_use_lists() {
        let program = diamond();
        assert_use_def_consistent(&program.handlers()[0]);
        assert!(program.validate().is_ok());
    }

    #[test]
    fn test_erasing_an_instruction_drops_its_uses() {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let one = b.get_number(1);
        b.set_insert_point(entry);
        let var = b.create_alloca(LiteralType::Number, one, "n");
        let x = b.create_load(var, "x");
        let sum = b.create_add(x, one, "sum");
        let t = b.get_boolean(true);
        b.create_ret(t);

        let handler = &mut program.handlers_mut()[0];
        let sum_id = sum.as_instr().unwrap();
        assert!(handler.uses(x).contains(&sum_id));
        assert!(handler.uses(one).contains(&sum_id));

        handler.erase_instr(sum_id);
        assert!(!handler.uses(x).contains(&sum_id));
        assert!(!handler.uses(one).contains(&sum_id));
        assert_use_def_consistent(handler);
    }

    #[test]
    fn test_passes_preserve_use_lists() {
        let mut program = diamond();
        PassManager::for_level(1).run(&mut program);
        let handler = &program.handlers()[0];
        assert_use_def_consistent(handler);
        assert_terminated(handler);
        assert!(program.validate().is_ok());
    }
}

// =============================================================================
// FIXPOINT & IDEMPOTENCE
// =============================================================================

mod fixpoint {
    use super::*;

    #[test]
    fn test_final_sweep_changes_nothing() {
        let mut program = diamond();
        let mut pm = PassManager::new();
        for pass in all_passes() {
            pm.register_pass(pass);
        }
        assert!(pm.run(&mut program));

        let (handlers, constants) = program.split_mut();
        for mut pass in all_passes() {
            assert!(
                !pass.run(&mut handlers[0], constants),
                "{} still changes the handler",
                pass.name()
            );
        }
    }

    #[test]
    fn test_passes_are_idempotent() {
        let passes: Vec<Box<dyn HandlerPass>> = vec![
            Box::new(EmptyBlockElimination),
            Box::new(UnusedBlockPass),
            Box::new(InstructionElimination),
        ];
        for mut pass in passes {
            let mut program = diamond();
            let (handlers, constants) = program.split_mut();
            pass.run(&mut handlers[0], constants);
            assert!(
                !pass.run(&mut handlers[0], constants),
                "{} is not idempotent",
                pass.name()
            );
            assert_terminated(&handlers[0]);
        }
    }

    #[test]
    fn test_diamond_collapses() {
        let mut program = diamond();
        PassManager::for_level(1).run(&mut program);
        let handler = &program.handlers()[0];
        assert_eq!(handler.block_count(), 1, "{}", program.pretty_print());
        assert!(!handler.blocks().iter().any(|&b| handler.block(b).unwrap().name() == "dead"));
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

mod scenarios {
    use super::*;

    #[test]
    fn test_forwarding_chain_reduces_to_entry() {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let b1 = b.create_block("b1");
        let b2 = b.create_block("b2");
        let t = b.get_boolean(true);
        b.set_insert_point(entry);
        b.create_br(b1);
        b.set_insert_point(b1);
        b.create_br(b2);
        b.set_insert_point(b2);
        b.create_ret(t);

        let mut pm = PassManager::new();
        pm.register_pass(Box::new(EmptyBlockElimination));
        pm.register_pass(Box::new(UnusedBlockPass));
        pm.run(&mut program);

        let handler = &program.handlers()[0];
        assert_eq!(handler.block_count(), 1);
        let only = handler.entry_block().unwrap();
        let instrs = handler.block_instrs(only);
        assert_eq!(instrs.len(), 1);
        assert_eq!(handler[instrs[0]].kind, InstrKind::Ret);
        assert_eq!(handler[instrs[0]].operands(), &[t]);
    }

    #[test]
    fn test_constant_cond_br_folds_and_dead_target_goes() {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let yes = b.create_block("yes");
        let no = b.create_block("no");
        let one = b.get_number(1);
        let t = b.get_boolean(true);
        let f = b.get_boolean(false);
        b.set_insert_point(entry);
        let var = b.create_alloca(LiteralType::Boolean, one, "v");
        b.create_store(var, f);
        b.create_cond_br(t, yes, no);
        b.set_insert_point(yes);
        b.create_ret(t);
        b.set_insert_point(no);
        b.create_ret(f);

        {
            let (handlers, constants) = program.split_mut();
            assert!(InstructionElimination.run(&mut handlers[0], constants));
            let handler = &handlers[0];
            assert!(!handler.contains_block(no) || handler.predecessors(no).is_empty());
        }

        let mut pm = PassManager::new();
        pm.register_pass(Box::new(InstructionElimination));
        pm.register_pass(Box::new(UnusedBlockPass));
        pm.run(&mut program);

        let handler = &program.handlers()[0];
        assert!(!handler.contains_block(no));
        let term = handler.terminator(entry).unwrap();
        assert_eq!(handler[term].kind, InstrKind::Ret);
        assert_eq!(handler[term].operands(), &[t]);
    }

    #[test]
    fn test_identical_blocks_merge_with_two_predecessors() {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let b1 = b.create_block("b1");
        let b2 = b.create_block("b2");
        let one = b.get_number(1);
        b.set_insert_point(entry);
        let x = b.create_alloca(LiteralType::Boolean, one, "x");
        let cond = b.create_load(x, "cond");
        b.create_cond_br(cond, b1, b2);
        for block in [b1, b2] {
            b.set_insert_point(block);
            let value = b.create_load(x, "value");
            b.create_ret(value);
        }

        let (handlers, constants) = program.split_mut();
        assert!(MergeBlockPass.run(&mut handlers[0], constants));
        let handler = &handlers[0];
        assert_eq!(handler.block_count(), 2);
        assert!(!handler.contains_block(b2));
        assert_eq!(handler.predecessors(b1), vec![entry, entry]);
        assert_use_def_consistent(handler);
    }

    #[test]
    fn test_self_loop_block_is_not_eliminated() {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let spin = b.create_block("spin");
        b.set_insert_point(entry);
        b.create_br(spin);
        b.set_insert_point(spin);
        b.create_br(spin);

        let (handlers, constants) = program.split_mut();
        EmptyBlockElimination.run(&mut handlers[0], constants);
        let handler = &handlers[0];
        let spin = handler.entry_block().unwrap();
        assert_eq!(handler.successors(spin), vec![spin]);
        assert!(!EmptyBlockElimination.run(&mut handlers[0], constants));
    }
}

// =============================================================================
// CONSTANTS
// =============================================================================

mod constants {
    use super::*;

    #[test]
    fn test_array_rejects_non_element_types() {
        for ty in [
            LiteralType::Boolean,
            LiteralType::RegExp,
            LiteralType::Handler,
            LiteralType::Void,
            LiteralType::IntArray,
        ] {
            assert_eq!(
                ConstantArray::try_new(ty, Vec::new()),
                Err(CompileError::InvalidArrayElement(ty))
            );
        }
    }

    #[test]
    fn test_array_rejects_mixed_elements() {
        let err = ConstantArray::try_new(
            LiteralType::Number,
            vec![ConstantKind::Number(1), ConstantKind::Boolean(true)],
        );
        assert_eq!(err, Err(CompileError::InvalidArrayElement(LiteralType::Boolean)));
    }

    #[test]
    #[should_panic]
    fn test_array_new_panics_on_boolean() {
        ConstantArray::new(LiteralType::Boolean, vec![ConstantKind::Boolean(true)]);
    }

    #[test]
    fn test_array_types() {
        let array = ConstantArray::new(
            LiteralType::String,
            vec![ConstantKind::String("a".into()), ConstantKind::String("b".into())],
        );
        assert_eq!(array.literal_type(), LiteralType::StringArray);

        let mut program = IrProgram::new();
        let id = program.get_array(array.clone());
        assert_eq!(program.get_array(array), id);
        assert_eq!(
            program.constants().get(id).map(|c| c.literal_type()),
            Some(LiteralType::StringArray)
        );
    }

    #[test]
    fn test_unused_constant_operand_is_a_value() {
        let mut program = IrProgram::new();
        let c = program.get_number(3);
        assert_eq!(ValueRef::from(c).as_const(), Some(c));
    }
}
