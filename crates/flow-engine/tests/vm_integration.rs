//! End-to-end tests: IR → compiler → linked program → runner
//!
//! Run with: cargo test -p flow-engine --test vm_integration

use std::any::Any;
use std::sync::Arc;

use flow_engine::vm::{ConstantPool, Params};
use flow_engine::{
    CodeWriter, CompileError, CompileOptions, Compiler, FlowNumber, Handler, IrBuilder, IrProgram,
    LiteralType, MatchClass, Opcode, Program, Runner, RunnerOptions, RunnerState, Runtime,
    Signature, VmError,
};

/// Runtime with a `hit(I)B` handler that records its argument and is never "handled"
fn recorder() -> Runtime {
    let mut runtime = Runtime::new();
    runtime
        .register_handler("hit")
        .params(&[LiteralType::Number])
        .bind(|params| {
            let n = params.get_number(0).unwrap_or(-1);
            if let Some(hits) = params.userdata::<Vec<FlowNumber>>() {
                hits.push(n);
            }
            params.set_result(false);
        });
    runtime
}

fn run_recording(program: &Program) -> (Result<bool, VmError>, Vec<FlowNumber>) {
    let mut hits: Vec<FlowNumber> = Vec::new();
    let result = program.run("main", Some(&mut hits as &mut dyn Any));
    (result, hits)
}

/// Dispatch `subject` through a match of `class`; case `n` records `n`
fn route(class: MatchClass, labels: &[&str], subject: &str) -> Vec<FlowNumber> {
    let runtime = recorder();
    let mut program = IrProgram::new();
    let hit = program.get_native(runtime.find("hit(I)B").unwrap());

    let mut b = IrBuilder::new(&mut program);
    b.create_handler("main");
    let entry = b.create_block("entry");
    let default = b.create_block("default");
    let one = b.get_number(1);
    let f = b.get_boolean(false);
    let text = b.get_string(subject);

    b.set_insert_point(entry);
    let var = b.create_alloca(LiteralType::String, one, "path");
    b.create_store(var, text);
    let value = b.create_load(var, "subject");
    let m = b.create_match(class, value, default);
    for (n, label) in labels.iter().enumerate() {
        let target = b.create_block(format!("case{}", n));
        let label = match class {
            MatchClass::RegExp => b.get_regexp(*label).unwrap(),
            _ => b.get_string(*label),
        };
        b.add_match_case(m, label, target);
        b.set_insert_point(target);
        let id = b.get_number(n as FlowNumber);
        b.create_invoke_handler(hit, vec![id]);
        b.create_ret(f);
    }
    b.set_insert_point(default);
    b.create_ret(f);

    let compiled = Compiler::default()
        .compile_and_link(program, Arc::new(runtime))
        .unwrap();
    let (result, hits) = run_recording(&compiled);
    assert_eq!(result, Ok(false));
    hits
}

// =============================================================================
// MATCH DISPATCH
// =============================================================================

mod matching {
    use super::*;

    #[test]
    fn test_head_selects_prefix_case() {
        assert_eq!(route(MatchClass::Head, &["/api", "/static"], "/api/v1"), vec![0]);
        assert_eq!(route(MatchClass::Head, &["/api", "/static"], "/static/app.js"), vec![1]);
    }

    #[test]
    fn test_head_prefers_longest_prefix() {
        assert_eq!(route(MatchClass::Head, &["/", "/api/v2", "/api"], "/api/v2/x"), vec![1]);
    }

    #[test]
    fn test_head_default_case() {
        assert_eq!(route(MatchClass::Head, &["/api", "/static"], "/other"), Vec::<FlowNumber>::new());
    }

    #[test]
    fn test_same_requires_exact_match() {
        assert_eq!(route(MatchClass::Same, &["/a", "/b"], "/b"), vec![1]);
        assert!(route(MatchClass::Same, &["/a", "/b"], "/b/c").is_empty());
    }

    #[test]
    fn test_tail_selects_suffix_case() {
        assert_eq!(route(MatchClass::Tail, &[".js", ".css"], "site.css"), vec![1]);
        assert!(route(MatchClass::Tail, &[".js", ".css"], "index.html").is_empty());
    }

    #[test]
    fn test_regexp_first_matching_case_wins() {
        let labels = [r"^/user/\d+$", r"^/user/"];
        assert_eq!(route(MatchClass::RegExp, &labels, "/user/42"), vec![0]);
        assert_eq!(route(MatchClass::RegExp, &labels, "/user/bob"), vec![1]);
        assert!(route(MatchClass::RegExp, &labels, "/group/1").is_empty());
    }

    #[test]
    fn test_regexp_captures_are_visible_to_case() {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let user = b.create_block("user");
        let default = b.create_block("default");
        let one = b.get_number(1);
        let f = b.get_boolean(false);
        let path = b.get_string("/user/42");
        let expected = b.get_string("42");
        let pattern = b.get_regexp(r"^/user/(\d+)$").unwrap();

        b.set_insert_point(entry);
        let var = b.create_alloca(LiteralType::String, one, "path");
        b.create_store(var, path);
        let subject = b.create_load(var, "subject");
        let m = b.create_match(MatchClass::RegExp, subject, default);
        b.add_match_case(m, pattern, user);

        b.set_insert_point(user);
        let id = b.create_vm(Opcode::Sreggroup, vec![one], "id");
        let same = b.create_scmp_eq(id, expected, "same");
        b.create_ret(same);

        b.set_insert_point(default);
        b.create_ret(f);

        let compiled = Compiler::default().compile(program).unwrap();
        assert_eq!(compiled.run("main", None), Ok(true));
    }
}

// =============================================================================
// NATIVE CALLBACKS
// =============================================================================

mod natives {
    use super::*;

    #[test]
    fn test_find_by_signature_text() {
        let mut runtime = Runtime::new();
        runtime.register_function("len", LiteralType::Number);
        assert_eq!(runtime.find("len()I").map(|cb| cb.name()), Some("len"));
        assert!(runtime.find("len()S").is_none());
        assert!(runtime.find("size()I").is_none());
    }

    #[test]
    fn test_signature_text_round_trips() {
        for text in ["len()I", "req.path.beginsWith(S)B", "ip.in(PC)B", "log(SIi)V"] {
            let sig: Signature = text.parse().unwrap();
            assert_eq!(sig.to_string(), text);
        }
    }

    #[test]
    fn test_function_arguments_and_result() {
        let mut runtime = Runtime::new();
        runtime
            .register_function("add", LiteralType::Number)
            .params(&[LiteralType::Number, LiteralType::Number])
            .bind(|params| {
                let sum = params.get_number(0).unwrap_or(0) + params.get_number(1).unwrap_or(0);
                params.set_result(sum);
            });

        let mut program = IrProgram::new();
        let add = program.get_native(runtime.find("add(II)I").unwrap());
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let two = b.get_number(2);
        let three = b.get_number(3);
        let five = b.get_number(5);
        b.set_insert_point(entry);
        let sum = b.create_call(add, vec![two, three], "sum");
        let ok = b.create_vm(Opcode::Ncmpeq, vec![sum, five], "ok");
        b.create_ret(ok);

        let compiled = Compiler::default()
            .compile_and_link(program, Arc::new(runtime))
            .unwrap();
        assert_eq!(compiled.run("main", None), Ok(true));
    }

    #[test]
    fn test_unused_read_only_call_is_removed() {
        let mut runtime = Runtime::new();
        runtime
            .register_function("peek", LiteralType::Number)
            .set_read_only()
            .bind(|params| params.set_result(1 as FlowNumber));

        let mut program = IrProgram::new();
        let peek = program.get_native(runtime.find("peek()I").unwrap());
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let t = b.get_boolean(true);
        b.set_insert_point(entry);
        b.create_call(peek, vec![], "unused");
        b.create_ret(t);

        let compiled = Compiler::default()
            .compile_and_link(program, Arc::new(runtime))
            .unwrap();
        assert!(compiled.constants().native_function_signatures().is_empty());
        assert_eq!(compiled.run("main", None), Ok(true));
    }

    #[test]
    fn test_handled_native_handler_ends_the_run() {
        let mut runtime = recorder();
        runtime
            .register_handler("deny")
            .bind(|params| params.set_result(true));

        let mut program = IrProgram::new();
        let deny = program.get_native(runtime.find("deny()B").unwrap());
        let hit = program.get_native(runtime.find("hit(I)B").unwrap());
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let seven = b.get_number(7);
        let f = b.get_boolean(false);
        b.set_insert_point(entry);
        b.create_invoke_handler(deny, vec![]);
        b.create_invoke_handler(hit, vec![seven]);
        b.create_ret(f);

        let compiled = Compiler::default()
            .compile_and_link(program, Arc::new(runtime))
            .unwrap();
        let (result, hits) = run_recording(&compiled);
        assert_eq!(result, Ok(true));
        assert!(hits.is_empty());
    }

    #[test]
    fn test_unhandled_native_handler_continues() {
        let runtime = recorder();
        let mut program = IrProgram::new();
        let hit = program.get_native(runtime.find("hit(I)B").unwrap());
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let one = b.get_number(1);
        let two = b.get_number(2);
        let f = b.get_boolean(false);
        b.set_insert_point(entry);
        b.create_invoke_handler(hit, vec![one]);
        b.create_invoke_handler(hit, vec![two]);
        b.create_ret(f);

        let compiled = Compiler::default()
            .compile_and_link(program, Arc::new(runtime))
            .unwrap();
        let (result, hits) = run_recording(&compiled);
        assert_eq!(result, Ok(false));
        assert_eq!(hits, vec![1, 2]);
    }

    #[test]
    fn test_suspend_and_resume() {
        let mut runtime = recorder();
        runtime
            .register_function("wait", LiteralType::Void)
            .bind(|params| params.suspend());

        let mut program = IrProgram::new();
        let wait = program.get_native(runtime.find("wait()V").unwrap());
        let hit = program.get_native(runtime.find("hit(I)B").unwrap());
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let one = b.get_number(1);
        let t = b.get_boolean(true);
        b.set_insert_point(entry);
        b.create_call(wait, vec![], "");
        b.create_invoke_handler(hit, vec![one]);
        b.create_ret(t);

        let compiled = Compiler::default()
            .compile_and_link(program, Arc::new(runtime))
            .unwrap();

        let mut hits: Vec<FlowNumber> = Vec::new();
        {
            let mut runner = Runner::new(&compiled, 0).with_userdata(&mut hits);
            assert_eq!(runner.run(), Ok(false));
            assert_eq!(runner.state(), RunnerState::Suspended);
            assert_eq!(runner.resume(), Ok(true));
            assert_eq!(runner.state(), RunnerState::Returned(true));
            assert!(matches!(runner.resume(), Err(VmError::InvalidState(_))));
        }
        assert_eq!(hits, vec![1]);
    }

    #[test]
    fn test_native_failure_traps() {
        let mut runtime = Runtime::new();
        runtime
            .register_handler("broken")
            .bind(|params| params.fail("backend unavailable"));

        let mut program = IrProgram::new();
        let broken = program.get_native(runtime.find("broken()B").unwrap());
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let f = b.get_boolean(false);
        b.set_insert_point(entry);
        b.create_invoke_handler(broken, vec![]);
        b.create_ret(f);

        let compiled = Compiler::default()
            .compile_and_link(program, Arc::new(runtime))
            .unwrap();
        let mut runner = Runner::new(&compiled, 0);
        assert_eq!(
            runner.run(),
            Err(VmError::Native("backend unavailable".into()))
        );
        assert_eq!(runner.state(), RunnerState::Trapped);
    }

    /// Runtime whose `limit(I)B` handler rejects call sites passing a literal 0
    fn strict_limit() -> Runtime {
        let mut runtime = Runtime::new();
        runtime
            .register_handler("limit")
            .params(&[LiteralType::Number])
            .verifier(|handler, id, constants| {
                handler
                    .instr(id)
                    .and_then(|call| call.operands().get(1))
                    .and_then(|arg| arg.as_const())
                    .and_then(|c| constants.kind(c))
                    .and_then(|kind| kind.as_number())
                    != Some(0)
            })
            .bind(|params| params.set_result(false));
        runtime
    }

    fn calls_limit(runtime: &Runtime, n: FlowNumber) -> IrProgram {
        let mut program = IrProgram::new();
        let limit = program.get_native(runtime.find("limit(I)B").unwrap());
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let arg = b.get_number(n);
        let t = b.get_boolean(true);
        b.set_insert_point(entry);
        b.create_invoke_handler(limit, vec![arg]);
        b.create_ret(t);
        program
    }

    #[test]
    fn test_verifier_rejects_call_site() {
        let runtime = strict_limit();
        let program = calls_limit(&runtime, 0);
        let err = Compiler::default()
            .compile_and_link(program, Arc::new(runtime))
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::VerificationFailed(vec!["main: call to limit(I)B rejected".into()])
        );
    }

    #[test]
    fn test_verifier_accepts_call_site() {
        let runtime = strict_limit();
        let program = calls_limit(&runtime, 5);
        let compiled = Compiler::default()
            .compile_and_link(program, Arc::new(runtime))
            .unwrap();
        assert_eq!(compiled.run("main", None), Ok(true));
    }

    #[test]
    fn test_plain_compile_skips_verifiers() {
        let runtime = strict_limit();
        let program = calls_limit(&runtime, 0);
        let mut compiled = Compiler::default().compile(program).unwrap();
        compiled.link(Arc::new(runtime)).unwrap();
        assert_eq!(compiled.run("main", None), Ok(true));
    }
}

// =============================================================================
// PHI NODES
// =============================================================================

mod phis {
    use super::*;

    /// Every optimization level plus the unoptimized pipeline
    fn compilers() -> Vec<Compiler> {
        (0..=2)
            .map(|level| Compiler::new(CompileOptions::with_optimization_level(level)))
            .collect()
    }

    /// `x` stays live on the edge into the join after the phi is written
    ///
    /// entry: x = 0; br c ? inc : join
    /// inc:   y = x + 10; br (x == 0) ? join : fail
    /// join:  p = phi [x, entry], [y, inc]; ret p == 10
    fn phi_input_outlives_edge() -> IrProgram {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let inc = b.create_block("inc");
        let fail = b.create_block("fail");
        let join = b.create_block("join");
        let one = b.get_number(1);
        let zero = b.get_number(0);
        let ten = b.get_number(10);
        let t = b.get_boolean(true);
        let f = b.get_boolean(false);

        b.set_insert_point(entry);
        let xv = b.create_alloca(LiteralType::Number, one, "xv");
        b.create_store(xv, zero);
        let x = b.create_load(xv, "x");
        let cv = b.create_alloca(LiteralType::Boolean, one, "cv");
        b.create_store(cv, t);
        let c = b.create_load(cv, "c");
        b.create_cond_br(c, inc, join);

        b.set_insert_point(inc);
        let y = b.create_vm(Opcode::Nadd, vec![x, ten], "y");
        let w = b.create_vm(Opcode::Ncmpeq, vec![x, zero], "w");
        b.create_cond_br(w, join, fail);

        b.set_insert_point(fail);
        b.create_ret(f);

        b.set_insert_point(join);
        let p = b.create_phi(vec![(x, entry), (y, inc)], "p");
        let r = b.create_vm(Opcode::Ncmpeq, vec![p, ten], "r");
        b.create_ret(r);
        program
    }

    #[test]
    fn test_phi_input_read_after_edge_copy() {
        for compiler in compilers() {
            let compiled = compiler.compile(phi_input_outlives_edge()).unwrap();
            assert_eq!(compiled.run("main", None), Ok(true));
        }
    }

    /// Both phi inputs come from the entry block through empty arms
    ///
    /// entry: x = 1; y = 2; br cond ? left : right
    /// left:  br join
    /// right: br join
    /// join:  p = phi [x, left], [y, right]; ret p == 1
    fn arms_select_entry_values(cond: bool) -> IrProgram {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let left = b.create_block("left");
        let right = b.create_block("right");
        let join = b.create_block("join");
        let one = b.get_number(1);
        let two = b.get_number(2);
        let flag = b.get_boolean(cond);

        b.set_insert_point(entry);
        let xv = b.create_alloca(LiteralType::Number, one, "xv");
        b.create_store(xv, one);
        let x = b.create_load(xv, "x");
        let yv = b.create_alloca(LiteralType::Number, one, "yv");
        b.create_store(yv, two);
        let y = b.create_load(yv, "y");
        let cv = b.create_alloca(LiteralType::Boolean, one, "cv");
        b.create_store(cv, flag);
        let c = b.create_load(cv, "c");
        b.create_cond_br(c, left, right);

        b.set_insert_point(left);
        b.create_br(join);
        b.set_insert_point(right);
        b.create_br(join);

        b.set_insert_point(join);
        let p = b.create_phi(vec![(x, left), (y, right)], "p");
        let r = b.create_vm(Opcode::Ncmpeq, vec![p, one], "r");
        b.create_ret(r);
        program
    }

    #[test]
    fn test_phi_inputs_from_entry_survive_block_passes() {
        for compiler in compilers() {
            let taken = compiler.compile(arms_select_entry_values(true)).unwrap();
            assert_eq!(taken.run("main", None), Ok(true));
            let skipped = compiler.compile(arms_select_entry_values(false)).unwrap();
            assert_eq!(skipped.run("main", None), Ok(false));
        }
    }

    /// Phi inputs defined in a block that dominates the join
    ///
    /// entry: a = 3; br c ? body : join
    /// body:  b = a * 2; br join
    /// join:  p = phi [a, entry], [b, body]; ret p + a == 9
    #[test]
    fn test_phi_input_from_dominating_block() {
        for compiler in compilers() {
            let mut program = IrProgram::new();
            let mut b = IrBuilder::new(&mut program);
            b.create_handler("main");
            let entry = b.create_block("entry");
            let body = b.create_block("body");
            let join = b.create_block("join");
            let one = b.get_number(1);
            let two = b.get_number(2);
            let three = b.get_number(3);
            let six = b.get_number(6);
            let t = b.get_boolean(true);

            b.set_insert_point(entry);
            let av = b.create_alloca(LiteralType::Number, one, "av");
            b.create_store(av, three);
            let a = b.create_load(av, "a");
            let cv = b.create_alloca(LiteralType::Boolean, one, "cv");
            b.create_store(cv, t);
            let c = b.create_load(cv, "c");
            b.create_cond_br(c, body, join);

            b.set_insert_point(body);
            let doubled = b.create_mul(a, two, "b");
            b.create_br(join);

            b.set_insert_point(join);
            let p = b.create_phi(vec![(a, entry), (doubled, body)], "p");
            let sum = b.create_add(p, a, "sum");
            let nine = b.get_number(9);
            let r = b.create_vm(Opcode::Ncmpeq, vec![sum, nine], "r");
            b.create_ret(r);

            let compiled = compiler.compile(program).unwrap();
            assert_eq!(compiled.run("main", None), Ok(true));
        }
    }
}


// =============================================================================
// LINKING & TRAPS
// =============================================================================

mod linking {
    use super::*;

    fn calls_missing() -> IrProgram {
        let mut program = IrProgram::new();
        let missing = program.get_builtin_handler(
            "missing(S)B".parse().unwrap(),
            flow_engine::Attributes::empty(),
        );
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let arg = b.get_string("x");
        let f = b.get_boolean(false);
        b.set_insert_point(entry);
        b.create_invoke_handler(missing, vec![arg]);
        b.create_ret(f);
        program
    }

    #[test]
    fn test_unresolved_native_fails_link() {
        let err = Compiler::default()
            .compile_and_link(calls_missing(), Arc::new(recorder()))
            .unwrap_err();
        assert_eq!(err, CompileError::UnresolvedSymbols(vec!["missing(S)B".into()]));
    }

    #[test]
    fn test_unlinked_program_traps_on_call() {
        let compiled = Compiler::default().compile(calls_missing()).unwrap();
        assert!(!compiled.is_linked());
        assert_eq!(compiled.run("main", None), Err(VmError::NotLinked));
    }

    #[test]
    fn test_out_of_range_native_id_traps() {
        let mut code = CodeWriter::new();
        code.emit(Opcode::Call, 3, 0, 0);
        code.emit(Opcode::Exit, 1, 0, 0);
        let mut program =
            Program::new(ConstantPool::new(), vec![Handler::new("main", code.finish(), 1)]).unwrap();
        program.link(Arc::new(recorder())).unwrap();

        let mut runner = Runner::new(&program, 0);
        assert_eq!(runner.run(), Err(VmError::InvalidNativeId(3)));
        assert_eq!(runner.state(), RunnerState::Trapped);
    }

    #[test]
    fn test_runtime_rejects_unknown_id() {
        let runtime = recorder();
        let mut params = Params::new(Vec::new(), None);
        assert_eq!(runtime.invoke(9, &mut params), Err(VmError::InvalidNativeId(9)));
    }

    #[test]
    fn test_instruction_limit() {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let spin = b.create_block("spin");
        b.set_insert_point(entry);
        b.create_br(spin);
        b.set_insert_point(spin);
        b.create_br(spin);

        let compiled = Compiler::new(CompileOptions::with_optimization_level(0))
            .compile(program)
            .unwrap();
        let options = RunnerOptions {
            max_instructions: Some(100),
            ..RunnerOptions::default()
        };
        let mut runner = Runner::new(&compiled, 0).with_options(options);
        assert_eq!(runner.run(), Err(VmError::InstructionLimitExceeded(100)));
    }

    #[test]
    fn test_linked_program_is_shared_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Program>();
        assert_send_sync::<Runtime>();

        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let t = b.get_boolean(true);
        b.set_insert_point(entry);
        b.create_ret(t);
        let compiled = Compiler::default()
            .compile_and_link(program, Arc::new(Runtime::new()))
            .unwrap();

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| assert_eq!(compiled.run("main", None), Ok(true)));
            }
        });
    }
}
