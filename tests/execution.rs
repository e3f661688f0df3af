//! End-to-end behavior: load a script through the façade, execute it,
//! and observe results and side effects.

use std::io::Write;

use asteria::{CompilerOptions, SimpleScript, Value};

fn run(code: &str) -> Value {
    let mut script = SimpleScript::new();
    script.reload_string("test", code).expect("compile");
    script.execute_value(Vec::new()).expect("execute")
}

fn run_err(code: &str) -> String {
    let mut script = SimpleScript::new();
    script.reload_string("test", code).expect("compile");
    match script.execute_value(Vec::new()) {
        Ok(out) => panic!("expected failure, got {:?}", out),
        Err(err) => err.to_string(),
    }
}

// ─── Arithmetic and operators ──────────────────────────────────────

#[test]
fn for_loop_sums() {
    let out = run("var s = 0; for(var i = 0; i < 10; ++i) s += i; return s;");
    assert_eq!(out.as_int(), Some(45));
}

#[test]
fn integer_overflow_raises() {
    let msg = run_err("return 9223372036854775807 + 1;");
    assert!(msg.contains("overflow"), "{}", msg);
}

#[test]
fn division_by_zero_raises() {
    let msg = run_err("return 1 / 0;");
    assert!(msg.contains("division by zero"), "{}", msg);
}

#[test]
fn modular_and_saturating_arithmetic() {
    assert_eq!(
        run("return __addm(9223372036854775807, 1);").as_int(),
        Some(i64::MIN)
    );
    assert_eq!(
        run("return __adds(9223372036854775807, 1);").as_int(),
        Some(i64::MAX)
    );
    assert_eq!(
        run("return __subs(-9223372036854775807 - 1, 10);").as_int(),
        Some(i64::MIN)
    );
    assert_eq!(run("return __muls(3, 4);").as_int(), Some(12));
}

#[test]
fn logical_shift_saturates_to_zero() {
    assert_eq!(run("return 1 <<< 64;").as_int(), Some(0));
    assert_eq!(run("return -1 >>> 64;").as_int(), Some(0));
    assert_eq!(run("return 1 <<< 3;").as_int(), Some(8));
    assert_eq!(run("return -8 >> 1;").as_int(), Some(-4));
}

#[test]
fn arithmetic_left_shift_overflow_raises() {
    let msg = run_err("return 1 << 63;");
    assert!(msg.contains("overflow"), "{}", msg);
    assert_eq!(run("return 1 << 62;").as_int(), Some(1 << 62));
}

#[test]
fn negative_shift_count_raises() {
    let msg = run_err("return 1 <<< -1;");
    assert!(msg.contains("negative shift count"), "{}", msg);
}

#[test]
fn shifts_on_strings_and_arrays() {
    // Logical variants fix the width.
    assert_eq!(run("return \"abcd\" <<< 1;").to_string(), "bcd\0");
    assert_eq!(run("return \"abcd\" >>> 1;").to_string(), "\0abc");
    // Arithmetic variants vary it.
    assert_eq!(run("return countof (\"ab\" << 3);").as_int(), Some(5));
    assert_eq!(run("return \"abcd\" >> 1;").to_string(), "abc");
    assert_eq!(run("return countof ([1, 2, 3] >> 2);").as_int(), Some(1));
    assert_eq!(run("return countof ([1, 2] << 2);").as_int(), Some(4));
}

#[test]
fn string_and_array_duplication() {
    assert_eq!(run("return \"ab\" * 3;").to_string(), "ababab");
    assert_eq!(run("return 2 * \"xy\";").to_string(), "xyxy");
    assert_eq!(run("return countof ([1, 2] * 3);").as_int(), Some(6));
    let msg = run_err("return \"ab\" * -1;");
    assert!(msg.contains("negative duplication count"), "{}", msg);
}

#[test]
fn comparison_operators() {
    assert_eq!(run("return 1 == 1.0;"), Value::Bool(true));
    assert_eq!(run("return 1 != \"1\";"), Value::Bool(true));
    assert_eq!(run("return 2 <=> 3;").as_int(), Some(-1));
    assert_eq!(run("return 3 <=> 3;").as_int(), Some(0));
    assert_eq!(run("return nan <=> 0;").to_string(), "[unordered]");
    assert_eq!(run("return nan </> 0;"), Value::Bool(true));
    let msg = run_err("return nan < 1;");
    assert!(msg.contains("not comparable"), "{}", msg);
}

#[test]
fn fused_multiply_add() {
    assert_eq!(run("return __fma(2.0, 3.0, 4.0);").as_real_like(), Some(10.0));
}

#[test]
fn sign_tests_the_sign_bit() {
    assert_eq!(run("return __sign(-5);"), Value::Bool(true));
    assert_eq!(run("return __sign 5;"), Value::Bool(false));
    assert_eq!(run("return __sign(5.0);"), Value::Bool(false));
    // Negative zero keeps its sign bit.
    assert_eq!(run("return __sign(-0.0);"), Value::Bool(true));
    assert_eq!(run("return typeof __sign 0;").to_string(), "boolean");
}

#[test]
fn bit_counting_intrinsics() {
    assert_eq!(run("return __popcnt 7;").as_int(), Some(3));
    assert_eq!(run("return __lzcnt 1;").as_int(), Some(63));
    assert_eq!(run("return __tzcnt 8;").as_int(), Some(3));
}

#[test]
fn typeof_and_countof() {
    assert_eq!(run("return typeof 1;").to_string(), "integer");
    assert_eq!(run("return typeof \"s\";").to_string(), "string");
    assert_eq!(run("return countof [1, 2, 3];").as_int(), Some(3));
    assert_eq!(run("return #\"abc\";").as_int(), Some(3));
    assert_eq!(run("return countof null;").as_int(), Some(0));
}

#[test]
fn string_division_concatenates_paths() {
    assert_eq!(run("return \"usr\" / \"lib\";").to_string(), "usr/lib");
}

// ─── Variables, references, bindings ───────────────────────────────

#[test]
fn immutable_variable_rejects_writes() {
    let msg = run_err("const c = 1; c = 2;");
    assert!(msg.contains("immutable"), "{}", msg);
}

#[test]
fn structured_array_binding() {
    let out = run("var [a, b, c] = [1, 2, 39]; return a + b + c;");
    assert_eq!(out.as_int(), Some(42));
}

#[test]
fn structured_object_binding() {
    let out = run("var {x, y} = { x = 7, y = 35 }; return x + y;");
    assert_eq!(out.as_int(), Some(42));
}

#[test]
fn binding_fills_missing_with_null() {
    let out = run("var [a, b] = [1]; return b == null;");
    assert_eq!(out, Value::Bool(true));
}

#[test]
fn reference_declaration_aliases() {
    let out = run("var a = [1, 2, 3]; ref second -> a[1]; second = 42; return a[1];");
    assert_eq!(out.as_int(), Some(42));
}

#[test]
fn subscripts_auto_vivify() {
    let out = run("var a; a.b.c = 5; return a.b.c;");
    assert_eq!(out.as_int(), Some(5));
    let out = run("var a = []; a[3] = 1; return countof a;");
    assert_eq!(out.as_int(), Some(4));
}

#[test]
fn head_and_tail_subscripts() {
    let out = run("var a = [2]; a[^] = 1; a[$] = 3; return a[0] * 100 + a[1] * 10 + a[2];");
    assert_eq!(out.as_int(), Some(123));
}

#[test]
fn negative_indices_wrap() {
    assert_eq!(run("var a = [1, 2, 3]; return a[-1];").as_int(), Some(3));
}

#[test]
fn unset_removes_elements() {
    let out = run("var o = { a = 1, b = 2 }; unset o.a; return countof o;");
    assert_eq!(out.as_int(), Some(1));
    let out = run("var a = [1, 2, 3]; return unset a[1];");
    assert_eq!(out.as_int(), Some(2));
}

// ─── Control flow ──────────────────────────────────────────────────

#[test]
fn if_else_and_negation() {
    assert_eq!(run("if(1) return \"t\"; else return \"f\";").to_string(), "t");
    assert_eq!(run("if not (0) return \"t\"; else return \"f\";").to_string(), "t");
}

#[test]
fn while_and_do_while() {
    let out = run("var n = 0; while(n < 5) ++n; return n;");
    assert_eq!(out.as_int(), Some(5));
    let out = run("var n = 0; do ++n; while(n < 5); return n;");
    assert_eq!(out.as_int(), Some(5));
    // A do-while body runs at least once.
    let out = run("var n = 0; do ++n; while(false); return n;");
    assert_eq!(out.as_int(), Some(1));
}

#[test]
fn break_and_continue_with_targets() {
    let out = run(concat!(
        "var s = 0;\n",
        "for(var i = 0; i < 10; ++i) {\n",
        "  if(i == 5) break for;\n",
        "  if(i % 2 == 0) continue for;\n",
        "  s += i;\n",
        "}\n",
        "return s;\n",
    ));
    assert_eq!(out.as_int(), Some(4)); // 1 + 3
}

#[test]
fn switch_falls_through_until_break() {
    let out = run(concat!(
        "var r = \"\";\n",
        "switch(1) { case 1: r += \"a\"; case 2: r += \"b\"; break; default: r += \"c\"; }\n",
        "return r;\n",
    ));
    assert_eq!(out.to_string(), "ab");
}

#[test]
fn switch_default_yields_to_later_match() {
    let out = run(concat!(
        "switch(2) { default: return \"default\"; case 2: return \"two\"; }\n",
    ));
    assert_eq!(out.to_string(), "two");
}

#[test]
fn switch_each_interval_endpoints() {
    let out = run("switch(5) { each [0, 10): return \"in\"; default: return \"out\"; }");
    assert_eq!(out.to_string(), "in");
    // An open upper endpoint excludes the bound itself.
    let out = run("switch(10) { each [0, 10): return \"in\"; default: return \"out\"; }");
    assert_eq!(out.to_string(), "out");
    let out = run("switch(10) { each [0, 10]: return \"in\"; default: return \"out\"; }");
    assert_eq!(out.to_string(), "in");
}

#[test]
fn switch_descending_interval_never_matches() {
    let out = run("switch(5) { each [10, 0]: return \"dead\"; default: return \"live\"; }");
    assert_eq!(out.to_string(), "live");
}

#[test]
fn switch_bypassed_declaration_poisons_reads() {
    let msg = run_err("switch(2) { case 1: var x = 5; case 2: return x; }");
    assert!(msg.contains("bypassed"), "{}", msg);
}

#[test]
fn for_each_array_in_order() {
    let out = run(concat!(
        "var next = 0; var ordered = true; var sum = 0;\n",
        "for(each k, v -> [10, 20, 30]) {\n",
        "  ordered = ordered && (k == next);\n",
        "  next += 1;\n",
        "  sum += v;\n",
        "}\n",
        "return ordered && (next == 3) && (sum == 60);\n",
    ));
    assert_eq!(out, Value::Bool(true));
}

#[test]
fn for_each_object_insertion_order() {
    let out = run(concat!(
        "var keys = \"\";\n",
        "var o = { zebra = 1, apple = 2, mango = 3 };\n",
        "for(each k, v -> o) keys += k + \",\";\n",
        "return keys;\n",
    ));
    assert_eq!(out.to_string(), "zebra,apple,mango,");
}

#[test]
fn for_each_null_iterates_zero_times() {
    let out = run("var n = 0; for(each v -> null) ++n; return n;");
    assert_eq!(out.as_int(), Some(0));
}

#[test]
fn for_each_non_iterable_raises() {
    let msg = run_err("for(each v -> 42) v;");
    assert!(msg.contains("not iterable"), "{}", msg);
}

#[test]
fn for_each_writes_through_mapped_reference() {
    let out = run("var a = [1, 2, 3]; for(each v -> a) v *= 10; return a[2];");
    assert_eq!(out.as_int(), Some(30));
}

// ─── Functions, closures, tail calls ───────────────────────────────

#[test]
fn function_definitions_and_recursion() {
    let out = run("func fib(n) { return n < 2 ? n : fib(n-1) + fib(n-2); } return fib(12);");
    assert_eq!(out.as_int(), Some(144));
}

#[test]
fn closures_capture_by_reference() {
    let out = run(concat!(
        "func make() { var n = 0; return func() { n += 1; return n; }; }\n",
        "var c = make();\n",
        "c();\n",
        "c();\n",
        "return c();\n",
    ));
    assert_eq!(out.as_int(), Some(3));
}

#[test]
fn closure_shorthand_bodies() {
    assert_eq!(run("var f = func(x) = x * 2; return f(21);").as_int(), Some(42));
}

#[test]
fn missing_arguments_bind_null() {
    let out = run("func f(a, b) { return b == null; } return f(1);");
    assert_eq!(out, Value::Bool(true));
}

#[test]
fn varg_protocol() {
    let out = run("func f(...) { return __varg() * 100 + __varg(1); } return f(7, 9);");
    assert_eq!(out.as_int(), Some(209));
}

#[test]
fn this_binds_through_member_calls() {
    let out = run(concat!(
        "var obj = { x = 42, get = func() { return this.x; } };\n",
        "return obj.get();\n",
    ));
    assert_eq!(out.as_int(), Some(42));
}

#[test]
fn proper_tail_calls_run_deep() {
    // Without PTC this would blow the call-depth cap at 300 frames.
    let out = run(concat!(
        "func loop(n) { return n <= 0 ? n : loop(n - 1); }\n",
        "return loop(100000);\n",
    ));
    assert_eq!(out.as_int(), Some(0));
}

#[test]
fn deep_recursion_without_ptc_raises() {
    let mut opts = CompilerOptions::default();
    opts.proper_tail_calls = false;
    let mut script = SimpleScript::with_options(opts);
    script
        .reload_string(
            "test",
            "func loop(n) { return n <= 0 ? n : loop(n - 1); } return loop(100000);",
        )
        .expect("compile");
    let err = script.execute_value(Vec::new()).unwrap_err().to_string();
    assert!(err.contains("nested function calls"), "{}", err);
}

#[test]
fn variadic_call_with_array_generator() {
    let out = run(concat!(
        "func sum(a, b, c) { return a + b + c; }\n",
        "return __vcall(sum, [1, 2, 39]);\n",
    ));
    assert_eq!(out.as_int(), Some(42));
}

#[test]
fn variadic_call_with_function_generator_in_order() {
    let out = run(concat!(
        "var log = [];\n",
        "func gen(...) {\n",
        "  if(__varg() == 0) { return 3; }\n",
        "  log[$] = __varg(0);\n",
        "  return __varg(0) * 10;\n",
        "}\n",
        "func f(a, b, c) { return a * 10000 + b * 100 + c; }\n",
        "var r = __vcall(f, gen);\n",
        "return (r == 1020) && (log[0] == 0) && (log[1] == 1) && (log[2] == 2);\n",
    ));
    assert_eq!(out, Value::Bool(true));
}

#[test]
fn non_function_call_raises() {
    let msg = run_err("var x = 1; x();");
    assert!(msg.contains("not invocable"), "{}", msg);
}

// ─── Exceptions and defer ──────────────────────────────────────────

#[test]
fn throw_and_catch_backtrace() {
    let out = run("try { throw \"oops\"; } catch(e) { return __backtrace[0].value; }");
    assert_eq!(out.to_string(), "oops");
}

#[test]
fn catch_binds_exception_value() {
    let out = run("try { throw [1, 2]; } catch(e) { return e[1]; }");
    assert_eq!(out.as_int(), Some(2));
}

#[test]
fn throwing_null_raises() {
    let msg = run_err("throw null;");
    assert!(msg.contains("not throwable"), "{}", msg);
}

#[test]
fn uncaught_errors_carry_function_frames() {
    let mut script = SimpleScript::new();
    script
        .reload_string("test", "func f() { throw \"inner\"; } f();")
        .expect("compile");
    let err = script.execute_value(Vec::new()).unwrap_err().to_string();
    assert!(err.contains("inner"), "{}", err);
    assert!(err.contains("func"), "{}", err);
    assert!(err.contains("throw"), "{}", err);
}

#[test]
fn catch_expression_captures_or_yields_null() {
    assert_eq!(run("return catch(1 + 1);"), Value::Null);
    let out = run("var e = catch(1 / 0); return typeof e;");
    assert_eq!(out.to_string(), "string");
}

#[test]
fn assert_failure_reports_message() {
    let msg = run_err("assert 1 == 2 : \"math broke\";");
    assert!(msg.contains("assertion failure"), "{}", msg);
    assert!(msg.contains("math broke"), "{}", msg);
    assert_eq!(run("assert true; return 1;").as_int(), Some(1));
}

#[test]
fn defer_runs_lifo_on_normal_exit() {
    let out = run(concat!(
        "var log = \"\";\n",
        "func f() {\n",
        "  defer log += \"1\";\n",
        "  defer log += \"2\";\n",
        "  defer log += \"3\";\n",
        "}\n",
        "f();\n",
        "return log;\n",
    ));
    assert_eq!(out.to_string(), "321");
}

#[test]
fn defer_runs_lifo_on_exceptional_exit() {
    let out = run(concat!(
        "var log = \"\";\n",
        "func f() {\n",
        "  defer log += \"1\";\n",
        "  defer log += \"2\";\n",
        "  throw \"x\";\n",
        "}\n",
        "try { f(); } catch(e) { log += \"c\"; }\n",
        "return log;\n",
    ));
    assert_eq!(out.to_string(), "21c");
}

#[test]
fn defer_captures_block_locals() {
    let out = run(concat!(
        "var log = \"\";\n",
        "{\n",
        "  var word = \"hi\";\n",
        "  defer log += word;\n",
        "  word = \"bye\";\n",
        "}\n",
        "return log;\n",
    ));
    assert_eq!(out.to_string(), "bye");
}

// ─── Short-circuit and coalescence ─────────────────────────────────

#[test]
fn logical_operators_short_circuit() {
    let out = run("var n = 0; func bump() { ++n; return true; } false && bump(); return n;");
    assert_eq!(out.as_int(), Some(0));
    let out = run("var n = 0; func bump() { ++n; return true; } true || bump(); return n;");
    assert_eq!(out.as_int(), Some(0));
    assert_eq!(run("return false || 7;").as_int(), Some(7));
    assert_eq!(run("return null && 7;"), Value::Null);
}

#[test]
fn coalescence_operator() {
    assert_eq!(run("return null ?? 42;").as_int(), Some(42));
    assert_eq!(run("return 5 ?? 42;").as_int(), Some(5));
    assert_eq!(run("var a; a ??= 9; return a;").as_int(), Some(9));
    assert_eq!(run("var a = 1; a ??= 9; return a;").as_int(), Some(1));
}

#[test]
fn ternary_with_assignment() {
    assert_eq!(run("return 1 ? \"t\" : \"f\";").to_string(), "t");
    assert_eq!(run("var a = 0; a ?= 7 : 8; return a;").as_int(), Some(8));
    assert_eq!(run("var a = 1; a ?= 7 : 8; return a;").as_int(), Some(7));
}

#[test]
fn folding_preserves_semantics() {
    // The bi32 specialization must compute the same values as the
    // generic operator path.
    let program = concat!(
        "var a = 7;\n",
        "var r = (a + 3) * 2 - (a % 4) + (a <=> 5);\n",
        "var s = \"ab\";\n",
        "return [r, a << 2, a <<< 1, __addm(a, 3), s * 2, a == 7.0];\n",
    );

    let mut unoptimized = CompilerOptions::default();
    unoptimized.optimization_level = 0;
    let mut script = SimpleScript::with_options(unoptimized);
    script.reload_string("test", program).expect("compile");
    let baseline = script.execute_value(Vec::new()).expect("execute");

    let folded = run(program);
    assert_eq!(folded, baseline);
    assert_eq!(folded.to_string(), "[ 18, 28, 14, 10, \"abab\", true ]");
}

// ─── Import ────────────────────────────────────────────────────────

#[test]
fn import_invokes_module_with_arguments() {
    let dir = tempfile::tempdir().expect("tempdir");
    let module = dir.path().join("double.ast");
    std::fs::File::create(&module)
        .and_then(|mut f| f.write_all(b"return __varg(0) * 2;"))
        .expect("write module");

    let code = format!("return import(\"{}\", 21);", module.display());
    assert_eq!(run(&code).as_int(), Some(42));
}

#[test]
fn import_resolves_relative_to_caller() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inner = dir.path().join("inner.ast");
    std::fs::write(&inner, "return 7;").expect("write inner");
    let outer = dir.path().join("outer.ast");
    std::fs::write(&outer, "return import(\"inner.ast\") + 1;").expect("write outer");

    let mut script = SimpleScript::new();
    script.reload_file(&outer).expect("compile");
    assert_eq!(script.execute_value(Vec::new()).unwrap().as_int(), Some(8));
}

#[test]
fn circular_import_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let module = dir.path().join("self.ast");
    std::fs::write(&module, format!("return import(\"{}\");", module.display()))
        .expect("write module");

    let code = format!("return import(\"{}\");", module.display());
    let msg = run_err(&code);
    assert!(msg.contains("recursive import"), "{}", msg);
}

// ─── Options and magic names ───────────────────────────────────────

#[test]
fn integers_as_reals_option_changes_literals() {
    let mut opts = CompilerOptions::default();
    opts.integers_as_reals = true;
    let mut script = SimpleScript::with_options(opts);
    script.reload_string("test", "return typeof 1;").unwrap();
    assert_eq!(script.execute_value(Vec::new()).unwrap().to_string(), "real");
}

#[test]
fn file_and_line_magic_names() {
    let out = run("return __line;");
    assert_eq!(out.as_int(), Some(1));
    let out = run("\n\nreturn __line;");
    assert_eq!(out.as_int(), Some(3));
    assert_eq!(run("return __file;").to_string(), "test");
}

#[test]
fn hooks_fire_synchronously() {
    use asteria::runtime::hooks::Hooks;
    use asteria::Sloc;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Counting {
        declares: Cell<u32>,
        calls: Cell<u32>,
        traps: Cell<u32>,
    }

    impl Hooks for Counting {
        fn on_declare(&self, _sloc: &Sloc, _name: &str) {
            self.declares.set(self.declares.get() + 1);
        }
        fn on_call(&self, _sloc: &Sloc, _callee: &str) {
            self.calls.set(self.calls.get() + 1);
        }
        fn on_trap(&self, _sloc: &Sloc) {
            self.traps.set(self.traps.get() + 1);
        }
    }

    let mut opts = CompilerOptions::default();
    opts.verbose_single_step_traps = true;
    let mut script = SimpleScript::with_options(opts);
    let hooks = Rc::new(Counting::default());
    script.set_hooks(hooks.clone());

    script
        .reload_string("test", "var a = 1; func f() { return a; } f();")
        .expect("compile");
    script.execute_value(Vec::new()).expect("execute");

    assert!(hooks.declares.get() >= 2, "declares: {}", hooks.declares.get());
    assert!(hooks.calls.get() >= 1, "calls: {}", hooks.calls.get());
    assert!(hooks.traps.get() >= 1, "traps: {}", hooks.traps.get());
}

#[test]
fn composite_value_rendering() {
    let out = run("return { list = [1, 2.5, \"x\"], ok = true };");
    insta::assert_snapshot!(
        out.to_string(),
        @r#"{ "list" = [ 1, 2.5, "x" ], "ok" = true }"#
    );
}

#[test]
fn isvoid_distinguishes_void_results() {
    let out = run("func v() {} return __isvoid v();");
    assert_eq!(out, Value::Bool(true));
    assert_eq!(run("return __isvoid 1;"), Value::Bool(false));
}
