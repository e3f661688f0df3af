//! Statement-level lowering checks: node counts, Matryoshka block
//! handling, and the folding of constant returns.

use std::rc::Rc;

use asteria::air::codegen::generate_statement;
use asteria::air::{AirNode, Bi32Type, PtcAware};
use asteria::parse_source;
use asteria::runtime::ctx::AnalyticScope;
use asteria::runtime::global::GlobalContext;
use asteria::CompilerOptions;

#[test]
fn lowering_node_counts_per_statement() {
    let source = r#"
        var a = 1.5;

        {
          a = 5.5;
          for(;;)
            break;
        }

        {
          var b = a;
          a = 4.5;
        }

        {
          defer a = 6.5;
        }
    "#;

    let opts = CompilerOptions::default();
    let stmts = parse_source(source, "github_102", opts).expect("parse");
    assert_eq!(stmts.len(), 5); // implicit return

    let global = GlobalContext::new();
    let ctx = AnalyticScope::new_function(None, &[]);

    // `var a = 1.5;` → clear, declare, 1.5, initialize.
    let mut code = Vec::new();
    let mut names: Vec<Rc<str>> = Vec::new();
    generate_statement(
        &mut code,
        &stmts[0],
        &ctx,
        Some(&mut names),
        &global,
        &opts,
        PtcAware::None,
    )
    .expect("lowering");
    assert_eq!(code.len(), 4);
    assert_eq!(names.len(), 1);
    assert_eq!(&*names[0], "a");

    // The second block is scopeless throughout, so it inlines:
    // clear, `a`, 5.5, operator `=`, `for` statement.
    let mut code = Vec::new();
    let mut names: Vec<Rc<str>> = Vec::new();
    generate_statement(
        &mut code,
        &stmts[1],
        &ctx,
        Some(&mut names),
        &global,
        &opts,
        PtcAware::None,
    )
    .expect("lowering");
    assert_eq!(code.len(), 5);
    assert!(names.is_empty());

    // A block with a declaration keeps its own scope: one node.
    let mut code = Vec::new();
    let mut names: Vec<Rc<str>> = Vec::new();
    generate_statement(
        &mut code,
        &stmts[2],
        &ctx,
        Some(&mut names),
        &global,
        &opts,
        PtcAware::None,
    )
    .expect("lowering");
    assert_eq!(code.len(), 1);
    assert!(names.is_empty());

    // Likewise for a block holding a deferred expression.
    let mut code = Vec::new();
    let mut names: Vec<Rc<str>> = Vec::new();
    generate_statement(
        &mut code,
        &stmts[3],
        &ctx,
        Some(&mut names),
        &global,
        &opts,
        PtcAware::None,
    )
    .expect("lowering");
    assert_eq!(code.len(), 1);
    assert!(names.is_empty());
}

#[test]
fn matryoshka_unwraps_to_single_block() {
    let opts = CompilerOptions::default();
    let stmts = parse_source("{ { { var a = 1; } } }", "t", opts).expect("parse");

    let global = GlobalContext::new();
    let ctx = AnalyticScope::new_function(None, &[]);

    let mut code = Vec::new();
    generate_statement(&mut code, &stmts[0], &ctx, None, &global, &opts, PtcAware::None)
        .expect("lowering");

    // A single block whose body declares the variable directly.
    assert_eq!(code.len(), 1);
    match &code[0] {
        AirNode::ExecuteBlock { code_body } => {
            assert!(code_body
                .iter()
                .any(|node| matches!(node, AirNode::DeclareVariable { name, .. } if &**name == "a")));
            assert!(!code_body
                .iter()
                .any(|node| matches!(node, AirNode::ExecuteBlock { .. })));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn constant_return_folds_to_bi32_record() {
    let opts = CompilerOptions::default();
    let stmts = parse_source("return 42;", "t", opts).expect("parse");

    let global = GlobalContext::new();
    let ctx = AnalyticScope::new_function(None, &[]);

    let mut code = Vec::new();
    generate_statement(&mut code, &stmts[0], &ctx, None, &global, &opts, PtcAware::ByVal)
        .expect("lowering");

    assert!(matches!(
        code.last(),
        Some(AirNode::ReturnStatementBi32 {
            vtype: Bi32Type::Int,
            irhs: 42,
            ..
        })
    ));
    assert!(!code
        .iter()
        .any(|node| matches!(node, AirNode::PushConstant { .. })));
}

#[test]
fn lowering_twice_is_structurally_identical() {
    let source = "var x = [1, 2]; func f(a) { return a ?? x[0]; } return f(null);";
    let opts = CompilerOptions::default();

    let lower = || {
        let stmts = parse_source(source, "t", opts).expect("parse");
        let global = GlobalContext::new();
        let ctx = AnalyticScope::new_function(None, &[]);
        let mut code = Vec::new();
        for stmt in &stmts {
            generate_statement(&mut code, stmt, &ctx, None, &global, &opts, PtcAware::Void)
                .expect("lowering");
        }
        code
    };

    assert_eq!(lower(), lower());
}
