//! Lowering from the AST to AIR nodes: constant folding, literal
//! subscript specialization, and proper-tail-call annotation.

use std::rc::Rc;

use crate::air::{AirNode, AirSwitchClause, AirStatus, Bi32Type, BindChain, PtcAware};
use crate::ast::{BranchType, Expr, ExprUnit, JumpTarget, Statement, Xop};
use crate::diagnostic::{CompilerError, CompilerStatus};
use crate::opts::CompilerOptions;
use crate::runtime::ctx::AnalyticScope;
use crate::runtime::error::RuntimeError;
use crate::runtime::function::{FunctionRef, InstantiatedFunction};
use crate::runtime::global::GlobalContext;
use crate::sloc::Sloc;
use crate::value::Value;

type CResult<T> = Result<T, CompilerError>;

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn user_declare(ctx: &AnalyticScope, names_out: &mut Option<&mut Vec<Rc<str>>>, name: &Rc<str>) {
    if name.is_empty() {
        return;
    }
    if let Some(names) = names_out.as_mut() {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    ctx.insert(name.clone());
}

fn gen_clear_stack(code: &mut Vec<AirNode>) {
    code.push(AirNode::ClearStack);
}

/// Generate code for a subexpression, annotating only the final unit
/// with the caller's PTC awareness.
fn generate_subexpression(
    code: &mut Vec<AirNode>,
    opts: &CompilerOptions,
    global: &GlobalContext,
    ctx: &AnalyticScope,
    ptc: PtcAware,
    expr: &Expr,
) -> CResult<()> {
    if opts.verbose_single_step_traps {
        // Emitted at translation time, so an unset option costs nothing
        // at runtime.
        code.push(AirNode::SingleStepTrap {
            sloc: expr.sloc.clone(),
        });
    }

    for (i, unit) in expr.units.iter().enumerate() {
        let unit_ptc = if i != expr.units.len() - 1 {
            PtcAware::None
        } else {
            ptc
        };
        generate_unit(code, unit, opts, global, ctx, unit_ptc)?;
    }
    Ok(())
}

fn generate_expression(
    code: &mut Vec<AirNode>,
    opts: &CompilerOptions,
    global: &GlobalContext,
    ctx: &AnalyticScope,
    ptc: PtcAware,
    expr: &Expr,
) -> CResult<()> {
    gen_clear_stack(code);
    generate_subexpression(code, opts, global, ctx, ptc, expr)
}

fn generate_expression_new(
    opts: &CompilerOptions,
    global: &GlobalContext,
    ctx: &AnalyticScope,
    ptc: PtcAware,
    expr: &Expr,
) -> CResult<Vec<AirNode>> {
    let mut code = Vec::new();
    generate_expression(&mut code, opts, global, ctx, ptc, expr)?;
    Ok(code)
}

/// Generate a statement list. Only the final statement may inherit the
/// caller's PTC awareness; a statement directly followed by an empty
/// `return;` is itself in void tail position.
pub fn generate_statement_list(
    code: &mut Vec<AirNode>,
    ctx: &AnalyticScope,
    mut names_out: Option<&mut Vec<Rc<str>>>,
    global: &GlobalContext,
    opts: &CompilerOptions,
    ptc: PtcAware,
    stmts: &[Statement],
) -> CResult<()> {
    for (i, stmt) in stmts.iter().enumerate() {
        let stmt_ptc = if i != stmts.len() - 1 {
            if stmts[i + 1].is_empty_return() {
                PtcAware::Void
            } else {
                PtcAware::None
            }
        } else {
            ptc
        };
        generate_statement(
            code,
            stmt,
            ctx,
            names_out.as_mut().map(|v| &mut **v),
            global,
            opts,
            stmt_ptc,
        )?;
    }
    Ok(())
}

fn generate_block(
    opts: &CompilerOptions,
    global: &GlobalContext,
    ctx: &AnalyticScope,
    ptc: PtcAware,
    stmts: &[Statement],
) -> CResult<Vec<AirNode>> {
    let mut code = Vec::new();
    let ctx_stmts = AnalyticScope::new_plain(ctx);
    generate_statement_list(&mut code, &ctx_stmts, None, global, opts, ptc, stmts)?;
    Ok(code)
}

/// Lower one statement, appending AIR nodes to `code`.
pub fn generate_statement(
    code: &mut Vec<AirNode>,
    stmt: &Statement,
    ctx: &AnalyticScope,
    names_out: Option<&mut Vec<Rc<str>>>,
    global: &GlobalContext,
    opts: &CompilerOptions,
    ptc: PtcAware,
) -> CResult<()> {
    // Nothing after a terminator can execute.
    if code.last().map_or(false, AirNode::is_terminator) {
        return Ok(());
    }
    let mut names_out = names_out;

    match stmt {
        Statement::Expression { expr } => {
            generate_expression(code, opts, global, ctx, ptc, expr)
        }

        Statement::Block { block } => {
            // Unwrap Matryoshka blocks first.
            let mut qblock = block;
            while qblock.stmts.len() == 1 {
                match &qblock.stmts[0] {
                    Statement::Block { block: inner } => qblock = inner,
                    _ => break,
                }
            }

            if qblock.stmts.is_empty() {
                return Ok(());
            }

            // A block whose children are all scopeless is inlined into
            // the surrounding scope.
            if qblock.stmts.iter().all(Statement::is_scopeless) {
                return generate_statement_list(
                    code, ctx, None, global, opts, ptc, &qblock.stmts,
                );
            }

            let code_body = generate_block(opts, global, ctx, ptc, &qblock.stmts)?;
            code.push(AirNode::ExecuteBlock { code_body });
            Ok(())
        }

        Statement::Variables { immutable, decls } => {
            for decl in decls {
                if decl.names.len() == 1 {
                    // A scalar variable.
                    user_declare(ctx, &mut names_out, &decl.names[0]);

                    if decl.init.units.is_empty() {
                        code.push(AirNode::DefineNullVariable {
                            sloc: decl.sloc.clone(),
                            immutable: *immutable,
                            name: decl.names[0].clone(),
                        });
                    } else {
                        gen_clear_stack(code);
                        code.push(AirNode::DeclareVariable {
                            sloc: decl.sloc.clone(),
                            name: decl.names[0].clone(),
                        });
                        generate_subexpression(
                            code,
                            opts,
                            global,
                            ctx,
                            PtcAware::None,
                            &decl.init,
                        )?;
                        code.push(AirNode::InitializeVariable {
                            sloc: decl.sloc.clone(),
                            immutable: *immutable,
                        });
                    }
                    continue;
                }

                // A structured binding, dispatched on the delimiters.
                let inner = &decl.names[1..decl.names.len() - 1];
                for name in inner {
                    user_declare(ctx, &mut names_out, name);
                }

                if decl.init.units.is_empty() {
                    for name in inner {
                        code.push(AirNode::DefineNullVariable {
                            sloc: decl.sloc.clone(),
                            immutable: *immutable,
                            name: name.clone(),
                        });
                    }
                    continue;
                }

                gen_clear_stack(code);
                for name in inner {
                    code.push(AirNode::DeclareVariable {
                        sloc: decl.sloc.clone(),
                        name: name.clone(),
                    });
                }
                generate_subexpression(code, opts, global, ctx, PtcAware::None, &decl.init)?;

                if &*decl.names[0] == "[" {
                    code.push(AirNode::UnpackArray {
                        sloc: decl.sloc.clone(),
                        immutable: *immutable,
                        nelems: inner.len() as u32,
                    });
                } else {
                    code.push(AirNode::UnpackObject {
                        sloc: decl.sloc.clone(),
                        immutable: *immutable,
                        keys: inner.to_vec(),
                    });
                }
            }
            Ok(())
        }

        Statement::Function {
            sloc,
            name,
            params,
            body,
        } => {
            // The name is visible to the function itself, which enables
            // recursion.
            user_declare(ctx, &mut names_out, name);

            code.push(AirNode::DeclareVariable {
                sloc: sloc.clone(),
                name: name.clone(),
            });

            let mut builder = FunctionBuilder::new(*opts);
            builder.reload(Some(ctx), params.clone(), global, body)?;

            code.push(AirNode::DefineFunction {
                opts: *opts,
                sloc: sloc.clone(),
                func: name.to_string(),
                params: params.clone(),
                code_body: builder.into_code(),
            });

            // A function is effectively an immutable variable.
            code.push(AirNode::InitializeVariable {
                sloc: sloc.clone(),
                immutable: true,
            });
            Ok(())
        }

        Statement::If {
            negative,
            cond,
            branch_true,
            branch_false,
        } => {
            generate_expression(code, opts, global, ctx, PtcAware::None, cond)?;

            // Both branches can be PTC'd.
            let code_true = generate_block(opts, global, ctx, ptc, &branch_true.stmts)?;
            let code_false = generate_block(opts, global, ctx, ptc, &branch_false.stmts)?;

            code.push(AirNode::IfStatement {
                negative: *negative,
                code_true,
                code_false,
            });
            Ok(())
        }

        Statement::Switch { ctrl, clauses } => {
            generate_expression(code, opts, global, ctx, PtcAware::None, ctrl)?;

            // All clauses share one context for the switch body.
            let ctx_body = AnalyticScope::new_plain(ctx);
            let mut air_clauses = Vec::new();
            for clause in clauses {
                let mut code_labels = Vec::new();
                if !clause.label_lower.units.is_empty() {
                    generate_expression(
                        &mut code_labels,
                        opts,
                        global,
                        ctx,
                        PtcAware::None,
                        &clause.label_lower,
                    )?;
                }
                if !clause.label_upper.units.is_empty() {
                    // The upper bound evaluates on top of the lower one.
                    generate_subexpression(
                        &mut code_labels,
                        opts,
                        global,
                        ctx,
                        PtcAware::None,
                        &clause.label_upper,
                    )?;
                }

                let mut names_added = Vec::new();
                let mut code_body = Vec::new();
                generate_statement_list(
                    &mut code_body,
                    &ctx_body,
                    Some(&mut names_added),
                    global,
                    opts,
                    PtcAware::None,
                    &clause.body,
                )?;

                air_clauses.push(AirSwitchClause {
                    ctype: clause.ctype,
                    lower_closed: clause.lower_closed,
                    upper_closed: clause.upper_closed,
                    code_labels,
                    code_body,
                    names_added,
                });
            }

            code.push(AirNode::SwitchStatement {
                clauses: air_clauses,
            });
            Ok(())
        }

        Statement::DoWhile {
            body,
            negative,
            cond,
        } => {
            // Loop statements cannot be PTC'd.
            let code_body = generate_block(opts, global, ctx, PtcAware::None, &body.stmts)?;
            let code_cond = generate_expression_new(opts, global, ctx, PtcAware::None, cond)?;

            code.push(AirNode::DoWhileStatement {
                code_body,
                negative: *negative,
                code_cond,
            });
            Ok(())
        }

        Statement::While {
            negative,
            cond,
            body,
        } => {
            let code_cond = generate_expression_new(opts, global, ctx, PtcAware::None, cond)?;
            let code_body = generate_block(opts, global, ctx, PtcAware::None, &body.stmts)?;

            code.push(AirNode::WhileStatement {
                negative: *negative,
                code_cond,
                code_body,
            });
            Ok(())
        }

        Statement::ForEach {
            name_key,
            name_mapped,
            sloc_init,
            init,
            body,
        } => {
            // The key and mapped references outlast every iteration, so
            // they get an outer scope of their own.
            let ctx_for = AnalyticScope::new_plain(ctx);
            if let Some(key) = name_key {
                user_declare(&ctx_for, &mut names_out, key);
            }
            user_declare(&ctx_for, &mut names_out, name_mapped);

            let code_init =
                generate_expression_new(opts, global, &ctx_for, PtcAware::None, init)?;
            let code_body = generate_block(opts, global, &ctx_for, PtcAware::None, &body.stmts)?;

            code.push(AirNode::ForEachStatement {
                name_key: name_key.clone(),
                name_mapped: name_mapped.clone(),
                sloc_init: sloc_init.clone(),
                code_init,
                code_body,
            });
            Ok(())
        }

        Statement::For {
            init,
            cond,
            step,
            body,
        } => {
            // Names declared in the initializer outlast every iteration.
            let ctx_for = AnalyticScope::new_plain(ctx);

            let mut code_init = Vec::new();
            generate_statement_list(
                &mut code_init,
                &ctx_for,
                None,
                global,
                opts,
                PtcAware::None,
                init,
            )?;
            let code_cond = generate_expression_new(opts, global, &ctx_for, PtcAware::None, cond)?;
            let code_step = generate_expression_new(opts, global, &ctx_for, PtcAware::None, step)?;
            let code_body = generate_block(opts, global, &ctx_for, PtcAware::None, &body.stmts)?;

            code.push(AirNode::ForStatement {
                code_init,
                code_cond,
                code_step,
                code_body,
            });
            Ok(())
        }

        Statement::Try {
            sloc_try,
            body_try,
            sloc_catch,
            name_except,
            body_catch,
        } => {
            // Tail position is never preserved into the `try` body.
            let code_try = generate_block(opts, global, ctx, PtcAware::None, &body_try.stmts)?;

            // The `catch` clause gets a fresh scope with the exception
            // binding and the backtrace array; unlike the `try` body it
            // may be PTC'd.
            let ctx_catch = AnalyticScope::new_plain(ctx);
            user_declare(&ctx_catch, &mut names_out, name_except);
            ctx_catch.insert(Rc::from("__backtrace"));

            let mut code_catch = Vec::new();
            generate_statement_list(
                &mut code_catch,
                &ctx_catch,
                None,
                global,
                opts,
                ptc,
                &body_catch.stmts,
            )?;

            code.push(AirNode::TryStatement {
                sloc_try: sloc_try.clone(),
                code_try,
                sloc_catch: sloc_catch.clone(),
                name_except: name_except.clone(),
                code_catch,
            });
            Ok(())
        }

        Statement::Break { target, .. } => {
            let status = match target {
                JumpTarget::Unspec => AirStatus::BreakUnspec,
                JumpTarget::Switch => AirStatus::BreakSwitch,
                JumpTarget::While => AirStatus::BreakWhile,
                JumpTarget::For => AirStatus::BreakFor,
            };
            code.push(AirNode::SimpleStatus { status });
            Ok(())
        }

        Statement::Continue { target, .. } => {
            let status = match target {
                JumpTarget::While => AirStatus::ContinueWhile,
                JumpTarget::For => AirStatus::ContinueFor,
                _ => AirStatus::ContinueUnspec,
            };
            code.push(AirNode::SimpleStatus { status });
            Ok(())
        }

        Statement::Throw { sloc, expr } => {
            generate_expression(code, opts, global, ctx, PtcAware::None, expr)?;
            code.push(AirNode::ThrowStatement { sloc: sloc.clone() });
            Ok(())
        }

        Statement::Return {
            sloc,
            by_ref,
            expr,
        } => {
            if expr.units.is_empty() {
                code.push(AirNode::ReturnStatement {
                    sloc: sloc.clone(),
                    by_ref: false,
                    is_void: true,
                });
                return Ok(());
            }

            let ret_ptc = if *by_ref {
                PtcAware::ByRef
            } else {
                PtcAware::ByVal
            };
            generate_expression(code, opts, global, ctx, ret_ptc, expr)?;

            // A constant return folds into a single record.
            if opts.optimization_level >= 1 {
                let folded = match code.last().and_then(AirNode::get_constant) {
                    Some(Value::Null) => Some((Bi32Type::Null, 0)),
                    Some(Value::Bool(b)) => Some((Bi32Type::Bool, b as i32)),
                    Some(Value::Int(i)) if i32::try_from(i).is_ok() => {
                        Some((Bi32Type::Int, i as i32))
                    }
                    _ => None,
                };
                if let Some((vtype, irhs)) = folded {
                    code.pop();
                    code.push(AirNode::ReturnStatementBi32 {
                        sloc: sloc.clone(),
                        vtype,
                        irhs,
                    });
                    return Ok(());
                }
            }

            code.push(AirNode::ReturnStatement {
                sloc: sloc.clone(),
                by_ref: *by_ref,
                is_void: false,
            });
            Ok(())
        }

        Statement::Assert { sloc, expr, msg } => {
            generate_expression(code, opts, global, ctx, PtcAware::None, expr)?;
            code.push(AirNode::AssertStatement {
                sloc: sloc.clone(),
                msg: msg.clone(),
            });
            Ok(())
        }

        Statement::Defer { sloc, expr } => {
            let code_body = generate_expression_new(opts, global, ctx, PtcAware::None, expr)?;
            code.push(AirNode::DeferExpression {
                sloc: sloc.clone(),
                code_body,
            });
            Ok(())
        }

        Statement::References { decls } => {
            for decl in decls {
                user_declare(ctx, &mut names_out, &decl.name);

                gen_clear_stack(code);
                code.push(AirNode::DeclareReference {
                    name: decl.name.clone(),
                });
                generate_subexpression(code, opts, global, ctx, PtcAware::None, &decl.init)?;
                code.push(AirNode::InitializeReference {
                    sloc: decl.sloc.clone(),
                    name: decl.name.clone(),
                });
            }
            Ok(())
        }
    }
}

/// Operators eligible for the 32-bit literal fast path.
fn is_bi32_foldable(xop: Xop) -> bool {
    matches!(
        xop,
        Xop::Assign
            | Xop::Index
            | Xop::CmpEq
            | Xop::CmpNe
            | Xop::CmpUn
            | Xop::CmpLt
            | Xop::CmpGt
            | Xop::CmpLte
            | Xop::CmpGte
            | Xop::Cmp3way
            | Xop::Add
            | Xop::Sub
            | Xop::Mul
            | Xop::Div
            | Xop::Mod
            | Xop::Andb
            | Xop::Orb
            | Xop::Xorb
            | Xop::Addm
            | Xop::Subm
            | Xop::Mulm
            | Xop::Adds
            | Xop::Subs
            | Xop::Muls
            | Xop::Sll
            | Xop::Srl
            | Xop::Sla
            | Xop::Sra
    )
}

/// Lower one expression unit.
fn generate_unit(
    code: &mut Vec<AirNode>,
    unit: &ExprUnit,
    opts: &CompilerOptions,
    global: &GlobalContext,
    ctx: &AnalyticScope,
    ptc: PtcAware,
) -> CResult<()> {
    if code.last().map_or(false, AirNode::is_terminator) {
        return Ok(());
    }

    match unit {
        ExprUnit::Literal { value } => {
            code.push(AirNode::PushConstant {
                value: value.clone(),
            });
            Ok(())
        }

        ExprUnit::LocalReference { sloc, name } => {
            // Early lookup: record the static depth of the frame where
            // the name is declared.
            let mut qctx = Some(ctx);
            let mut depth: u32 = 0;
            while let Some(cur) = qctx {
                if cur.contains(name) {
                    code.push(AirNode::PushLocalReference {
                        sloc: sloc.clone(),
                        depth: depth as u16,
                        name: name.clone(),
                    });
                    return Ok(());
                }
                qctx = cur.parent();
                depth += 1;
                if depth > 0xFFFF {
                    return Err(CompilerError::new(
                        CompilerStatus::TooManyNestedLevels,
                        sloc.clone(),
                    ));
                }
            }

            // Assume the name will be found in the global context, or
            // require it to resolve now.
            if !opts.implicit_global_names && global.get_named_reference_opt(name).is_none() {
                return Err(CompilerError::with_message(
                    CompilerStatus::UndeclaredIdentifier,
                    sloc.clone(),
                    format!("undeclared identifier `{}`", name),
                ));
            }
            code.push(AirNode::PushGlobalReference {
                sloc: sloc.clone(),
                name: name.clone(),
            });
            Ok(())
        }

        ExprUnit::ClosureFunction {
            sloc,
            unique_name,
            params,
            body,
        } => {
            let mut builder = FunctionBuilder::new(*opts);
            builder.reload(Some(ctx), params.clone(), global, body)?;

            code.push(AirNode::DefineFunction {
                opts: *opts,
                sloc: sloc.clone(),
                func: unique_name.clone(),
                params: params.clone(),
                code_body: builder.into_code(),
            });
            Ok(())
        }

        ExprUnit::Branch {
            sloc,
            branches,
            assign,
        } => {
            let mut compiled: Vec<(BranchType, Vec<AirNode>)> = Vec::new();
            for branch in branches {
                let mut branch_code = Vec::new();
                for (i, unit) in branch.units.iter().enumerate() {
                    let unit_ptc = if i != branch.units.len() - 1 || *assign {
                        PtcAware::None
                    } else {
                        ptc
                    };
                    generate_unit(&mut branch_code, unit, opts, global, ctx, unit_ptc)?;
                }
                compiled.push((branch.btype, branch_code));
            }

            if compiled.len() == 1 && compiled[0].0 == BranchType::Null {
                let (_, code_null) = compiled.remove(0);
                code.push(AirNode::CoalesceExpression {
                    sloc: sloc.clone(),
                    code_null,
                    assign: *assign,
                });
                return Ok(());
            }

            let mut code_true = Vec::new();
            let mut code_false = Vec::new();
            for (btype, branch_code) in compiled {
                match btype {
                    BranchType::True => code_true = branch_code,
                    BranchType::False => code_false = branch_code,
                    BranchType::Null => {}
                }
            }
            code.push(AirNode::BranchExpression {
                sloc: sloc.clone(),
                code_true,
                code_false,
                assign: *assign,
            });
            Ok(())
        }

        ExprUnit::FunctionCall { sloc, args } => {
            let rptc = if opts.proper_tail_calls {
                ptc
            } else {
                PtcAware::None
            };

            if opts.optimization_level >= 1
                && !args
                    .iter()
                    .any(|arg| arg.units.iter().any(ExprUnit::clobbers_alt_stack))
            {
                // Build the argument frame directly on the alternative
                // stack, skipping a transfer step.
                code.push(AirNode::AltClearStack);
                for arg in args {
                    for unit in &arg.units {
                        generate_unit(code, unit, opts, global, ctx, PtcAware::None)?;
                    }
                }
                code.push(AirNode::AltFunctionCall {
                    sloc: sloc.clone(),
                    ptc: rptc,
                });
                return Ok(());
            }

            for arg in args {
                for unit in &arg.units {
                    generate_unit(code, unit, opts, global, ctx, PtcAware::None)?;
                }
            }
            code.push(AirNode::FunctionCall {
                sloc: sloc.clone(),
                nargs: args.len() as u32,
                ptc: rptc,
            });
            Ok(())
        }

        ExprUnit::OperatorRpn { sloc, xop, assign } => {
            if opts.optimization_level >= 1 {
                let qrhs = code.last().and_then(AirNode::get_constant);
                if let Some(rhs) = qrhs {
                    // Unary plus drops out entirely.
                    if *xop == Xop::Pos && !assign {
                        return Ok(());
                    }

                    // A constant string key collapses into a pre-hashed
                    // member access.
                    if let (Xop::Index, Some(key)) = (*xop, rhs.as_str()) {
                        let node = AirNode::MemberAccess {
                            sloc: sloc.clone(),
                            key: key.clone(),
                        };
                        code.pop();
                        code.push(node);
                        return Ok(());
                    }

                    if let (Xop::Notb, Some(i)) = (*xop, rhs.as_int()) {
                        // The result can never overflow.
                        code.pop();
                        code.push(AirNode::PushConstant {
                            value: Value::Int(i ^ -1),
                        });
                        return Ok(());
                    }

                    if let Some(i) = rhs.as_int() {
                        if i32::try_from(i).is_ok() && is_bi32_foldable(*xop) {
                            code.pop();
                            code.push(AirNode::ApplyOperatorBi32 {
                                sloc: sloc.clone(),
                                xop: *xop,
                                assign: *assign,
                                irhs: i as i32,
                            });
                            return Ok(());
                        }
                    }
                }
            }

            code.push(AirNode::ApplyOperator {
                sloc: sloc.clone(),
                xop: *xop,
                assign: *assign,
            });
            Ok(())
        }

        ExprUnit::UnnamedArray { sloc, nelems } => {
            code.push(AirNode::PushUnnamedArray {
                sloc: sloc.clone(),
                nelems: *nelems,
            });
            Ok(())
        }

        ExprUnit::UnnamedObject { sloc, keys } => {
            code.push(AirNode::PushUnnamedObject {
                sloc: sloc.clone(),
                keys: keys.clone(),
            });
            Ok(())
        }

        ExprUnit::GlobalReference { sloc, name } => {
            code.push(AirNode::PushGlobalReference {
                sloc: sloc.clone(),
                name: name.clone(),
            });
            Ok(())
        }

        ExprUnit::VariadicCall { sloc, args } => {
            for arg in args {
                for unit in &arg.units {
                    generate_unit(code, unit, opts, global, ctx, PtcAware::None)?;
                }
            }

            let rptc = if opts.proper_tail_calls {
                ptc
            } else {
                PtcAware::None
            };
            code.push(AirNode::VariadicCall {
                sloc: sloc.clone(),
                ptc: rptc,
            });
            Ok(())
        }

        ExprUnit::CheckArgument { sloc, by_ref } => {
            code.push(AirNode::CheckArgument {
                sloc: sloc.clone(),
                by_ref: *by_ref,
            });
            Ok(())
        }

        ExprUnit::ImportCall { sloc, args } => {
            for arg in args {
                for unit in &arg.units {
                    generate_unit(code, unit, opts, global, ctx, PtcAware::None)?;
                }
            }
            code.push(AirNode::ImportCall {
                opts: *opts,
                sloc: sloc.clone(),
                nargs: args.len() as u32,
            });
            Ok(())
        }

        ExprUnit::Catch { operand } => {
            // The operand is evaluated on a separate context and never
            // PTC'd.
            let mut code_op = Vec::new();
            for unit in operand {
                generate_unit(&mut code_op, unit, opts, global, ctx, PtcAware::None)?;
            }
            code.push(AirNode::CatchExpression { code_body: code_op });
            Ok(())
        }
    }
}

/// Generates and rebinds function bodies; the AIR counterpart of the
/// front end for one function at a time.
pub struct FunctionBuilder {
    opts: CompilerOptions,
    params: Vec<Rc<str>>,
    code: Vec<AirNode>,
}

impl FunctionBuilder {
    pub fn new(opts: CompilerOptions) -> Self {
        Self {
            opts,
            params: Vec::new(),
            code: Vec::new(),
        }
    }

    /// Generate code for a function body. The final statement is in
    /// void tail position unless an explicit return precedes it.
    pub fn reload(
        &mut self,
        ctx_opt: Option<&AnalyticScope>,
        params: Vec<Rc<str>>,
        global: &GlobalContext,
        stmts: &[Statement],
    ) -> CResult<()> {
        self.code.clear();
        self.params = params;

        if stmts.is_empty() {
            return Ok(());
        }

        let ctx_func = AnalyticScope::new_function(ctx_opt, &self.params);
        for (i, stmt) in stmts.iter().enumerate() {
            let ptc = if i != stmts.len() - 1 && !stmts[i + 1].is_empty_return() {
                PtcAware::None
            } else {
                PtcAware::Void
            };
            generate_statement(&mut self.code, stmt, &ctx_func, None, global, &self.opts, ptc)?;
        }
        Ok(())
    }

    /// Load already-generated code, rebinding captured references
    /// against the live scope chain.
    pub fn rebind(
        &mut self,
        chain: &BindChain,
        params: Vec<Rc<str>>,
        code: &[AirNode],
    ) -> Result<(), RuntimeError> {
        self.params = params;
        self.code = code.to_vec();
        crate::air::rebind_nodes(&mut self.code, chain)?;
        Ok(())
    }

    pub fn code(&self) -> &[AirNode] {
        &self.code
    }

    pub fn into_code(self) -> Vec<AirNode> {
        self.code
    }

    /// Instantiate a closure value that can be assigned to a variable.
    pub fn create_function(&self, sloc: Sloc, name: &str) -> FunctionRef {
        let mut func = name.to_string();
        if name
            .as_bytes()
            .first()
            .copied()
            .map_or(false, is_name_start)
        {
            // A plain function name gets its parameter list appended to
            // form a signature.
            func.push('(');
            for (i, param) in self.params.iter().enumerate() {
                if i != 0 {
                    func.push_str(", ");
                }
                func.push_str(param);
            }
            func.push(')');
        }

        Rc::new(InstantiatedFunction::new(
            sloc,
            func,
            self.params.clone(),
            &self.code,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::token_queue::TokenQueue;
    use std::io::Cursor;

    fn lower_with(text: &str, opts: CompilerOptions) -> Vec<AirNode> {
        let mut cur = Cursor::new(text.as_bytes().to_vec());
        let tokens = Lexer::new(opts)
            .tokenize(Rc::from("test"), 1, &mut cur)
            .expect("lexing should succeed");
        let mut tq = TokenQueue::new(tokens);
        let stmts = Parser::new(&mut tq)
            .parse_document()
            .expect("parsing should succeed");

        let global = GlobalContext::new();
        let mut code = Vec::new();
        let ctx = AnalyticScope::new_function(None, &[Rc::from("...")]);
        generate_statement_list(
            &mut code,
            &ctx,
            None,
            &global,
            &opts,
            PtcAware::Void,
            &stmts,
        )
        .expect("lowering should succeed");
        code
    }

    fn lower(text: &str) -> Vec<AirNode> {
        lower_with(text, CompilerOptions::default())
    }

    #[test]
    fn test_var_with_initializer() {
        let code = lower("var a = 1.5;");
        // clear, declare, constant, initialize, implicit return
        assert_eq!(code.len(), 5);
        assert!(matches!(code[0], AirNode::ClearStack));
        assert!(matches!(code[1], AirNode::DeclareVariable { .. }));
        assert!(matches!(code[2], AirNode::PushConstant { .. }));
        assert!(matches!(code[3], AirNode::InitializeVariable { .. }));
    }

    #[test]
    fn test_matryoshka_blocks_unwrap() {
        let code = lower("{ { { var a = 1; } } }");
        // One block node (the declaration is not scopeless), then the
        // implicit return.
        assert_eq!(code.len(), 2);
        match &code[0] {
            AirNode::ExecuteBlock { code_body } => {
                assert!(matches!(code_body[1], AirNode::DeclareVariable { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_scopeless_block_inlined() {
        let code = lower("{ 1; 2; }");
        // No ExecuteBlock at all.
        assert!(!code
            .iter()
            .any(|node| matches!(node, AirNode::ExecuteBlock { .. })));
    }

    #[test]
    fn test_return_constant_folds_to_bi32() {
        let code = lower("return 42;");
        assert!(matches!(
            code.last(),
            Some(AirNode::ReturnStatementBi32 {
                vtype: Bi32Type::Int,
                irhs: 42,
                ..
            })
        ));
        // The push-constant predecessor is gone.
        assert!(!code
            .iter()
            .any(|node| matches!(node, AirNode::PushConstant { .. })));
    }

    #[test]
    fn test_return_constant_unfolded_at_level_zero() {
        let mut opts = CompilerOptions::default();
        opts.optimization_level = 0;
        let code = lower_with("return 42;", opts);
        assert!(matches!(
            code.last(),
            Some(AirNode::ReturnStatement { is_void: false, .. })
        ));
    }

    #[test]
    fn test_bi32_specialization() {
        let code = lower("a + 3;");
        assert!(code.iter().any(|node| matches!(
            node,
            AirNode::ApplyOperatorBi32 {
                xop: Xop::Add,
                irhs: 3,
                ..
            }
        )));
    }

    #[test]
    fn test_member_access_specialization() {
        let code = lower("a.b;");
        assert!(code
            .iter()
            .any(|node| matches!(node, AirNode::MemberAccess { .. })));
    }

    #[test]
    fn test_notb_constant_folds() {
        let code = lower("var x = ~5;");
        assert!(code.iter().any(|node| matches!(
            node,
            AirNode::PushConstant {
                value: Value::Int(-6)
            }
        )));
    }

    #[test]
    fn test_unary_plus_dropped() {
        let code = lower("var x = +5;");
        assert!(!code
            .iter()
            .any(|node| matches!(node, AirNode::ApplyOperator { .. })));
    }

    #[test]
    fn test_local_reference_depth() {
        let code = lower("var a = 1; { var b = 2; a; }");
        let mut found = false;
        fn scan(code: &[AirNode], found: &mut bool) {
            for node in code {
                match node {
                    AirNode::PushLocalReference { depth, name, .. } if &**name == "a" => {
                        assert_eq!(*depth, 1);
                        *found = true;
                    }
                    AirNode::ExecuteBlock { code_body } => scan(code_body, found),
                    _ => {}
                }
            }
        }
        scan(&code, &mut found);
        assert!(found, "expected a depth-1 local reference to `a`");
    }

    #[test]
    fn test_undeclared_name_compiles_to_global() {
        let code = lower("mystery;");
        assert!(code
            .iter()
            .any(|node| matches!(node, AirNode::PushGlobalReference { .. })));
    }

    #[test]
    fn test_implicit_global_names_off() {
        let mut opts = CompilerOptions::default();
        opts.implicit_global_names = false;
        let mut cur = Cursor::new(b"mystery;".to_vec());
        let tokens = Lexer::new(opts)
            .tokenize(Rc::from("test"), 1, &mut cur)
            .unwrap();
        let mut tq = TokenQueue::new(tokens);
        let stmts = Parser::new(&mut tq).parse_document().unwrap();

        let global = GlobalContext::new();
        let mut code = Vec::new();
        let ctx = AnalyticScope::new_function(None, &[]);
        let err = generate_statement_list(
            &mut code,
            &ctx,
            None,
            &global,
            &opts,
            PtcAware::Void,
            &stmts,
        )
        .unwrap_err();
        assert_eq!(err.status, CompilerStatus::UndeclaredIdentifier);
    }

    #[test]
    fn test_lowering_is_deterministic() {
        let a = lower("var s = 0; for(var i = 0; i < 10; ++i) s += i; return s;");
        let b = lower("var s = 0; for(var i = 0; i < 10; ++i) s += i; return s;");
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_step_traps_option() {
        let mut opts = CompilerOptions::default();
        opts.verbose_single_step_traps = true;
        let code = lower_with("1;", opts);
        assert!(code
            .iter()
            .any(|node| matches!(node, AirNode::SingleStepTrap { .. })));
    }

    #[test]
    fn test_alt_stack_call_optimization() {
        let code = lower("f(1, 2);");
        assert!(code
            .iter()
            .any(|node| matches!(node, AirNode::AltClearStack)));
        assert!(code
            .iter()
            .any(|node| matches!(node, AirNode::AltFunctionCall { .. })));

        // An argument that itself calls clobbers the alternative stack,
        // so the generic call sequence is used.
        let code = lower("f(g());");
        assert!(code
            .iter()
            .any(|node| matches!(node, AirNode::FunctionCall { .. })));
    }

    #[test]
    fn test_ptc_annotation_on_tail_call() {
        let code = lower("func f() { return f(); }");
        fn find_call(code: &[AirNode]) -> Option<PtcAware> {
            for node in code {
                match node {
                    AirNode::FunctionCall { ptc, .. } | AirNode::AltFunctionCall { ptc, .. } => {
                        return Some(*ptc)
                    }
                    AirNode::DefineFunction { code_body, .. }
                    | AirNode::ExecuteBlock { code_body } => {
                        if let Some(found) = find_call(code_body) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        assert_eq!(find_call(&code), Some(PtcAware::ByVal));
    }

    #[test]
    fn test_ptc_disabled_by_option() {
        let mut opts = CompilerOptions::default();
        opts.proper_tail_calls = false;
        let code = lower_with("func f() { return f(); }", opts);
        fn find_call(code: &[AirNode]) -> Option<PtcAware> {
            for node in code {
                match node {
                    AirNode::FunctionCall { ptc, .. } | AirNode::AltFunctionCall { ptc, .. } => {
                        return Some(*ptc)
                    }
                    AirNode::DefineFunction { code_body, .. }
                    | AirNode::ExecuteBlock { code_body } => {
                        if let Some(found) = find_call(code_body) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        assert_eq!(find_call(&code), Some(PtcAware::None));
    }
}
