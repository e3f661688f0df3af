//! AIR — the intermediate representation produced by lowering the AST,
//! and the machinery that packs it into executable rods.

pub mod codegen;
pub mod rod;

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{SwitchClauseType, Xop};
use crate::opts::CompilerOptions;
use crate::runtime::ctx::Scope;
use crate::runtime::error::RuntimeError;
use crate::runtime::executive as exec;
use crate::runtime::reference::{collect_value_variables, Reference, VariableSet};
use crate::sloc::Sloc;
use crate::value::Value;

use self::rod::{solidify_nodes, AvmRod, Sparam, SwitchClauseRt, Uparam};

/// Whether a call site is in proper tail position, and how the result
/// is to be forwarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PtcAware {
    None = 0,
    ByRef = 1,
    ByVal = 2,
    Void = 3,
}

impl PtcAware {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => PtcAware::ByRef,
            2 => PtcAware::ByVal,
            3 => PtcAware::Void,
            _ => PtcAware::None,
        }
    }
}

/// Status yielded by executing an AIR rod. `Next` continues; all others
/// stop the driver loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AirStatus {
    Next = 0,
    ReturnVoid = 1,
    Return = 2,
    BreakUnspec = 3,
    BreakSwitch = 4,
    BreakWhile = 5,
    BreakFor = 6,
    ContinueUnspec = 7,
    ContinueWhile = 8,
    ContinueFor = 9,
}

impl AirStatus {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => AirStatus::ReturnVoid,
            2 => AirStatus::Return,
            3 => AirStatus::BreakUnspec,
            4 => AirStatus::BreakSwitch,
            5 => AirStatus::BreakWhile,
            6 => AirStatus::BreakFor,
            7 => AirStatus::ContinueUnspec,
            8 => AirStatus::ContinueWhile,
            9 => AirStatus::ContinueFor,
            _ => AirStatus::Next,
        }
    }
}

/// Type tag of a folded `return-statement-bi32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Bi32Type {
    Null = 0,
    Bool = 1,
    Int = 2,
}

impl Bi32Type {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Bi32Type::Bool,
            2 => Bi32Type::Int,
            _ => Bi32Type::Null,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AirSwitchClause {
    pub ctype: SwitchClauseType,
    pub lower_closed: bool,
    pub upper_closed: bool,
    pub code_labels: Vec<AirNode>,
    pub code_body: Vec<AirNode>,
    pub names_added: Vec<Rc<str>>,
}

/// One node of the compiled IR.
#[derive(Clone, Debug, PartialEq)]
pub enum AirNode {
    // Stack control
    ClearStack,
    AltClearStack,

    // Declarations
    DeclareVariable {
        sloc: Sloc,
        name: Rc<str>,
    },
    InitializeVariable {
        sloc: Sloc,
        immutable: bool,
    },
    DeclareReference {
        name: Rc<str>,
    },
    InitializeReference {
        sloc: Sloc,
        name: Rc<str>,
    },
    DefineNullVariable {
        sloc: Sloc,
        immutable: bool,
        name: Rc<str>,
    },
    DefineFunction {
        opts: CompilerOptions,
        sloc: Sloc,
        func: String,
        params: Vec<Rc<str>>,
        code_body: Vec<AirNode>,
    },

    // Control flow
    ExecuteBlock {
        code_body: Vec<AirNode>,
    },
    IfStatement {
        negative: bool,
        code_true: Vec<AirNode>,
        code_false: Vec<AirNode>,
    },
    SwitchStatement {
        clauses: Vec<AirSwitchClause>,
    },
    DoWhileStatement {
        code_body: Vec<AirNode>,
        negative: bool,
        code_cond: Vec<AirNode>,
    },
    WhileStatement {
        negative: bool,
        code_cond: Vec<AirNode>,
        code_body: Vec<AirNode>,
    },
    ForEachStatement {
        name_key: Option<Rc<str>>,
        name_mapped: Rc<str>,
        sloc_init: Sloc,
        code_init: Vec<AirNode>,
        code_body: Vec<AirNode>,
    },
    ForStatement {
        code_init: Vec<AirNode>,
        code_cond: Vec<AirNode>,
        code_step: Vec<AirNode>,
        code_body: Vec<AirNode>,
    },
    TryStatement {
        sloc_try: Sloc,
        code_try: Vec<AirNode>,
        sloc_catch: Sloc,
        name_except: Rc<str>,
        code_catch: Vec<AirNode>,
    },
    ThrowStatement {
        sloc: Sloc,
    },
    ReturnStatement {
        sloc: Sloc,
        by_ref: bool,
        is_void: bool,
    },
    ReturnStatementBi32 {
        sloc: Sloc,
        vtype: Bi32Type,
        irhs: i32,
    },
    SimpleStatus {
        status: AirStatus,
    },
    AssertStatement {
        sloc: Sloc,
        msg: String,
    },
    DeferExpression {
        sloc: Sloc,
        code_body: Vec<AirNode>,
    },
    SingleStepTrap {
        sloc: Sloc,
    },

    // References
    PushGlobalReference {
        sloc: Sloc,
        name: Rc<str>,
    },
    PushLocalReference {
        sloc: Sloc,
        depth: u16,
        name: Rc<str>,
    },
    PushBoundReference {
        bref: Reference,
    },
    MemberAccess {
        sloc: Sloc,
        key: Rc<str>,
    },

    // Construction
    PushConstant {
        value: Value,
    },
    PushUnnamedArray {
        sloc: Sloc,
        nelems: u32,
    },
    PushUnnamedObject {
        sloc: Sloc,
        keys: Vec<Rc<str>>,
    },

    // Evaluation
    ApplyOperator {
        sloc: Sloc,
        xop: Xop,
        assign: bool,
    },
    ApplyOperatorBi32 {
        sloc: Sloc,
        xop: Xop,
        assign: bool,
        irhs: i32,
    },
    BranchExpression {
        sloc: Sloc,
        code_true: Vec<AirNode>,
        code_false: Vec<AirNode>,
        assign: bool,
    },
    CoalesceExpression {
        sloc: Sloc,
        code_null: Vec<AirNode>,
        assign: bool,
    },
    CatchExpression {
        code_body: Vec<AirNode>,
    },

    // Calls
    FunctionCall {
        sloc: Sloc,
        nargs: u32,
        ptc: PtcAware,
    },
    AltFunctionCall {
        sloc: Sloc,
        ptc: PtcAware,
    },
    VariadicCall {
        sloc: Sloc,
        ptc: PtcAware,
    },
    ImportCall {
        opts: CompilerOptions,
        sloc: Sloc,
        nargs: u32,
    },

    // Checks
    CheckArgument {
        sloc: Sloc,
        by_ref: bool,
    },
    CheckNull {
        negative: bool,
    },

    // Structured binding
    UnpackArray {
        sloc: Sloc,
        immutable: bool,
        nelems: u32,
    },
    UnpackObject {
        sloc: Sloc,
        immutable: bool,
        keys: Vec<Rc<str>>,
    },
}

/// The scope chain a node is rebound against when a closure or deferred
/// expression captures its surroundings. Frames below `analytic_depth`
/// belong to the function being instantiated and stay dynamic; deeper
/// frames resolve against live runtime scopes.
#[derive(Clone)]
pub struct BindChain {
    analytic_depth: u16,
    runtime: Option<Rc<RefCell<Scope>>>,
}

impl BindChain {
    /// The chain seen by the body of a function instantiated in `scope`:
    /// one analytic frame (the function root) over the runtime chain.
    pub fn for_function(scope: &Rc<RefCell<Scope>>) -> Self {
        Self {
            analytic_depth: 1,
            runtime: Some(scope.clone()),
        }
    }

    /// The chain seen by a deferred expression: the runtime chain
    /// directly.
    pub fn for_defer(scope: &Rc<RefCell<Scope>>) -> Self {
        Self {
            analytic_depth: 0,
            runtime: Some(scope.clone()),
        }
    }

    /// Push one analytic frame.
    pub fn nest(&self) -> Self {
        Self {
            analytic_depth: self.analytic_depth.saturating_add(1),
            runtime: self.runtime.clone(),
        }
    }

    fn resolve(&self, depth: u16, name: &str) -> Result<Option<Reference>, RuntimeError> {
        if depth < self.analytic_depth {
            return Ok(None);
        }
        let runtime = match &self.runtime {
            Some(runtime) => runtime,
            None => return Ok(None),
        };
        let scope = match Scope::walk(runtime, (depth - self.analytic_depth) as u32) {
            Some(scope) => scope,
            None => return Ok(None),
        };
        let found = scope.borrow().get(name);
        match found {
            None => Ok(None),
            Some(re) if re.is_invalid() => Err(RuntimeError::format(
                Sloc::dummy(),
                format!("initialization of variable or reference `{}` bypassed", name),
            )),
            Some(re) => Ok(Some(re)),
        }
    }
}

/// Rebind every node of `code` in place; true if anything changed.
pub fn rebind_nodes(code: &mut [AirNode], chain: &BindChain) -> Result<bool, RuntimeError> {
    let mut dirty = false;
    for node in code.iter_mut() {
        if let Some(bound) = node.rebind(chain)? {
            *node = bound;
            dirty = true;
        }
    }
    Ok(dirty)
}

impl AirNode {
    /// The constant this node pushes, if it pushes one.
    pub fn get_constant(&self) -> Option<Value> {
        match self {
            AirNode::PushConstant { value } => Some(value.clone()),
            AirNode::PushBoundReference { bref } if bref.is_temporary() => {
                bref.dereference_readonly().ok()
            }
            _ => None,
        }
    }

    /// Whether this node always terminates the control flow, so nodes
    /// after it can never execute.
    pub fn is_terminator(&self) -> bool {
        match self {
            AirNode::ThrowStatement { .. }
            | AirNode::ReturnStatement { .. }
            | AirNode::ReturnStatementBi32 { .. } => true,

            AirNode::SimpleStatus { status } => *status != AirStatus::Next,

            AirNode::FunctionCall { ptc, .. }
            | AirNode::AltFunctionCall { ptc, .. }
            | AirNode::VariadicCall { ptc, .. } => *ptc != PtcAware::None,

            AirNode::ExecuteBlock { code_body } => {
                code_body.last().map_or(false, AirNode::is_terminator)
            }

            AirNode::IfStatement {
                code_true,
                code_false,
                ..
            }
            | AirNode::BranchExpression {
                code_true,
                code_false,
                ..
            } => {
                code_true.last().map_or(false, AirNode::is_terminator)
                    && code_false.last().map_or(false, AirNode::is_terminator)
            }

            _ => false,
        }
    }

    /// Produce a copy of this node with captured references resolved
    /// against `chain`, or `None` if nothing changed.
    pub fn rebind(&self, chain: &BindChain) -> Result<Option<AirNode>, RuntimeError> {
        match self {
            AirNode::PushLocalReference { depth, name, .. } => {
                match chain.resolve(*depth, name)? {
                    Some(re) => Ok(Some(AirNode::PushBoundReference { bref: re })),
                    None => Ok(None),
                }
            }

            AirNode::ExecuteBlock { code_body } => {
                let mut bound = code_body.clone();
                let dirty = rebind_nodes(&mut bound, &chain.nest())?;
                Ok(dirty.then(|| AirNode::ExecuteBlock { code_body: bound }))
            }

            AirNode::IfStatement {
                negative,
                code_true,
                code_false,
            } => {
                let nested = chain.nest();
                let mut bound_true = code_true.clone();
                let mut bound_false = code_false.clone();
                let dirty = rebind_nodes(&mut bound_true, &nested)?
                    | rebind_nodes(&mut bound_false, &nested)?;
                Ok(dirty.then(|| AirNode::IfStatement {
                    negative: *negative,
                    code_true: bound_true,
                    code_false: bound_false,
                }))
            }

            AirNode::SwitchStatement { clauses } => {
                // Labels are evaluated in the scope of the control
                // expression; the bodies share one inner scope.
                let nested = chain.nest();
                let mut bound = clauses.clone();
                let mut dirty = false;
                for clause in bound.iter_mut() {
                    dirty |= rebind_nodes(&mut clause.code_labels, chain)?;
                    dirty |= rebind_nodes(&mut clause.code_body, &nested)?;
                }
                Ok(dirty.then(|| AirNode::SwitchStatement { clauses: bound }))
            }

            AirNode::DoWhileStatement {
                code_body,
                negative,
                code_cond,
            } => {
                let mut bound_body = code_body.clone();
                let mut bound_cond = code_cond.clone();
                let dirty = rebind_nodes(&mut bound_body, &chain.nest())?
                    | rebind_nodes(&mut bound_cond, chain)?;
                Ok(dirty.then(|| AirNode::DoWhileStatement {
                    code_body: bound_body,
                    negative: *negative,
                    code_cond: bound_cond,
                }))
            }

            AirNode::WhileStatement {
                negative,
                code_cond,
                code_body,
            } => {
                let mut bound_cond = code_cond.clone();
                let mut bound_body = code_body.clone();
                let dirty = rebind_nodes(&mut bound_cond, chain)?
                    | rebind_nodes(&mut bound_body, &chain.nest())?;
                Ok(dirty.then(|| AirNode::WhileStatement {
                    negative: *negative,
                    code_cond: bound_cond,
                    code_body: bound_body,
                }))
            }

            AirNode::ForEachStatement {
                name_key,
                name_mapped,
                sloc_init,
                code_init,
                code_body,
            } => {
                // The range references live in their own scope; the body
                // runs in a further inner one.
                let ctx_for = chain.nest();
                let ctx_body = ctx_for.nest();
                let mut bound_init = code_init.clone();
                let mut bound_body = code_body.clone();
                let dirty = rebind_nodes(&mut bound_init, &ctx_for)?
                    | rebind_nodes(&mut bound_body, &ctx_body)?;
                Ok(dirty.then(|| AirNode::ForEachStatement {
                    name_key: name_key.clone(),
                    name_mapped: name_mapped.clone(),
                    sloc_init: sloc_init.clone(),
                    code_init: bound_init,
                    code_body: bound_body,
                }))
            }

            AirNode::ForStatement {
                code_init,
                code_cond,
                code_step,
                code_body,
            } => {
                let ctx_for = chain.nest();
                let ctx_body = ctx_for.nest();
                let mut bound_init = code_init.clone();
                let mut bound_cond = code_cond.clone();
                let mut bound_step = code_step.clone();
                let mut bound_body = code_body.clone();
                let dirty = rebind_nodes(&mut bound_init, &ctx_for)?
                    | rebind_nodes(&mut bound_cond, &ctx_for)?
                    | rebind_nodes(&mut bound_step, &ctx_for)?
                    | rebind_nodes(&mut bound_body, &ctx_body)?;
                Ok(dirty.then(|| AirNode::ForStatement {
                    code_init: bound_init,
                    code_cond: bound_cond,
                    code_step: bound_step,
                    code_body: bound_body,
                }))
            }

            AirNode::TryStatement {
                sloc_try,
                code_try,
                sloc_catch,
                name_except,
                code_catch,
            } => {
                let nested = chain.nest();
                let mut bound_try = code_try.clone();
                let mut bound_catch = code_catch.clone();
                let dirty = rebind_nodes(&mut bound_try, &nested)?
                    | rebind_nodes(&mut bound_catch, &nested)?;
                Ok(dirty.then(|| AirNode::TryStatement {
                    sloc_try: sloc_try.clone(),
                    code_try: bound_try,
                    sloc_catch: sloc_catch.clone(),
                    name_except: name_except.clone(),
                    code_catch: bound_catch,
                }))
            }

            AirNode::DefineFunction {
                opts,
                sloc,
                func,
                params,
                code_body,
            } => {
                // The only place where names of the outer scope remain
                // visible to a nested function body.
                let mut bound = code_body.clone();
                let dirty = rebind_nodes(&mut bound, &chain.nest())?;
                Ok(dirty.then(|| AirNode::DefineFunction {
                    opts: *opts,
                    sloc: sloc.clone(),
                    func: func.clone(),
                    params: params.clone(),
                    code_body: bound,
                }))
            }

            AirNode::BranchExpression {
                sloc,
                code_true,
                code_false,
                assign,
            } => {
                let mut bound_true = code_true.clone();
                let mut bound_false = code_false.clone();
                let dirty = rebind_nodes(&mut bound_true, chain)?
                    | rebind_nodes(&mut bound_false, chain)?;
                Ok(dirty.then(|| AirNode::BranchExpression {
                    sloc: sloc.clone(),
                    code_true: bound_true,
                    code_false: bound_false,
                    assign: *assign,
                }))
            }

            AirNode::CoalesceExpression {
                sloc,
                code_null,
                assign,
            } => {
                let mut bound = code_null.clone();
                let dirty = rebind_nodes(&mut bound, chain)?;
                Ok(dirty.then(|| AirNode::CoalesceExpression {
                    sloc: sloc.clone(),
                    code_null: bound,
                    assign: *assign,
                }))
            }

            AirNode::DeferExpression { sloc, code_body } => {
                let mut bound = code_body.clone();
                let dirty = rebind_nodes(&mut bound, chain)?;
                Ok(dirty.then(|| AirNode::DeferExpression {
                    sloc: sloc.clone(),
                    code_body: bound,
                }))
            }

            AirNode::CatchExpression { code_body } => {
                let mut bound = code_body.clone();
                let dirty = rebind_nodes(&mut bound, chain)?;
                Ok(dirty.then(|| AirNode::CatchExpression { code_body: bound }))
            }

            _ => Ok(None),
        }
    }

    pub fn collect_variables(&self, out: &mut VariableSet) {
        let mut collect_list = |code: &[AirNode], out: &mut VariableSet| {
            for node in code {
                node.collect_variables(out);
            }
        };

        match self {
            AirNode::PushBoundReference { bref } => bref.collect_variables(out),
            AirNode::PushConstant { value } => collect_value_variables(value, out),
            AirNode::ExecuteBlock { code_body }
            | AirNode::DeferExpression { code_body, .. }
            | AirNode::CatchExpression { code_body }
            | AirNode::DefineFunction { code_body, .. } => collect_list(code_body, out),
            AirNode::IfStatement {
                code_true,
                code_false,
                ..
            }
            | AirNode::BranchExpression {
                code_true,
                code_false,
                ..
            } => {
                collect_list(code_true, out);
                collect_list(code_false, out);
            }
            AirNode::CoalesceExpression { code_null, .. } => collect_list(code_null, out),
            AirNode::SwitchStatement { clauses } => {
                for clause in clauses {
                    collect_list(&clause.code_labels, out);
                    collect_list(&clause.code_body, out);
                }
            }
            AirNode::DoWhileStatement {
                code_body,
                code_cond,
                ..
            }
            | AirNode::WhileStatement {
                code_cond,
                code_body,
                ..
            } => {
                collect_list(code_cond, out);
                collect_list(code_body, out);
            }
            AirNode::ForEachStatement {
                code_init,
                code_body,
                ..
            } => {
                collect_list(code_init, out);
                collect_list(code_body, out);
            }
            AirNode::ForStatement {
                code_init,
                code_cond,
                code_step,
                code_body,
            } => {
                collect_list(code_init, out);
                collect_list(code_cond, out);
                collect_list(code_step, out);
                collect_list(code_body, out);
            }
            AirNode::TryStatement {
                code_try,
                code_catch,
                ..
            } => {
                collect_list(code_try, out);
                collect_list(code_catch, out);
            }
            _ => {}
        }
    }

    /// Append this node's record to the rod: the interpreter handler,
    /// the packed immediate, and the out-of-line parameter block.
    pub fn solidify(&self, rod: &mut AvmRod) {
        match self {
            AirNode::ClearStack => {
                rod.push(exec::h_clear_stack, Uparam::new(), None, None);
            }

            AirNode::AltClearStack => {
                rod.push(exec::h_alt_clear_stack, Uparam::new(), None, None);
            }

            AirNode::DeclareVariable { sloc, name } => {
                rod.push(
                    exec::h_declare_variable,
                    Uparam::new(),
                    Some(Sparam::Name { name: name.clone() }),
                    Some(sloc.clone()),
                );
            }

            AirNode::InitializeVariable { sloc, immutable } => {
                rod.push(
                    exec::h_initialize_variable,
                    Uparam::new().with_b0(*immutable),
                    None,
                    Some(sloc.clone()),
                );
            }

            AirNode::DeclareReference { name } => {
                rod.push(
                    exec::h_declare_reference,
                    Uparam::new(),
                    Some(Sparam::Name { name: name.clone() }),
                    None,
                );
            }

            AirNode::InitializeReference { sloc, name } => {
                rod.push(
                    exec::h_initialize_reference,
                    Uparam::new(),
                    Some(Sparam::Name { name: name.clone() }),
                    Some(sloc.clone()),
                );
            }

            AirNode::DefineNullVariable {
                sloc,
                immutable,
                name,
            } => {
                rod.push(
                    exec::h_define_null_variable,
                    Uparam::new().with_b0(*immutable),
                    Some(Sparam::Name { name: name.clone() }),
                    Some(sloc.clone()),
                );
            }

            AirNode::DefineFunction {
                opts,
                sloc,
                func,
                params,
                code_body,
            } => {
                rod.push(
                    exec::h_define_function,
                    Uparam::new(),
                    Some(Sparam::DefineFunction {
                        opts: *opts,
                        func: func.clone(),
                        params: params.clone(),
                        code_body: code_body.clone(),
                    }),
                    Some(sloc.clone()),
                );
            }

            AirNode::ExecuteBlock { code_body } => {
                rod.push(
                    exec::h_execute_block,
                    Uparam::new(),
                    Some(Sparam::Block {
                        body: solidify_nodes(code_body),
                    }),
                    None,
                );
            }

            AirNode::IfStatement {
                negative,
                code_true,
                code_false,
            } => {
                rod.push(
                    exec::h_if_statement,
                    Uparam::new().with_b0(*negative),
                    Some(Sparam::TwoRods {
                        first: solidify_nodes(code_true),
                        second: solidify_nodes(code_false),
                    }),
                    None,
                );
            }

            AirNode::SwitchStatement { clauses } => {
                let clauses = clauses
                    .iter()
                    .map(|clause| SwitchClauseRt {
                        ctype: clause.ctype,
                        lower_closed: clause.lower_closed,
                        upper_closed: clause.upper_closed,
                        rod_labels: solidify_nodes(&clause.code_labels),
                        rod_body: solidify_nodes(&clause.code_body),
                        names_added: clause.names_added.clone(),
                    })
                    .collect();
                rod.push(
                    exec::h_switch_statement,
                    Uparam::new(),
                    Some(Sparam::Switch { clauses }),
                    None,
                );
            }

            AirNode::DoWhileStatement {
                code_body,
                negative,
                code_cond,
            } => {
                rod.push(
                    exec::h_do_while_statement,
                    Uparam::new().with_b0(*negative),
                    Some(Sparam::TwoRods {
                        first: solidify_nodes(code_body),
                        second: solidify_nodes(code_cond),
                    }),
                    None,
                );
            }

            AirNode::WhileStatement {
                negative,
                code_cond,
                code_body,
            } => {
                rod.push(
                    exec::h_while_statement,
                    Uparam::new().with_b0(*negative),
                    Some(Sparam::TwoRods {
                        first: solidify_nodes(code_cond),
                        second: solidify_nodes(code_body),
                    }),
                    None,
                );
            }

            AirNode::ForEachStatement {
                name_key,
                name_mapped,
                sloc_init,
                code_init,
                code_body,
            } => {
                rod.push(
                    exec::h_for_each_statement,
                    Uparam::new(),
                    Some(Sparam::ForEach {
                        name_key: name_key.clone(),
                        name_mapped: name_mapped.clone(),
                        sloc_init: sloc_init.clone(),
                        rod_init: solidify_nodes(code_init),
                        rod_body: solidify_nodes(code_body),
                    }),
                    None,
                );
            }

            AirNode::ForStatement {
                code_init,
                code_cond,
                code_step,
                code_body,
            } => {
                rod.push(
                    exec::h_for_statement,
                    Uparam::new(),
                    Some(Sparam::For {
                        rod_init: solidify_nodes(code_init),
                        rod_cond: solidify_nodes(code_cond),
                        rod_step: solidify_nodes(code_step),
                        rod_body: solidify_nodes(code_body),
                    }),
                    None,
                );
            }

            AirNode::TryStatement {
                sloc_try,
                code_try,
                sloc_catch,
                name_except,
                code_catch,
            } => {
                rod.push(
                    exec::h_try_statement,
                    Uparam::new(),
                    Some(Sparam::Try {
                        rod_try: solidify_nodes(code_try),
                        sloc_catch: sloc_catch.clone(),
                        name_except: name_except.clone(),
                        rod_catch: solidify_nodes(code_catch),
                    }),
                    Some(sloc_try.clone()),
                );
            }

            AirNode::ThrowStatement { sloc } => {
                rod.push(exec::h_throw_statement, Uparam::new(), None, Some(sloc.clone()));
            }

            AirNode::ReturnStatement {
                sloc,
                by_ref,
                is_void,
            } => {
                rod.push(
                    exec::h_return_statement,
                    Uparam::new().with_b0(*by_ref).with_b1(*is_void),
                    None,
                    Some(sloc.clone()),
                );
            }

            AirNode::ReturnStatementBi32 { sloc, vtype, irhs } => {
                rod.push(
                    exec::h_return_statement_bi32,
                    Uparam::new().with_u0(*vtype as u8).with_i4567(*irhs),
                    None,
                    Some(sloc.clone()),
                );
            }

            AirNode::SimpleStatus { status } => {
                rod.push(
                    exec::h_simple_status,
                    Uparam::new().with_u0(*status as u8),
                    None,
                    None,
                );
            }

            AirNode::AssertStatement { sloc, msg } => {
                rod.push(
                    exec::h_assert_statement,
                    Uparam::new(),
                    Some(Sparam::AssertMsg { msg: msg.clone() }),
                    Some(sloc.clone()),
                );
            }

            AirNode::DeferExpression { sloc, code_body } => {
                rod.push(
                    exec::h_defer_expression,
                    Uparam::new(),
                    Some(Sparam::DeferBody {
                        code_body: code_body.clone(),
                    }),
                    Some(sloc.clone()),
                );
            }

            AirNode::SingleStepTrap { sloc } => {
                rod.push(exec::h_single_step_trap, Uparam::new(), None, Some(sloc.clone()));
            }

            AirNode::PushGlobalReference { sloc, name } => {
                rod.push(
                    exec::h_push_global_reference,
                    Uparam::new(),
                    Some(Sparam::Name { name: name.clone() }),
                    Some(sloc.clone()),
                );
            }

            AirNode::PushLocalReference { sloc, depth, name } => {
                rod.push(
                    exec::h_push_local_reference,
                    Uparam::new().with_u23(*depth),
                    Some(Sparam::Name { name: name.clone() }),
                    Some(sloc.clone()),
                );
            }

            AirNode::PushBoundReference { bref } => {
                rod.push(
                    exec::h_push_bound_reference,
                    Uparam::new(),
                    Some(Sparam::BoundRef { bref: bref.clone() }),
                    None,
                );
            }

            AirNode::MemberAccess { sloc, key } => {
                rod.push(
                    exec::h_member_access,
                    Uparam::new(),
                    Some(Sparam::Name { name: key.clone() }),
                    Some(sloc.clone()),
                );
            }

            AirNode::PushConstant { value } => {
                rod.push(
                    exec::h_push_constant,
                    Uparam::new(),
                    Some(Sparam::Constant {
                        value: value.clone(),
                    }),
                    None,
                );
            }

            AirNode::PushUnnamedArray { sloc, nelems } => {
                rod.push(
                    exec::h_push_unnamed_array,
                    Uparam::new().with_u4567(*nelems),
                    None,
                    Some(sloc.clone()),
                );
            }

            AirNode::PushUnnamedObject { sloc, keys } => {
                rod.push(
                    exec::h_push_unnamed_object,
                    Uparam::new(),
                    Some(Sparam::Keys { keys: keys.clone() }),
                    Some(sloc.clone()),
                );
            }

            AirNode::ApplyOperator { sloc, xop, assign } => {
                rod.push(
                    exec::h_apply_operator,
                    Uparam::new().with_b0(*assign).with_u1(*xop as u8),
                    None,
                    Some(sloc.clone()),
                );
            }

            AirNode::ApplyOperatorBi32 {
                sloc,
                xop,
                assign,
                irhs,
            } => {
                rod.push(
                    exec::h_apply_operator_bi32,
                    Uparam::new()
                        .with_b0(*assign)
                        .with_u1(*xop as u8)
                        .with_i4567(*irhs),
                    None,
                    Some(sloc.clone()),
                );
            }

            AirNode::BranchExpression {
                sloc,
                code_true,
                code_false,
                assign,
            } => {
                rod.push(
                    exec::h_branch_expression,
                    Uparam::new().with_b0(*assign),
                    Some(Sparam::TwoRods {
                        first: solidify_nodes(code_true),
                        second: solidify_nodes(code_false),
                    }),
                    Some(sloc.clone()),
                );
            }

            AirNode::CoalesceExpression {
                sloc,
                code_null,
                assign,
            } => {
                rod.push(
                    exec::h_coalesce_expression,
                    Uparam::new().with_b0(*assign),
                    Some(Sparam::Block {
                        body: solidify_nodes(code_null),
                    }),
                    Some(sloc.clone()),
                );
            }

            AirNode::CatchExpression { code_body } => {
                rod.push(
                    exec::h_catch_expression,
                    Uparam::new(),
                    Some(Sparam::Block {
                        body: solidify_nodes(code_body),
                    }),
                    None,
                );
            }

            AirNode::FunctionCall { sloc, nargs, ptc } => {
                rod.push(
                    exec::h_function_call,
                    Uparam::new().with_u0(*ptc as u8).with_u4567(*nargs),
                    None,
                    Some(sloc.clone()),
                );
            }

            AirNode::AltFunctionCall { sloc, ptc } => {
                rod.push(
                    exec::h_alt_function_call,
                    Uparam::new().with_u0(*ptc as u8),
                    None,
                    Some(sloc.clone()),
                );
            }

            AirNode::VariadicCall { sloc, ptc } => {
                rod.push(
                    exec::h_variadic_call,
                    Uparam::new().with_u0(*ptc as u8),
                    None,
                    Some(sloc.clone()),
                );
            }

            AirNode::ImportCall { opts, sloc, nargs } => {
                rod.push(
                    exec::h_import_call,
                    Uparam::new().with_u4567(*nargs),
                    Some(Sparam::ImportOpts { opts: *opts }),
                    Some(sloc.clone()),
                );
            }

            AirNode::CheckArgument { sloc, by_ref } => {
                rod.push(
                    exec::h_check_argument,
                    Uparam::new().with_b0(*by_ref),
                    None,
                    Some(sloc.clone()),
                );
            }

            AirNode::CheckNull { negative } => {
                rod.push(
                    exec::h_check_null,
                    Uparam::new().with_b0(*negative),
                    None,
                    None,
                );
            }

            AirNode::UnpackArray {
                sloc,
                immutable,
                nelems,
            } => {
                rod.push(
                    exec::h_unpack_array,
                    Uparam::new().with_b0(*immutable).with_u4567(*nelems),
                    None,
                    Some(sloc.clone()),
                );
            }

            AirNode::UnpackObject {
                sloc,
                immutable,
                keys,
            } => {
                rod.push(
                    exec::h_unpack_object,
                    Uparam::new().with_b0(*immutable),
                    Some(Sparam::Keys { keys: keys.clone() }),
                    Some(sloc.clone()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminator_propagation() {
        let ret = AirNode::ReturnStatement {
            sloc: Sloc::dummy(),
            by_ref: false,
            is_void: true,
        };
        assert!(ret.is_terminator());

        let block = AirNode::ExecuteBlock {
            code_body: vec![AirNode::ClearStack, ret.clone()],
        };
        assert!(block.is_terminator());

        let half_if = AirNode::IfStatement {
            negative: false,
            code_true: vec![ret.clone()],
            code_false: vec![AirNode::ClearStack],
        };
        assert!(!half_if.is_terminator());
    }

    #[test]
    fn test_tail_call_is_terminator() {
        let call = AirNode::FunctionCall {
            sloc: Sloc::dummy(),
            nargs: 0,
            ptc: PtcAware::ByVal,
        };
        assert!(call.is_terminator());
        let call = AirNode::FunctionCall {
            sloc: Sloc::dummy(),
            nargs: 0,
            ptc: PtcAware::None,
        };
        assert!(!call.is_terminator());
    }

    #[test]
    fn test_get_constant() {
        let node = AirNode::PushConstant {
            value: Value::Int(9),
        };
        assert_eq!(node.get_constant().unwrap().as_int(), Some(9));
        assert!(AirNode::ClearStack.get_constant().is_none());
    }

    #[test]
    fn test_rebind_resolves_runtime_names() {
        use crate::runtime::reference::Reference;

        let scope = Scope::new_root();
        scope.borrow_mut().insert(
            Rc::from("captured"),
            Reference::new_temporary(Value::Int(5)),
        );

        // Depth 0 within the new function frame: stays dynamic.
        let node = AirNode::PushLocalReference {
            sloc: Sloc::dummy(),
            depth: 0,
            name: Rc::from("captured"),
        };
        let chain = BindChain::for_function(&scope);
        assert!(node.rebind(&chain).unwrap().is_none());

        // Depth 1 escapes the function frame and resolves.
        let node = AirNode::PushLocalReference {
            sloc: Sloc::dummy(),
            depth: 1,
            name: Rc::from("captured"),
        };
        match node.rebind(&chain).unwrap() {
            Some(AirNode::PushBoundReference { bref }) => {
                assert_eq!(bref.dereference_readonly().unwrap().as_int(), Some(5));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rebind_bypassed_initializer_fails() {
        let scope = Scope::new_root();
        scope.borrow_mut().insert_invalid(Rc::from("later"));

        let node = AirNode::PushLocalReference {
            sloc: Sloc::dummy(),
            depth: 0,
            name: Rc::from("later"),
        };
        let chain = BindChain::for_defer(&scope);
        assert!(node.rebind(&chain).is_err());
    }
}
