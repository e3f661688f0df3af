use std::rc::Rc;

use crate::ast::*;
use crate::diagnostic::{CompilerError, CompilerStatus};
use crate::sloc::Sloc;
use crate::token_queue::TokenQueue;
use crate::token::{Keyword, Punct};
use crate::value::Value;

// Each type of scope gets a unique bit; this decides whether `break` or
// `continue` may appear. Blocks nest, so flags are OR'd together.
const SCOPE_PLAIN: u32 = 0;
const SCOPE_SWITCH: u32 = 0b001;
const SCOPE_WHILE: u32 = 0b010;
const SCOPE_FOR: u32 = 0b100;

type PResult<T> = Result<T, CompilerError>;

/// Recursive-descent parser over a token queue. Statement productions
/// either fully consume their committing prefix and then demand the rest,
/// or return `None` without consuming any token.
pub struct Parser<'t> {
    tq: &'t mut TokenQueue,
}

impl<'t> Parser<'t> {
    pub fn new(tq: &'t mut TokenQueue) -> Self {
        Self { tq }
    }

    /// Parse a whole document: a statement sequence with an implicit
    /// trailing `return;` so the script body returns void.
    pub fn parse_document(mut self) -> PResult<Vec<Statement>> {
        let mut stmts = Vec::new();
        while let Some(stmt) = self.accept_statement(SCOPE_PLAIN)? {
            stmts.push(stmt);
        }

        if !self.tq.empty() {
            return Err(CompilerError::new(
                CompilerStatus::StatementExpected,
                self.tq.next_sloc(),
            ));
        }

        stmts.push(Statement::Return {
            sloc: self.tq.next_sloc(),
            by_ref: true,
            expr: Expr::default(),
        });
        Ok(stmts)
    }

    /// Parse a single expression and synthesize a by-reference return
    /// statement from it.
    pub fn parse_oneline(mut self) -> PResult<Vec<Statement>> {
        let expr = self.accept_expression_opt()?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::ExpressionExpected, self.tq.next_sloc())
        })?;

        if !self.tq.empty() {
            return Err(CompilerError::new(
                CompilerStatus::InvalidExpression,
                self.tq.next_sloc(),
            ));
        }

        Ok(vec![Statement::Return {
            sloc: expr.sloc.clone(),
            by_ref: true,
            expr,
        }])
    }

    // ─── Token helpers ─────────────────────────────────────────────

    fn accept_keyword(&mut self, accept: &[Keyword]) -> Option<Keyword> {
        let kwrd = self.tq.peek(0)?.as_keyword()?;
        if !accept.contains(&kwrd) {
            return None;
        }
        self.tq.shift(1);
        Some(kwrd)
    }

    fn accept_punct(&mut self, accept: &[Punct]) -> Option<Punct> {
        let punct = self.tq.peek(0)?.as_punct()?;
        if !accept.contains(&punct) {
            return None;
        }
        self.tq.shift(1);
        Some(punct)
    }

    fn accept_identifier(&mut self, user_decl: bool) -> PResult<Option<Rc<str>>> {
        let tok = match self.tq.peek(0) {
            Some(tok) => tok,
            None => return Ok(None),
        };

        if user_decl {
            if let Some(kwrd) = tok.as_keyword() {
                return Err(CompilerError::with_message(
                    CompilerStatus::KeywordNotDeclarable,
                    tok.sloc.clone(),
                    format!("keyword `{}` not user-declarable", kwrd.as_str()),
                ));
            }
        }

        let name = match tok.as_identifier() {
            Some(name) => name.clone(),
            None => return Ok(None),
        };

        if user_decl && name.starts_with("__") {
            return Err(CompilerError::with_message(
                CompilerStatus::ReservedIdentifierNotDeclarable,
                tok.sloc.clone(),
                format!("identifier `{}` not user-declarable", name),
            ));
        }

        self.tq.shift(1);
        Ok(Some(name))
    }

    fn accept_string_literal_opt(&mut self) -> Option<Rc<str>> {
        let val = self.tq.peek(0)?.as_string_literal()?.clone();
        self.tq.shift(1);
        Some(val)
    }

    /// A JSON5 key: an identifier, a keyword, or a string literal.
    fn accept_json5_key_opt(&mut self) -> Option<Rc<str>> {
        let tok = self.tq.peek(0)?;
        if let Some(kwrd) = tok.as_keyword() {
            let key: Rc<str> = Rc::from(kwrd.as_str());
            self.tq.shift(1);
            return Some(key);
        }
        if let Some(name) = tok.as_identifier() {
            let key = name.clone();
            self.tq.shift(1);
            return Some(key);
        }
        if let Some(val) = tok.as_string_literal() {
            let key = val.clone();
            self.tq.shift(1);
            return Some(key);
        }
        None
    }

    fn accept_literal_opt(&mut self) -> Option<Value> {
        let tok = self.tq.peek(0)?;

        if let Some(kwrd) = tok.as_keyword() {
            let val = match kwrd {
                Keyword::Null => Value::Null,
                Keyword::False => Value::Bool(false),
                Keyword::True => Value::Bool(true),
                _ => return None,
            };
            self.tq.shift(1);
            return Some(val);
        }

        if let Some(val) = tok.as_integer_literal() {
            self.tq.shift(1);
            return Some(Value::Int(val));
        }

        if let Some(val) = tok.as_real_literal() {
            self.tq.shift(1);
            return Some(Value::Real(val));
        }

        if let Some(val) = tok.as_string_literal() {
            // Concatenate adjacent string literals.
            let mut text = val.to_string();
            self.tq.shift(1);
            while let Some(next) = self.tq.peek(0).and_then(|t| t.as_string_literal()) {
                text.push_str(next);
                self.tq.shift(1);
            }
            return Some(Value::Str(Rc::from(text)));
        }

        None
    }

    fn accept_negation_opt(&mut self) -> bool {
        if self.accept_punct(&[Punct::Notl]).is_some() {
            return true;
        }
        self.accept_keyword(&[Keyword::Not]).is_some()
    }

    // ─── Declarators ───────────────────────────────────────────────

    /// A variable declarator: a single identifier, or a structured
    /// binding `[a,b,c]` / `{a,b,c}` recorded as a name list bracketed by
    /// the literal delimiter strings.
    fn accept_variable_declarator_opt(&mut self) -> PResult<Option<Vec<Rc<str>>>> {
        let op_sloc = self.tq.next_sloc();

        if let Some(name) = self.accept_identifier(true)? {
            return Ok(Some(vec![name]));
        }

        if self.accept_punct(&[Punct::BracketOp]).is_some() {
            let names = self.accept_binding_names(
                op_sloc,
                "[",
                Punct::BracketCl,
                "]",
                CompilerStatus::ClosingBracketOrCommaExpected,
                CompilerStatus::ClosingBracketOrIdentifierExpected,
            )?;
            return Ok(Some(names));
        }

        if self.accept_punct(&[Punct::BraceOp]).is_some() {
            let names = self.accept_binding_names(
                op_sloc,
                "{",
                Punct::BraceCl,
                "}",
                CompilerStatus::ClosingBraceOrCommaExpected,
                CompilerStatus::ClosingBraceOrIdentifierExpected,
            )?;
            return Ok(Some(names));
        }

        Ok(None)
    }

    fn accept_binding_names(
        &mut self,
        op_sloc: Sloc,
        open: &str,
        close: Punct,
        close_str: &str,
        status_after_name: CompilerStatus,
        status_after_comma: CompilerStatus,
    ) -> PResult<Vec<Rc<str>>> {
        let mut names: Vec<Rc<str>> = vec![Rc::from(open)];
        let mut status_if_unmatched = CompilerStatus::IdentifierExpected;

        loop {
            let name_sloc = self.tq.next_sloc();
            let name = match self.accept_identifier(true)? {
                Some(name) => name,
                None => break,
            };

            if names.contains(&name) {
                return Err(CompilerError::new(
                    CompilerStatus::DuplicateNameInStructuredBinding,
                    name_sloc,
                ));
            }
            names.push(name);
            status_if_unmatched = status_after_name;

            if self.accept_punct(&[Punct::Comma]).is_none() {
                break;
            }
            status_if_unmatched = status_after_comma;
        }

        // Both binding shapes require at least one element.
        if names.len() < 2 {
            return Err(CompilerError::new(
                CompilerStatus::IdentifierExpected,
                self.tq.next_sloc(),
            ));
        }

        if self.accept_punct(&[close]).is_none() {
            return Err(CompilerError::with_unmatched(
                status_if_unmatched,
                self.tq.next_sloc(),
                open,
                &op_sloc,
            ));
        }

        names.push(Rc::from(close_str));
        Ok(names)
    }

    // ─── Expressions ───────────────────────────────────────────────

    fn accept_expression(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sentry = self.tq.borrow_recursion_sentry();
        let _guard = sentry.enter(self.tq.next_sloc())?;

        let mut head_units = Vec::new();
        if !self.accept_infix_element(&mut head_units)? {
            return Ok(false);
        }

        let mut stack: Vec<InfixElement> = vec![InfixElement::Head { units: head_units }];

        loop {
            let mut next = match self.accept_infix_operator_opt()? {
                Some(next) => next,
                None => break,
            };

            if !self.accept_infix_element(next.mut_junction())? {
                return Err(CompilerError::new(
                    CompilerStatus::ExpressionExpected,
                    self.tq.next_sloc(),
                ));
            }

            // Assignment has the lowest precedence and groups right to
            // left, so its RHS is treated as binding one step tighter.
            let mut next_precedence = next.tell_precedence();
            if next_precedence == Precedence::Assignment {
                next_precedence = Precedence::Coalescence;
            }

            while stack.len() >= 2
                && stack[stack.len() - 1].tell_precedence() <= next_precedence
            {
                // Collapse elements with no lower precedence.
                if let Some(elem) = stack.pop() {
                    if let Some(prev) = stack.last_mut() {
                        elem.extract(prev.mut_junction());
                    }
                }
            }
            stack.push(next);
        }

        // Collapse everything left so a single element remains.
        while stack.len() >= 2 {
            if let Some(elem) = stack.pop() {
                if let Some(prev) = stack.last_mut() {
                    elem.extract(prev.mut_junction());
                }
            }
        }

        if let Some(head) = stack.pop() {
            head.extract(units);
        }
        Ok(true)
    }

    fn accept_expression_opt(&mut self) -> PResult<Option<Expr>> {
        let sloc = self.tq.next_sloc();
        let mut units = Vec::new();
        if !self.accept_expression(&mut units)? {
            return Ok(None);
        }
        Ok(Some(Expr { sloc, units }))
    }

    /// Accept an expression, then ensure its result is a proper value or
    /// reference by appending a `check-argument` unit when the last unit
    /// may leave a void reference behind.
    fn accept_expression_and_check(
        &mut self,
        units: &mut Vec<ExprUnit>,
        by_ref: bool,
    ) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        if !self.accept_expression(units)? {
            return Ok(false);
        }

        if units.last().map_or(false, ExprUnit::may_be_void) {
            units.push(ExprUnit::CheckArgument { sloc, by_ref });
        }
        Ok(true)
    }

    fn accept_expression_as_rvalue_opt(&mut self) -> PResult<Option<Expr>> {
        let sloc = self.tq.next_sloc();
        let mut units = Vec::new();
        if !self.accept_expression_and_check(&mut units, false)? {
            return Ok(None);
        }
        Ok(Some(Expr { sloc, units }))
    }

    fn require_expression(&mut self, units: &mut Vec<ExprUnit>) -> PResult<()> {
        if !self.accept_expression(units)? {
            return Err(CompilerError::new(
                CompilerStatus::ExpressionExpected,
                self.tq.next_sloc(),
            ));
        }
        Ok(())
    }

    fn require_punct(&mut self, punct: Punct, status: CompilerStatus) -> PResult<()> {
        if self.accept_punct(&[punct]).is_none() {
            return Err(CompilerError::new(status, self.tq.next_sloc()));
        }
        Ok(())
    }

    fn require_close_paren(&mut self, op_sloc: &Sloc) -> PResult<()> {
        if self.accept_punct(&[Punct::ParenthCl]).is_none() {
            return Err(CompilerError::with_unmatched(
                CompilerStatus::ClosingParenthesisExpected,
                self.tq.next_sloc(),
                "(",
                op_sloc,
            ));
        }
        Ok(())
    }

    // ─── Initializers ──────────────────────────────────────────────

    /// `= expression`
    fn accept_equal_initializer_opt(&mut self) -> PResult<Option<Expr>> {
        if self.accept_punct(&[Punct::Assign]).is_none() {
            return Ok(None);
        }
        let expr = self.accept_expression_opt()?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::ExpressionExpected, self.tq.next_sloc())
        })?;
        Ok(Some(expr))
    }

    /// `-> expression`
    fn accept_ref_initializer_opt(&mut self) -> PResult<Option<Expr>> {
        if self.accept_punct(&[Punct::Arrow]).is_none() {
            return Ok(None);
        }
        let expr = self.accept_expression_opt()?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::ExpressionExpected, self.tq.next_sloc())
        })?;
        Ok(Some(expr))
    }

    // ─── Statements ────────────────────────────────────────────────

    fn accept_statement(&mut self, scope: u32) -> PResult<Option<Statement>> {
        let sentry = self.tq.borrow_recursion_sentry();
        let _guard = sentry.enter(self.tq.next_sloc())?;

        if let Some(stmt) = self.accept_variable_definition_opt()? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_immutable_variable_definition_opt()? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_reference_definition_opt()? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_function_definition_opt()? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_defer_statement_opt()? {
            return Ok(Some(stmt));
        }
        if let Some(block) = self.accept_null_statement_opt() {
            return Ok(Some(Statement::Block { block }));
        }
        self.accept_nondeclarative_statement(scope)
    }

    fn accept_nondeclarative_statement(&mut self, scope: u32) -> PResult<Option<Statement>> {
        if let Some(stmt) = self.accept_if_statement_opt(scope)? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_switch_statement_opt(scope)? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_do_while_statement_opt(scope)? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_while_statement_opt(scope)? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_for_statement_opt(scope)? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_break_statement_opt(scope)? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_continue_statement_opt(scope)? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_throw_statement_opt()? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_return_statement_opt()? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_assert_statement_opt()? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_try_statement_opt(scope)? {
            return Ok(Some(stmt));
        }
        if let Some(block) = self.accept_statement_block_opt(scope)? {
            return Ok(Some(Statement::Block { block }));
        }
        if let Some(stmt) = self.accept_expression_statement_opt()? {
            return Ok(Some(stmt));
        }
        Ok(None)
    }

    /// A non-declarative statement body; a single statement is wrapped as
    /// a block implicitly.
    fn accept_nondeclarative_statement_as_block_opt(
        &mut self,
        scope: u32,
    ) -> PResult<Option<Block>> {
        let sentry = self.tq.borrow_recursion_sentry();
        let _guard = sentry.enter(self.tq.next_sloc())?;

        // A brace block keeps its own statements rather than nesting.
        if let Some(block) = self.accept_statement_block_opt(scope)? {
            return Ok(Some(block));
        }

        match self.accept_nondeclarative_statement(scope)? {
            Some(stmt) => Ok(Some(Block { stmts: vec![stmt] })),
            None => Ok(None),
        }
    }

    fn accept_statement_block_opt(&mut self, scope: u32) -> PResult<Option<Block>> {
        let op_sloc = self.tq.next_sloc();
        if self.accept_punct(&[Punct::BraceOp]).is_none() {
            return Ok(None);
        }

        let mut stmts = Vec::new();
        while let Some(stmt) = self.accept_statement(scope)? {
            stmts.push(stmt);
        }

        if self.accept_punct(&[Punct::BraceCl]).is_none() {
            return Err(CompilerError::with_unmatched(
                CompilerStatus::ClosingBraceOrStatementExpected,
                self.tq.next_sloc(),
                "{",
                &op_sloc,
            ));
        }
        Ok(Some(Block { stmts }))
    }

    fn accept_expression_statement_opt(&mut self) -> PResult<Option<Statement>> {
        let expr = match self.accept_expression_opt()? {
            Some(expr) => expr,
            None => return Ok(None),
        };
        self.require_punct(Punct::Semicol, CompilerStatus::SemicolonExpected)?;
        Ok(Some(Statement::Expression { expr }))
    }

    fn accept_null_statement_opt(&mut self) -> Option<Block> {
        self.accept_punct(&[Punct::Semicol])?;
        Some(Block::default())
    }

    fn accept_variable_definition_opt(&mut self) -> PResult<Option<Statement>> {
        if self.accept_keyword(&[Keyword::Var]).is_none() {
            return Ok(None);
        }

        let mut decls = Vec::new();
        loop {
            let sloc = self.tq.next_sloc();
            let names = self.accept_variable_declarator_opt()?.ok_or_else(|| {
                CompilerError::new(CompilerStatus::IdentifierExpected, self.tq.next_sloc())
            })?;

            let init = self.accept_equal_initializer_opt()?.unwrap_or_default();
            decls.push(VariableDeclaration { sloc, names, init });

            if self.accept_punct(&[Punct::Comma]).is_none() {
                break;
            }
        }

        self.require_punct(Punct::Semicol, CompilerStatus::SemicolonExpected)?;
        Ok(Some(Statement::Variables {
            immutable: false,
            decls,
        }))
    }

    fn accept_immutable_variable_definition_opt(&mut self) -> PResult<Option<Statement>> {
        if self.accept_keyword(&[Keyword::Const]).is_none() {
            return Ok(None);
        }

        let mut decls = Vec::new();
        loop {
            let sloc = self.tq.next_sloc();
            let names = self.accept_variable_declarator_opt()?.ok_or_else(|| {
                CompilerError::new(CompilerStatus::IdentifierExpected, self.tq.next_sloc())
            })?;

            // `const` requires an initializer.
            let init = self.accept_equal_initializer_opt()?.ok_or_else(|| {
                CompilerError::new(CompilerStatus::EqualsSignExpected, self.tq.next_sloc())
            })?;
            decls.push(VariableDeclaration { sloc, names, init });

            if self.accept_punct(&[Punct::Comma]).is_none() {
                break;
            }
        }

        self.require_punct(Punct::Semicol, CompilerStatus::SemicolonExpected)?;
        Ok(Some(Statement::Variables {
            immutable: true,
            decls,
        }))
    }

    fn accept_reference_definition_opt(&mut self) -> PResult<Option<Statement>> {
        if self.accept_keyword(&[Keyword::Ref]).is_none() {
            return Ok(None);
        }

        let mut decls = Vec::new();
        loop {
            let sloc = self.tq.next_sloc();
            let name = self.accept_identifier(true)?.ok_or_else(|| {
                CompilerError::new(CompilerStatus::IdentifierExpected, self.tq.next_sloc())
            })?;

            let init = self.accept_ref_initializer_opt()?.ok_or_else(|| {
                CompilerError::new(CompilerStatus::ArrowExpected, self.tq.next_sloc())
            })?;
            decls.push(ReferenceDeclaration { sloc, name, init });

            if self.accept_punct(&[Punct::Comma]).is_none() {
                break;
            }
        }

        self.require_punct(Punct::Semicol, CompilerStatus::SemicolonExpected)?;
        Ok(Some(Statement::References { decls }))
    }

    /// `( parameter-list? )` following `func`.
    fn accept_parameter_list(&mut self) -> PResult<Vec<Rc<str>>> {
        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::ParenthOp, CompilerStatus::OpenParenthesisExpected)?;

        let mut params: Vec<Rc<str>> = Vec::new();
        let mut status_if_unmatched = CompilerStatus::ClosingParenthesisOrParameterExpected;

        loop {
            if self.accept_punct(&[Punct::Ellipsis]).is_some() {
                params.push(Rc::from("..."));
                status_if_unmatched = CompilerStatus::ClosingParenthesisExpected;
                break;
            }

            let param_sloc = self.tq.next_sloc();
            let param = match self.accept_identifier(true)? {
                Some(param) => param,
                None => break,
            };

            if params.contains(&param) {
                return Err(CompilerError::new(
                    CompilerStatus::DuplicateNameInParameterList,
                    param_sloc,
                ));
            }
            params.push(param);
            status_if_unmatched = CompilerStatus::ClosingParenthesisOrCommaExpected;

            if self.accept_punct(&[Punct::Comma]).is_none() {
                break;
            }
            status_if_unmatched = CompilerStatus::ClosingParenthesisOrParameterExpected;
        }

        if self.accept_punct(&[Punct::ParenthCl]).is_none() {
            return Err(CompilerError::with_unmatched(
                status_if_unmatched,
                self.tq.next_sloc(),
                "(",
                &op_sloc,
            ));
        }
        Ok(params)
    }

    fn accept_function_definition_opt(&mut self) -> PResult<Option<Statement>> {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Func]).is_none() {
            return Ok(None);
        }

        let name = self.accept_identifier(true)?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::IdentifierExpected, self.tq.next_sloc())
        })?;

        let params = self.accept_parameter_list()?;

        // The body is not a plain block: an implicit `return;` follows
        // the last statement.
        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::BraceOp, CompilerStatus::OpenBraceExpected)?;

        let mut body = Vec::new();
        while let Some(stmt) = self.accept_statement(SCOPE_PLAIN)? {
            body.push(stmt);
        }

        let cl_sloc = self.tq.next_sloc();
        if self.accept_punct(&[Punct::BraceCl]).is_none() {
            return Err(CompilerError::with_unmatched(
                CompilerStatus::ClosingBraceOrStatementExpected,
                self.tq.next_sloc(),
                "{",
                &op_sloc,
            ));
        }

        body.push(Statement::Return {
            sloc: cl_sloc,
            by_ref: true,
            expr: Expr::default(),
        });

        Ok(Some(Statement::Function {
            sloc,
            name,
            params,
            body,
        }))
    }

    fn accept_defer_statement_opt(&mut self) -> PResult<Option<Statement>> {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Defer]).is_none() {
            return Ok(None);
        }

        let expr = self.accept_expression_opt()?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::ExpressionExpected, self.tq.next_sloc())
        })?;
        self.require_punct(Punct::Semicol, CompilerStatus::SemicolonExpected)?;
        Ok(Some(Statement::Defer { sloc, expr }))
    }

    fn accept_if_statement_opt(&mut self, scope: u32) -> PResult<Option<Statement>> {
        if self.accept_keyword(&[Keyword::If]).is_none() {
            return Ok(None);
        }

        let negative = self.accept_negation_opt();

        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::ParenthOp, CompilerStatus::OpenParenthesisExpected)?;
        let cond = self.accept_expression_as_rvalue_opt()?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::ExpressionExpected, self.tq.next_sloc())
        })?;
        self.require_close_paren(&op_sloc)?;

        let branch_true = self
            .accept_nondeclarative_statement_as_block_opt(scope)?
            .ok_or_else(|| {
                CompilerError::new(
                    CompilerStatus::NondeclarativeStatementExpected,
                    self.tq.next_sloc(),
                )
            })?;

        let branch_false = if self.accept_keyword(&[Keyword::Else]).is_some() {
            self.accept_nondeclarative_statement_as_block_opt(scope)?
                .ok_or_else(|| {
                    CompilerError::new(
                        CompilerStatus::NondeclarativeStatementExpected,
                        self.tq.next_sloc(),
                    )
                })?
        } else {
            Block::default()
        };

        Ok(Some(Statement::If {
            negative,
            cond,
            branch_true,
            branch_false,
        }))
    }

    fn accept_switch_statement_opt(&mut self, scope: u32) -> PResult<Option<Statement>> {
        if self.accept_keyword(&[Keyword::Switch]).is_none() {
            return Ok(None);
        }

        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::ParenthOp, CompilerStatus::OpenParenthesisExpected)?;
        let ctrl = self.accept_expression_as_rvalue_opt()?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::ExpressionExpected, self.tq.next_sloc())
        })?;
        self.require_close_paren(&op_sloc)?;

        // The clause block is parsed by hand.
        let body_sloc = self.tq.next_sloc();
        self.require_punct(Punct::BraceOp, CompilerStatus::OpenBraceExpected)?;

        let mut clauses: Vec<SwitchClause> = Vec::new();
        loop {
            let label_sloc = self.tq.next_sloc();
            let kwrd = match self.accept_keyword(&[
                Keyword::Default,
                Keyword::Case,
                Keyword::Each,
            ]) {
                Some(kwrd) => kwrd,
                None => break,
            };

            let mut clause = SwitchClause {
                ctype: SwitchClauseType::Default,
                lower_closed: false,
                upper_closed: false,
                label_lower: Expr::default(),
                label_upper: Expr::default(),
                body: Vec::new(),
            };

            match kwrd {
                Keyword::Default => {
                    // At most one `default` clause per `switch`.
                    if clauses
                        .iter()
                        .any(|c| c.ctype == SwitchClauseType::Default)
                    {
                        return Err(CompilerError::new(
                            CompilerStatus::MultipleDefault,
                            label_sloc,
                        ));
                    }
                }
                Keyword::Case => {
                    clause.ctype = SwitchClauseType::Case;
                    clause.label_lower =
                        self.accept_expression_as_rvalue_opt()?.ok_or_else(|| {
                            CompilerError::new(
                                CompilerStatus::ExpressionExpected,
                                self.tq.next_sloc(),
                            )
                        })?;
                }
                _ => {
                    // `each` takes an interval with open/closed endpoints.
                    clause.ctype = SwitchClauseType::Each;
                    let lower = self
                        .accept_punct(&[Punct::ParenthOp, Punct::BracketOp])
                        .ok_or_else(|| {
                            CompilerError::new(
                                CompilerStatus::IntervalExpected,
                                self.tq.next_sloc(),
                            )
                        })?;
                    clause.label_lower =
                        self.accept_expression_as_rvalue_opt()?.ok_or_else(|| {
                            CompilerError::new(
                                CompilerStatus::ExpressionExpected,
                                self.tq.next_sloc(),
                            )
                        })?;
                    self.require_punct(Punct::Comma, CompilerStatus::CommaExpected)?;
                    clause.label_upper =
                        self.accept_expression_as_rvalue_opt()?.ok_or_else(|| {
                            CompilerError::new(
                                CompilerStatus::ExpressionExpected,
                                self.tq.next_sloc(),
                            )
                        })?;
                    let upper = self
                        .accept_punct(&[Punct::ParenthCl, Punct::BracketCl])
                        .ok_or_else(|| {
                            CompilerError::new(
                                CompilerStatus::IntervalClosureExpected,
                                self.tq.next_sloc(),
                            )
                        })?;
                    clause.lower_closed = lower == Punct::BracketOp;
                    clause.upper_closed = upper == Punct::BracketCl;
                }
            }

            self.require_punct(Punct::Colon, CompilerStatus::ColonExpected)?;

            while let Some(stmt) = self.accept_statement(scope | SCOPE_SWITCH)? {
                clause.body.push(stmt);
            }
            clauses.push(clause);
        }

        if self.accept_punct(&[Punct::BraceCl]).is_none() {
            return Err(CompilerError::with_unmatched(
                CompilerStatus::ClosingBraceOrSwitchClauseExpected,
                self.tq.next_sloc(),
                "{",
                &body_sloc,
            ));
        }

        Ok(Some(Statement::Switch { ctrl, clauses }))
    }

    fn accept_do_while_statement_opt(&mut self, scope: u32) -> PResult<Option<Statement>> {
        if self.accept_keyword(&[Keyword::Do]).is_none() {
            return Ok(None);
        }

        let body = self
            .accept_nondeclarative_statement_as_block_opt(scope | SCOPE_WHILE)?
            .ok_or_else(|| {
                CompilerError::new(
                    CompilerStatus::NondeclarativeStatementExpected,
                    self.tq.next_sloc(),
                )
            })?;

        if self.accept_keyword(&[Keyword::While]).is_none() {
            return Err(CompilerError::new(
                CompilerStatus::KeywordWhileExpected,
                self.tq.next_sloc(),
            ));
        }

        let negative = self.accept_negation_opt();

        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::ParenthOp, CompilerStatus::OpenParenthesisExpected)?;
        let cond = self.accept_expression_as_rvalue_opt()?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::ExpressionExpected, self.tq.next_sloc())
        })?;
        self.require_close_paren(&op_sloc)?;
        self.require_punct(Punct::Semicol, CompilerStatus::SemicolonExpected)?;

        Ok(Some(Statement::DoWhile {
            body,
            negative,
            cond,
        }))
    }

    fn accept_while_statement_opt(&mut self, scope: u32) -> PResult<Option<Statement>> {
        if self.accept_keyword(&[Keyword::While]).is_none() {
            return Ok(None);
        }

        let negative = self.accept_negation_opt();

        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::ParenthOp, CompilerStatus::OpenParenthesisExpected)?;
        let cond = self.accept_expression_as_rvalue_opt()?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::ExpressionExpected, self.tq.next_sloc())
        })?;
        self.require_close_paren(&op_sloc)?;

        let body = self
            .accept_nondeclarative_statement_as_block_opt(scope | SCOPE_WHILE)?
            .ok_or_else(|| {
                CompilerError::new(
                    CompilerStatus::NondeclarativeStatementExpected,
                    self.tq.next_sloc(),
                )
            })?;

        Ok(Some(Statement::While {
            negative,
            cond,
            body,
        }))
    }

    /// `each k, v -> range ) body` after `for (`.
    fn accept_for_complement_range_opt(
        &mut self,
        op_sloc: &Sloc,
        scope: u32,
    ) -> PResult<Option<Statement>> {
        if self.accept_keyword(&[Keyword::Each]).is_none() {
            return Ok(None);
        }

        let mut name_key = None;
        let mut name_mapped = self.accept_identifier(true)?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::IdentifierExpected, self.tq.next_sloc())
        })?;

        if self
            .accept_punct(&[Punct::Comma, Punct::Colon, Punct::Assign])
            .is_some()
        {
            // The first identifier was the key after all.
            name_key = Some(name_mapped);
            name_mapped = self.accept_identifier(true)?.ok_or_else(|| {
                CompilerError::new(CompilerStatus::IdentifierExpected, self.tq.next_sloc())
            })?;
        }

        self.require_punct(Punct::Arrow, CompilerStatus::ArrowExpected)?;

        let sloc_init = self.tq.next_sloc();
        let init = self.accept_expression_opt()?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::ExpressionExpected, self.tq.next_sloc())
        })?;

        self.require_close_paren(op_sloc)?;

        let body = self
            .accept_nondeclarative_statement_as_block_opt(scope | SCOPE_FOR)?
            .ok_or_else(|| {
                CompilerError::new(
                    CompilerStatus::NondeclarativeStatementExpected,
                    self.tq.next_sloc(),
                )
            })?;

        Ok(Some(Statement::ForEach {
            name_key,
            name_mapped,
            sloc_init,
            init,
            body,
        }))
    }

    fn accept_for_initializer_opt(&mut self) -> PResult<Option<Statement>> {
        if let Some(stmt) = self.accept_variable_definition_opt()? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_immutable_variable_definition_opt()? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_reference_definition_opt()? {
            return Ok(Some(stmt));
        }
        if let Some(block) = self.accept_null_statement_opt() {
            return Ok(Some(Statement::Block { block }));
        }
        if let Some(stmt) = self.accept_expression_statement_opt()? {
            return Ok(Some(stmt));
        }
        Ok(None)
    }

    fn accept_for_complement_triplet_opt(
        &mut self,
        op_sloc: &Sloc,
        scope: u32,
    ) -> PResult<Option<Statement>> {
        let init_stmt = match self.accept_for_initializer_opt()? {
            Some(stmt) => stmt,
            None => return Ok(None),
        };

        let mut cond = Expr {
            sloc: self.tq.next_sloc(),
            units: Vec::new(),
        };
        self.accept_expression_and_check(&mut cond.units, false)?;
        self.require_punct(Punct::Semicol, CompilerStatus::SemicolonExpected)?;

        let mut step = Expr {
            sloc: self.tq.next_sloc(),
            units: Vec::new(),
        };
        self.accept_expression(&mut step.units)?;

        self.require_close_paren(op_sloc)?;

        let body = self
            .accept_nondeclarative_statement_as_block_opt(scope | SCOPE_FOR)?
            .ok_or_else(|| {
                CompilerError::new(
                    CompilerStatus::NondeclarativeStatementExpected,
                    self.tq.next_sloc(),
                )
            })?;

        Ok(Some(Statement::For {
            init: vec![init_stmt],
            cond,
            step,
            body,
        }))
    }

    fn accept_for_statement_opt(&mut self, scope: u32) -> PResult<Option<Statement>> {
        if self.accept_keyword(&[Keyword::For]).is_none() {
            return Ok(None);
        }

        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::ParenthOp, CompilerStatus::OpenParenthesisExpected)?;

        if let Some(stmt) = self.accept_for_complement_range_opt(&op_sloc, scope)? {
            return Ok(Some(stmt));
        }
        if let Some(stmt) = self.accept_for_complement_triplet_opt(&op_sloc, scope)? {
            return Ok(Some(stmt));
        }

        Err(CompilerError::new(
            CompilerStatus::ForStatementInitializerExpected,
            self.tq.next_sloc(),
        ))
    }

    fn accept_break_statement_opt(&mut self, scope: u32) -> PResult<Option<Statement>> {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Break]).is_none() {
            return Ok(None);
        }

        let mut scope_check = SCOPE_SWITCH | SCOPE_WHILE | SCOPE_FOR;
        let mut target = JumpTarget::Unspec;

        match self.accept_keyword(&[Keyword::Switch, Keyword::While, Keyword::For]) {
            Some(Keyword::Switch) => {
                scope_check = SCOPE_SWITCH;
                target = JumpTarget::Switch;
            }
            Some(Keyword::While) => {
                scope_check = SCOPE_WHILE;
                target = JumpTarget::While;
            }
            Some(Keyword::For) => {
                scope_check = SCOPE_FOR;
                target = JumpTarget::For;
            }
            _ => {}
        }

        if scope & scope_check == 0 {
            return Err(CompilerError::new(
                CompilerStatus::BreakNoMatchingScope,
                self.tq.next_sloc(),
            ));
        }

        self.require_punct(Punct::Semicol, CompilerStatus::SemicolonExpected)?;
        Ok(Some(Statement::Break { sloc, target }))
    }

    fn accept_continue_statement_opt(&mut self, scope: u32) -> PResult<Option<Statement>> {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Continue]).is_none() {
            return Ok(None);
        }

        let mut scope_check = SCOPE_WHILE | SCOPE_FOR;
        let mut target = JumpTarget::Unspec;

        match self.accept_keyword(&[Keyword::While, Keyword::For]) {
            Some(Keyword::While) => {
                scope_check = SCOPE_WHILE;
                target = JumpTarget::While;
            }
            Some(Keyword::For) => {
                scope_check = SCOPE_FOR;
                target = JumpTarget::For;
            }
            _ => {}
        }

        if scope & scope_check == 0 {
            return Err(CompilerError::new(
                CompilerStatus::ContinueNoMatchingScope,
                self.tq.next_sloc(),
            ));
        }

        self.require_punct(Punct::Semicol, CompilerStatus::SemicolonExpected)?;
        Ok(Some(Statement::Continue { sloc, target }))
    }

    fn accept_throw_statement_opt(&mut self) -> PResult<Option<Statement>> {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Throw]).is_none() {
            return Ok(None);
        }

        let expr = self.accept_expression_as_rvalue_opt()?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::ExpressionExpected, self.tq.next_sloc())
        })?;
        self.require_punct(Punct::Semicol, CompilerStatus::SemicolonExpected)?;
        Ok(Some(Statement::Throw { sloc, expr }))
    }

    /// `ref` or `->`.
    fn accept_reference_specifier_opt(&mut self) -> Option<bool> {
        if self.accept_keyword(&[Keyword::Ref]).is_some() {
            return Some(true);
        }
        if self.accept_punct(&[Punct::Arrow]).is_some() {
            return Some(true);
        }
        None
    }

    fn accept_return_statement_opt(&mut self) -> PResult<Option<Statement>> {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Return]).is_none() {
            return Ok(None);
        }

        let arg_sloc = self.tq.next_sloc();
        let refsp = self.accept_reference_specifier_opt();
        let mut expr = Expr {
            sloc: arg_sloc,
            units: Vec::new(),
        };
        let has_arg = self.accept_expression(&mut expr.units)?;
        if refsp.is_some() && !has_arg {
            return Err(CompilerError::new(
                CompilerStatus::ExpressionExpected,
                self.tq.next_sloc(),
            ));
        }

        if self.accept_punct(&[Punct::Semicol]).is_none() {
            return Err(CompilerError::new(
                if has_arg {
                    CompilerStatus::SemicolonExpected
                } else {
                    CompilerStatus::ExpressionExpected
                },
                self.tq.next_sloc(),
            ));
        }

        Ok(Some(Statement::Return {
            sloc,
            by_ref: refsp.unwrap_or(false),
            expr,
        }))
    }

    fn accept_assert_statement_opt(&mut self) -> PResult<Option<Statement>> {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Assert]).is_none() {
            return Ok(None);
        }

        let expr = self.accept_expression_as_rvalue_opt()?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::ExpressionExpected, self.tq.next_sloc())
        })?;

        let mut msg = None;
        if self.accept_punct(&[Punct::Colon]).is_some() {
            msg = self.accept_string_literal_opt();
            if msg.is_none() {
                return Err(CompilerError::new(
                    CompilerStatus::StringLiteralExpected,
                    self.tq.next_sloc(),
                ));
            }
        }
        let msg = msg
            .map(|m| m.to_string())
            .unwrap_or_else(|| "[no message]".to_string());

        self.require_punct(Punct::Semicol, CompilerStatus::SemicolonExpected)?;
        Ok(Some(Statement::Assert { sloc, expr, msg }))
    }

    fn accept_try_statement_opt(&mut self, scope: u32) -> PResult<Option<Statement>> {
        let sloc_try = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Try]).is_none() {
            return Ok(None);
        }

        let body_try = self
            .accept_nondeclarative_statement_as_block_opt(scope)?
            .ok_or_else(|| {
                CompilerError::new(
                    CompilerStatus::NondeclarativeStatementExpected,
                    self.tq.next_sloc(),
                )
            })?;

        let sloc_catch = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Catch]).is_none() {
            return Err(CompilerError::new(
                CompilerStatus::KeywordCatchExpected,
                self.tq.next_sloc(),
            ));
        }

        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::ParenthOp, CompilerStatus::OpenParenthesisExpected)?;
        let name_except = self.accept_identifier(true)?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::IdentifierExpected, self.tq.next_sloc())
        })?;
        self.require_close_paren(&op_sloc)?;

        let body_catch = self
            .accept_nondeclarative_statement_as_block_opt(scope)?
            .ok_or_else(|| {
                CompilerError::new(
                    CompilerStatus::NondeclarativeStatementExpected,
                    self.tq.next_sloc(),
                )
            })?;

        Ok(Some(Statement::Try {
            sloc_try,
            body_try,
            sloc_catch,
            name_except,
            body_catch,
        }))
    }

    // ─── Primary expressions ───────────────────────────────────────

    fn accept_prefix_operator(&mut self, prefixes: &mut Vec<ExprUnit>) -> bool {
        let tok = match self.tq.peek(0) {
            Some(tok) => tok,
            None => return false,
        };
        let sloc = tok.sloc.clone();

        if let Some(kwrd) = tok.as_keyword() {
            let xop = match kwrd {
                Keyword::Unset => Xop::Unset,
                Keyword::Countof => Xop::Countof,
                Keyword::Typeof => Xop::Typeof,
                Keyword::Not => Xop::Notl,
                Keyword::Abs => Xop::Abs,
                Keyword::Sign => Xop::Sign,
                Keyword::Sqrt => Xop::Sqrt,
                Keyword::Isnan => Xop::Isnan,
                Keyword::Isinf => Xop::Isinf,
                Keyword::Isvoid => Xop::Isvoid,
                Keyword::Round => Xop::Round,
                Keyword::Floor => Xop::Floor,
                Keyword::Ceil => Xop::Ceil,
                Keyword::Trunc => Xop::Trunc,
                Keyword::Iround => Xop::Iround,
                Keyword::Ifloor => Xop::Ifloor,
                Keyword::Iceil => Xop::Iceil,
                Keyword::Itrunc => Xop::Itrunc,
                Keyword::Lzcnt => Xop::Lzcnt,
                Keyword::Tzcnt => Xop::Tzcnt,
                Keyword::Popcnt => Xop::Popcnt,
                _ => return false,
            };
            self.tq.shift(1);
            prefixes.push(ExprUnit::OperatorRpn {
                sloc,
                xop,
                assign: false,
            });
            return true;
        }

        if let Some(punct) = tok.as_punct() {
            let xop = match punct {
                Punct::Add => Xop::Pos,
                Punct::Sub => Xop::Neg,
                Punct::Notb => Xop::Notb,
                Punct::Notl => Xop::Notl,
                Punct::Inc => Xop::Inc,
                Punct::Dec => Xop::Dec,
                Punct::Hash => Xop::Countof,
                _ => return false,
            };
            self.tq.shift(1);
            prefixes.push(ExprUnit::OperatorRpn {
                sloc,
                xop,
                assign: false,
            });
            return true;
        }

        false
    }

    fn accept_local_reference(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        let name = match self.accept_identifier(false)? {
            Some(name) => name,
            None => return Ok(false),
        };

        // Special names expand to literals, the way macros would.
        if &*name == "__file" {
            units.push(ExprUnit::Literal {
                value: Value::Str(sloc.file.clone()),
            });
            return Ok(true);
        }
        if &*name == "__line" {
            units.push(ExprUnit::Literal {
                value: Value::Int(sloc.line as i64),
            });
            return Ok(true);
        }

        units.push(ExprUnit::LocalReference { sloc, name });
        Ok(true)
    }

    fn accept_global_reference(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Extern]).is_none() {
            return Ok(false);
        }

        let name = self.accept_identifier(false)?.ok_or_else(|| {
            CompilerError::new(CompilerStatus::IdentifierExpected, self.tq.next_sloc())
        })?;
        units.push(ExprUnit::GlobalReference { sloc, name });
        Ok(true)
    }

    fn accept_this(&mut self, units: &mut Vec<ExprUnit>) -> bool {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::This]).is_none() {
            return false;
        }
        units.push(ExprUnit::LocalReference {
            sloc,
            name: Rc::from("__this"),
        });
        true
    }

    fn accept_closure_function(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Func]).is_none() {
            return Ok(false);
        }

        let params = self.accept_parameter_list()?;

        let body_sloc = self.tq.next_sloc();
        let block = if let Some(block) = self.accept_statement_block_opt(SCOPE_PLAIN)? {
            block
        } else if let Some(init) = self.accept_equal_initializer_opt()? {
            // `func() = expr` behaves as a `return` by value.
            Block {
                stmts: vec![Statement::Return {
                    sloc: body_sloc,
                    by_ref: false,
                    expr: init,
                }],
            }
        } else if let Some(init) = self.accept_ref_initializer_opt()? {
            // `func() -> expr` behaves as a `return` by reference.
            Block {
                stmts: vec![Statement::Return {
                    sloc: body_sloc,
                    by_ref: true,
                    expr: init,
                }],
            }
        } else {
            return Err(CompilerError::new(
                CompilerStatus::OpenBraceOrInitializerExpected,
                self.tq.next_sloc(),
            ));
        };

        let unique_name = format!("__closure:{}:{}", sloc.line, sloc.column);
        units.push(ExprUnit::ClosureFunction {
            sloc,
            unique_name,
            params,
            body: block.stmts,
        });
        Ok(true)
    }

    fn accept_unnamed_array(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        if self.accept_punct(&[Punct::BracketOp]).is_none() {
            return Ok(false);
        }

        let mut nelems = 0u32;
        let mut status_if_unmatched = CompilerStatus::ClosingBracketOrExpressionExpected;

        loop {
            if !self.accept_expression_and_check(units, false)? {
                break;
            }
            if nelems >= 0xFFFFF {
                return Err(CompilerError::new(
                    CompilerStatus::TooManyElements,
                    self.tq.next_sloc(),
                ));
            }
            nelems += 1;
            status_if_unmatched = CompilerStatus::ClosingBracketOrCommaExpected;

            if self.accept_punct(&[Punct::Comma, Punct::Semicol]).is_none() {
                break;
            }
            status_if_unmatched = CompilerStatus::ClosingBracketOrExpressionExpected;
        }

        if self.accept_punct(&[Punct::BracketCl]).is_none() {
            return Err(CompilerError::with_unmatched(
                status_if_unmatched,
                self.tq.next_sloc(),
                "[",
                &sloc,
            ));
        }

        units.push(ExprUnit::UnnamedArray { sloc, nelems });
        Ok(true)
    }

    fn accept_unnamed_object(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        if self.accept_punct(&[Punct::BraceOp]).is_none() {
            return Ok(false);
        }

        let mut keys: Vec<Rc<str>> = Vec::new();
        let mut status_if_unmatched = CompilerStatus::ClosingBraceOrJson5KeyExpected;

        loop {
            let key_sloc = self.tq.next_sloc();
            let key = match self.accept_json5_key_opt() {
                Some(key) => key,
                None => break,
            };

            if keys.contains(&key) {
                return Err(CompilerError::new(
                    CompilerStatus::DuplicateKeyInObject,
                    key_sloc,
                ));
            }

            if self.accept_punct(&[Punct::Assign, Punct::Colon]).is_none() {
                return Err(CompilerError::new(
                    CompilerStatus::EqualsSignOrColonExpected,
                    self.tq.next_sloc(),
                ));
            }

            if !self.accept_expression_and_check(units, false)? {
                return Err(CompilerError::new(
                    CompilerStatus::ExpressionExpected,
                    self.tq.next_sloc(),
                ));
            }
            keys.push(key);
            status_if_unmatched = CompilerStatus::ClosingBraceOrCommaExpected;

            if self.accept_punct(&[Punct::Comma, Punct::Semicol]).is_none() {
                break;
            }
            status_if_unmatched = CompilerStatus::ClosingBraceOrJson5KeyExpected;
        }

        if self.accept_punct(&[Punct::BraceCl]).is_none() {
            return Err(CompilerError::with_unmatched(
                status_if_unmatched,
                self.tq.next_sloc(),
                "{",
                &sloc,
            ));
        }

        units.push(ExprUnit::UnnamedObject { sloc, keys });
        Ok(true)
    }

    fn accept_nested_expression(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        if self.accept_punct(&[Punct::ParenthOp]).is_none() {
            return Ok(false);
        }

        self.require_expression(units)?;
        self.require_close_paren(&sloc)?;
        Ok(true)
    }

    /// `__fma ( expr , expr , expr )`
    fn accept_fused_multiply_add(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Fma]).is_none() {
            return Ok(false);
        }

        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::ParenthOp, CompilerStatus::OpenParenthesisExpected)?;
        self.require_expression(units)?;
        self.require_punct(Punct::Comma, CompilerStatus::CommaExpected)?;
        self.require_expression(units)?;
        self.require_punct(Punct::Comma, CompilerStatus::CommaExpected)?;
        self.require_expression(units)?;
        self.require_close_paren(&op_sloc)?;

        units.push(ExprUnit::OperatorRpn {
            sloc,
            xop: Xop::Fma,
            assign: false,
        });
        Ok(true)
    }

    /// Modular and saturating arithmetic: parenthesized prefix forms of
    /// binary operators.
    fn accept_prefix_binary_expression(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let tok = match self.tq.peek(0) {
            Some(tok) => tok,
            None => return Ok(false),
        };
        let sloc = tok.sloc.clone();
        let xop = match tok.as_keyword() {
            Some(Keyword::Addm) => Xop::Addm,
            Some(Keyword::Subm) => Xop::Subm,
            Some(Keyword::Mulm) => Xop::Mulm,
            Some(Keyword::Adds) => Xop::Adds,
            Some(Keyword::Subs) => Xop::Subs,
            Some(Keyword::Muls) => Xop::Muls,
            _ => return Ok(false),
        };
        self.tq.shift(1);

        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::ParenthOp, CompilerStatus::OpenParenthesisExpected)?;
        self.require_expression(units)?;
        self.require_punct(Punct::Comma, CompilerStatus::CommaExpected)?;
        self.require_expression(units)?;
        self.require_close_paren(&op_sloc)?;

        units.push(ExprUnit::OperatorRpn {
            sloc,
            xop,
            assign: false,
        });
        Ok(true)
    }

    /// `catch ( expression )`
    fn accept_catch_expression(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        if self.accept_keyword(&[Keyword::Catch]).is_none() {
            return Ok(false);
        }

        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::ParenthOp, CompilerStatus::OpenParenthesisExpected)?;

        let mut operand = Vec::new();
        self.require_expression(&mut operand)?;
        self.require_close_paren(&op_sloc)?;

        units.push(ExprUnit::Catch { operand });
        Ok(true)
    }

    /// `__vcall ( target , generator )`
    fn accept_variadic_function_call(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Vcall]).is_none() {
            return Ok(false);
        }

        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::ParenthOp, CompilerStatus::OpenParenthesisExpected)?;

        let mut args = vec![Argument::default(), Argument::default()];
        self.require_expression(&mut args[0].units)?;
        self.require_punct(Punct::Comma, CompilerStatus::CommaExpected)?;
        self.require_expression(&mut args[1].units)?;
        self.require_close_paren(&op_sloc)?;

        units.push(ExprUnit::VariadicCall { sloc, args });
        Ok(true)
    }

    fn accept_argument_list(
        &mut self,
        op_sloc: &Sloc,
    ) -> PResult<Vec<Argument>> {
        let mut args = Vec::new();
        let mut status_if_unmatched = CompilerStatus::ClosingParenthesisOrArgumentExpected;

        loop {
            let ref_sp = self.accept_reference_specifier_opt();
            let mut arg = Argument::default();
            let succ = self.accept_expression_and_check(&mut arg.units, ref_sp.unwrap_or(false))?;
            if ref_sp.is_none() && !succ {
                break;
            }
            if !succ {
                return Err(CompilerError::new(
                    CompilerStatus::ExpressionExpected,
                    self.tq.next_sloc(),
                ));
            }

            args.push(arg);
            status_if_unmatched = CompilerStatus::ClosingParenthesisOrCommaExpected;

            if self.accept_punct(&[Punct::Comma]).is_none() {
                break;
            }
            status_if_unmatched = CompilerStatus::ClosingParenthesisOrArgumentExpected;
        }

        if self.accept_punct(&[Punct::ParenthCl]).is_none() {
            return Err(CompilerError::with_unmatched(
                status_if_unmatched,
                self.tq.next_sloc(),
                "(",
                op_sloc,
            ));
        }
        Ok(args)
    }

    /// `import ( argument-list )`
    fn accept_import_function_call(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        if self.accept_keyword(&[Keyword::Import]).is_none() {
            return Ok(false);
        }

        let op_sloc = self.tq.next_sloc();
        self.require_punct(Punct::ParenthOp, CompilerStatus::OpenParenthesisExpected)?;
        let args = self.accept_argument_list(&op_sloc)?;

        if args.is_empty() {
            return Err(CompilerError::new(
                CompilerStatus::ArgumentExpected,
                self.tq.next_sloc(),
            ));
        }

        units.push(ExprUnit::ImportCall { sloc, args });
        Ok(true)
    }

    fn accept_primary_expression(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        if self.accept_local_reference(units)? {
            return Ok(true);
        }
        if self.accept_global_reference(units)? {
            return Ok(true);
        }
        if let Some(value) = self.accept_literal_opt() {
            units.push(ExprUnit::Literal { value });
            return Ok(true);
        }
        if self.accept_this(units) {
            return Ok(true);
        }
        if self.accept_closure_function(units)? {
            return Ok(true);
        }
        if self.accept_unnamed_array(units)? {
            return Ok(true);
        }
        if self.accept_unnamed_object(units)? {
            return Ok(true);
        }
        if self.accept_nested_expression(units)? {
            return Ok(true);
        }
        if self.accept_fused_multiply_add(units)? {
            return Ok(true);
        }
        if self.accept_prefix_binary_expression(units)? {
            return Ok(true);
        }
        if self.accept_catch_expression(units)? {
            return Ok(true);
        }
        if self.accept_variadic_function_call(units)? {
            return Ok(true);
        }
        if self.accept_import_function_call(units)? {
            return Ok(true);
        }
        Ok(false)
    }

    // ─── Postfix ───────────────────────────────────────────────────

    fn accept_postfix_operator(&mut self, units: &mut Vec<ExprUnit>) -> bool {
        let tok = match self.tq.peek(0) {
            Some(tok) => tok,
            None => return false,
        };
        let sloc = tok.sloc.clone();

        let xop = match tok.as_punct() {
            Some(Punct::Inc) => Xop::Inc,
            Some(Punct::Dec) => Xop::Dec,
            Some(Punct::Head) => Xop::Head,
            Some(Punct::Tail) => Xop::Tail,
            Some(Punct::Random) => Xop::Random,
            _ => return false,
        };
        self.tq.shift(1);
        units.push(ExprUnit::OperatorRpn {
            sloc,
            xop,
            assign: true,
        });
        true
    }

    fn accept_postfix_function_call(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        if self.accept_punct(&[Punct::ParenthOp]).is_none() {
            return Ok(false);
        }

        let args = self.accept_argument_list(&sloc)?;
        units.push(ExprUnit::FunctionCall { sloc, args });
        Ok(true)
    }

    fn accept_postfix_subscript(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        if self.accept_punct(&[Punct::BracketOp]).is_none() {
            return Ok(false);
        }

        self.require_expression(units)?;

        if self.accept_punct(&[Punct::BracketCl]).is_none() {
            return Err(CompilerError::with_unmatched(
                CompilerStatus::ClosingBracketExpected,
                self.tq.next_sloc(),
                "[",
                &sloc,
            ));
        }

        units.push(ExprUnit::OperatorRpn {
            sloc,
            xop: Xop::Index,
            assign: false,
        });
        Ok(true)
    }

    fn accept_postfix_member_access(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let sloc = self.tq.next_sloc();
        if self.accept_punct(&[Punct::Dot]).is_none() {
            return Ok(false);
        }

        let key = self.accept_json5_key_opt().ok_or_else(|| {
            CompilerError::new(CompilerStatus::IdentifierExpected, self.tq.next_sloc())
        })?;

        units.push(ExprUnit::Literal {
            value: Value::Str(key),
        });
        units.push(ExprUnit::OperatorRpn {
            sloc,
            xop: Xop::Index,
            assign: false,
        });
        Ok(true)
    }

    // ─── Infix elements ────────────────────────────────────────────

    /// Prefix operators, a primary expression, and postfix operators,
    /// flattened into RPN. Prefixes bind looser than postfixes, so they
    /// are appended in reverse at the end.
    fn accept_infix_element(&mut self, units: &mut Vec<ExprUnit>) -> PResult<bool> {
        let mut prefixes = Vec::new();
        while self.accept_prefix_operator(&mut prefixes) {}

        if !self.accept_primary_expression(units)? {
            if prefixes.is_empty() {
                return Ok(false);
            }
            return Err(CompilerError::new(
                CompilerStatus::ExpressionExpected,
                self.tq.next_sloc(),
            ));
        }

        loop {
            let more = self.accept_postfix_operator(units)
                || self.accept_postfix_function_call(units)?
                || self.accept_postfix_subscript(units)?
                || self.accept_postfix_member_access(units)?;
            if !more {
                break;
            }
        }

        while let Some(prefix) = prefixes.pop() {
            units.push(prefix);
        }
        Ok(true)
    }

    fn accept_infix_operator_opt(&mut self) -> PResult<Option<InfixElement>> {
        if let Some(elem) = self.accept_infix_ternary_opt()? {
            return Ok(Some(elem));
        }
        if let Some(elem) = self.accept_infix_logical_and_opt() {
            return Ok(Some(elem));
        }
        if let Some(elem) = self.accept_infix_logical_or_opt() {
            return Ok(Some(elem));
        }
        if let Some(elem) = self.accept_infix_coalescence_opt() {
            return Ok(Some(elem));
        }
        Ok(self.accept_infix_operator_general_opt())
    }

    /// `? expr :` or `?= expr :`
    fn accept_infix_ternary_opt(&mut self) -> PResult<Option<InfixElement>> {
        let sloc = self.tq.next_sloc();
        let punct = match self.accept_punct(&[Punct::Quest, Punct::QuestEq]) {
            Some(punct) => punct,
            None => return Ok(None),
        };

        let assign = punct == Punct::QuestEq;
        let mut branch_true = Vec::new();
        self.require_expression(&mut branch_true)?;

        if self.accept_punct(&[Punct::Colon]).is_none() {
            return Err(CompilerError::with_unmatched(
                CompilerStatus::ColonExpected,
                self.tq.next_sloc(),
                if assign { "?=" } else { "?" },
                &sloc,
            ));
        }

        Ok(Some(InfixElement::Ternary {
            sloc,
            assign,
            branch_true,
            branch_false: Vec::new(),
        }))
    }

    fn accept_infix_logical_and_opt(&mut self) -> Option<InfixElement> {
        let sloc = self.tq.next_sloc();
        let assign = match self.accept_punct(&[Punct::Andl, Punct::AndlEq]) {
            Some(punct) => punct == Punct::AndlEq,
            None => {
                self.accept_keyword(&[Keyword::And])?;
                false
            }
        };
        Some(InfixElement::LogicalAnd {
            sloc,
            assign,
            branch_true: Vec::new(),
        })
    }

    fn accept_infix_logical_or_opt(&mut self) -> Option<InfixElement> {
        let sloc = self.tq.next_sloc();
        let assign = match self.accept_punct(&[Punct::Orl, Punct::OrlEq]) {
            Some(punct) => punct == Punct::OrlEq,
            None => {
                self.accept_keyword(&[Keyword::Or])?;
                false
            }
        };
        Some(InfixElement::LogicalOr {
            sloc,
            assign,
            branch_false: Vec::new(),
        })
    }

    fn accept_infix_coalescence_opt(&mut self) -> Option<InfixElement> {
        let sloc = self.tq.next_sloc();
        let punct = self.accept_punct(&[Punct::Coales, Punct::CoalesEq])?;
        Some(InfixElement::Coalescence {
            sloc,
            assign: punct == Punct::CoalesEq,
            branch_null: Vec::new(),
        })
    }

    fn accept_infix_operator_general_opt(&mut self) -> Option<InfixElement> {
        let tok = self.tq.peek(0)?;
        let sloc = tok.sloc.clone();

        let (xop, assign) = match tok.as_punct()? {
            Punct::Add => (Xop::Add, false),
            Punct::Sub => (Xop::Sub, false),
            Punct::Mul => (Xop::Mul, false),
            Punct::Div => (Xop::Div, false),
            Punct::Mod => (Xop::Mod, false),
            Punct::Andb => (Xop::Andb, false),
            Punct::Orb => (Xop::Orb, false),
            Punct::Xorb => (Xop::Xorb, false),
            Punct::Sla => (Xop::Sla, false),
            Punct::Sra => (Xop::Sra, false),
            Punct::Sll => (Xop::Sll, false),
            Punct::Srl => (Xop::Srl, false),
            Punct::AddEq => (Xop::Add, true),
            Punct::SubEq => (Xop::Sub, true),
            Punct::MulEq => (Xop::Mul, true),
            Punct::DivEq => (Xop::Div, true),
            Punct::ModEq => (Xop::Mod, true),
            Punct::AndbEq => (Xop::Andb, true),
            Punct::OrbEq => (Xop::Orb, true),
            Punct::XorbEq => (Xop::Xorb, true),
            Punct::SlaEq => (Xop::Sla, true),
            Punct::SraEq => (Xop::Sra, true),
            Punct::SllEq => (Xop::Sll, true),
            Punct::SrlEq => (Xop::Srl, true),
            Punct::Assign => (Xop::Assign, true),
            Punct::CmpEq => (Xop::CmpEq, false),
            Punct::CmpNe => (Xop::CmpNe, false),
            Punct::CmpLt => (Xop::CmpLt, false),
            Punct::CmpGt => (Xop::CmpGt, false),
            Punct::CmpLte => (Xop::CmpLte, false),
            Punct::CmpGte => (Xop::CmpGte, false),
            Punct::Cmp3way => (Xop::Cmp3way, false),
            Punct::CmpUn => (Xop::CmpUn, false),
            _ => return None,
        };

        self.tq.shift(1);
        Some(InfixElement::General {
            sloc,
            xop,
            assign,
            rhs: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::opts::CompilerOptions;
    use std::io::Cursor;

    fn parse(text: &str) -> Vec<Statement> {
        let mut cur = Cursor::new(text.as_bytes().to_vec());
        let tokens = Lexer::new(CompilerOptions::default())
            .tokenize(Rc::from("test"), 1, &mut cur)
            .expect("lexing should succeed");
        let mut tq = TokenQueue::new(tokens);
        Parser::new(&mut tq)
            .parse_document()
            .expect("parsing should succeed")
    }

    fn parse_err(text: &str) -> CompilerError {
        let mut cur = Cursor::new(text.as_bytes().to_vec());
        let tokens = Lexer::new(CompilerOptions::default())
            .tokenize(Rc::from("test"), 1, &mut cur)
            .expect("lexing should succeed");
        let mut tq = TokenQueue::new(tokens);
        Parser::new(&mut tq)
            .parse_document()
            .expect_err("parsing should fail")
    }

    #[test]
    fn test_document_gets_implicit_return() {
        let stmts = parse("var a = 1;");
        assert_eq!(stmts.len(), 2);
        assert!(stmts[1].is_empty_return());
    }

    #[test]
    fn test_operator_precedence_rpn() {
        // a + b * c must parse as a (b c *) +.
        let stmts = parse("a + b * c;");
        let units = match &stmts[0] {
            Statement::Expression { expr } => &expr.units,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(units.len(), 5);
        assert!(matches!(
            units[3],
            ExprUnit::OperatorRpn { xop: Xop::Mul, .. }
        ));
        assert!(matches!(
            units[4],
            ExprUnit::OperatorRpn { xop: Xop::Add, .. }
        ));
    }

    #[test]
    fn test_assignment_right_associative() {
        // a = b = c must parse as a (b c =) =.
        let stmts = parse("a = b = c;");
        let units = match &stmts[0] {
            Statement::Expression { expr } => &expr.units,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(units.len(), 5);
        assert!(matches!(
            units[3],
            ExprUnit::OperatorRpn {
                xop: Xop::Assign,
                ..
            }
        ));
        assert!(matches!(
            units[4],
            ExprUnit::OperatorRpn {
                xop: Xop::Assign,
                ..
            }
        ));
    }

    #[test]
    fn test_structured_binding_sentinels() {
        let stmts = parse("var [a, b] = x;");
        match &stmts[0] {
            Statement::Variables { decls, .. } => {
                let names: Vec<&str> = decls[0].names.iter().map(|n| &**n).collect();
                assert_eq!(names, vec!["[", "a", "b", "]"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_binding_name() {
        let err = parse_err("var [a, a] = x;");
        assert_eq!(err.status, CompilerStatus::DuplicateNameInStructuredBinding);
    }

    #[test]
    fn test_const_requires_initializer() {
        let err = parse_err("const a;");
        assert_eq!(err.status, CompilerStatus::EqualsSignExpected);
    }

    #[test]
    fn test_break_scope_validation() {
        let err = parse_err("break;");
        assert_eq!(err.status, CompilerStatus::BreakNoMatchingScope);
        let err = parse_err("while(1) break for;");
        assert_eq!(err.status, CompilerStatus::BreakNoMatchingScope);
        // Valid inside the right scope.
        parse("while(1) break while;");
        parse("switch(1) { default: break switch; }");
    }

    #[test]
    fn test_single_statement_bodies_blockified() {
        let stmts = parse("if(x) y;");
        match &stmts[0] {
            Statement::If { branch_true, .. } => assert_eq!(branch_true.stmts.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_switch_interval_clause() {
        let stmts = parse("switch(x) { each [0, 10): y; default: ; }");
        match &stmts[0] {
            Statement::Switch { clauses, .. } => {
                assert_eq!(clauses.len(), 2);
                assert_eq!(clauses[0].ctype, SwitchClauseType::Each);
                assert!(clauses[0].lower_closed);
                assert!(!clauses[0].upper_closed);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_multiple_default_rejected() {
        let err = parse_err("switch(x) { default: ; default: ; }");
        assert_eq!(err.status, CompilerStatus::MultipleDefault);
    }

    #[test]
    fn test_closure_shorthand_bodies() {
        parse("var f = func(x) = x + 1;");
        parse("var g = func(x) -> x;");
        parse("var h = func(...) { return 1; };");
    }

    #[test]
    fn test_member_access_lowers_to_index() {
        let stmts = parse("a.b;");
        let units = match &stmts[0] {
            Statement::Expression { expr } => &expr.units,
            other => panic!("unexpected {:?}", other),
        };
        assert!(matches!(units[1], ExprUnit::Literal { .. }));
        assert!(matches!(
            units[2],
            ExprUnit::OperatorRpn {
                xop: Xop::Index,
                ..
            }
        ));
    }

    #[test]
    fn test_adjacent_string_literals_concatenate() {
        let stmts = parse(r#"var s = "a" "b";"#);
        match &stmts[0] {
            Statement::Variables { decls, .. } => {
                match &decls[0].init.units[0] {
                    ExprUnit::Literal { value } => assert_eq!(value.to_string(), "ab"),
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unmatched_paren_quotes_opening() {
        let err = parse_err("if(x { }");
        assert!(err.message.contains("unmatched `(`"));
    }

    #[test]
    fn test_for_each_forms() {
        parse("for(each v -> arr) x;");
        parse("for(each k, v -> arr) x;");
        parse("for(var i = 0; i < 3; ++i) x;");
        parse("for(;;) break for;");
    }

    #[test]
    fn test_reserved_identifier_not_declarable() {
        let err = parse_err("var __secret = 1;");
        assert_eq!(err.status, CompilerStatus::ReservedIdentifierNotDeclarable);
    }

    #[test]
    fn test_oneline_entry_point() {
        let mut cur = Cursor::new(b"1 + 2".to_vec());
        let tokens = Lexer::new(CompilerOptions::default())
            .tokenize(Rc::from("t"), 1, &mut cur)
            .unwrap();
        let mut tq = TokenQueue::new(tokens);
        let stmts = Parser::new(&mut tq).parse_oneline().unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(matches!(stmts[0], Statement::Return { by_ref: true, .. }));
    }

    #[test]
    fn test_deep_nesting_capped() {
        let mut text = String::new();
        for _ in 0..400 {
            text.push('(');
        }
        text.push('1');
        for _ in 0..400 {
            text.push(')');
        }
        text.push(';');
        let err = parse_err(&text);
        assert_eq!(err.status, CompilerStatus::TooManyNestedLevels);
    }
}
