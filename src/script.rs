use std::io::{BufRead, Cursor};
use std::path::Path;
use std::rc::Rc;

use log::debug;
use thiserror::Error;

use crate::air::codegen::FunctionBuilder;
use crate::diagnostic::CompilerError;
use crate::lexer::Lexer;
use crate::opts::CompilerOptions;
use crate::parser::Parser;
use crate::runtime::error::RuntimeError;
use crate::runtime::executive::Executive;
use crate::runtime::function::{finish_call, FunctionRef};
use crate::runtime::global::GlobalContext;
use crate::runtime::hooks::HooksRef;
use crate::runtime::reference::{Reference, VarRef};
use crate::sloc::Sloc;
use crate::token_queue::TokenQueue;
use crate::value::Value;

/// Everything that can go wrong between source text and a result.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{0}")]
    Compile(#[from] CompilerError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The embedding façade: load source text, execute it, and share global
/// variables with the host.
pub struct SimpleScript {
    opts: CompilerOptions,
    global: Rc<GlobalContext>,
    func: Option<FunctionRef>,
}

impl Default for SimpleScript {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleScript {
    pub fn new() -> Self {
        Self::with_options(CompilerOptions::default())
    }

    pub fn with_options(opts: CompilerOptions) -> Self {
        Self {
            opts,
            global: Rc::new(GlobalContext::new()),
            func: None,
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.opts
    }

    pub fn options_mut(&mut self) -> &mut CompilerOptions {
        &mut self.opts
    }

    pub fn set_hooks(&self, hooks: HooksRef) {
        self.global.set_hooks(hooks);
    }

    pub fn global(&self) -> &Rc<GlobalContext> {
        &self.global
    }

    // ─── Global variables ──────────────────────────────────────────

    pub fn get_global_variable_opt(&self, name: &str) -> Option<VarRef> {
        self.global
            .get_named_reference_opt(name)
            .and_then(|re| re.variable_opt())
    }

    pub fn open_global_variable(&self, name: &str) -> VarRef {
        self.global.open_variable(Rc::from(name))
    }

    pub fn erase_global_variable(&self, name: &str) -> bool {
        self.global.erase_named_reference(name)
    }

    // ─── Loading ───────────────────────────────────────────────────

    /// Run the full front end on a byte stream: lex, parse, lower, and
    /// instantiate the script body as a variadic function.
    pub fn reload(
        &mut self,
        name: &str,
        start_line: i32,
        input: &mut dyn BufRead,
    ) -> Result<(), CompilerError> {
        let file: Rc<str> = Rc::from(name);
        let tokens = Lexer::new(self.opts).tokenize(file.clone(), start_line, input)?;
        let mut tq = TokenQueue::new(tokens);
        let stmts = Parser::new(&mut tq).parse_document()?;

        let mut builder = FunctionBuilder::new(self.opts);
        builder.reload(None, vec![Rc::from("...")], self.global.as_ref(), &stmts)?;

        debug!("reloaded script '{}' ({} statements)", name, stmts.len());
        self.func = Some(builder.create_function(Sloc::new(file, 0, 0), "[file scope]"));
        Ok(())
    }

    pub fn reload_string(&mut self, name: &str, code: &str) -> Result<(), CompilerError> {
        self.reload_string_at(name, 1, code)
    }

    pub fn reload_string_at(
        &mut self,
        name: &str,
        start_line: i32,
        code: &str,
    ) -> Result<(), CompilerError> {
        let mut cursor = Cursor::new(code.as_bytes().to_vec());
        self.reload(name, start_line, &mut cursor)
    }

    /// Parse a single expression and synthesize a by-reference return
    /// statement from it.
    pub fn reload_oneline(&mut self, name: &str, code: &str) -> Result<(), CompilerError> {
        let file: Rc<str> = Rc::from(name);
        let mut cursor = Cursor::new(code.as_bytes().to_vec());
        let tokens = Lexer::new(self.opts).tokenize(file.clone(), 1, &mut cursor)?;
        let mut tq = TokenQueue::new(tokens);
        let stmts = Parser::new(&mut tq).parse_oneline()?;

        let mut builder = FunctionBuilder::new(self.opts);
        builder.reload(None, vec![Rc::from("...")], self.global.as_ref(), &stmts)?;

        self.func = Some(builder.create_function(Sloc::new(file, 0, 0), "[file scope]"));
        Ok(())
    }

    pub fn reload_stdin(&mut self) -> Result<(), ScriptError> {
        let stdin = std::io::stdin();
        let mut lock = stdin.lock();
        self.reload("[stdin]", 1, &mut lock)?;
        Ok(())
    }

    pub fn reload_file(&mut self, path: &Path) -> Result<(), ScriptError> {
        let abs = std::fs::canonicalize(path)?;
        let contents = std::fs::read_to_string(&abs)?;
        self.reload_string(&abs.to_string_lossy(), &contents)?;
        Ok(())
    }

    // ─── Execution ─────────────────────────────────────────────────

    /// Execute the loaded script with the given arguments and return
    /// the resulting reference.
    pub fn execute(&self, args: Vec<Value>) -> Result<Reference, ScriptError> {
        let func = self.func.clone().ok_or_else(|| {
            ScriptError::Runtime(RuntimeError::format(
                Sloc::dummy(),
                "no script loaded".to_string(),
            ))
        })?;

        let mut ex = Executive::new(self.global.clone());
        let mut self_ref = Reference::new_void();
        let arg_refs = args
            .into_iter()
            .map(Reference::new_temporary)
            .collect::<Vec<_>>();

        func.invoke(&mut ex, &mut self_ref, arg_refs)?;
        finish_call(&mut ex, &mut self_ref)?;
        Ok(self_ref)
    }

    /// Execute and read the result by value; a void result yields null.
    pub fn execute_value(&self, args: Vec<Value>) -> Result<Value, ScriptError> {
        let re = self.execute(args)?;
        if re.is_void() {
            return Ok(Value::Null);
        }
        Ok(re.dereference_readonly()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: &str) -> Value {
        let mut script = SimpleScript::new();
        script.reload_string("test", code).expect("compile");
        script.execute_value(Vec::new()).expect("execute")
    }

    #[test]
    fn test_trivial_script() {
        assert_eq!(run("return 1 + 2;").as_int(), Some(3));
    }

    #[test]
    fn test_void_result_is_null() {
        assert_eq!(run("var a = 1;"), Value::Null);
    }

    #[test]
    fn test_oneline_entry() {
        let mut script = SimpleScript::new();
        script.reload_oneline("cmdline", "6 * 7").expect("compile");
        assert_eq!(script.execute_value(Vec::new()).unwrap().as_int(), Some(42));
    }

    #[test]
    fn test_script_arguments_via_varg() {
        let mut script = SimpleScript::new();
        script
            .reload_string("test", "return __varg(0) + __varg(1);")
            .expect("compile");
        let out = script
            .execute_value(vec![Value::Int(30), Value::Int(12)])
            .expect("execute");
        assert_eq!(out.as_int(), Some(42));
    }

    #[test]
    fn test_globals_shared_with_host() {
        let mut script = SimpleScript::new();
        let var = script.open_global_variable("greeting");
        var.borrow_mut().initialize(Value::from("hi"));

        script.reload_string("test", "return greeting + \"!\";").unwrap();
        assert_eq!(&*script.execute_value(Vec::new()).unwrap().to_string(), "hi!");

        assert!(script.erase_global_variable("greeting"));
        assert!(script.get_global_variable_opt("greeting").is_none());
    }

    #[test]
    fn test_compile_error_reported() {
        let mut script = SimpleScript::new();
        let err = script.reload_string("test", "var = 1;").unwrap_err();
        assert_eq!(
            err.status,
            crate::diagnostic::CompilerStatus::IdentifierExpected
        );
    }
}
