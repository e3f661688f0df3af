use std::rc::Rc;

use crate::air::{AirNode, AirStatus};
use crate::ast::SwitchClauseType;
use crate::opts::CompilerOptions;
use crate::runtime::error::RuntimeError;
use crate::runtime::executive::Executive;
use crate::runtime::reference::{Reference, VariableSet};
use crate::sloc::Sloc;
use crate::value::Value;

/// The handler behind a record: the interpreter function for one opcode.
pub type Handler = fn(&mut Executive, &Record) -> Result<AirStatus, RuntimeError>;

/// The 64-bit immediate of a record. The word is interpreted as bit
/// flags, a tag, two sub-integers, or a signed 32-bit literal, depending
/// on the opcode:
///
/// ```text
///   byte 0      b0 / u0   (flag or tag)
///   byte 1      b1 / u1   (flag or tag)
///   bytes 2-3   u23       (16-bit operand, e.g. a static depth)
///   bytes 4-7   u4567     (32-bit operand; i4567 when signed)
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Uparam(u64);

impl Uparam {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_b0(mut self, v: bool) -> Self {
        self.0 = (self.0 & !0xFF) | v as u64;
        self
    }

    pub fn with_u0(mut self, v: u8) -> Self {
        self.0 = (self.0 & !0xFF) | v as u64;
        self
    }

    pub fn with_b1(mut self, v: bool) -> Self {
        self.0 = (self.0 & !0xFF00) | ((v as u64) << 8);
        self
    }

    pub fn with_u1(mut self, v: u8) -> Self {
        self.0 = (self.0 & !0xFF00) | ((v as u64) << 8);
        self
    }

    pub fn with_u23(mut self, v: u16) -> Self {
        self.0 = (self.0 & !0xFFFF_0000) | ((v as u64) << 16);
        self
    }

    pub fn with_u4567(mut self, v: u32) -> Self {
        self.0 = (self.0 & 0xFFFF_FFFF) | ((v as u64) << 32);
        self
    }

    pub fn with_i4567(self, v: i32) -> Self {
        self.with_u4567(v as u32)
    }

    pub fn b0(self) -> bool {
        self.0 & 0xFF != 0
    }

    pub fn u0(self) -> u8 {
        self.0 as u8
    }

    pub fn b1(self) -> bool {
        self.0 & 0xFF00 != 0
    }

    pub fn u1(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn u23(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn u4567(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn i4567(self) -> i32 {
        self.u4567() as i32
    }
}

/// A switch clause in solidified form.
pub struct SwitchClauseRt {
    pub ctype: SwitchClauseType,
    pub lower_closed: bool,
    pub upper_closed: bool,
    pub rod_labels: AvmRod,
    pub rod_body: AvmRod,
    pub names_added: Vec<Rc<str>>,
}

/// Out-of-line parameter block of a record, holding state too large for
/// the immediate word: nested rods, name strings, captured constants.
pub enum Sparam {
    Name {
        name: Rc<str>,
    },
    /// A single nested rod: block bodies, catch operands, coalescence
    /// null branches.
    Block {
        body: AvmRod,
    },
    /// Two nested rods, in evaluation order for the opcode.
    TwoRods {
        first: AvmRod,
        second: AvmRod,
    },
    Switch {
        clauses: Vec<SwitchClauseRt>,
    },
    ForEach {
        name_key: Option<Rc<str>>,
        name_mapped: Rc<str>,
        sloc_init: Sloc,
        rod_init: AvmRod,
        rod_body: AvmRod,
    },
    For {
        rod_init: AvmRod,
        rod_cond: AvmRod,
        rod_step: AvmRod,
        rod_body: AvmRod,
    },
    Try {
        rod_try: AvmRod,
        sloc_catch: Sloc,
        name_except: Rc<str>,
        rod_catch: AvmRod,
    },
    AssertMsg {
        msg: String,
    },
    DefineFunction {
        opts: CompilerOptions,
        func: String,
        params: Vec<Rc<str>>,
        code_body: Vec<AirNode>,
    },
    BoundRef {
        bref: Reference,
    },
    Keys {
        keys: Vec<Rc<str>>,
    },
    DeferBody {
        code_body: Vec<AirNode>,
    },
    ImportOpts {
        opts: CompilerOptions,
    },
    Constant {
        value: Value,
    },
}

impl Sparam {
    fn collect_variables(&self, out: &mut VariableSet) {
        match self {
            Sparam::Block { body } => body.collect_variables(out),
            Sparam::TwoRods { first, second } => {
                first.collect_variables(out);
                second.collect_variables(out);
            }
            Sparam::Switch { clauses } => {
                for clause in clauses {
                    clause.rod_labels.collect_variables(out);
                    clause.rod_body.collect_variables(out);
                }
            }
            Sparam::ForEach {
                rod_init, rod_body, ..
            } => {
                rod_init.collect_variables(out);
                rod_body.collect_variables(out);
            }
            Sparam::For {
                rod_init,
                rod_cond,
                rod_step,
                rod_body,
            } => {
                rod_init.collect_variables(out);
                rod_cond.collect_variables(out);
                rod_step.collect_variables(out);
                rod_body.collect_variables(out);
            }
            Sparam::Try {
                rod_try, rod_catch, ..
            } => {
                rod_try.collect_variables(out);
                rod_catch.collect_variables(out);
            }
            Sparam::DefineFunction { code_body, .. } | Sparam::DeferBody { code_body } => {
                for node in code_body {
                    node.collect_variables(out);
                }
            }
            Sparam::BoundRef { bref } => bref.collect_variables(out),
            Sparam::Constant { value } => {
                crate::runtime::reference::collect_value_variables(value, out)
            }
            _ => {}
        }
    }
}

/// One fixed-stride record: the opcode handler, the packed immediate, an
/// optional out-of-line parameter block, and optional source metadata.
pub struct Record {
    pub handler: Handler,
    pub uparam: Uparam,
    pub sparam: Option<Box<Sparam>>,
    pub sloc: Option<Sloc>,
}

impl Record {
    /// The source location of this record. Opcodes that can fail always
    /// carry one.
    pub fn sloc(&self) -> Sloc {
        self.sloc.clone().unwrap_or_else(Sloc::dummy)
    }

    pub fn sparam(&self) -> &Sparam {
        match &self.sparam {
            Some(sp) => sp,
            None => unreachable!("record carries no parameter block"),
        }
    }
}

/// An append-only buffer of records, sealed before first execution and
/// never mutated thereafter.
#[derive(Default)]
pub struct AvmRod {
    records: Vec<Record>,
    finalized: bool,
}

impl AvmRod {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        handler: Handler,
        uparam: Uparam,
        sparam: Option<Sparam>,
        sloc: Option<Sloc>,
    ) {
        debug_assert!(!self.finalized, "rod is sealed");
        self.records.push(Record {
            handler,
            uparam,
            sparam: sparam.map(Box::new),
            sloc,
        });
    }

    /// Seal the rod. Appending afterwards is a programming error.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Execute records in order until one sets a status other than
    /// `Next`, or the rod is exhausted.
    pub fn execute(&self, ex: &mut Executive) -> Result<AirStatus, RuntimeError> {
        debug_assert!(self.finalized, "rod must be sealed before execution");
        for rec in &self.records {
            let status = (rec.handler)(ex, rec)?;
            if status != AirStatus::Next {
                return Ok(status);
            }
        }
        Ok(AirStatus::Next)
    }

    /// Walk every variable reachable from captured sub-rods and
    /// constants, for the benefit of a tracing collector.
    pub fn collect_variables(&self, out: &mut VariableSet) {
        for rec in &self.records {
            if let Some(sp) = &rec.sparam {
                sp.collect_variables(out);
            }
        }
    }
}

/// Pack a node list into a sealed rod.
pub fn solidify_nodes(code: &[AirNode]) -> AvmRod {
    let mut rod = AvmRod::new();
    for node in code {
        node.solidify(&mut rod);
    }
    rod.finalize();
    rod
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uparam_packing() {
        let up = Uparam::new()
            .with_b0(true)
            .with_u1(42)
            .with_u23(0x1234)
            .with_i4567(-7);
        assert!(up.b0());
        assert_eq!(up.u1(), 42);
        assert_eq!(up.u23(), 0x1234);
        assert_eq!(up.i4567(), -7);
    }

    #[test]
    fn test_uparam_fields_do_not_clobber() {
        let up = Uparam::new().with_u4567(u32::MAX).with_u0(9).with_u23(3);
        assert_eq!(up.u0(), 9);
        assert_eq!(up.u23(), 3);
        assert_eq!(up.u4567(), u32::MAX);
    }

    #[test]
    fn test_empty_rod_executes_to_next() {
        let rod = solidify_nodes(&[]);
        assert!(rod.is_finalized());
        assert!(rod.is_empty());
    }
}
