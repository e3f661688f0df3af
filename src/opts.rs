use serde::{Deserialize, Serialize};

/// Options consumed by the lexer and by IR lowering.
///
/// Every field has a defined effect; hosts may persist option profiles,
/// hence the serde derives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Parse every numeric literal without a radix point as a real.
    pub integers_as_reals: bool,
    /// Honor backslash escapes inside single-quoted strings.
    pub escapable_single_quotes: bool,
    /// Ignore the keyword table, so all words lex as identifiers.
    pub keywords_as_identifiers: bool,
    /// Compile unresolved names to global references instead of failing.
    pub implicit_global_names: bool,
    /// Keep proper-tail-call annotations. When off, all calls unwind.
    pub proper_tail_calls: bool,
    /// Emit a single-step trap before every sub-expression.
    pub verbose_single_step_traps: bool,
    /// 0 disables folding; >= 1 enables constant folding and the 32-bit
    /// literal operator specialization.
    pub optimization_level: u8,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            integers_as_reals: false,
            escapable_single_quotes: false,
            keywords_as_identifiers: false,
            implicit_global_names: true,
            proper_tail_calls: true,
            verbose_single_step_traps: false,
            optimization_level: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = CompilerOptions::default();
        assert!(!opts.integers_as_reals);
        assert!(opts.implicit_global_names);
        assert!(opts.proper_tail_calls);
        assert_eq!(opts.optimization_level, 1);
    }

    #[test]
    fn test_copy_semantics() {
        let mut opts = CompilerOptions::default();
        opts.optimization_level = 0;
        let copy = opts;
        assert_eq!(copy.optimization_level, 0);
        assert_eq!(opts.optimization_level, 0);
    }
}
