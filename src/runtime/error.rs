use std::fmt;

use crate::sloc::Sloc;
use crate::value::Value;

/// Kind of a backtrace frame. Frames are appended as an error unwinds
/// through the corresponding boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Native,
    Throw,
    Catch,
    Try,
    Assert,
    Func,
    Defer,
}

impl FrameType {
    pub fn describe(self) -> &'static str {
        match self {
            FrameType::Native => "native",
            FrameType::Throw => "throw",
            FrameType::Catch => "catch",
            FrameType::Try => "try",
            FrameType::Assert => "assert",
            FrameType::Func => "func",
            FrameType::Defer => "defer",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    pub ftype: FrameType,
    pub sloc: Sloc,
    pub value: Value,
}

/// An error raised at execution time: a value payload plus a growable
/// list of frames. `try`/`catch` is the only recovery point.
#[derive(Clone, Debug)]
pub struct RuntimeError {
    value: Value,
    frames: Vec<Frame>,
    // New frames are inserted here, so frames absorbed from a nested
    // error stay behind the original ones.
    frame_ins: usize,
}

impl RuntimeError {
    /// An error thrown by a `throw` statement. The initial frame is the
    /// throw site.
    pub fn new_throw(value: Value, sloc: Sloc) -> Self {
        let mut this = Self {
            value: value.clone(),
            frames: Vec::new(),
            frame_ins: 0,
        };
        this.insert_frame(FrameType::Throw, sloc, value);
        this
    }

    /// An error raised by the interpreter itself, with a string payload.
    pub fn format(sloc: Sloc, message: String) -> Self {
        let value = Value::from(message.as_str());
        let mut this = Self {
            value: value.clone(),
            frames: Vec::new(),
            frame_ins: 0,
        };
        this.insert_frame(FrameType::Native, sloc, value);
        this
    }

    /// A failed assertion.
    pub fn new_assert(sloc: Sloc, message: String) -> Self {
        let value = Value::from(format!("assertion failure: {}", message).as_str());
        let mut this = Self {
            value: value.clone(),
            frames: Vec::new(),
            frame_ins: 0,
        };
        this.insert_frame(FrameType::Assert, sloc, value);
        this
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    fn insert_frame(&mut self, ftype: FrameType, sloc: Sloc, value: Value) {
        self.frames.insert(
            self.frame_ins,
            Frame {
                ftype,
                sloc,
                value,
            },
        );
        self.frame_ins += 1;
    }

    pub fn push_frame_try(&mut self, sloc: Sloc) {
        self.insert_frame(FrameType::Try, sloc, self.value.clone());
    }

    pub fn push_frame_catch(&mut self, sloc: Sloc, value: Value) {
        self.insert_frame(FrameType::Catch, sloc, value);
    }

    pub fn push_frame_func(&mut self, sloc: Sloc, signature: &str) {
        self.insert_frame(FrameType::Func, sloc, Value::from(signature));
    }

    pub fn push_frame_defer(&mut self, sloc: Sloc, value: Value) {
        self.insert_frame(FrameType::Defer, sloc, value);
    }

    /// Absorb the frames of an error raised while this one was
    /// propagating, so the original propagation continues.
    pub fn absorb_nested(&mut self, nested: RuntimeError) {
        self.frames.extend(nested.frames);
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime error: ")?;
        match &self.value {
            Value::Str(s) => write!(f, "{}", s)?,
            other => write!(f, "{}", other)?,
        }

        write!(f, "\n[backtrace frames:")?;
        for (k, frame) in self.frames.iter().enumerate() {
            write!(
                f,
                "\n  {}) {} at '{}': ",
                k + 1,
                frame.ftype.describe(),
                frame.sloc
            )?;

            // Oversized values are truncated to a fixed prefix.
            let mut text = String::new();
            frame.value.print_nested(&mut text);
            if text.len() > 80 {
                let mut cut = 60;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                write!(f, "{} ... ({} characters omitted)", &text[..cut], text.len() - cut)?;
            } else {
                write!(f, "{}", text)?;
            }
        }
        write!(f, "\n  -- end of backtrace frames]")
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn sloc(line: i32) -> Sloc {
        Sloc::new(Rc::from("t"), line, 1)
    }

    #[test]
    fn test_throw_has_initial_frame() {
        let err = RuntimeError::new_throw(Value::from("oops"), sloc(3));
        assert_eq!(err.frames().len(), 1);
        assert_eq!(err.frames()[0].ftype, FrameType::Throw);
        assert_eq!(err.frames()[0].sloc.line, 3);
    }

    #[test]
    fn test_frames_accumulate_in_order() {
        let mut err = RuntimeError::new_throw(Value::from("x"), sloc(1));
        err.push_frame_try(sloc(2));
        err.push_frame_func(sloc(3), "f(a)");
        let kinds: Vec<_> = err.frames().iter().map(|f| f.ftype).collect();
        assert_eq!(kinds, vec![FrameType::Throw, FrameType::Try, FrameType::Func]);
    }

    #[test]
    fn test_message_truncates_long_values() {
        let long = "y".repeat(200);
        let err = RuntimeError::format(sloc(1), long);
        let text = err.to_string();
        assert!(text.contains("characters omitted"));
    }

    #[test]
    fn test_absorbed_frames_follow() {
        let mut outer = RuntimeError::new_throw(Value::from("outer"), sloc(1));
        let nested = RuntimeError::new_throw(Value::from("nested"), sloc(9));
        outer.absorb_nested(nested);
        assert_eq!(outer.frames().len(), 2);
        assert_eq!(outer.frames()[1].sloc.line, 9);
        assert_eq!(outer.value().to_string(), "outer");
    }
}
