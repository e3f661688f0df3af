use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use crate::runtime::error::RuntimeError;
use crate::sloc::Sloc;

/// Opens source files for `import`. A path whose previous handle is
/// still live cannot be reopened, which rejects circular imports.
#[derive(Default)]
pub struct ModuleLoader {
    in_flight: Rc<RefCell<HashSet<PathBuf>>>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a normalized absolute path exclusively and read its
    /// contents. The returned stream holds the exclusive claim until it
    /// is dropped.
    pub fn open(&self, path: &Path, sloc: &Sloc) -> Result<UniqueStream, RuntimeError> {
        let canonical = fs::canonicalize(path).map_err(|err| {
            RuntimeError::format(
                sloc.clone(),
                format!("could not open script file '{}': {}", path.display(), err),
            )
        })?;

        if !self.in_flight.borrow_mut().insert(canonical.clone()) {
            return Err(RuntimeError::format(
                sloc.clone(),
                format!(
                    "recursive import of '{}' detected",
                    canonical.display()
                ),
            ));
        }

        let contents = match fs::read_to_string(&canonical) {
            Ok(contents) => contents,
            Err(err) => {
                self.in_flight.borrow_mut().remove(&canonical);
                return Err(RuntimeError::format(
                    sloc.clone(),
                    format!(
                        "could not read script file '{}': {}",
                        canonical.display(),
                        err
                    ),
                ));
            }
        };

        debug!("opened module '{}' ({} bytes)", canonical.display(), contents.len());
        Ok(UniqueStream {
            in_flight: self.in_flight.clone(),
            path: canonical,
            contents,
        })
    }
}

/// An exclusive handle on an opened module.
#[derive(Debug)]
pub struct UniqueStream {
    in_flight: Rc<RefCell<HashSet<PathBuf>>>,
    path: PathBuf,
    contents: String,
}

impl UniqueStream {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }
}

impl Drop for UniqueStream {
    fn drop(&mut self) {
        self.in_flight.borrow_mut().remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_and_release() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "var a = 1;").expect("write");

        let loader = ModuleLoader::new();
        let sloc = Sloc::dummy();
        let stream = loader.open(file.path(), &sloc).expect("first open");
        assert!(stream.contents().contains("var a"));

        // A second open of the same path must be refused while the
        // first handle lives.
        assert!(loader.open(file.path(), &sloc).is_err());

        drop(stream);
        assert!(loader.open(file.path(), &sloc).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let loader = ModuleLoader::new();
        let err = loader
            .open(Path::new("/nonexistent/really-not-here.ast"), &Sloc::dummy())
            .unwrap_err();
        assert!(err.to_string().contains("could not open"));
    }
}
