//! Process replacement through execve

use crate::error::ExecError;
use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Replaces the running process with another program
#[derive(Debug, Clone)]
pub struct ProcessExecDriver {
    search_path: Option<OsString>,
}

impl Default for ProcessExecDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessExecDriver {
    /// Driver that searches the `PATH` of this process
    pub fn new() -> Self {
        Self {
            search_path: std::env::var_os("PATH"),
        }
    }

    /// Driver that searches `path` instead of `PATH`
    pub fn with_search_path(path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(path.into()),
        }
    }

    /// Locate `program` the way a shell would
    ///
    /// Names containing a slash are taken as paths; anything else is looked
    /// up in every directory of the search path, first match wins.
    pub fn resolve(&self, program: &str) -> Result<PathBuf, ExecError> {
        if program.is_empty() {
            return Err(ExecError::NotFound(program.to_string()));
        }

        if program.contains('/') {
            let path = PathBuf::from(program);
            return if is_executable(&path) {
                Ok(path)
            } else {
                Err(ExecError::NotFound(program.to_string()))
            };
        }

        self.search_path
            .as_deref()
            .into_iter()
            .flat_map(std::env::split_paths)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
            .ok_or_else(|| ExecError::NotFound(program.to_string()))
    }

    /// Execute `program` with `args` in place of this process
    ///
    /// Only returns on failure. The child sees the full environment and
    /// `argv[0]` set to `program`.
    pub fn replace(&self, program: &str, args: &[String]) -> ExecError {
        match self.prepare(program, args) {
            Ok((path, argv, envp)) => {
                tracing::debug!("Executing {} {}", path.display(), args.join(" "));
                execve(&path, &argv, &envp)
                    .err()
                    .unwrap_or_else(|| ExecError::Replace {
                        program: program.to_string(),
                        source: std::io::Error::other("execve returned"),
                    })
            }
            Err(e) => e,
        }
    }

    /// Resolve the program and build argv and envp
    fn prepare(&self, program: &str, args: &[String]) -> Result<(PathBuf, Vec<CString>, Vec<CString>), ExecError> {
        let path = self.resolve(program)?;

        let invalid = |what: &str| ExecError::InvalidArgument {
            program: program.to_string(),
            message: format!("{} contains a NUL byte", what),
        };

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(CString::new(program).map_err(|_| invalid("program name"))?);
        for arg in args {
            argv.push(CString::new(arg.as_bytes()).map_err(|_| invalid("argument"))?);
        }

        let envp = std::env::vars_os()
            .map(|(key, value)| env_entry(&key, &value))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("environment"))?;

        Ok((path, argv, envp))
    }
}

fn env_entry(key: &OsStr, value: &OsStr) -> Result<CString, std::ffi::NulError> {
    let mut entry = Vec::with_capacity(key.len() + value.len() + 1);
    entry.extend_from_slice(key.as_bytes());
    entry.push(b'=');
    entry.extend_from_slice(value.as_bytes());
    CString::new(entry)
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn execve(path: &Path, argv: &[CString], envp: &[CString]) -> Result<(), ExecError> {
    let replace_err = |source| ExecError::Replace {
        program: path.display().to_string(),
        source,
    };

    let path_cstr = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| replace_err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid path")))?;

    let mut argv_ptr: Vec<*const libc::c_char> = argv.iter().map(|s| s.as_ptr()).collect();
    argv_ptr.push(std::ptr::null());

    let mut envp_ptr: Vec<*const libc::c_char> = envp.iter().map(|s| s.as_ptr()).collect();
    envp_ptr.push(std::ptr::null());

    let result = unsafe { libc::execve(path_cstr.as_ptr(), argv_ptr.as_ptr(), envp_ptr.as_ptr()) };

    // execve only returns on error
    if result < 0 {
        Err(replace_err(std::io::Error::last_os_error()))
    } else {
        Ok(())
    }
}
