//! Argument and environment marshaling.
//!
//! POSIX children receive NULL-terminated arrays of C strings that are built
//! in the parent before `fork`, so the child never allocates. Windows
//! children receive one quoted command line and a NUL-delimited,
//! double-NUL-terminated UTF-16 environment block.

use crate::error::{ProcessError, Result};
use crate::options::EnvEntry;
use std::ffi::{OsStr, OsString};

#[cfg(unix)]
pub(crate) use self::unix::*;
#[cfg(windows)]
pub(crate) use self::windows::*;

#[cfg(unix)]
mod unix {
    use super::*;
    use nix::libc::c_char;
    use std::ffi::{CStr, CString};
    use std::os::unix::ffi::OsStrExt;
    use std::ptr;

    /// Owned C strings plus the NULL-terminated pointer array that
    /// `execvp`/`execve` expect.
    pub(crate) struct CStringArray {
        // owns the strings `ptrs` points into
        #[allow(dead_code)]
        items: Vec<CString>,
        ptrs: Vec<*const c_char>,
    }

    impl CStringArray {
        fn new(items: Vec<CString>) -> Self {
            // CString contents live on the heap, so the pointers stay valid
            // when `items` moves.
            let mut ptrs: Vec<*const c_char> = items.iter().map(|s| s.as_ptr()).collect();
            ptrs.push(ptr::null());
            Self { items, ptrs }
        }

        pub(crate) fn as_ptr(&self) -> *const *const c_char {
            self.ptrs.as_ptr()
        }

        #[cfg(test)]
        pub(crate) fn len(&self) -> usize {
            self.items.len()
        }

        #[cfg(test)]
        pub(crate) fn get(&self, index: usize) -> Option<&CStr> {
            self.items.get(index).map(CString::as_c_str)
        }
    }

    pub(crate) fn to_cstring(s: &OsStr) -> Result<CString> {
        CString::new(s.as_bytes()).map_err(|_| {
            ProcessError::invalid_argument(format!(
                "interior NUL byte in {:?}",
                s.to_string_lossy()
            ))
        })
    }

    /// `argv` for the child: the program path followed by the arguments.
    pub(crate) fn argv(program: &OsStr, args: &[OsString]) -> Result<CStringArray> {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(to_cstring(program)?);
        for arg in args {
            items.push(to_cstring(arg)?);
        }
        Ok(CStringArray::new(items))
    }

    /// `envp` for the child: one `KEY=VALUE` string per entry.
    pub(crate) fn envp(env: &[EnvEntry]) -> Result<CStringArray> {
        let mut items = Vec::with_capacity(env.len());
        for entry in env {
            let key = entry.key.as_bytes();
            if key.is_empty() || key.contains(&b'=') {
                return Err(ProcessError::invalid_argument(format!(
                    "invalid environment key {:?}",
                    entry.key.to_string_lossy()
                )));
            }
            let mut pair = OsString::with_capacity(key.len() + entry.value.len() + 1);
            pair.push(&entry.key);
            pair.push("=");
            pair.push(&entry.value);
            items.push(to_cstring(&pair)?);
        }
        Ok(CStringArray::new(items))
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use std::os::windows::ffi::OsStrExt;

    /// NUL-terminated UTF-16 copy of `s`.
    pub(crate) fn to_wide(s: &OsStr) -> Result<Vec<u16>> {
        let mut wide: Vec<u16> = s.encode_wide().collect();
        if wide.contains(&0) {
            return Err(ProcessError::invalid_argument(format!(
                "interior NUL in {:?}",
                s.to_string_lossy()
            )));
        }
        wide.push(0);
        Ok(wide)
    }

    /// NUL-terminated command line for `CreateProcessW`.
    pub(crate) fn command_line(program: &OsStr, args: &[OsString]) -> Result<Vec<u16>> {
        let mut cmd = Vec::new();
        let program: Vec<u16> = program.encode_wide().collect();
        append_arg(&mut cmd, &program, true)?;
        for arg in args {
            cmd.push(b' ' as u16);
            let arg: Vec<u16> = arg.encode_wide().collect();
            append_arg(&mut cmd, &arg, false)?;
        }
        cmd.push(0);
        Ok(cmd)
    }

    pub(crate) fn env_block(env: &[EnvEntry]) -> Result<Vec<u16>> {
        let pairs: Vec<(Vec<u16>, Vec<u16>)> = env
            .iter()
            .map(|e| (e.key.encode_wide().collect(), e.value.encode_wide().collect()))
            .collect();
        make_env_block(&pairs)
    }
}

#[cfg(any(windows, test))]
const QUOTE: u16 = b'"' as u16;
#[cfg(any(windows, test))]
const BACKSLASH: u16 = b'\\' as u16;

/// Append one argument to a Windows command line using the C runtime's
/// parsing rules. The program name is always quoted and may not contain a
/// quote itself.
#[cfg(any(windows, test))]
pub(crate) fn append_arg(cmd: &mut Vec<u16>, arg: &[u16], is_program: bool) -> Result<()> {
    if arg.contains(&0) {
        return Err(ProcessError::invalid_argument("interior NUL in argument"));
    }
    if is_program && arg.contains(&QUOTE) {
        return Err(ProcessError::invalid_argument(
            "program name may not contain a quote",
        ));
    }

    let quote = is_program
        || arg.is_empty()
        || arg.iter().any(|&c| c == b' ' as u16 || c == b'\t' as u16);
    if quote {
        cmd.push(QUOTE);
    }

    let mut backslashes = 0usize;
    for &c in arg {
        if c == BACKSLASH {
            backslashes += 1;
        } else {
            if c == QUOTE {
                // n backslashes before a quote become 2n+1
                cmd.extend(std::iter::repeat(BACKSLASH).take(backslashes + 1));
            }
            backslashes = 0;
        }
        cmd.push(c);
    }

    if quote {
        // trailing backslashes must not escape the closing quote
        cmd.extend(std::iter::repeat(BACKSLASH).take(backslashes));
        cmd.push(QUOTE);
    }
    Ok(())
}

/// Build a `KEY=VALUE\0...\0` environment block.
#[cfg(any(windows, test))]
pub(crate) fn make_env_block(pairs: &[(Vec<u16>, Vec<u16>)]) -> Result<Vec<u16>> {
    let mut block = Vec::new();
    for (key, value) in pairs {
        // a leading '=' is legal (drive-letter variables like "=C:")
        let bad_key = key.is_empty()
            || key.contains(&0)
            || key.iter().skip(1).any(|&c| c == b'=' as u16);
        if bad_key || value.contains(&0) {
            return Err(ProcessError::invalid_argument(format!(
                "invalid environment entry {:?}",
                String::from_utf16_lossy(key)
            )));
        }
        block.extend_from_slice(key);
        block.push(b'=' as u16);
        block.extend_from_slice(value);
        block.push(0);
    }
    if block.is_empty() {
        block.push(0);
    }
    block.push(0);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    fn quoted(program: &str, args: &[&str]) -> String {
        let mut cmd = Vec::new();
        append_arg(&mut cmd, &wide(program), true).unwrap();
        for arg in args {
            cmd.push(b' ' as u16);
            append_arg(&mut cmd, &wide(arg), false).unwrap();
        }
        String::from_utf16(&cmd).unwrap()
    }

    #[test]
    fn test_command_line_quoting() {
        assert_eq!(quoted("cmd.exe", &["/c", "echo"]), r#""cmd.exe" /c echo"#);
        assert_eq!(
            quoted(r"C:\Program Files\app.exe", &["a b", ""]),
            r#""C:\Program Files\app.exe" "a b" """#
        );
        assert_eq!(quoted("x", &[r#"say "hi""#]), r#""x" "say \"hi\"""#);
        assert_eq!(quoted("x", &[r"dir\"]), r#""x" dir\"#);
        assert_eq!(quoted("x", &[r"with space\"]), r#""x" "with space\\""#);
        assert_eq!(quoted("x", &[r#"a\"b"#]), r#""x" a\\\"b"#);
    }

    #[test]
    fn test_program_with_quote_rejected() {
        let mut cmd = Vec::new();
        let err = append_arg(&mut cmd, &wide("bad\"name"), true).unwrap_err();
        assert!(matches!(err, ProcessError::InvalidArgument { .. }));
    }

    #[test]
    fn test_env_block() {
        let block = make_env_block(&[(wide("A"), wide("1")), (wide("PATH"), wide("C:\\bin"))])
            .unwrap();
        assert_eq!(String::from_utf16(&block).unwrap(), "A=1\0PATH=C:\\bin\0\0");

        let empty = make_env_block(&[]).unwrap();
        assert_eq!(empty, vec![0, 0]);

        let drive = make_env_block(&[(wide("=C:"), wide("C:\\"))]).unwrap();
        assert_eq!(String::from_utf16(&drive).unwrap(), "=C:=C:\\\0\0");

        assert!(make_env_block(&[(wide("A=B"), wide("1"))]).is_err());
        assert!(make_env_block(&[(wide(""), wide("1"))]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_argv_layout() {
        let args = vec![OsString::from("-c"), OsString::from("echo hi")];
        let argv = argv(OsStr::new("/bin/sh"), &args).unwrap();
        assert_eq!(argv.len(), 3);
        assert_eq!(argv.get(0).unwrap().to_bytes(), b"/bin/sh");
        assert_eq!(argv.get(2).unwrap().to_bytes(), b"echo hi");
        // NULL terminator
        let last = unsafe { *argv.as_ptr().add(3) };
        assert!(last.is_null());
    }

    #[cfg(unix)]
    #[test]
    fn test_envp_layout() {
        let env = vec![EnvEntry::new("A", "1"), EnvEntry::new("B", "x=y")];
        let envp = envp(&env).unwrap();
        assert_eq!(envp.len(), 2);
        assert_eq!(envp.get(0).unwrap().to_bytes(), b"A=1");
        assert_eq!(envp.get(1).unwrap().to_bytes(), b"B=x=y");

        let bad = vec![EnvEntry::new("A=B", "1")];
        assert!(super::envp(&bad).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_interior_nul_rejected() {
        let args = vec![OsString::from("a\0b")];
        let err = argv(OsStr::new("prog"), &args).err().unwrap();
        assert!(matches!(err, ProcessError::InvalidArgument { .. }));
    }
}
