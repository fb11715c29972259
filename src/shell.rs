//! External tool invocation.
//!
//! Every computational step in this pipeline is delegated to an external
//! neuroimaging tool. Commands are echoed, run to completion, and their exit
//! status is reported but not inspected further: a failed invocation leaves
//! its output file absent, which the existence gates discover on the next
//! run.

use std::error::Error;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;

pub type Res<T> = Result<T, Box<dyn Error>>;

/// Run an external tool to completion, inheriting stdio.
pub fn run<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Res<()> {
    echo(program, args);
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| format!("could not launch `{program}`: {e}"))?;
    if !status.success() {
        eprintln!("`{program}` exited with {status}");
    }
    Ok(())
}

/// Run an external tool and capture its stdout as a string.
pub fn capture<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Res<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| format!("could not launch `{program}`: {e}"))?;
    if !output.status.success() {
        eprintln!("`{program}` exited with {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Path -> argument string, for assembling command lines
pub fn s(path: &Path) -> String {
    path.display().to_string()
}

/// All paths matching a glob pattern. Patterns are built from trusted path
/// templates; a malformed one is a programming error.
pub fn glob_paths(pattern: &str) -> Vec<std::path::PathBuf> {
    glob::glob(pattern)
        .unwrap_or_else(|e| panic!("bad glob pattern {pattern}: {e}"))
        .filter_map(Result::ok)
        .collect()
}

fn echo<S: AsRef<OsStr>>(program: &str, args: &[S]) {
    let line = args.iter()
        .map(|a| a.as_ref().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    println!("+ {program} {line}");
}

/// Run `work` only if `output` does not exist yet, or `overwrite` is set.
///
/// This is the pipeline's sole idempotence mechanism: a file at its expected
/// path means the step is done. Not safe under concurrent invocation of the
/// same pipeline.
pub fn unless_exists<P, F>(output: P, overwrite: bool, work: F) -> Res<()>
where
    P: AsRef<Path>,
    F: FnOnce() -> Res<()>,
{
    if output.as_ref().exists() && !overwrite {
        return Ok(());
    }
    work()
}

/// Symlink `target` at `link` unless something is already there.
pub fn link_if_absent(target: &Path, link: &Path) -> Res<()> {
    // symlink_metadata: a dangling link still counts as present
    if link.symlink_metadata().is_ok() {
        return Ok(());
    }
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    // Second invocation with identical inputs must not alter the timestamp
    // or content of an already-produced output file.
    #[test]
    fn unless_exists_is_a_noop_on_second_run() -> Res<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("done.txt");

        unless_exists(&out, false, || { std::fs::write(&out, "first")?; Ok(()) })?;
        let mtime = out.metadata()?.modified()?;

        unless_exists(&out, false, || { std::fs::write(&out, "second")?; Ok(()) })?;
        assert_eq!(std::fs::read_to_string(&out)?, "first");
        assert_eq!(out.metadata()?.modified()?, mtime);

        // The overwrite flag bypasses the gate for this step only
        unless_exists(&out, true, || { std::fs::write(&out, "third")?; Ok(()) })?;
        assert_eq!(std::fs::read_to_string(&out)?, "third");
        Ok(())
    }

    #[test]
    fn link_if_absent_tolerates_existing_links() -> Res<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("target");
        std::fs::write(&target, "data")?;
        let link = dir.path().join("link");
        link_if_absent(&target, &link)?;
        link_if_absent(&target, &link)?; // no error the second time
        assert_eq!(std::fs::read_to_string(&link)?, "data");
        Ok(())
    }
}
