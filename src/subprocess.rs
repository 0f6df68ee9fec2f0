//! Launching external tools and narrowly parsing their output.
//!
//! Every adapter in this module fixes one command template and turns the
//! tool's captured stdout into the small slice of it the engine needs. The
//! contract with the tools is textual: UTF-8 stdout, newline-delimited, and
//! "did output appear" is the only success signal. A tool that cannot be
//! launched yields `None` and the affected frames simply stay unresolved.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use debugid::DebugId;

use crate::crash::debug_id_from_str;

/// The `xcrun` trampoline used to invoke `atos`.
pub const XCRUN: &str = "/usr/bin/xcrun";
/// The `dwarfdump` executable used to extract UUIDs from symbol archives.
pub const DWARFDUMP: &str = "/usr/bin/dwarfdump";

/// The line marker `dwarfdump --uuid` prints in front of each identity.
const UUID_MARKER: &str = "UUID: ";

/// The architecture passed to the address resolver when the report does not
/// state one.
pub const DEFAULT_ARCH: &str = "x86_64";

/// Launches an executable and captures its stdout.
///
/// This is the crate's one subprocess seam; tests substitute a scripted
/// implementation for [`SystemCommandRunner`].
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`, blocking until it exits. Returns the
    /// captured stdout, or `None` if the program could not be launched.
    fn run(&self, program: &Path, args: &[OsString]) -> Option<String>;
}

/// Runs commands with `std::process::Command`. `output()` waits for the
/// child and closes its pipes on every path, so neither the process nor its
/// pipe outlives the call.
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &Path, args: &[OsString]) -> Option<String> {
        let output = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
        {
            Ok(output) => output,
            Err(err) => {
                log::warn!("Could not launch {}: {err}", program.display());
                return None;
            }
        };
        if !output.status.success() {
            log::debug!(
                "{} exited with {}; using whatever output appeared",
                program.display(),
                output.status
            );
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Resolves `addresses` inside the binary at `dsym_path`, loaded at
/// `load_address`, via `xcrun atos`.
///
/// Returns one resolved-symbol line per input address, in input order, with
/// blank lines filtered out. `None` means the tool could not be launched.
pub fn resolve_addresses(
    runner: &dyn CommandRunner,
    dsym_path: &Path,
    arch: &str,
    load_address: u64,
    addresses: &[u64],
) -> Option<Vec<String>> {
    let mut args: Vec<OsString> = vec![
        "atos".into(),
        "-arch".into(),
        arch.into(),
        "-o".into(),
        dsym_path.into(),
        "-l".into(),
        format!("{load_address:#x}").into(),
    ];
    args.extend(addresses.iter().map(|a| OsString::from(format!("{a:#x}"))));

    let output = runner.run(Path::new(XCRUN), &args)?;
    Some(
        output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect(),
    )
}

/// Extracts the binary identities a symbol archive covers, via
/// `dwarfdump --uuid`. An archive can cover several slices, one UUID each.
///
/// Returns `None` if the tool could not be launched; an empty Vec if it ran
/// but printed no UUID lines (i.e. the path is not a symbol archive).
pub fn archive_uuids(runner: &dyn CommandRunner, archive_path: &Path) -> Option<Vec<DebugId>> {
    let args: Vec<OsString> = vec!["--uuid".into(), archive_path.into()];
    let output = runner.run(Path::new(DWARFDUMP), &args)?;
    Some(
        output
            .lines()
            .filter_map(|line| line.strip_prefix(UUID_MARKER))
            .filter_map(|rest| rest.split_whitespace().next())
            .filter_map(debug_id_from_str)
            .collect(),
    )
}

/// Runs the legacy single-shot `symbolicatecrash` tool on a whole report
/// file and returns its rewritten report text for re-parsing.
pub fn symbolicate_report(
    runner: &dyn CommandRunner,
    tool_path: &Path,
    report_path: &Path,
) -> Option<String> {
    let args: Vec<OsString> = vec![report_path.into()];
    runner.run(tool_path, &args)
}
