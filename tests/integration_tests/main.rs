//! End-to-end flow: parse a report, import symbol archives, symbolicate
//! through the registry-backed delegate, and render the result. External
//! tools are replaced by a scripted runner that fabricates dwarfdump and
//! atos output.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crashsym::queue::TaskQueue;
use crashsym::registry::DsymRegistry;
use crashsym::subprocess::CommandRunner;
use crashsym::symbolicate::{backend_for_type, SymDelegate};
use crashsym::{parser, Crash, CrashType};
use debugid::DebugId;

const REPORT: &str = "\
Incident Identifier: 8E5D9D1F-2B3C-4F77-9E2B-6F1C2A3B4C5D
Hardware Model:      iPhone10,3
Process:             Demo [2024]

Thread 0 Crashed:
0   libsystem_kernel.dylib          0x00000001820e4014 0x1820c8000 + 114708
1   Demo                            0x00000001000f1030 0x1000e4000 + 53296
2   Demo                            0x00000001000f2a00 0x1000e4000 + 59904

Binary Images:
0x1000e4000 - 0x1000e7fff +Demo arm64 <8d4ca95249393794a57e9dbe4192b48d> /private/var/containers/Demo.app/Demo
0x1820c8000 - 0x1820e9fff libsystem_kernel.dylib arm64 <386bc06e14ca3e68a44bcbfdd4daf926> /usr/lib/system/libsystem_kernel.dylib
";

const DEMO_UUID: &str = "8D4CA952-4939-3794-A57E-9DBE4192B48D";
const KERNEL_UUID: &str = "386BC06E-14CA-3E68-A44B-CBFDD4DAF926";

/// Plays both external tools: `dwarfdump --uuid` answers with the UUID that
/// belongs to the archive path it is asked about, and `atos` answers with
/// one fabricated symbol per address, in input order.
struct FakeTools;

impl CommandRunner for FakeTools {
    fn run(&self, program: &Path, args: &[OsString]) -> Option<String> {
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        if program == Path::new(crashsym::subprocess::DWARFDUMP) {
            let uuid = match args[1].as_str() {
                "/dsyms/Demo.app.dSYM" => DEMO_UUID,
                "/dsyms/kernel.dSYM" => KERNEL_UUID,
                _ => return Some("no debug info\n".to_string()),
            };
            return Some(format!("UUID: {uuid} (arm64) {}\n", args[1]));
        }
        // xcrun atos -arch A -o DSYM -l LOAD addr...
        assert_eq!(program, Path::new(crashsym::subprocess::XCRUN));
        assert_eq!(args[0], "atos");
        assert_eq!(args[1], "-arch");
        assert_eq!(args[2], "arm64");
        let dsym = &args[4];
        let lines: Vec<String> = args[7..]
            .iter()
            .map(|addr| format!("resolved {addr} (in {dsym})"))
            .collect();
        Some(lines.join("\n"))
    }
}

struct Delegate {
    registry: Arc<DsymRegistry>,
    sender: crossbeam_channel::Sender<Crash>,
}

impl SymDelegate for Delegate {
    fn dsym_for_uuid(&self, debug_id: &DebugId) -> Option<PathBuf> {
        Some(self.registry.lookup(debug_id)?.path.clone())
    }

    fn did_finish(&self, crash: Crash) {
        self.sender.send(crash).unwrap();
    }
}

#[test]
fn parse_import_symbolicate_render() {
    let runner: Arc<dyn CommandRunner> = Arc::new(FakeTools);
    let queue = Arc::new(TaskQueue::default());
    let registry = Arc::new(DsymRegistry::new(runner.clone()));

    registry
        .import_archive(Path::new("/dsyms/Demo.app.dSYM"))
        .unwrap();
    registry
        .import_archive(Path::new("/dsyms/kernel.dSYM"))
        .unwrap();
    assert!(registry.import_archive(Path::new("/tmp/readme.txt")).is_err());

    let crash = parser::parse(REPORT).unwrap();
    assert_eq!(crash.crash_type, CrashType::Apple);

    let backend = backend_for_type(crash.crash_type, queue, runner).unwrap();
    let (sender, receiver) = crossbeam_channel::bounded(1);
    let delegate = Arc::new(Delegate { registry, sender });
    backend.symbolicate(crash, delegate);

    let finished = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(finished.resolved_frame_count(), 3);

    let frames = &finished.threads[0].frames;
    assert_eq!(
        frames[0].symbol.as_deref(),
        Some("resolved 0x1820e4014 (in /dsyms/kernel.dSYM)")
    );
    assert_eq!(
        frames[1].symbol.as_deref(),
        Some("resolved 0x1000f1030 (in /dsyms/Demo.app.dSYM)")
    );
    assert_eq!(
        frames[2].symbol.as_deref(),
        Some("resolved 0x1000f2a00 (in /dsyms/Demo.app.dSYM)")
    );

    // The rendered report carries the symbols on the frame lines and keeps
    // everything else untouched.
    let rendered = finished.symbolicated_content();
    assert!(rendered.contains("resolved 0x1000f1030"));
    assert!(rendered.contains("Incident Identifier: 8E5D9D1F-2B3C-4F77-9E2B-6F1C2A3B4C5D"));
    assert!(rendered.contains("Binary Images:"));
}

#[test]
fn report_with_partially_missing_archives_still_completes() {
    let runner: Arc<dyn CommandRunner> = Arc::new(FakeTools);
    let queue = Arc::new(TaskQueue::default());
    let registry = Arc::new(DsymRegistry::new(runner.clone()));

    // Only the app's archive is known; kernel frames must stay unresolved.
    registry
        .import_archive(Path::new("/dsyms/Demo.app.dSYM"))
        .unwrap();

    let crash = parser::parse(REPORT).unwrap();
    let backend = backend_for_type(crash.crash_type, queue, runner).unwrap();
    let (sender, receiver) = crossbeam_channel::bounded(1);
    let delegate = Arc::new(Delegate { registry, sender });
    backend.symbolicate(crash, delegate);

    let finished = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(finished.resolved_frame_count(), 2);
    assert!(finished.threads[0].frames[0].symbol.is_none());
}
