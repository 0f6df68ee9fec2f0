use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use debugid::DebugId;

use crashsym::queue::TaskQueue;
use crashsym::registry::DsymRegistry;
use crashsym::subprocess::{CommandRunner, SystemCommandRunner};
use crashsym::symbolicate::{
    backend_for_type, FullReportSymbolicator, SymDelegate, Symbolicator,
};
use crashsym::{parser, Crash, Error};

#[derive(Debug, Parser)]
#[command(
    name = "crashsym",
    version,
    about = r#"
crashsym parses crash reports and symbolicates them with your dSYMs.

EXAMPLES:
    # Symbolicate a report, pulling symbols from one or more archives:
    crashsym symbolicate crash.ips --dsym MyApp.app.dSYM

    # Just tell me what format this is:
    crashsym detect crash.txt

    # List the binary identities a symbol archive covers:
    crashsym uuids MyApp.app.dSYM
"#
)]
struct Opt {
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Parse a crash report, resolve its frames, and print the result.
    Symbolicate(SymbolicateArgs),

    /// Detect the vendor format of a crash report.
    Detect(DetectArgs),

    /// Print the UUIDs found in a symbol archive.
    Uuids(UuidsArgs),
}

#[derive(Debug, Args)]
struct SymbolicateArgs {
    /// Path to the crash report file.
    file: PathBuf,

    /// Symbol archive(s) to import before symbolicating. Can be given
    /// multiple times.
    #[arg(long = "dsym")]
    dsyms: Vec<PathBuf>,

    /// Use the legacy full-report symbolicatecrash tool at this path instead
    /// of per-address resolution.
    #[arg(long)]
    symbolicatecrash: Option<PathBuf>,

    /// Write the symbolicated report here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DetectArgs {
    /// Path to the crash report file.
    file: PathBuf,
}

#[derive(Debug, Args)]
struct UuidsArgs {
    /// Path to the symbol archive.
    archive: PathBuf,
}

fn main() {
    env_logger::init();

    let opt = Opt::parse();
    match opt.action {
        Action::Symbolicate(args) => run_symbolicate(args),
        Action::Detect(args) => run_detect(args),
        Action::Uuids(args) => run_uuids(args),
    }
}

fn read_report(path: &PathBuf) -> String {
    match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            let err = Error::CouldNotReadReportFile(path.clone(), err);
            eprintln!("Error: {err}");
            std::process::exit(1)
        }
    }
}

fn run_detect(args: DetectArgs) {
    let content = read_report(&args.file);
    match parser::detect_crash_type(&content) {
        Some(crash_type) => println!("{crash_type:?}"),
        None => {
            eprintln!("Error: Cannot read this report; it is not in any recognized format.");
            std::process::exit(1)
        }
    }
}

fn run_uuids(args: UuidsArgs) {
    let runner = SystemCommandRunner;
    match crashsym::subprocess::archive_uuids(&runner, &args.archive) {
        Some(uuids) if !uuids.is_empty() => {
            for uuid in uuids {
                println!("{uuid}");
            }
        }
        _ => {
            eprintln!(
                "Error: {} is not a valid symbol archive.",
                args.archive.display()
            );
            std::process::exit(1)
        }
    }
}

/// Forwards the engine's callbacks back to the main thread: archive lookups
/// go to the registry, the completion signal goes over a channel.
struct CliDelegate {
    registry: Arc<DsymRegistry>,
    sender: crossbeam_channel::Sender<Crash>,
}

impl SymDelegate for CliDelegate {
    fn dsym_for_uuid(&self, debug_id: &DebugId) -> Option<PathBuf> {
        self.registry
            .lookup(debug_id)
            .map(|archive| archive.path.clone())
    }

    fn did_finish(&self, crash: Crash) {
        let _ = self.sender.send(crash);
    }
}

fn run_symbolicate(args: SymbolicateArgs) {
    let content = read_report(&args.file);
    let crash = match parser::try_parse(&content) {
        Ok(crash) => crash,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1)
        }
    };
    let crash_type = crash.crash_type;
    log::info!(
        "Parsed a {crash_type:?} report with {} images and {} frames",
        crash.images.len(),
        crash.frame_count()
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let queue = Arc::new(TaskQueue::default());
    let registry = Arc::new(DsymRegistry::new(runner.clone()));

    for dsym in &args.dsyms {
        if let Err(err) = registry.import_archive(dsym) {
            eprintln!("Warning: {err}");
        }
    }

    let backend: Box<dyn Symbolicator> = match &args.symbolicatecrash {
        Some(tool_path) => Box::new(FullReportSymbolicator::new(
            tool_path.clone(),
            queue.clone(),
            runner.clone(),
        )),
        None => match backend_for_type(crash_type, queue.clone(), runner.clone()) {
            Some(backend) => backend,
            None => {
                eprintln!("Error: No symbolication backend for {crash_type:?} reports.");
                std::process::exit(1)
            }
        },
    };

    let (sender, receiver) = crossbeam_channel::bounded(1);
    let delegate = Arc::new(CliDelegate { registry, sender });
    backend.symbolicate(crash, delegate);

    // The Atos backend always completes; the timeout only guards against a
    // wedged external tool.
    let finished = match receiver.recv_timeout(Duration::from_secs(300)) {
        Ok(finished) => finished,
        Err(_) => {
            eprintln!("Error: Symbolication did not complete.");
            std::process::exit(1)
        }
    };
    log::info!(
        "Resolved {}/{} frames",
        finished.resolved_frame_count(),
        finished.frame_count()
    );

    let report = finished.symbolicated_content();
    match &args.output {
        Some(path) => {
            if let Err(err) = fs::write(path, report) {
                eprintln!("Error: Could not write {}: {err}", path.display());
                std::process::exit(1)
            }
        }
        None => print!("{report}"),
    }
}
