//! Symbolication backends.
//!
//! A backend takes a parsed [`Crash`], asks its delegate for the symbol
//! archive of each referenced binary image, resolves the frames' addresses
//! through an external tool, and hands the (possibly partially resolved)
//! crash back through exactly one `did_finish` call.
//!
//! Symbolication is best effort throughout: a missing archive, a tool that
//! cannot be launched, or a tool that prints nothing all degrade to "these
//! frames have no symbol", never to a hard error.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use debugid::DebugId;
use rustc_hash::FxHashMap;

use crate::crash::{Crash, CrashType};
use crate::queue::{CancellationToken, TaskQueue};
use crate::subprocess::{self, CommandRunner, DEFAULT_ARCH};

/// The callback surface a caller supplies to a symbolication run.
///
/// `did_finish` is invoked exactly once per [`Symbolicator::symbolicate`]
/// call, from the run's dedicated completion thread, unless the run was
/// cancelled. Callers that need the result on a particular context forward
/// it from there.
pub trait SymDelegate: Send + Sync {
    /// Returns the path of a symbol archive covering the given identity, or
    /// `None` if no archive is known. Frames of unmapped images stay
    /// unresolved.
    fn dsym_for_uuid(&self, debug_id: &DebugId) -> Option<PathBuf>;

    /// Receives the finished crash once every per-image unit has completed
    /// or been determined unresolvable.
    fn did_finish(&self, crash: Crash);
}

/// A running symbolication. Cancelling it skips any per-image units that
/// have not started, lets in-flight tool invocations run out without being
/// killed, and suppresses the `did_finish` callback (the result is
/// discarded).
pub struct SymbolicationHandle {
    token: CancellationToken,
}

impl SymbolicationHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// One symbolication strategy. A backend is selected per report via
/// [`backend_for_type`] and consumes the crash for the duration of the run.
pub trait Symbolicator {
    fn symbolicate(&self, crash: Crash, delegate: Arc<dyn SymDelegate>) -> SymbolicationHandle;
}

/// Selects the backend for a detected crash type.
///
/// | crash type | backend |
/// |------------|---------------------|
/// | `Apple`    | [`AtosSymbolicator`] |
/// | `Umeng`    | [`AtosSymbolicator`] |
///
/// The legacy [`FullReportSymbolicator`] is never selected by type; callers
/// that want it construct it explicitly with the tool's path.
pub fn backend_for_type(
    crash_type: CrashType,
    queue: Arc<TaskQueue>,
    runner: Arc<dyn CommandRunner>,
) -> Option<Box<dyn Symbolicator>> {
    match crash_type {
        CrashType::Apple | CrashType::Umeng => Some(Box::new(AtosSymbolicator::new(queue, runner))),
    }
}

/// Per-image work: all unresolved frame addresses referencing one image,
/// batched into a single resolver invocation. `slots[i]` is the
/// (thread, frame) position that supplied `addresses[i]`.
struct ImageBatch {
    dsym_path: PathBuf,
    arch: String,
    load_address: u64,
    addresses: Vec<u64>,
    slots: Vec<(usize, usize)>,
}

/// The primary backend: per-image batched address resolution through the
/// `atos` adapter, fanned out over the shared task queue.
pub struct AtosSymbolicator {
    queue: Arc<TaskQueue>,
    runner: Arc<dyn CommandRunner>,
}

impl AtosSymbolicator {
    pub fn new(queue: Arc<TaskQueue>, runner: Arc<dyn CommandRunner>) -> Self {
        AtosSymbolicator { queue, runner }
    }

    fn collect_batches(crash: &Crash, delegate: &dyn SymDelegate) -> Vec<ImageBatch> {
        // Group unresolved frames by image, preserving frame order within
        // each image so the resolver's output lines map back positionally.
        let mut per_image: FxHashMap<usize, (Vec<u64>, Vec<(usize, usize)>)> =
            FxHashMap::default();
        for (thread_index, thread) in crash.threads.iter().enumerate() {
            for (frame_index, frame) in thread.frames.iter().enumerate() {
                if frame.symbol.is_some() {
                    continue;
                }
                let Some(image_index) = frame.image else {
                    continue;
                };
                let entry = per_image.entry(image_index).or_default();
                entry.0.push(frame.address);
                entry.1.push((thread_index, frame_index));
            }
        }

        let mut batches = Vec::new();
        for (image_index, (addresses, slots)) in per_image {
            let image = &crash.images[image_index];
            let Some(debug_id) = image.debug_id else {
                log::info!("Image {} carries no UUID, skipping", image.name);
                continue;
            };
            let Some(dsym_path) = delegate.dsym_for_uuid(&debug_id) else {
                log::info!(
                    "No symbol archive for {} <{}>, {} frames stay unresolved",
                    image.name,
                    debug_id,
                    addresses.len()
                );
                continue;
            };
            batches.push(ImageBatch {
                dsym_path,
                arch: image
                    .arch
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ARCH.to_string()),
                load_address: image.load_address,
                addresses,
                slots,
            });
        }
        batches
    }
}

impl Symbolicator for AtosSymbolicator {
    fn symbolicate(&self, mut crash: Crash, delegate: Arc<dyn SymDelegate>) -> SymbolicationHandle {
        let token = CancellationToken::new();
        let batches = Self::collect_batches(&crash, &*delegate);
        log::debug!("Resolving {} image batches", batches.len());

        // Every unit sends at most one message and then drops its sender;
        // the completion thread runs until all senders are gone, which also
        // covers units that were cancelled or whose tool produced nothing.
        let (sender, receiver) =
            crossbeam_channel::unbounded::<(Vec<(usize, usize)>, Vec<String>)>();

        for batch in batches {
            let sender = sender.clone();
            let runner = self.runner.clone();
            let unit_token = token.clone();
            self.queue.submit_with_token(token.clone(), move || {
                // Checkpoint before the subprocess launch.
                if unit_token.is_cancelled() {
                    return;
                }
                let symbols = subprocess::resolve_addresses(
                    &*runner,
                    &batch.dsym_path,
                    &batch.arch,
                    batch.load_address,
                    &batch.addresses,
                );
                if let Some(symbols) = symbols {
                    if symbols.len() != batch.addresses.len() {
                        log::warn!(
                            "Resolver returned {} lines for {} addresses of {}",
                            symbols.len(),
                            batch.addresses.len(),
                            batch.dsym_path.display()
                        );
                    }
                    let _ = sender.send((batch.slots, symbols));
                }
            });
        }
        drop(sender);

        let completion_token = token.clone();
        std::thread::spawn(move || {
            while let Ok((slots, symbols)) = receiver.recv() {
                // The resolver returns one line per address in input order;
                // on a length mismatch the matched prefix is applied.
                for ((thread_index, frame_index), symbol) in slots.into_iter().zip(symbols) {
                    crash.threads[thread_index].frames[frame_index].symbol = Some(symbol);
                }
            }
            if completion_token.is_cancelled() {
                return;
            }
            log::debug!(
                "Symbolication done, {}/{} frames resolved",
                crash.resolved_frame_count(),
                crash.frame_count()
            );
            delegate.did_finish(crash);
        });

        SymbolicationHandle { token }
    }
}

/// The legacy backend: one shot of the external full-report symbolicator
/// (`symbolicatecrash`), whose rewritten report is re-parsed wholesale.
///
/// Only useful for the Apple format, and only when the tool is available;
/// it is never selected automatically.
pub struct FullReportSymbolicator {
    tool_path: PathBuf,
    queue: Arc<TaskQueue>,
    runner: Arc<dyn CommandRunner>,
}

impl FullReportSymbolicator {
    pub fn new(tool_path: PathBuf, queue: Arc<TaskQueue>, runner: Arc<dyn CommandRunner>) -> Self {
        FullReportSymbolicator {
            tool_path,
            queue,
            runner,
        }
    }
}

impl Symbolicator for FullReportSymbolicator {
    fn symbolicate(&self, crash: Crash, delegate: Arc<dyn SymDelegate>) -> SymbolicationHandle {
        let token = CancellationToken::new();
        let (sender, receiver) = crossbeam_channel::bounded::<Crash>(1);

        let content = crash.content.clone();
        let tool_path = self.tool_path.clone();
        let runner = self.runner.clone();
        let unit_token = token.clone();
        self.queue.submit_with_token(token.clone(), move || {
            if unit_token.is_cancelled() {
                return;
            }
            let mut report_file = match tempfile::NamedTempFile::new() {
                Ok(file) => file,
                Err(err) => {
                    log::warn!("Could not write report to a temp file: {err}");
                    return;
                }
            };
            if report_file.write_all(content.as_bytes()).is_err() {
                return;
            }
            let rewritten =
                subprocess::symbolicate_report(&*runner, &tool_path, report_file.path());
            if let Some(new_crash) = rewritten.as_deref().and_then(crate::parser::parse) {
                let _ = sender.send(new_crash);
            }
        });

        let completion_token = token.clone();
        std::thread::spawn(move || {
            // Fall back to the unmodified crash when the tool failed or its
            // output did not re-parse.
            let finished = receiver.recv().unwrap_or(crash);
            if completion_token.is_cancelled() {
                return;
            }
            delegate.did_finish(finished);
        });

        SymbolicationHandle { token }
    }
}
