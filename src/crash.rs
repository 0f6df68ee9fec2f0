use debugid::DebugId;
use uuid::Uuid;

/// The vendor format of a crash report, determined once per report from its
/// text before structural parsing. It selects the symbolication backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashType {
    /// The native Apple crash report format, with an `Incident Identifier:`
    /// header and a `Binary Images:` section.
    Apple,
    /// The Umeng aggregator dump format: a single backtrace preceded by
    /// `dSYM UUID:` / `Slide Address:` / `Binary Image:` header fields.
    Umeng,
}

/// One loaded module in the crashed process.
#[derive(Debug, Clone)]
pub struct BinaryImage {
    /// The module name as written in the report, e.g. `MyApp` or
    /// `libsystem_kernel.dylib`.
    pub name: String,
    /// The binary identity, if the report declared one. Frames of images
    /// without an identity cannot be symbolicated.
    pub debug_id: Option<DebugId>,
    /// The address the image was loaded at.
    pub load_address: u64,
    /// The end of the image's address range, if the report declared one.
    pub end_address: Option<u64>,
    /// The CPU architecture of the image slice, e.g. `arm64`.
    pub arch: Option<String>,
    /// The on-device path of the image, if the report declared one.
    pub path: Option<String>,
}

impl BinaryImage {
    /// Whether `address` falls into this image's declared address range.
    pub fn covers(&self, address: u64) -> bool {
        match self.end_address {
            Some(end) => address >= self.load_address && address <= end,
            None => false,
        }
    }
}

/// One stack entry: a return address plus a reference to the binary image it
/// falls within.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The frame's position in its thread's backtrace, as written in the
    /// report.
    pub index: u32,
    /// The module name written on the frame line.
    pub module: String,
    /// The return address.
    pub address: u64,
    /// Index into [`Crash::images`], or `None` if the frame line referenced
    /// no declared image. Such frames stay unresolved.
    pub image: Option<usize>,
    /// The line number of this frame in the original report text.
    pub line: usize,
    /// The resolved symbol string, absent until symbolication fills it in.
    pub symbol: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Thread {
    pub index: Option<u32>,
    pub name: Option<String>,
    pub crashed: bool,
    pub frames: Vec<Frame>,
}

/// A parsed crash report.
///
/// Created by [`crate::parser::parse`], mutated in place by a symbolicator
/// (which fills in the frames' `symbol` fields), and read-only thereafter.
#[derive(Debug, Clone)]
pub struct Crash {
    pub crash_type: CrashType,
    /// The raw report text the crash was parsed from.
    pub content: String,
    pub images: Vec<BinaryImage>,
    pub threads: Vec<Thread>,
}

impl Crash {
    /// Returns the index of the image that best matches a frame line: first
    /// by module name, then by load-address range.
    pub fn image_for_frame(&self, module: &str, address: u64) -> Option<usize> {
        if let Some(i) = self.images.iter().position(|image| image.name == module) {
            return Some(i);
        }
        self.images.iter().position(|image| image.covers(address))
    }

    pub fn frame_count(&self) -> usize {
        self.threads.iter().map(|t| t.frames.len()).sum()
    }

    pub fn resolved_frame_count(&self) -> usize {
        self.threads
            .iter()
            .flat_map(|t| &t.frames)
            .filter(|f| f.symbol.is_some())
            .count()
    }

    /// Re-emits the report text with every resolved frame line rewritten to
    /// carry its symbol. Unresolved frames and all non-frame lines are
    /// returned unchanged.
    pub fn symbolicated_content(&self) -> String {
        let mut lines: Vec<String> = self.content.lines().map(str::to_owned).collect();
        for thread in &self.threads {
            for frame in &thread.frames {
                let Some(symbol) = &frame.symbol else {
                    continue;
                };
                if let Some(line) = lines.get_mut(frame.line) {
                    *line = format!(
                        "{:<3} {:<30} {:#018x} {}",
                        frame.index, frame.module, frame.address, symbol
                    );
                }
            }
        }
        let mut out = lines.join("\n");
        if self.content.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// Parses a UUID string (dashed or plain hex, any case) into a `DebugId`.
pub fn debug_id_from_str(s: &str) -> Option<DebugId> {
    let uuid = Uuid::parse_str(s.trim()).ok()?;
    Some(DebugId::from_uuid(uuid))
}
