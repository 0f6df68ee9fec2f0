//! Format detection and structural parsing of raw crash report text.
//!
//! Parsing is deliberately line-oriented and lenient: a frame line that
//! cannot be parsed is dropped, an image declaration with a bad UUID keeps
//! the image but without an identity, and only a report with no usable
//! stack frames at all is rejected.

use memchr::memmem;

use crate::crash::{debug_id_from_str, BinaryImage, Crash, CrashType, Frame, Thread};
use crate::error::Error;

/// Scans the text for known format signatures and returns the first matching
/// crash type, or `None` for unrecognized input.
///
/// Pure and deterministic: the same text always yields the same answer.
pub fn detect_crash_type(content: &str) -> Option<CrashType> {
    let bytes = content.as_bytes();
    // Umeng dumps can embed Apple-style frame lines, so their marker is
    // checked first.
    if memmem::find(bytes, b"dSYM UUID:").is_some() {
        return Some(CrashType::Umeng);
    }
    if memmem::find(bytes, b"Incident Identifier:").is_some()
        || memmem::find(bytes, b"Binary Images:").is_some()
    {
        return Some(CrashType::Apple);
    }
    None
}

/// Parses raw report text into a [`Crash`], or returns `None` if the text is
/// not a recognized format or contains no stack frames.
pub fn parse(content: &str) -> Option<Crash> {
    try_parse(content).ok()
}

/// Like [`parse`], but says why the text was rejected, for callers that show
/// a message.
pub fn try_parse(content: &str) -> Result<Crash, Error> {
    let crash_type = detect_crash_type(content).ok_or(Error::UnrecognizedFormat)?;
    let crash = match crash_type {
        CrashType::Apple => parse_apple(content),
        CrashType::Umeng => parse_umeng(content),
    };
    match crash {
        Some(crash) if crash.frame_count() > 0 => Ok(crash),
        _ => Err(Error::EmptyReport),
    }
}

fn parse_hex(token: &str) -> Option<u64> {
    let digits = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}

/// Parses one `Binary Images:` section line:
/// `0x1000e4000 - 0x1000e7fff +MyApp arm64 <8d4ca952...> /path/to/MyApp`
fn parse_image_line(line: &str) -> Option<BinaryImage> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 || tokens[1] != "-" {
        return None;
    }
    let load_address = parse_hex(tokens[0])?;
    let end_address = parse_hex(tokens[2]);
    let name = tokens[3].trim_start_matches('+').to_string();
    if name.is_empty() {
        return None;
    }

    let mut arch = None;
    let mut debug_id = None;
    let mut path = None;
    for token in &tokens[4..] {
        if let Some(inner) = token.strip_prefix('<') {
            debug_id = debug_id_from_str(inner.trim_end_matches('>'));
        } else if token.starts_with('/') {
            path = Some(token.to_string());
        } else if arch.is_none() && debug_id.is_none() {
            arch = Some(token.to_string());
        }
    }

    Some(BinaryImage {
        name,
        debug_id,
        load_address,
        end_address,
        arch,
        path,
    })
}

/// A frame line before image association:
/// `3   MyApp     0x00000001000f1030 0x1000e4000 + 53296`, or the already
/// symbolicated shape `3   MyApp   0x00000001000f1030 main + 128 (main.m:17)`.
struct RawFrame {
    index: u32,
    module: String,
    address: u64,
    line: usize,
    symbol: Option<String>,
}

fn parse_frame_line(line: &str, line_no: usize) -> Option<RawFrame> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        return None;
    }
    let index: u32 = tokens[0].parse().ok()?;

    // The address is the first hex token after the module name. Module names
    // can contain spaces ("WebKit Networking"), so scan for it.
    let addr_pos = tokens[1..].iter().position(|t| parse_hex(t).is_some())? + 1;
    if addr_pos == 1 {
        // No module name between the index and the address.
        return None;
    }
    let address = parse_hex(tokens[addr_pos])?;
    let module = tokens[1..addr_pos].join(" ");

    // An unsymbolicated tail is `0x<load> + <offset>`; anything else is a
    // symbol the report already carries (e.g. after a symbolicatecrash run).
    let tail = &tokens[addr_pos + 1..];
    let symbol = if tail.is_empty() || parse_hex(tail[0]).is_some() {
        None
    } else {
        Some(tail.join(" "))
    };

    Some(RawFrame {
        index,
        module,
        address,
        line: line_no,
        symbol,
    })
}

/// A `Thread N ...:` header. Returns `(index, crashed, is_name_line)`.
fn parse_thread_header(line: &str) -> Option<(u32, bool, bool)> {
    let rest = line.strip_prefix("Thread ")?;
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let index: u32 = rest[..digits_end].parse().ok()?;
    let rest = rest[digits_end..].trim_start();
    if rest.starts_with("name:") {
        return Some((index, false, true));
    }
    // Only the two backtrace header shapes; lines like
    // "Thread 0 crashed with ARM Thread State (64-bit):" are not threads.
    match rest {
        ":" => Some((index, false, false)),
        "Crashed:" => Some((index, true, false)),
        _ => None,
    }
}

fn attach_frame(crash: &mut Crash, thread: usize, raw: RawFrame) {
    let image = crash.image_for_frame(&raw.module, raw.address);
    crash.threads[thread].frames.push(Frame {
        index: raw.index,
        module: raw.module,
        address: raw.address,
        image,
        line: raw.line,
        symbol: raw.symbol,
    });
}

fn parse_apple(content: &str) -> Option<Crash> {
    let mut crash = Crash {
        crash_type: CrashType::Apple,
        content: content.to_string(),
        images: Vec::new(),
        threads: Vec::new(),
    };

    // First pass: the Binary Images section. Frames need the image list for
    // association, so images are collected before any frame is attached.
    let mut in_images = false;
    for line in content.lines() {
        if line.trim_start().starts_with("Binary Images:") {
            in_images = true;
            continue;
        }
        if in_images {
            match parse_image_line(line) {
                Some(image) => crash.images.push(image),
                None if line.trim().is_empty() => in_images = false,
                None => {}
            }
        }
    }

    // Second pass: threads and frames.
    let mut current: Option<usize> = None;
    let mut pending_name: Option<(u32, String)> = None;
    for (line_no, line) in content.lines().enumerate() {
        if let Some((index, crashed, is_name)) = parse_thread_header(line) {
            if is_name {
                let name = line.splitn(2, "name:").nth(1).unwrap_or("").trim();
                pending_name = Some((index, name.to_string()));
                continue;
            }
            let name = match pending_name.take() {
                Some((name_index, name)) if name_index == index => Some(name),
                _ => None,
            };
            crash.threads.push(Thread {
                index: Some(index),
                name,
                crashed,
                frames: Vec::new(),
            });
            current = Some(crash.threads.len() - 1);
            continue;
        }

        let Some(thread) = current else { continue };
        if line.trim().is_empty() {
            current = None;
            continue;
        }
        if let Some(raw) = parse_frame_line(line, line_no) {
            attach_frame(&mut crash, thread, raw);
        } else if !line.trim_start().starts_with(|c: char| c.is_ascii_digit()) {
            // A non-frame header line ends the thread's backtrace. Lines that
            // look like frames but fail to parse are merely dropped.
            current = None;
        }
    }

    Some(crash)
}

/// Umeng dumps declare a single app image through header fields and then list
/// one backtrace. Only frames of the declared image can be symbolicated; the
/// dump carries no identities for system libraries.
fn parse_umeng(content: &str) -> Option<Crash> {
    let mut crash = Crash {
        crash_type: CrashType::Umeng,
        content: content.to_string(),
        images: Vec::new(),
        threads: vec![Thread {
            index: None,
            name: None,
            crashed: true,
            frames: Vec::new(),
        }],
    };

    let mut debug_id = None;
    let mut arch = None;
    let mut slide_address = None;
    let mut base_address = None;
    let mut image_name = None;

    let field = |line: &str, key: &str| -> Option<String> {
        line.strip_prefix(key).map(|v| v.trim().to_string())
    };

    for line in content.lines() {
        if let Some(v) = field(line, "dSYM UUID:") {
            debug_id = debug_id_from_str(&v);
        } else if let Some(v) = field(line, "CPU Type:") {
            arch = Some(v);
        } else if let Some(v) = field(line, "Slide Address:") {
            slide_address = parse_hex(&v);
        } else if let Some(v) = field(line, "Base Address:") {
            base_address = parse_hex(&v);
        } else if let Some(v) = field(line, "Binary Image:") {
            image_name = Some(v);
        }
    }

    // The field Umeng calls "Slide Address" is the image load address; older
    // dumps carry "Base Address" instead.
    let load_address = slide_address.or(base_address)?;
    crash.images.push(BinaryImage {
        name: image_name?,
        debug_id,
        load_address,
        end_address: None,
        arch,
        path: None,
    });

    for (line_no, line) in content.lines().enumerate() {
        if let Some(raw) = parse_frame_line(line, line_no) {
            attach_frame(&mut crash, 0, raw);
        }
    }

    Some(crash)
}
