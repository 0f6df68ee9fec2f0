use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("The text is not in any recognized crash report format")]
    UnrecognizedFormat,

    #[error("The report has no parseable binary images or stack frames")]
    EmptyReport,

    #[error("{} is not a valid symbol archive: the UUID extractor found no UUIDs in it", .0.display())]
    NotASymbolArchive(PathBuf),

    #[error("Could not read the crash report file at {}: {}", .0.display(), .1)]
    CouldNotReadReportFile(PathBuf, #[source] std::io::Error),
}
