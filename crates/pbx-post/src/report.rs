use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use pbx_core::PbxError;

/// Tab-separated analysis output written next to the chain as `<stem>.<extension>`.
pub trait Report {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    /// Writes the report body.
    fn render(&self, out: &mut dyn Write) -> io::Result<()>;
}

/// Path of the report file for `stem`.
pub fn report_path(stem: &Path, extension: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Renders `report` into `<stem>.<extension>` and returns the path.
pub fn write_report(stem: &Path, report: &dyn Report) -> Result<PathBuf, PbxError> {
    let path = report_path(stem, report.extension());
    let file = File::create(&path).map_err(|err| PbxError::io("report-create", err, &path))?;
    let mut out = BufWriter::new(file);
    report
        .render(&mut out)
        .and_then(|()| out.flush())
        .map_err(|err| PbxError::io("report-write", err, &path))?;
    Ok(path)
}

pub(crate) fn alphabet_header(out: &mut dyn Write, alphabet: &[char]) -> io::Result<()> {
    for state in alphabet {
        write!(out, "{state} ")?;
    }
    writeln!(out)?;
    writeln!(out)
}
