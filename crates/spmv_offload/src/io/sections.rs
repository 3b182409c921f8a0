//! Section-delimited text datasets.
//!
//! A line starting with `%%` opens a section; anything before the first
//! marker is ignored. Section bodies are whitespace-separated tokens. The
//! writer emits a bare `%%` line per section and one value per line.

use std::fmt::Display;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, SpmvError};

pub const SECTION_MARKER: &str = "%%";

/// Reads sections in order, the way the dataset layout fixes them.
pub struct SectionCursor<'a> {
    path: &'a Path,
    sections: Vec<&'a str>,
    pos: usize,
}

impl<'a> SectionCursor<'a> {
    pub fn new(path: &'a Path, text: &'a str) -> Self {
        let mut sections = Vec::new();
        let mut rest = text;
        let mut started = false;
        // Walk line by line, keeping byte offsets so bodies stay borrowed.
        let mut body_start = 0usize;
        let mut offset = 0usize;
        while !rest.is_empty() {
            let line_len = rest.find('\n').map_or(rest.len(), |i| i + 1);
            let line = &rest[..line_len];
            if line.trim_start().starts_with(SECTION_MARKER) {
                if started {
                    sections.push(&text[body_start..offset]);
                }
                started = true;
                body_start = offset + line_len;
            }
            offset += line_len;
            rest = &rest[line_len..];
        }
        if started {
            sections.push(&text[body_start..]);
        }

        Self {
            path,
            sections,
            pos: 0,
        }
    }

    fn err(&self, reason: String) -> SpmvError {
        SpmvError::Dataset {
            path: self.path.to_path_buf(),
            reason,
        }
    }

    pub fn remaining(&self) -> usize {
        self.sections.len().saturating_sub(self.pos)
    }

    fn take(&mut self, label: &str) -> Result<(usize, &'a str)> {
        let idx = self.pos;
        let body = self.sections.get(idx).copied().ok_or_else(|| {
            self.err(format!(
                "missing section {} ({label}); file has {}",
                idx + 1,
                self.sections.len()
            ))
        })?;
        self.pos += 1;
        Ok((idx + 1, body))
    }

    pub fn read_f64s(&mut self, label: &str) -> Result<Vec<f64>> {
        let (section, body) = self.take(label)?;
        body.split_whitespace()
            .enumerate()
            .map(|(i, t)| {
                t.parse::<f64>().map_err(|e| {
                    self.err(format!(
                        "section {section} ({label}) token {i}: bad real '{t}': {e}"
                    ))
                })
            })
            .collect()
    }

    /// Integer section. Values must be non-negative and fit `u32`; anything
    /// else is a structural error of the matrix, not of the text.
    pub fn read_indices(&mut self, label: &str) -> Result<Vec<u32>> {
        let (section, body) = self.take(label)?;
        body.split_whitespace()
            .enumerate()
            .map(|(i, t)| {
                let v = t.parse::<i64>().map_err(|e| {
                    self.err(format!(
                        "section {section} ({label}) token {i}: bad integer '{t}': {e}"
                    ))
                })?;
                u32::try_from(v).map_err(|_| {
                    SpmvError::MalformedMatrix(format!(
                        "{label}[{i}] = {v} is not a valid index"
                    ))
                })
            })
            .collect()
    }

    /// Fails if sections are left over; a longer file means a layout mismatch.
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(self.err(format!(
                "{} unexpected trailing section(s) after section {}",
                self.remaining(),
                self.pos
            )));
        }
        Ok(())
    }
}

/// Emits sections in the same layout `SectionCursor` reads.
pub struct SectionWriter<W: Write> {
    out: W,
}

impl<W: Write> SectionWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn section<T: Display>(&mut self, data: &[T]) -> Result<()> {
        writeln!(self.out, "{SECTION_MARKER}")?;
        for v in data {
            writeln!(self.out, "{v}")?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}
