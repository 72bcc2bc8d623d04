//! Praat TextGrid files (long text format) holding one interval tier.

use std::fmt;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{PrepareError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
    pub label: String,
}

impl Interval {
    pub fn new(start: f64, end: f64, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntervalTier {
    pub name: String,
    pub intervals: Vec<Interval>,
}

#[derive(Debug, Clone)]
pub struct TextGrid {
    xmin: f64,
    xmax: f64,
    tiers: Vec<IntervalTier>,
}

impl TextGrid {
    pub fn new(xmax: f64) -> Self {
        Self {
            xmin: 0.0,
            xmax,
            tiers: Vec::new(),
        }
    }

    pub fn add_tier(&mut self, name: &str, intervals: Vec<Interval>) {
        if let Some(last) = intervals.iter().map(|i| i.end).reduce(f64::max) {
            self.xmax = self.xmax.max(last);
        }
        self.tiers.push(IntervalTier {
            name: name.to_string(),
            intervals,
        });
    }

    pub fn xmax(&self) -> f64 {
        self.xmax
    }

    /// Render in Praat's long text format. Every tier is made contiguous
    /// from `xmin` to `xmax` by inserting empty intervals into the gaps.
    pub fn to_long_format(&self) -> String {
        self.to_string()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PrepareError::io_at(parent, e))?;
        }
        fs::write(path, self.to_long_format()).map_err(|e| PrepareError::io_at(path, e))?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

impl fmt::Display for TextGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File type = \"ooTextFile\"")?;
        writeln!(f, "Object class = \"TextGrid\"")?;
        writeln!(f)?;
        writeln!(f, "xmin = {}", self.xmin)?;
        writeln!(f, "xmax = {}", self.xmax)?;
        writeln!(f, "tiers? <exists>")?;
        writeln!(f, "size = {}", self.tiers.len())?;
        writeln!(f, "item []:")?;

        for (t, tier) in self.tiers.iter().enumerate() {
            let intervals = contiguous(&tier.intervals, self.xmin, self.xmax);
            writeln!(f, "    item [{}]:", t + 1)?;
            writeln!(f, "        class = \"IntervalTier\"")?;
            writeln!(f, "        name = \"{}\"", escape(&tier.name))?;
            writeln!(f, "        xmin = {}", self.xmin)?;
            writeln!(f, "        xmax = {}", self.xmax)?;
            writeln!(f, "        intervals: size = {}", intervals.len())?;
            for (i, interval) in intervals.iter().enumerate() {
                writeln!(f, "        intervals [{}]:", i + 1)?;
                writeln!(f, "            xmin = {}", interval.start)?;
                writeln!(f, "            xmax = {}", interval.end)?;
                writeln!(f, "            text = \"{}\"", escape(&interval.label))?;
            }
        }
        Ok(())
    }
}

/// Sort by start, clip overlaps, and fill gaps with empty intervals.
fn contiguous(intervals: &[Interval], xmin: f64, xmax: f64) -> Vec<Interval> {
    let mut sorted: Vec<&Interval> = intervals.iter().collect();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut out = Vec::with_capacity(sorted.len() * 2 + 1);
    let mut cursor = xmin;
    for interval in sorted {
        let start = interval.start.max(cursor);
        let end = interval.end.min(xmax);
        if end <= start {
            continue;
        }
        if start > cursor {
            out.push(Interval::new(cursor, start, ""));
        }
        out.push(Interval::new(start, end, interval.label.clone()));
        cursor = end;
    }
    if xmax > cursor {
        out.push(Interval::new(cursor, xmax, ""));
    }
    out
}

fn escape(s: &str) -> String {
    s.replace('"', "\"\"")
}
