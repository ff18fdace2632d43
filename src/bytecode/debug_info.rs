use serde::{Deserialize, Serialize};

/// One run of the line table: `span` consecutive instruction bytes that all
/// belong to source line `line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRun {
    pub line: u32,
    pub span: u32,
}

/// Run-length encoded mapping from instruction offsets to source lines.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineTable {
    runs: Vec<LineRun>,
}

impl LineTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_runs(runs: Vec<LineRun>) -> Self {
        Self { runs }
    }

    pub fn runs(&self) -> &[LineRun] {
        &self.runs
    }

    /// Records that the next `bytes` instruction bytes belong to `line`,
    /// extending the last run when the line is unchanged.
    pub fn push(&mut self, line: u32, bytes: u32) {
        if bytes == 0 {
            return;
        }
        match self.runs.last_mut() {
            Some(run) if run.line == line => run.span += bytes,
            _ => self.runs.push(LineRun { line, span: bytes }),
        }
    }

    pub fn line_at(&self, offset: usize) -> Option<u32> {
        let mut start = 0usize;
        for run in &self.runs {
            let end = start + run.span as usize;
            if offset < end {
                return Some(run.line);
            }
            start = end;
        }
        None
    }

    /// Total number of instruction bytes covered.
    pub fn covered(&self) -> usize {
        self.runs.iter().map(|run| run.span as usize).sum()
    }
}

/// Name and origin of a function, used for stack traces.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionDebugInfo {
    pub name: Option<String>,
    pub file: Option<String>,
    pub lines: LineTable,
}

impl FunctionDebugInfo {
    pub fn new(name: Option<String>, file: Option<String>, lines: LineTable) -> Self {
        Self { name, file, lines }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    pub fn line_at(&self, ip: usize) -> Option<u32> {
        self.lines.line_at(ip)
    }
}
