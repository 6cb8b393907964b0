//! The build log stores commands previously run, for determining whether an
//! output is up to date with respect to the command that would produce it.
//!
//! Each run appends to the log file; loading replays all entries in series,
//! keeping the newest per output.  Once the number of redundant entries
//! exceeds a threshold, the file is rewritten fresh.

use crate::graph::{EdgeId, State};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

const SIGNATURE_PREFIX: &str = "# ninja log v";
const CURRENT_VERSION: u32 = 4;

/// Loading streams the file through a fixed buffer; a record longer than
/// this is skipped.
const LINE_BUF_SIZE: usize = 256 << 10;

/// How redundant the on-disk log must get before it is rewritten.
const MIN_COMPACTION_ENTRIES: usize = 100;
const COMPACTION_RATIO: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub command: String,
    pub start_time: i32,
    pub end_time: i32,
    /// Max input mtime observed when the command ran; substitutes for the
    /// output mtime in dirty checks of restat edges.
    pub restat_mtime: u64,
}

#[derive(Default)]
pub struct BuildLog {
    entries: HashMap<String, LogEntry>,
    file: Option<File>,
    needs_recompaction: bool,
    dry_run: bool,
}

impl BuildLog {
    pub fn new() -> Self {
        BuildLog::default()
    }

    /// In dry-run mode all write operations succeed without touching disk;
    /// the in-memory map still updates.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub fn needs_recompaction(&self) -> bool {
        self.needs_recompaction
    }

    pub fn lookup_by_output(&self, path: &str) -> Option<&LogEntry> {
        self.entries.get(path)
    }

    /// Insert or update the in-memory entry for one output.
    pub fn record_entry(
        &mut self,
        output: &str,
        command: &str,
        start_time: i32,
        end_time: i32,
        restat_mtime: u64,
    ) {
        self.entries.insert(
            output.to_string(),
            LogEntry {
                command: command.to_string(),
                start_time,
                end_time,
                restat_mtime,
            },
        );
    }

    /// Record a finished edge: one entry per output, appended to the open
    /// log file.  The in-memory map is authoritative during the run; the
    /// on-disk tail is the durable record.
    pub fn record_command(
        &mut self,
        state: &State,
        edge: EdgeId,
        start_time: i32,
        end_time: i32,
        restat_mtime: u64,
    ) -> std::io::Result<()> {
        let command = state.evaluate_command(edge, true);
        for &out in state.edge(edge).outs() {
            let output = &state.node(out).name;
            let entry = LogEntry {
                command: command.clone(),
                start_time,
                end_time,
                restat_mtime,
            };
            if let Some(file) = &mut self.file {
                write_entry(file, output, &entry)?;
            }
            self.entries.insert(output.clone(), entry);
        }
        Ok(())
    }

    /// Load the log at the given path, if present.  Newest entry per output
    /// wins; malformed or truncated lines are skipped so that logs from
    /// older or newer writers still load.
    pub fn load(&mut self, path: &str) -> std::io::Result<()> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };

        let mut version = 0u32;
        let mut total_entries = 0usize;
        for_each_line(&mut file, |line| {
            if version == 0 {
                version = 1; // assume, for signature-less files
                if let Some(rest) = line.strip_prefix(SIGNATURE_PREFIX) {
                    version = rest.trim().parse().unwrap_or(1);
                    return;
                }
            }
            if let Some((output, entry)) = parse_line(line, version) {
                total_entries += 1;
                self.entries.insert(output.to_string(), entry);
            }
        })?;

        // Rebuild the log if we are upgrading versions or if it has
        // accumulated too many superseded entries.
        let unique_entries = self.entries.len();
        if version < CURRENT_VERSION && version > 0 {
            self.needs_recompaction = true;
        } else if total_entries > MIN_COMPACTION_ENTRIES
            && total_entries > unique_entries * COMPACTION_RATIO
        {
            self.needs_recompaction = true;
        }

        Ok(())
    }

    /// Open the log for appending, recompacting first if load flagged it.
    /// Writes the signature when the file is empty.
    pub fn open_for_write(&mut self, path: &str) -> std::io::Result<()> {
        if self.dry_run {
            return Ok(());
        }

        if self.needs_recompaction {
            self.recompact(path)?;
            self.needs_recompaction = false;
        }

        let mut file = OpenOptions::new().append(true).create(true).open(path)?;
        if file.metadata()?.len() == 0 {
            write!(file, "{}{}\n", SIGNATURE_PREFIX, CURRENT_VERSION)?;
        }
        self.file = Some(file);
        Ok(())
    }

    /// Rewrite the log as signature plus one line per live entry, then
    /// atomically replace the old file.
    pub fn recompact(&mut self, path: &str) -> std::io::Result<()> {
        self.file = None;
        let temp_path = format!("{}.recompact", path);
        let mut f = File::create(&temp_path)?;
        write!(f, "{}{}\n", SIGNATURE_PREFIX, CURRENT_VERSION)?;
        for (output, entry) in &self.entries {
            write_entry(&mut f, output, entry)?;
        }
        drop(f);
        // Windows cannot rename over an existing file.
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        std::fs::rename(&temp_path, path)
    }

    pub fn close(&mut self) {
        self.file = None;
    }
}

fn write_entry(w: &mut File, output: &str, entry: &LogEntry) -> std::io::Result<()> {
    // One write_all per record keeps appends line-atomic from our side.
    let line = format!(
        "{}\t{}\t{}\t{}\t{}\n",
        entry.start_time, entry.end_time, entry.restat_mtime, output, entry.command
    );
    w.write_all(line.as_bytes())
}

fn parse_line(line: &str, version: u32) -> Option<(&str, LogEntry)> {
    if version >= 4 {
        let mut fields = line.splitn(5, '\t');
        let start_time = fields.next()?.parse().ok()?;
        let end_time = fields.next()?.parse().ok()?;
        let restat_mtime = fields.next()?.parse().ok()?;
        let output = fields.next()?;
        let command = fields.next()?;
        Some((
            output,
            LogEntry {
                command: command.to_string(),
                start_time,
                end_time,
                restat_mtime,
            },
        ))
    } else {
        // Older logs: space-separated, no restat_mtime column.
        let mut fields = line.splitn(4, ' ');
        let start_time = fields.next()?.parse().ok()?;
        let end_time = fields.next()?.parse().ok()?;
        let output = fields.next()?;
        let command = fields.next()?;
        Some((
            output,
            LogEntry {
                command: command.to_string(),
                start_time,
                end_time,
                restat_mtime: 0,
            },
        ))
    }
}

/// Stream complete lines through `f`, reading through a fixed-size buffer
/// with carry-over.  A final line with no terminator is discarded as a
/// partial write; lines longer than the buffer are skipped.
fn for_each_line(file: &mut File, mut f: impl FnMut(&str)) -> std::io::Result<()> {
    let mut buf = vec![0u8; LINE_BUF_SIZE];
    let mut len = 0usize;
    let mut skipping_long_line = false;
    loop {
        let n = file.read(&mut buf[len..])?;
        if n == 0 {
            return Ok(());
        }
        len += n;

        let mut start = 0;
        while let Some(pos) = buf[start..len].iter().position(|&c| c == b'\n') {
            if skipping_long_line {
                skipping_long_line = false;
            } else if let Ok(line) = std::str::from_utf8(&buf[start..start + pos]) {
                f(line.strip_suffix('\r').unwrap_or(line));
            }
            start += pos + 1;
        }

        buf.copy_within(start..len, 0);
        len -= start;
        if len == buf.len() {
            // No newline within a full buffer; drop data until one shows up.
            skipping_long_line = true;
            len = 0;
        }
    }
}
