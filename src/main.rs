//! Recursive Line Counting Tool
//!
//! Walks a directory tree and reports, for every directory including the
//! root, how many regular files live under it and how many newline-delimited
//! lines those files contain. Totals are aggregated bottom-up: each
//! directory's summary covers itself and all readable descendants.
//!
//! Per-file and per-entry I/O runs through a bounded batch executor so an
//! arbitrarily wide directory never opens an unbounded number of file
//! descriptors, and any single unreadable entry is reported to stderr and
//! absorbed instead of aborting the walk.

use clap::Parser;
use std::env;
use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use colored::*;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tokio::fs;
use tokio::io::AsyncReadExt;

// Chunk size for streaming file reads.
const READ_CHUNK_SIZE: usize = 64 * 1024;

// Recursion into subdirectories is deliberately serialized: directory
// fan-out compounds with tree depth and breadth, while per-file fan-out
// inside one directory is short-lived and safe to run wide.
const SUBDIR_CONCURRENCY: usize = 1;

const METADATA_FAIL_TAG: &str = "__dirlines_metadata_fail__";
const READ_DIR_FAIL_TAG: &str = "__dirlines_read_dir_fail__";
const OPEN_FAIL_TAG: &str = "__dirlines_open_fail__";
const FAULT_ENV_VAR: &str = "DIRLINES_ENABLE_FAULTS";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Concurrent recursive file and line counter",
    long_about = "Counts regular files and newline-delimited lines per directory, \
aggregated bottom-up across the whole tree. Unreadable entries are reported on \
stderr and excluded; the walk always runs to completion.",
    color = clap::ColorChoice::Always
)]
struct Args {
    #[arg(default_value = ".")]
    path: String,

    #[arg(short, long)]
    verbose: bool,

    #[arg(short, long, default_value = "32")]
    concurrency: usize,

    #[arg(short = 'd', long, default_value = "100")]
    max_depth: usize,
}

/// File and line totals for one directory subtree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct DirStats {
    file_count: u64,
    line_count: u64,
}

impl DirStats {
    /// Field-wise addition. Commutative and associative, so sibling results
    /// can be folded in any grouping.
    fn merge(self, other: DirStats) -> DirStats {
        DirStats {
            file_count: self.file_count + other.file_count,
            line_count: self.line_count + other.line_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Directory,
}

// Run counters, shared read-only across in-flight tasks.
struct WalkMetrics {
    files_read: AtomicU64,
    lines_counted: AtomicU64,
    failure_count: AtomicU64,
    start_time: Instant,
}

impl WalkMetrics {
    fn new() -> Self {
        WalkMetrics {
            files_read: AtomicU64::new(0),
            lines_counted: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn update(&self, new_lines: u64) {
        self.files_read.fetch_add(1, Ordering::Relaxed);
        self.lines_counted.fetch_add(new_lines, Ordering::Relaxed);
    }

    fn print_final_stats(&self, writer: &mut dyn Write) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let files = self.files_read.load(Ordering::Relaxed);
        let lines = self.lines_counted.load(Ordering::Relaxed);
        let failures = self.failure_count.load(Ordering::Relaxed);

        let _ = writeln!(writer, "\n{}", "Walk Summary:".blue().bold());
        let _ = writeln!(
            writer,
            "Total time: {} seconds",
            format!("{:.2}", elapsed).bright_yellow()
        );
        let _ = writeln!(
            writer,
            "Files read: {} ({})",
            files.to_string().bright_yellow(),
            format!("{:.1} files/sec", safe_rate(files, elapsed)).bright_yellow()
        );
        let _ = writeln!(
            writer,
            "Lines counted: {} ({})",
            lines.to_string().bright_yellow(),
            format!("{:.1} lines/sec", safe_rate(lines, elapsed)).bright_yellow()
        );
        if failures > 0 {
            let _ = writeln!(
                writer,
                "{}: {}",
                "Failures".red().bold(),
                failures.to_string().bright_yellow()
            );
        }
    }
}

/// Everything a walk needs besides the directory itself: limits, flags and
/// the shared run counters.
struct WalkContext {
    concurrency: usize,
    max_depth: usize,
    verbose: bool,
    metrics: WalkMetrics,
}

impl WalkContext {
    fn from_args(args: &Args) -> Self {
        WalkContext {
            concurrency: args.concurrency,
            max_depth: args.max_depth,
            verbose: args.verbose,
            metrics: WalkMetrics::new(),
        }
    }
}

fn failure_injection_enabled() -> bool {
    cfg!(test) || env::var_os(FAULT_ENV_VAR).is_some()
}

fn should_simulate_path_failure(path: &Path, needle: &str) -> bool {
    failure_injection_enabled()
        && path
            .file_name()
            .and_then(OsStr::to_str)
            .map(|name| name == needle)
            .unwrap_or(false)
}

async fn fetch_metadata(path: &Path) -> io::Result<std::fs::Metadata> {
    if should_simulate_path_failure(path, METADATA_FAIL_TAG) {
        return Err(io::Error::other("simulated metadata read failure"));
    }
    fs::metadata(path).await
}

async fn open_file(path: &Path) -> io::Result<fs::File> {
    if should_simulate_path_failure(path, OPEN_FAIL_TAG) {
        return Err(io::Error::other("simulated file open failure"));
    }
    fs::File::open(path).await
}

/// Enumerate the names in one directory. An error while iterating is folded
/// into the same failure as being unable to open the directory at all; the
/// caller treats both as terminal for this directory.
async fn list_entry_names(path: &Path) -> io::Result<Vec<OsString>> {
    if should_simulate_path_failure(path, READ_DIR_FAIL_TAG) {
        return Err(io::Error::other("simulated read_dir failure"));
    }
    let mut read_dir = fs::read_dir(path).await?;
    let mut names = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        names.push(entry.file_name());
    }
    Ok(names)
}

fn safe_rate(value: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= f64::EPSILON {
        0.0
    } else {
        value as f64 / elapsed_secs
    }
}

fn count_newlines(chunk: &[u8]) -> u64 {
    chunk.iter().filter(|&&byte| byte == b'\n').count() as u64
}

/// Count `'\n'` occurrences in a file, streaming it in `chunk_size` reads.
/// Newlines are only ever scanned within the bytes a single read returned,
/// so the result is independent of where chunk boundaries fall.
async fn count_lines_chunked(path: &Path, chunk_size: usize) -> io::Result<u64> {
    let mut file = open_file(path).await?;
    let mut buf = vec![0u8; chunk_size];
    let mut count = 0u64;
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        count += count_newlines(&buf[..read]);
    }
    Ok(count)
}

async fn count_lines_in_file(path: &Path) -> io::Result<u64> {
    count_lines_chunked(path, READ_CHUNK_SIZE).await
}

/// Decide whether a path is a directory or a regular file. Follows symlinks,
/// so a broken link (or a permission failure, or an entry deleted between
/// listing and here) is an error rather than either kind.
async fn classify_entry(path: &Path) -> io::Result<EntryKind> {
    let metadata = fetch_metadata(path).await?;
    Ok(if metadata.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    })
}

/// Run a batch of independent futures with at most `limit` in flight at
/// once. Results come back in submission order regardless of completion
/// order; with `limit == 1` the batch runs strictly sequentially.
///
/// Tasks are expected to resolve to a value even on failure (callers absorb
/// their own errors via [`report_failure`]), so the batch itself never
/// aborts early.
async fn run_bounded<I, F>(tasks: I, limit: usize) -> Vec<F::Output>
where
    I: IntoIterator<Item = F>,
    F: Future,
{
    stream::iter(tasks)
        .buffered(limit.max(1))
        .collect::<Vec<_>>()
        .await
}

/// The single point where an I/O failure turns into a diagnostic. Callers
/// substitute their own fallback value so errors never travel further than
/// the entry that produced them.
fn report_failure(ctx: &WalkContext, path: &Path, err: &io::Error) {
    eprintln!("{}: {}", path.display(), err);
    ctx.metrics.failure_count.fetch_add(1, Ordering::Relaxed);
}

/// Walk one directory and return the totals for its whole subtree.
///
/// Phases: list entry names, classify them into files and subdirectories
/// (dropping entries that cannot be classified), count lines across the
/// files at the configured concurrency, recurse into subdirectories one at
/// a time, merge. The directory's own summary line prints only after all
/// its descendants have printed theirs.
///
/// A directory that cannot be listed contributes `{0, 0}` to its parent;
/// siblings are unaffected.
fn walk_dir(path: PathBuf, ctx: Arc<WalkContext>, depth: usize) -> BoxFuture<'static, DirStats> {
    async move {
        if depth > ctx.max_depth {
            eprintln!(
                "Warning: maximum directory depth ({}) reached at {}",
                ctx.max_depth,
                path.display()
            );
            ctx.metrics.failure_count.fetch_add(1, Ordering::Relaxed);
            return DirStats::default();
        }

        let names = match list_entry_names(&path).await {
            Ok(names) => names,
            Err(err) => {
                report_failure(&ctx, &path, &err);
                return DirStats::default();
            }
        };

        let ctx_ref = &ctx;
        let classify_tasks: Vec<_> = names
            .iter()
            .map(|name| {
                let entry_path = path.join(name);
                async move {
                    match classify_entry(&entry_path).await {
                        Ok(kind) => Some((entry_path, kind)),
                        Err(err) => {
                            report_failure(ctx_ref, &entry_path, &err);
                            None
                        }
                    }
                }
            })
            .collect();
        let classified = run_bounded(classify_tasks, ctx.concurrency).await;

        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        for (entry_path, kind) in classified.into_iter().flatten() {
            match kind {
                EntryKind::File => files.push(entry_path),
                EntryKind::Directory => subdirs.push(entry_path),
            }
        }

        let count_tasks: Vec<_> = files
            .iter()
            .map(|file_path| async move {
                match count_lines_in_file(file_path).await {
                    Ok(lines) => {
                        ctx_ref.metrics.update(lines);
                        if ctx_ref.verbose {
                            println!("File: {} ({} lines)", file_path.display(), lines);
                        }
                        lines
                    }
                    Err(err) => {
                        // Still a file for the file count, just with nothing
                        // readable in it.
                        report_failure(ctx_ref, file_path, &err);
                        0
                    }
                }
            })
            .collect();
        let line_counts = run_bounded(count_tasks, ctx.concurrency).await;

        let own = DirStats {
            file_count: files.len() as u64,
            line_count: line_counts.into_iter().sum(),
        };

        let subdir_tasks = subdirs
            .into_iter()
            .map(|subdir| walk_dir(subdir, Arc::clone(&ctx), depth + 1));
        let child_stats = run_bounded(subdir_tasks, SUBDIR_CONCURRENCY).await;
        let totals = child_stats.into_iter().fold(own, DirStats::merge);

        println!(
            "{} = {} files, {} lines",
            path.display(),
            totals.file_count,
            totals.line_count
        );

        totals
    }
    .boxed()
}

#[tokio::main]
async fn main() -> io::Result<()> {
    run_with_args(env::args_os()).await
}

async fn run_with_args<I, T>(args: I) -> io::Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::parse_from(args);

    println!(
        "{} {}",
        env!("CARGO_PKG_NAME").bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_yellow()
    );

    let ctx = Arc::new(WalkContext::from_args(&args));
    walk_dir(PathBuf::from(&args.path), Arc::clone(&ctx), 0).await;
    ctx.metrics.print_final_stats(&mut io::stdout());

    Ok(())
}
