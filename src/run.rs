use crate::{
    build_log::BuildLog,
    fs::RealFileSystem,
    load,
    progress::{DumbConsoleProgress, FancyConsoleProgress, Progress},
    signal,
    task::Runner,
    terminal, trace,
    work::{Options, Work},
};
use anyhow::anyhow;
use std::path::Path;

/// Where commands previously run are remembered between builds.
const LOG_FILENAME: &str = ".ebb_log";

#[derive(argh::FromArgs)] // this struct generates the flags and --help output
/// ebb, an incremental build engine
struct Opts {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// input build file [default=build.ninja]
    #[argh(option, short = 'f', default = "(\"build.ninja\".into())")]
    build_file: String,

    /// debugging tools
    #[argh(option, short = 'd')]
    debug: Option<String>,

    /// subcommands
    #[argh(option, short = 't')]
    tool: Option<String>,

    /// parallelism [default uses system thread count]
    #[argh(option, short = 'j')]
    parallelism: Option<usize>,

    /// keep going until at least N failures (0 means infinity) [default=1]
    #[argh(option, short = 'k', default = "1")]
    keep_going: usize,

    /// dry run: print what would run, but run nothing
    #[argh(switch, short = 'n')]
    dry_run: bool,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// targets to build
    #[argh(positional)]
    targets: Vec<String>,
}

fn default_parallelism() -> anyhow::Result<usize> {
    let par = std::thread::available_parallelism()?;
    Ok(usize::from(par))
}

fn build(opts: &Opts, progress: &mut dyn Progress) -> anyhow::Result<i32> {
    let fs = RealFileSystem::new();
    let loaded = match trace::scope("load::read", || load::read(&fs, &opts.build_file)) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("ebb: {}", err);
            return Ok(2);
        }
    };

    let mut log = BuildLog::new();
    log.set_dry_run(opts.dry_run);
    if let Err(err) = trace::scope("log.load", || log.load(LOG_FILENAME)) {
        progress.log(&format!("warning: loading {}: {}", LOG_FILENAME, err));
    }
    // A log we cannot write to costs persistence, not correctness.
    if let Err(err) = log.open_for_write(LOG_FILENAME) {
        progress.log(&format!("warning: opening {}: {}", LOG_FILENAME, err));
    }

    let options = Options {
        parallelism: match opts.parallelism {
            Some(p) => p,
            None => default_parallelism()?,
        },
        keep_going: opts.keep_going,
        dry_run: opts.dry_run,
    };
    let mut runner = Runner::new(options.parallelism);
    let mut work = Work::new(
        &loaded.state,
        &fs,
        &mut log,
        &mut runner,
        progress,
        options,
    );

    if !opts.targets.is_empty() {
        for name in &opts.targets {
            if let Err(err) = work.want_file(name) {
                eprintln!("ebb: {}", err);
                return Ok(2);
            }
        }
    } else if !loaded.defaults.is_empty() {
        for &target in &loaded.defaults {
            if let Err(err) = work.want_node(target) {
                eprintln!("ebb: {}", err);
                return Ok(2);
            }
        }
    } else {
        eprintln!("ebb: no targets specified and no default");
        return Ok(2);
    }

    match trace::scope("work.run", || work.run())? {
        None => {
            // Don't print any summary; the failing task is enough info.
            Ok(1)
        }
        Some(0) => {
            // Special case: don't print numbers when no work was done.
            println!("ebb: no work to do");
            Ok(0)
        }
        Some(n) => {
            println!(
                "ebb: ran {} task{}, now up to date",
                n,
                if n == 1 { "" } else { "s" }
            );
            Ok(0)
        }
    }
}

fn run_impl() -> anyhow::Result<i32> {
    let opts: Opts = argh::from_env();

    if let Some(debug) = &opts.debug {
        match debug.as_str() {
            "list" => {
                println!("debug tools:");
                println!("  trace  generate json performance trace");
                return Ok(1);
            }
            "trace" => trace::open("trace.json")?,
            _ => anyhow::bail!("unknown -d {:?}, use -d list to list", debug),
        }
    }

    if let Some(tool) = &opts.tool {
        match tool.as_str() {
            "list" => {
                println!("subcommands:");
                println!("  (none yet)");
                return Ok(1);
            }
            _ => anyhow::bail!("unknown -t {:?}, use -t list to list", tool),
        }
    }

    if let Some(dir) = &opts.chdir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    signal::register_sigint();

    if terminal::use_fancy() {
        let mut progress = FancyConsoleProgress::new(opts.verbose);
        build(&opts, &mut progress)
    } else {
        let mut progress = DumbConsoleProgress::new(opts.verbose);
        build(&opts, &mut progress)
    }
}

pub fn run() -> i32 {
    let code = match run_impl() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ebb: {}", err);
            1
        }
    };
    if let Err(err) = trace::close() {
        eprintln!("ebb: closing trace: {}", err);
    }
    code
}
