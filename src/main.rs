use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use h265batch::{
    check_tools, load_config, resolve_tool, AppConfig, BatchOrchestrator, LogWriter, MediaFacts,
    MediaInfoProber, ProgressMode, Prober, Strategy,
};
use std::panic;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the video and audio format of one file
    Probe {
        file: PathBuf,
        /// Print the probed facts as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Report whether the encoder and prober can be found
    CheckTools,
}

#[derive(Parser, Debug)]
#[command(version, about = "Batch-convert a directory of videos to H.265 in parallel.")]
struct Args {
    /// Optional subcommands
    #[command(subcommand)]
    cmd: Option<Command>,

    /// Directory holding the videos to convert
    #[arg(default_value = "input")]
    input: PathBuf,

    /// Logical cores to leave free (defaults to the config value, 2)
    reserved: Option<usize>,

    /// Output directory (default: `output` next to the input directory)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Re-encode even when the output file already exists
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Kill a conversion that runs longer than this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// How to show progress while converting
    #[arg(long, value_enum, default_value_t = ProgressMode::Auto)]
    progress: ProgressMode,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log debug details to stderr
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn init_logging(verbose: bool, log: LogWriter) {
    // RUST_LOG wins over the verbose flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("h265batch=debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log.clone())
        .try_init();

    // Panic output also goes around the live table
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| log.suspend(|| default_hook(info))));
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let log = LogWriter::stderr();
    init_logging(args.verbose, log.clone());

    let mut config = load_config(args.config.as_deref())?;

    match &args.cmd {
        Some(Command::Probe { file, json }) => {
            probe_file(&config, file, *json)?;
            return Ok(ExitCode::SUCCESS);
        }
        Some(Command::CheckTools) => return Ok(run_check_tools(&config)),
        None => {}
    }

    if let Some(reserved) = args.reserved {
        config.reserved_cores = reserved;
    }
    if let Some(output) = args.output {
        config.output_dir = Some(output);
    }
    if args.overwrite {
        config.overwrite = true;
    }
    if let Some(secs) = args.timeout {
        config.job_timeout_secs = Some(secs);
    }

    let report = BatchOrchestrator::new(config)
        .with_progress_mode(args.progress)
        .with_log_writer(log)
        .run(&args.input)
        .with_context(|| format!("converting {}", args.input.display()))?;

    if report.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn probe_file(config: &AppConfig, file: &Path, json: bool) -> Result<()> {
    if !file.is_file() {
        bail!("File does not exist: {}", file.display());
    }
    let mediainfo = resolve_tool(&config.tools.prober)?;
    let facts = MediaInfoProber::new(mediainfo)
        .probe(file)
        .with_context(|| format!("probing {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&facts)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    print_facts(&facts);
    Ok(())
}

fn print_facts(facts: &MediaFacts) {
    if let Some(duration) = facts.duration() {
        let secs = duration.as_secs();
        println!(
            "Duration: {:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
    }

    match facts.video() {
        Some(video) => {
            print!("Video: {}", video.format.as_deref().unwrap_or("unknown"));
            if let Some(id) = &video.codec_id {
                print!(" ({})", id);
            }
            if let (Some(w), Some(h)) = (video.width, video.height) {
                print!(" {}x{}", w, h);
            }
            if let Some(fps) = video.frame_rate {
                print!(" {:.3} fps", fps);
            }
            println!();
        }
        None => println!("Video: none"),
    }

    match facts.audio() {
        Some(audio) => {
            print!("Audio: {}", audio.format.as_deref().unwrap_or("unknown"));
            if let Some(ch) = audio.channels {
                print!(" {}ch", ch);
            }
            if let Some(rate) = audio.sampling_rate {
                print!(" {} Hz", rate);
            }
            println!();
        }
        None => println!("Audio: none"),
    }

    let hevc = facts.is_hevc();
    println!("Already HEVC: {}", if hevc { "yes" } else { "no" });
    println!("Would {}", Strategy::for_source(hevc));
}

fn run_check_tools(config: &AppConfig) -> ExitCode {
    println!("Checking external tools...\n");

    let mut all_ok = true;
    for tool in check_tools(&config.tools) {
        let mark = if tool.available {
            "ok"
        } else {
            all_ok = false;
            "missing"
        };
        print!("[{}] {}", mark, tool.name);
        if let Some(version) = &tool.version {
            print!(" ({})", version);
        }
        if let Some(path) = &tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    if all_ok {
        ExitCode::SUCCESS
    } else {
        println!("\nInstall the missing tools or set their paths under [tools] in h265batch.toml.");
        ExitCode::FAILURE
    }
}
