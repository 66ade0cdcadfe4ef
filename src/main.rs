use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use log::info;

use qrcm::link::{TextLineDisplay, TextLineSource, DEFAULT_FPS, DEFAULT_GRID_COLS,
                 DEFAULT_GRID_ROWS};
use qrcm::prepare::{prepare_payload, InputSource};
use qrcm::receiver::{run_receive, ReceiveOptions};
use qrcm::sender::{build_metadata, run_send, FrameStream, DEFAULT_CHUNK_SIZE,
                   DEFAULT_HEADER_INTERVAL, DEFAULT_HEADER_REPEAT, DEFAULT_REDUNDANCY,
                   DEFAULT_SUPERBLOCK_DATA};

#[derive(Parser)]
#[command(name = "qrcm", version, about = "One-way QR code bulk transfer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show more log messages
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Show less log messages
    #[arg(short, long, action = ArgAction::Count, global = true)]
    quiet: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a payload as a stream of QR symbol frames
    Send {
        /// Path to a file or directory, or '-' for stdin
        input: String,
        /// Payload bytes per data frame
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u16,
        /// Data blocks per parity superblock
        #[arg(long, default_value_t = DEFAULT_SUPERBLOCK_DATA)]
        superblock_data: u16,
        /// Parity frames per superblock
        #[arg(long, default_value_t = DEFAULT_REDUNDANCY)]
        redundancy: u16,
        /// Session header copies at stream start
        #[arg(long, default_value_t = DEFAULT_HEADER_REPEAT)]
        header_repeat: u32,
        /// Re-emit the header every N data frames (0 disables)
        #[arg(long, default_value_t = DEFAULT_HEADER_INTERVAL)]
        header_interval: u32,
        #[arg(long, default_value_t = DEFAULT_GRID_ROWS)]
        grid_rows: usize,
        #[arg(long, default_value_t = DEFAULT_GRID_COLS)]
        grid_cols: usize,
        /// Grid batches per second on the live display
        #[arg(long, default_value_t = DEFAULT_FPS)]
        fps: u32,
        /// Gzip the payload before sending
        #[arg(long)]
        compress: bool,
        /// Record the emitted symbol stream to a file
        #[arg(long)]
        video_output: Option<PathBuf>,
        /// Do not emit to stdout (requires --video-output)
        #[arg(long)]
        no_display: bool,
    },
    /// Decode a captured symbol stream and reassemble the payload
    Receive {
        /// Captured symbol stream; omit to read the live capture from stdin
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_GRID_ROWS)]
        grid_rows: usize,
        #[arg(long, default_value_t = DEFAULT_GRID_COLS)]
        grid_cols: usize,
        /// Output file, or directory when extracting an archive
        #[arg(long, default_value = "received.bin")]
        output: PathBuf,
        /// Extract tar payloads and decompress gz payloads
        #[arg(long)]
        extract: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = match i16::from(cli.verbose) - i16::from(cli.quiet) {
        ..=-2 => log::LevelFilter::Error,
        -1 => log::LevelFilter::Warn,
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        2.. => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .parse_default_env()
        .init();

    match cli.command {
        // ── Send ─────────────────────────────────────────────────────────────
        Commands::Send {
            input,
            chunk_size,
            superblock_data,
            redundancy,
            header_repeat,
            header_interval,
            grid_rows,
            grid_cols,
            fps,
            compress,
            video_output,
            no_display,
        } => {
            // Operator parameters are checked before any frame is produced.
            if chunk_size == 0 {
                return Err("chunk-size must be > 0".into());
            }
            if superblock_data == 0 {
                return Err("superblock-data must be > 0".into());
            }
            if grid_rows == 0 || grid_cols == 0 {
                return Err("grid dimensions must be > 0".into());
            }
            if no_display && video_output.is_none() {
                return Err("--no-display requires --video-output".into());
            }

            let payload = prepare_payload(&InputSource::from_arg(&input), compress, None)?;
            let meta = build_metadata(&payload, chunk_size, superblock_data, redundancy);
            info!(
                "session={} bytes={} chunks={} superblock_data={} redundancy={} grid={}x{} fps={}",
                meta.session_id.simple(),
                meta.total_size,
                meta.total_chunks,
                meta.superblock_data,
                meta.redundancy,
                grid_rows,
                grid_cols,
                fps
            );
            if let Some(path) = &video_output {
                info!("recording symbol stream to {}", path.display());
            }

            let stream = FrameStream::open(&payload, &meta, header_repeat, header_interval)?;
            let live = if no_display { None } else { Some(io::stdout()) };
            let mut display = TextLineDisplay::new(live, video_output.as_deref(), fps)?;
            let report = run_send(stream, &mut display, grid_rows * grid_cols)?;

            info!(
                "emitted {} header / {} data / {} fec frames in {} batches{}",
                report.header_frames,
                report.data_frames,
                report.fec_frames,
                report.batches,
                if report.aborted { " (aborted by operator)" } else { "" }
            );
            // `payload` drops here and removes the staged temporary.
        }

        // ── Receive ──────────────────────────────────────────────────────────
        Commands::Receive { input, grid_rows, grid_cols, output, extract } => {
            log::debug!("capture grid {grid_rows}x{grid_cols}");
            let options = ReceiveOptions { output, extract };

            let reader: Box<dyn BufRead> = match &input {
                Some(path) => Box::new(BufReader::new(File::open(path)?)),
                None => Box::new(BufReader::new(io::stdin())),
            };
            let mut source = TextLineSource::new(reader);
            let report = run_receive(&mut source, &options)?;

            println!("[receive] payload restored to {}", report.output.display());
            println!(
                "[receive] session={} bytes={}: {}",
                report.meta.session_id.simple(),
                report.meta.total_size,
                report.stats.summary()
            );
        }
    }

    Ok(())
}
