use std::env;
use std::fs::File;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rtpreplay::codec::CodecRegistry;
use rtpreplay::{ExtractionRequest, Extractor, MetadataStore, VideoLayout, VideoSelection};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the captured streams
    #[arg(short, long)]
    dir: PathBuf,
    /// Output file
    #[arg(short, long)]
    output: PathBuf,
    /// Video track placement: ssrc:x:y:width:height[:opacity], repeatable.
    /// e.g.: 1234:0:0:320:240 or 1234:0:0:320:240:0.5
    #[arg(short = 'v', long = "video")]
    video: Vec<String>,
    /// Audio track ssrc, repeatable
    #[arg(short = 'a', long = "audio")]
    audio: Vec<String>,
    /// Track whose start time anchors the timeline without being emitted, repeatable
    #[arg(long = "sync")]
    sync: Vec<String>,
    /// Window start within the recording, milliseconds
    #[arg(long, default_value_t = 0)]
    start: i64,
    /// Window length, milliseconds
    #[arg(long)]
    duration: i64,
    /// Content shift applied to every track, milliseconds
    #[arg(long, default_value_t = 0)]
    shift: i64,
    /// Playback rate against the wall clock; 0 or less means as fast as I/O allows
    #[arg(long, default_value_t = -1.0)]
    speed: f64,
    /// Output content type
    #[arg(long, default_value = "video/x-flv")]
    content_type: String,
    /// Canvas size as WIDTHxHEIGHT; defaults to the layout bounding box
    #[arg(long)]
    canvas: Option<String>,
    /// Background color as rrggbb hex
    #[arg(long, default_value = "000000")]
    background: String,
    /// Image painted on the canvas before the first decoded frame
    #[arg(long)]
    first_frame: Option<PathBuf>,
}

fn set_log(env_filter: String) {
    let _ = env::var("RUST_LOG").is_err_and(|_| {
        env::set_var("RUST_LOG", env_filter);
        true
    });
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();
}

fn parse_video(arg: &str) -> Result<VideoSelection> {
    let parts: Vec<&str> = arg.split(':').collect();
    if parts.len() != 5 && parts.len() != 6 {
        return Err(anyhow!(
            "bad video selection {arg:?}, expected ssrc:x:y:width:height[:opacity]"
        ));
    }
    let n = |s: &str| -> Result<u32> { s.parse().with_context(|| format!("bad number {s:?}")) };
    let opacity = match parts.get(5) {
        Some(s) => s.parse().with_context(|| format!("bad opacity {s:?}"))?,
        None => 1.0,
    };
    Ok(VideoSelection {
        ssrc: parts[0].to_owned(),
        layout: VideoLayout {
            x: n(parts[1])?,
            y: n(parts[2])?,
            width: n(parts[3])?,
            height: n(parts[4])?,
            opacity,
        },
    })
}

fn parse_canvas(arg: &str) -> Result<(u32, u32)> {
    let (w, h) = arg
        .split_once('x')
        .ok_or_else(|| anyhow!("bad canvas size {arg:?}, expected WIDTHxHEIGHT"))?;
    Ok((w.parse()?, h.parse()?))
}

fn parse_background(arg: &str) -> Result<(u8, u8, u8)> {
    if arg.len() != 6 {
        return Err(anyhow!("bad background {arg:?}, expected rrggbb hex"));
    }
    let byte = |at: usize| u8::from_str_radix(&arg[at..at + 2], 16).map_err(|e| anyhow!("{e}"));
    Ok((byte(0)?, byte(2)?, byte(4)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    set_log(format!("{}=info", env!("CARGO_PKG_NAME")));
    let args = Args::parse();

    let request = ExtractionRequest {
        video: args
            .video
            .iter()
            .map(|v| parse_video(v))
            .collect::<Result<Vec<_>>>()?,
        audio: args.audio.clone(),
        sync: args.sync.clone(),
        background: parse_background(&args.background)?,
        start_ms: args.start,
        duration_ms: args.duration,
        shift_ms: args.shift,
        speed: args.speed,
        content_type: args.content_type.clone(),
        canvas_size: args.canvas.as_deref().map(parse_canvas).transpose()?,
        first_frame: args.first_frame.clone(),
    };

    let out = File::create(&args.output)
        .with_context(|| format!("cannot create {}", args.output.display()))?;
    let store = MetadataStore::new();
    let registry = CodecRegistry::default();
    let extractor = Extractor::new(&args.dir, &store, &registry);
    extractor
        .extract(&request, Box::new(out))
        .await
        .with_context(|| "extraction failed")?;
    println!("=== wrote {} ===", args.output.display());
    Ok(())
}
