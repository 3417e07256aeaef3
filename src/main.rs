use clap::{Args, Parser, Subcommand};
use derive_more::{Display, Error};
use exn::ResultExt;
use folio_config::Loader;
use folio_library::{Failure, Gallery, ThumbnailQuery};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

type Error = exn::Exn<ErrorKind>;
type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not set up the gallery")]
    Gallery,
    #[display("could not write output")]
    Output,
}

#[derive(Parser)]
#[command(name = "folio", version)]
#[command(about = "Browse a photo album tree and render album thumbnails")]
struct Cli {
    /// Configuration file (default: ./folio.toml, then the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Photo tree root, overriding `static_files` from the configuration
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the albums and photos directly inside an album, with their URLs
    List {
        /// Album path, relative to the photo tree root ("/" for the root)
        album: String,
    },
    /// Print the photo that represents an album
    Resolve { album: String },
    /// Render an album's thumbnail
    Thumbnail(ThumbnailArgs),
    /// Delete every derived thumbnail from the scratch directory
    Purge,
}

#[derive(Args)]
struct ThumbnailArgs {
    album: String,

    /// Where to write the image; "-" for stdout
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// JPEG quality, 1-100
    #[arg(long)]
    quality: Option<u8>,

    /// Serve the same thumbnail this many times; only the first is written out
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    repeat: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        // Stdout may be carrying image bytes.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(failure)) => {
            eprintln!("{failure}");
            ExitCode::FAILURE
        },
        Err(e) => {
            eprintln!("error: {e:?}");
            ExitCode::FAILURE
        },
    }
}

/// Outer error: folio couldn't run at all. Inner error: the request failed.
async fn run(cli: Cli) -> Result<std::result::Result<(), Failure>> {
    let mut loader = Loader::new();
    if let Some(config) = cli.config {
        loader = loader.file(config);
    }
    if let Some(root) = cli.root {
        loader = loader.static_files(root);
    }
    let config = loader.load().or_raise(|| ErrorKind::Config)?;
    let gallery = Gallery::new(&config).or_raise(|| ErrorKind::Gallery)?;

    match cli.command {
        Command::List { album } => list(&gallery, &album).await,
        Command::Resolve { album } => resolve(&gallery, &album).await,
        Command::Thumbnail(args) => thumbnail(&gallery, args).await,
        Command::Purge => match gallery.purge().await {
            Ok(removed) => {
                println!("{removed} files removed");
                Ok(Ok(()))
            },
            Err(e) => Ok(Err(Failure::from(&*e))),
        },
    }
}

async fn list(gallery: &Gallery, album: &str) -> Result<std::result::Result<(), Failure>> {
    let album = match Gallery::friendly_path(album) {
        Ok(album) => album,
        Err(e) => return Ok(Err(Failure::from(&*e))),
    };
    let listing = match gallery.list(&album).await {
        Ok(listing) => listing,
        Err(e) => return Ok(Err(Failure::from(&*e))),
    };
    let mut lines = format!("{}\n", gallery.album_title(&album));
    for entry in listing {
        let url = gallery.entry_url(&album, &entry);
        let suffix = if entry.is_album() { "/" } else { "" };
        lines.push_str(&format!("{}{suffix}\t{url}\n", entry.name()));
    }
    let mut stdout = tokio::io::stdout();
    stdout.write_all(lines.as_bytes()).await.or_raise(|| ErrorKind::Output)?;
    stdout.flush().await.or_raise(|| ErrorKind::Output)?;
    Ok(Ok(()))
}

async fn resolve(gallery: &Gallery, album: &str) -> Result<std::result::Result<(), Failure>> {
    let source = match Gallery::friendly_path(album) {
        Ok(album) => gallery.resolve(&album).await,
        Err(e) => Err(e),
    };
    match source {
        Ok(source) => {
            println!("{}", source.display());
            Ok(Ok(()))
        },
        Err(e) => Ok(Err(Failure::from(&*e))),
    }
}

async fn thumbnail(gallery: &Gallery, args: ThumbnailArgs) -> Result<std::result::Result<(), Failure>> {
    let query = ThumbnailQuery {
        width: args.width,
        height: args.height,
        quality: args.quality,
    };
    let mut output: Box<dyn AsyncWrite + Unpin + Send> = if args.output.as_os_str() == "-" {
        Box::new(tokio::io::stdout())
    } else {
        Box::new(tokio::fs::File::create(&args.output).await.or_raise(|| ErrorKind::Output)?)
    };
    for attempt in 1..=args.repeat {
        let mut sink = tokio::io::sink();
        let response: &mut (dyn AsyncWrite + Unpin + Send) = if attempt == 1 { &mut *output } else { &mut sink };
        match gallery.resolve_and_serve(&args.album, &query, response).await {
            Ok(served) => tracing::info!(
                attempt,
                origin = %served.origin,
                source = %served.source.display(),
                bytes = served.bytes,
                "Thumbnail served"
            ),
            Err(failure) => return Ok(Err(failure)),
        }
    }
    output.shutdown().await.or_raise(|| ErrorKind::Output)?;
    Ok(Ok(()))
}
