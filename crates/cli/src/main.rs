//! `geoindex` command line.
//!
//! Results are written to stdout as JSON; failures go to stderr as
//! `{"error":{"kind":...,"message":...}}` with a non-zero exit status.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use geoindex::{AddOptions, Index, IndexError, InfoOptions, ListOptions, Result};
use geoindex_artifacts::{
    ArtifactCache, ArtifactConfig, BuildOptions, Builder, Thumbnail, ThumbnailTarget, TileRequest,
};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(name = "geoindex", author, version, about = "Index and serve geospatial datasets")]
struct Cli {
    /// Dataset root holding the `.ddb` index.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Password for protected indexes.
    #[arg(long, global = true, env = "GEOINDEX_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Where tiles and thumbnails are cached.
    #[arg(long, global = true, env = "GEOINDEX_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an empty index in the dataset root
    Init,
    /// Add files and directories to the index
    Add {
        /// Files or directories inside the root; relative paths start at
        /// the working directory
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Remove paths (and their descendants) from the index
    Rm {
        /// Relative paths start at the working directory
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List indexed entries
    Ls {
        /// Relative paths start at the working directory; the root when empty
        paths: Vec<PathBuf>,
        #[arg(short, long)]
        recursive: bool,
        #[arg(short = 'd', long, default_value_t = 0, allow_negative_numbers = true)]
        max_depth: i32,
    },
    /// Describe files without indexing them
    Info {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(short, long)]
        recursive: bool,
        #[arg(short = 'd', long, default_value_t = 0, allow_negative_numbers = true)]
        max_depth: i32,
        #[arg(long)]
        with_hash: bool,
        /// Report failing paths instead of aborting
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Rename an entry inside the index; relative paths start at the
    /// working directory
    Mv { source: PathBuf, dest: PathBuf },
    /// Read or change index attributes (`key=json`, `key=null` deletes)
    Chattr { changes: Vec<String> },
    /// Read or change the dataset tag
    Tag {
        #[command(subcommand)]
        action: Option<TagCommand>,
    },
    /// Read or change the last sync time of a registry
    Sync {
        #[command(subcommand)]
        action: SyncCommand,
    },
    /// Differences that turn the source index into the target index
    Delta {
        source: PathBuf,
        target: PathBuf,
        /// Print `ADD`/`DEL` lines instead of JSON
        #[arg(long)]
        text: bool,
    },
    /// Print the index stamp
    Stamp,
    /// Manage metadata records
    Meta {
        #[command(subcommand)]
        action: MetaCommand,
    },
    /// Manage index passwords
    Password {
        #[command(subcommand)]
        action: PasswordCommand,
    },
    /// Build derived products for buildable assets
    Build {
        source: Option<String>,
        /// Output folder; `<root>/.ddb/build` by default
        #[arg(long)]
        dest: Option<PathBuf>,
        #[arg(short, long)]
        force: bool,
    },
    /// Generate a JPEG thumbnail
    Thumb {
        file: PathBuf,
        #[arg(short, long, default_value_t = 512)]
        size: u32,
        /// Write to this file; raw JPEG goes to stdout otherwise
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Treat FILE as an indexed path and reuse its stored hash
        #[arg(long)]
        indexed: bool,
    },
    /// Render a Web Mercator map tile
    Tile {
        file: PathBuf,
        z: u8,
        x: u32,
        y: u32,
        #[arg(long = "size", default_value_t = geoindex_artifacts::tile::DEFAULT_TILE_SIZE)]
        tile_size: u32,
        #[arg(long)]
        tms: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        indexed: bool,
    },
    /// Print the library version
    Version,
}

#[derive(Debug, Subcommand)]
enum TagCommand {
    Get,
    Set { tag: String },
    Clear,
}

#[derive(Debug, Subcommand)]
enum SyncCommand {
    Get {
        /// Registry URL; the default registry when omitted.
        #[arg(long)]
        registry: Option<String>,
    },
    Set {
        #[arg(long)]
        registry: Option<String>,
        /// Epoch seconds; omitted or `0` clears the cursor.
        #[arg(long)]
        time: Option<i64>,
    },
}

#[derive(Debug, Subcommand)]
enum MetaCommand {
    /// Append a record
    Add(MetaWrite),
    /// Replace the newest record for a key
    Set(MetaWrite),
    /// Show the newest record for a key
    Get(MetaKey),
    /// Delete a record by id
    Rm { id: String },
    /// Delete every record for a key
    Unset(MetaKey),
    /// Keys and record counts
    Ls {
        #[arg(long, default_value = "")]
        path: String,
    },
}

#[derive(Debug, Args)]
struct MetaKey {
    key: String,
    /// Entry the record is attached to; dataset-global when omitted.
    #[arg(long, default_value = "")]
    path: String,
}

#[derive(Debug, Args)]
struct MetaWrite {
    #[command(flatten)]
    target: MetaKey,
    /// JSON value; plain text is stored as a string.
    data: String,
}

#[derive(Debug, Subcommand)]
enum PasswordCommand {
    Append { password: String },
    Verify { password: String },
    Clear,
}

enum Output {
    Json(Value),
    Text(String),
    Raw(Vec<u8>),
}

impl Output {
    fn json(value: impl Serialize) -> Result<Self> {
        serde_json::to_value(value)
            .map(Output::Json)
            .map_err(|error| IndexError::Validation(format!("failed to encode output: {error}")))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(cli) {
        Ok(output) => {
            let mut stdout = std::io::stdout().lock();
            let written = match output {
                Output::Json(value) => serde_json::to_writer_pretty(&mut stdout, &value)
                    .map_err(std::io::Error::from)
                    .and_then(|()| writeln!(stdout)),
                Output::Text(text) => write!(stdout, "{text}"),
                Output::Raw(bytes) => stdout.write_all(&bytes),
            };
            match written {
                Ok(()) => ExitCode::SUCCESS,
                Err(error) => {
                    log::error!("failed to write output: {error}");
                    ExitCode::FAILURE
                }
            }
        }
        Err(error) => {
            eprintln!(
                "{}",
                json!({ "error": { "kind": error.kind(), "message": error.to_string() } })
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<Output> {
    let root = cli.root.as_path();
    let password = cli.password.as_deref();

    match cli.command {
        Command::Init => {
            let dir = Index::init(root)?;
            Output::json(json!({ "index": dir }))
        }
        Command::Add { paths, recursive } => {
            let index = open_authorized(root, password)?;
            let paths = absolutize(&working_dir()?, paths);
            Output::json(index.add(&paths, AddOptions { recursive })?)
        }
        Command::Rm { paths } => {
            let index = open_authorized(root, password)?;
            Output::json(index.remove(&absolutize(&working_dir()?, paths))?)
        }
        Command::Ls {
            paths,
            recursive,
            max_depth,
        } => {
            let index = Index::open(root)?;
            let paths = if paths.is_empty() {
                vec![root.to_path_buf()]
            } else {
                absolutize(&working_dir()?, paths)
            };
            Output::json(index.list(&paths, ListOptions { recursive, max_depth })?)
        }
        Command::Info {
            paths,
            recursive,
            max_depth,
            with_hash,
            continue_on_error,
        } => {
            let options = InfoOptions {
                recursive,
                max_depth,
                with_hash,
                stop_on_error: !continue_on_error,
            };
            Output::json(geoindex::info(&paths, options)?)
        }
        Command::Mv { source, dest } => {
            let index = open_authorized(root, password)?;
            let cwd = working_dir()?;
            let (source, dest) = (in_dir(&cwd, source), in_dir(&cwd, dest));
            index.move_entry(&source, &dest)?;
            Output::json(json!({ "moved": index.resolve(&dest)? }))
        }
        Command::Chattr { changes } => {
            let changes = parse_changes(&changes)?;
            let index = if changes.is_empty() {
                Index::open(root)?
            } else {
                open_authorized(root, password)?
            };
            Output::json(index.change_attributes(&changes)?)
        }
        Command::Tag { action } => match action {
            None | Some(TagCommand::Get) => {
                Output::json(json!({ "tag": Index::open(root)?.get_tag() }))
            }
            Some(TagCommand::Set { tag }) => {
                let index = open_authorized(root, password)?;
                index.set_tag(&tag)?;
                Output::json(json!({ "tag": index.get_tag() }))
            }
            Some(TagCommand::Clear) => {
                let cleared = open_authorized(root, password)?.clear_tag()?;
                Output::json(json!({ "cleared": cleared }))
            }
        },
        Command::Sync { action } => match action {
            SyncCommand::Get { registry } => {
                let index = Index::open(root)?;
                Output::json(json!({ "last_sync": index.get_last_sync(registry.as_deref()) }))
            }
            SyncCommand::Set { registry, time } => {
                let index = open_authorized(root, password)?;
                index.set_last_sync(registry.as_deref(), time)?;
                Output::json(json!({ "last_sync": index.get_last_sync(registry.as_deref()) }))
            }
        },
        Command::Delta {
            source,
            target,
            text,
        } => {
            let delta = geoindex::delta(&source, &target)?;
            if text {
                Ok(Output::Text(delta.to_string()))
            } else {
                Output::json(delta)
            }
        }
        Command::Stamp => Output::json(Index::open(root)?.stamp()),
        Command::Meta { action } => run_meta(root, password, action),
        Command::Password { action } => {
            let index = Index::open(root)?;
            match action {
                PasswordCommand::Append { password: new } => {
                    index.authorize(password)?;
                    index.append_password(&new)?;
                    Output::json(json!({ "protected": true }))
                }
                PasswordCommand::Verify { password: candidate } => {
                    Output::json(json!({ "valid": index.verify_password(&candidate) }))
                }
                PasswordCommand::Clear => {
                    index.authorize(password)?;
                    index.clear_passwords()?;
                    Output::json(json!({ "protected": false }))
                }
            }
        }
        Command::Build {
            source,
            dest,
            force,
        } => {
            let index = open_authorized(root, password)?;
            let builder = Builder::new(&index, artifact_config(cli.cache_dir));
            let report = builder.build(source.as_deref(), dest.as_deref(), BuildOptions { force })?;
            Output::json(report)
        }
        Command::Thumb {
            file,
            size,
            out,
            indexed,
        } => {
            let cache = ArtifactCache::new(artifact_config(cli.cache_dir));
            let target = match out {
                Some(dest) => ThumbnailTarget::File(dest),
                None => ThumbnailTarget::Memory,
            };
            let thumbnail = if indexed {
                let index = Index::open(root)?;
                cache.thumbnail_for_entry(&index, &path_arg(&file), size, target)?
            } else {
                cache.generate_thumbnail(&file, size, target)?
            };
            match thumbnail {
                Thumbnail::File(path) => Output::json(json!({ "thumbnail": path })),
                Thumbnail::Memory(bytes) => Ok(Output::Raw(bytes)),
            }
        }
        Command::Tile {
            file,
            z,
            x,
            y,
            tile_size,
            tms,
            force,
            indexed,
        } => {
            let cache = ArtifactCache::new(artifact_config(cli.cache_dir));
            let request = TileRequest {
                tile_size,
                tms,
                force_recreate: force,
                ..TileRequest::new(z, x, y)
            };
            let tile = if indexed {
                let index = Index::open(root)?;
                cache.tile_for_entry(&index, &path_arg(&file), &request)?
            } else {
                cache.generate_tile(&file, &request)?
            };
            Output::json(json!({ "tile": tile }))
        }
        Command::Version => Output::json(json!({ "version": geoindex::version() })),
    }
}

fn run_meta(root: &Path, password: Option<&str>, action: MetaCommand) -> Result<Output> {
    match action {
        MetaCommand::Add(write) => {
            let index = open_authorized(root, password)?;
            let data = parse_value(&write.data);
            Output::json(index.meta().add(&write.target.path, &write.target.key, &data)?)
        }
        MetaCommand::Set(write) => {
            let index = open_authorized(root, password)?;
            let data = parse_value(&write.data);
            Output::json(index.meta().set(&write.target.path, &write.target.key, &data)?)
        }
        MetaCommand::Get(target) => {
            let index = Index::open(root)?;
            let record = index.meta().get(&target.path, &target.key)?.ok_or_else(|| {
                IndexError::NotFound(format!("no metadata for key {}", target.key))
            })?;
            Output::json(record)
        }
        MetaCommand::Rm { id } => {
            let removed = open_authorized(root, password)?.meta().remove(&id)?;
            Output::json(json!({ "removed": removed }))
        }
        MetaCommand::Unset(target) => {
            let index = open_authorized(root, password)?;
            let removed = index.meta().unset(&target.path, &target.key)?;
            Output::json(json!({ "removed": removed }))
        }
        MetaCommand::Ls { path } => Output::json(Index::open(root)?.meta().list(&path)?),
    }
}

/// Paths given on the command line name files the way a shell sees them,
/// whatever `--root` points at.
fn absolutize(cwd: &Path, paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.into_iter().map(|path| in_dir(cwd, path)).collect()
}

fn in_dir(cwd: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

fn working_dir() -> Result<PathBuf> {
    std::env::current_dir().map_err(|error| IndexError::io(".", error))
}

fn open_authorized(root: &Path, password: Option<&str>) -> Result<Index> {
    let index = Index::open(root)?;
    index.authorize(password)?;
    Ok(index)
}

fn artifact_config(cache_dir: Option<PathBuf>) -> ArtifactConfig {
    match cache_dir {
        Some(dir) => ArtifactConfig::with_cache_dir(dir),
        None => ArtifactConfig::default(),
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// JSON when it parses, otherwise the raw text as a string.
fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn parse_changes(changes: &[String]) -> Result<BTreeMap<String, Value>> {
    changes
        .iter()
        .map(|change| {
            let (key, value) = change.split_once('=').ok_or_else(|| {
                IndexError::Validation(format!("expected key=value, got {change:?}"))
            })?;
            Ok((key.trim().to_string(), parse_value(value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_subcommands() {
        let cli = Cli::try_parse_from([
            "geoindex", "--root", "/data", "meta", "set", "annotation", "{\"a\":1}", "--path",
            "ortho.tif",
        ])
        .unwrap();
        assert_eq!(cli.root, PathBuf::from("/data"));
        match cli.command {
            Command::Meta {
                action: MetaCommand::Set(write),
            } => {
                assert_eq!(write.target.key, "annotation");
                assert_eq!(write.target.path, "ortho.tif");
                assert_eq!(parse_value(&write.data), json!({ "a": 1 }));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn negative_depth_reaches_the_library() {
        let cli = Cli::try_parse_from(["geoindex", "ls", "--max-depth", "-1"]).unwrap();
        assert!(matches!(cli.command, Command::Ls { max_depth: -1, .. }));
    }

    #[test]
    fn attribute_changes() {
        let changes = parse_changes(&["public=true".into(), "name=My data".into(), "x=null".into()])
            .unwrap();
        assert_eq!(changes["public"], json!(true));
        assert_eq!(changes["name"], json!("My data"));
        assert!(changes["x"].is_null());
        assert!(parse_changes(&["novalue".into()]).is_err());
    }

    #[test]
    fn relative_arguments_start_at_the_working_directory() {
        let cli = Cli::try_parse_from([
            "geoindex", "--root", "data", "add", "data/a.tif", "/abs/b.tif",
        ])
        .unwrap();
        let Command::Add { paths, .. } = cli.command else {
            panic!("expected add command");
        };
        assert_eq!(
            absolutize(Path::new("/work"), paths),
            vec![PathBuf::from("/work/data/a.tif"), PathBuf::from("/abs/b.tif")]
        );
    }

    #[test]
    fn tile_defaults() {
        let cli = Cli::try_parse_from(["geoindex", "tile", "a.tif", "3", "4", "2", "--tms"]).unwrap();
        let Command::Tile { tile_size, tms, force, .. } = cli.command else {
            panic!("expected tile command");
        };
        assert_eq!(tile_size, 256);
        assert!(tms && !force);
    }
}
