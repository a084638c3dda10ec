//! The `simvlm cache` command: cache keys and persistent store maintenance.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand};
use serde::Serialize;
use simvlm_core::cache::{text_cache_key, video_cache_key};
use simvlm_core::{Config, EmbeddingStore, ParamValue, ParameterSet};

/// Arguments for the `cache` command.
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Print the cache key of a text or (sub-)video lookup
    Key(KeyArgs),

    /// Show the location and size of the embedding store
    Stats(StoreArgs),

    /// Print the embedding stored under a cache key
    Get {
        /// Cache key, as printed by `simvlm cache key`
        key: String,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Delete every entry from the embedding store
    Reset(StoreArgs),
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Text to embed
    #[arg(long, conflicts_with = "video", required_unless_present = "video")]
    pub text: Option<String>,

    /// Video file to embed
    #[arg(long)]
    pub video: Option<String>,

    /// First frame of the sub-video (inclusive)
    #[arg(long, requires = "video")]
    pub start: Option<u64>,

    /// End frame of the sub-video (exclusive)
    #[arg(long, requires = "video")]
    pub end: Option<u64>,

    /// Model parameter as name=value; repeat for each parameter
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, ParamValue)>,
}

#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Store location; defaults to `cache.file` from the config
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Serialize)]
struct StoreStats {
    path: PathBuf,
    entries: usize,
}

#[derive(Serialize)]
struct StoredEmbedding<'a> {
    key: &'a str,
    dim: usize,
    values: &'a [f32],
}

pub fn execute(args: CacheArgs, config: &Config) -> anyhow::Result<()> {
    match args.command {
        CacheCommand::Key(args) => {
            println!("{}", cache_key(&args));
        }

        CacheCommand::Stats(args) => {
            let store = open_store(&args, config)?;
            let stats = StoreStats {
                path: store.path().to_path_buf(),
                entries: store.len()?,
            };
            println!("{}", serde_json::to_string_pretty(&stats)?);
            store.close()?;
        }

        CacheCommand::Get { key, store } => {
            let store = open_store(&store, config)?;
            let embedding = store
                .get(&key)?
                .with_context(|| format!("No embedding stored under {key}"))?;
            let output = StoredEmbedding {
                key: &key,
                dim: embedding.dim(),
                values: embedding.as_slice(),
            };
            println!("{}", serde_json::to_string(&output)?);
        }

        CacheCommand::Reset(args) => {
            let store = open_store(&args, config)?;
            let removed = store.clear()?;
            tracing::info!("Removed {} entries from {}", removed, store.path().display());
            println!("Removed {removed} entries");
            store.close()?;
        }
    }

    Ok(())
}

fn cache_key(args: &KeyArgs) -> String {
    let params: ParameterSet = args.params.iter().cloned().collect();
    match (&args.text, &args.video) {
        (Some(text), _) => text_cache_key(&params, text),
        (None, video) => video_cache_key(
            &params,
            video.as_deref().unwrap_or_default(),
            args.start,
            args.end,
        ),
    }
}

fn open_store(args: &StoreArgs, config: &Config) -> anyhow::Result<EmbeddingStore> {
    let path = args
        .file
        .clone()
        .or_else(|| config.cache.resolved_file())
        .context("No embedding store configured; pass --file or set cache.file")?;
    EmbeddingStore::open(&path, false)
        .with_context(|| format!("Failed to open embedding store at {}", path.display()))
}

fn parse_param(raw: &str) -> Result<(String, ParamValue), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))?;
    if name.is_empty() {
        return Err(format!("empty parameter name in {raw:?}"));
    }
    Ok((name.to_string(), ParamValue::parse(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use simvlm_core::Embedding;
    use tempfile::tempdir;

    fn key_args(text: Option<&str>, video: Option<&str>) -> KeyArgs {
        KeyArgs {
            text: text.map(String::from),
            video: video.map(String::from),
            start: None,
            end: None,
            params: vec![
                parse_param("num_frames=8").unwrap(),
                parse_param("checkpoint=ViT-B/32").unwrap(),
            ],
        }
    }

    #[test]
    fn test_parse_param_types() {
        assert_eq!(parse_param("n=8").unwrap().1, ParamValue::Int(8));
        assert_eq!(parse_param("flip=true").unwrap().1, ParamValue::Bool(true));
        assert_eq!(
            parse_param("ckpt=a=b").unwrap(),
            ("ckpt".to_string(), ParamValue::Str("a=b".to_string()))
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
    }

    #[test]
    fn test_text_key_matches_library() {
        assert_eq!(
            cache_key(&key_args(Some("cat"), None)),
            r#"{"checkpoint":"ViT-B/32","num_frames":8,"text":"cat"}"#
        );
    }

    #[test]
    fn test_video_key_includes_bounds() {
        let mut args = key_args(None, Some("clips/a.mp4"));
        args.start = Some(0);
        args.end = Some(32);
        let key = cache_key(&args);
        assert!(key.contains(r#""subvideo_end_frame":32"#));
        assert!(key.contains(r#""video_path":"clips/a.mp4""#));
    }

    #[test]
    fn test_store_commands_use_explicit_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("embeddings.db");
        let store = EmbeddingStore::open(&file, false).unwrap();
        store.put("k", &Embedding::new(vec![1.0, 2.0])).unwrap();
        store.close().unwrap();

        let config = Config::default();
        let args = StoreArgs {
            file: Some(file.clone()),
        };
        execute(
            CacheArgs {
                command: CacheCommand::Reset(StoreArgs {
                    file: Some(file.clone()),
                }),
            },
            &config,
        )
        .unwrap();

        let store = open_store(&args, &config).unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_missing_store_location_is_an_error() {
        let mut config = Config::default();
        config.cache.file = None;
        let err = open_store(&StoreArgs { file: None }, &config).err().unwrap();
        assert!(err.to_string().contains("No embedding store configured"));
    }
}
