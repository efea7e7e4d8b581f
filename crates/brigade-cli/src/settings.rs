//! Store settings loaded from an optional TOML file.
//!
//! The file holds an `ObjectConfig`, for example:
//!
//! ```toml
//! chunk_size = 5000
//!
//! [brigade]
//! strict_state = false
//!
//! [brigade.shard]
//! shardWidth = 1000
//! pathDepth = 3
//! extension = ".jsonl"
//! ```
//!
//! Directories always come from the command line.

use std::path::Path;

use anyhow::Context;
use brigade_object::ObjectConfig;

/// Load settings from `path`, or defaults when no file is given.
pub fn load(path: Option<&Path>) -> anyhow::Result<ObjectConfig> {
    let Some(path) = path else {
        return Ok(ObjectConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    parse(&text).with_context(|| format!("parsing settings in {}", path.display()))
}

fn parse(text: &str) -> anyhow::Result<ObjectConfig> {
    Ok(toml::from_str(text)?)
}

/// Settings for the store at `dir`, with data files under `data_dir` if given.
pub fn for_store(base: &ObjectConfig, dir: &Path, data_dir: Option<&Path>) -> ObjectConfig {
    let mut config = base.clone();
    config.brigade.dir = dir.to_path_buf();
    config.brigade.data_dir = data_dir.map(Path::to_path_buf);
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = load(None).unwrap();
        assert_eq!(config, ObjectConfig::default());
    }

    #[test]
    fn parses_nested_tables() {
        let config = parse(
            r#"
            chunk_size = 5000

            [brigade]
            strict_state = false

            [brigade.poll]
            min_delay_ms = 10

            [brigade.shard]
            shardWidth = 100
            pathDepth = 4
            extension = ".jsonl"
            "#,
        )
        .unwrap();
        assert_eq!(config.chunk_size, 5000);
        assert!(!config.brigade.strict_state);
        assert_eq!(config.brigade.poll.min_delay_ms, 10);
        assert_eq!(config.brigade.poll.max_delay_ms, 10_000);
        assert_eq!(config.brigade.shard.shard_width, 100);
        assert_eq!(config.brigade.shard.path_depth, 4);
    }

    #[test]
    fn command_line_directories_win() {
        let base = parse("[brigade]\ndata_dir = \"/elsewhere\"\n").unwrap();
        let config = for_store(&base, Path::new("db/prev"), None);
        assert_eq!(config.brigade.dir, Path::new("db/prev"));
        assert_eq!(config.brigade.data_dir, None);

        let config = for_store(&base, Path::new("db/prev"), Some(Path::new("/data/prev")));
        assert_eq!(config.brigade.data_dir.as_deref(), Some(Path::new("/data/prev")));
    }

    #[test]
    fn unknown_shape_is_an_error() {
        assert!(parse("chunk_size = \"lots\"").is_err());
    }
}
