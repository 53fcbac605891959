//! Command-line surface and command handlers.

use crate::guard;
use crate::pipeline;
use crate::rewrite;
use crate::scanner;
use crate::settings;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ferry_core::artifact::MAPPING_FILE;
use ferry_core::{FerryConfig, KeySuffixMode, Mapping, Stages, UrlExtractor};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(about = "Move hosted image references into your own object store")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: ferry.toml when present)
    #[arg(long, global = true, env = "FERRY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan and plan, then optionally download, upload and emit the mapping
    Migrate(MigrateArgs),
    /// Replace old asset URLs using the mapping (dry run unless --write)
    Rewrite(RewriteArgs),
    /// Fail if any asset-host URL remains in the target paths
    Guard(GuardArgs),
}

#[derive(Args, Debug, Default)]
pub struct MigrateArgs {
    /// Repository root
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Artifact directory, relative to the root
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Download assets that have no local copy
    #[arg(long, default_value_t = false)]
    pub download: bool,

    /// Upload downloaded assets to the object store
    #[arg(long, default_value_t = false)]
    pub upload: bool,

    /// Write mapping.json
    #[arg(long, default_value_t = false)]
    pub emit_mapping: bool,

    /// Prefix for every storage key
    #[arg(long, env = "FERRY_KEY_PREFIX")]
    pub key_prefix: Option<String>,

    /// Disambiguate colliding keys with a content hash suffix
    #[arg(long, value_parser = parse_suffix_mode)]
    pub key_suffix: Option<KeySuffixMode>,

    /// Public URL of the bucket
    #[arg(long, env = "FERRY_PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,

    /// Cache-Control for uploaded objects
    #[arg(long)]
    pub cache_control: Option<String>,

    /// Assets downloaded or uploaded at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Migrate every match regardless of location
    #[arg(long, default_value_t = false)]
    pub allow_all: bool,

    /// Additional content segment to allow (repeatable)
    #[arg(long = "allow-segment")]
    pub allow_segments: Vec<String>,

    /// Additional asset path prefix to allow (repeatable)
    #[arg(long = "allow-prefix")]
    pub allow_prefixes: Vec<String>,

    /// Additional directory to scan (repeatable)
    #[arg(long = "extra-path")]
    pub extra_paths: Vec<PathBuf>,

    /// Scan content/ and --extra-path directories instead of the whole repository
    #[arg(long, default_value_t = false)]
    pub content_only: bool,
}

#[derive(Args, Debug, Default)]
pub struct RewriteArgs {
    /// Repository root
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Mapping file (default: <output-dir>/mapping.json)
    #[arg(long)]
    pub mapping: Option<PathBuf>,

    /// Write changes; without this flag nothing is modified
    #[arg(long, default_value_t = false)]
    pub write: bool,

    /// Also rewrite files under src/
    #[arg(long, default_value_t = false)]
    pub include_src: bool,

    /// Directory to rewrite (repeatable, default: content)
    #[arg(long = "path")]
    pub paths: Vec<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct GuardArgs {
    /// Repository root
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Directory to check (repeatable, default: content)
    #[arg(long = "path")]
    pub paths: Vec<PathBuf>,

    /// Also check files under src/
    #[arg(long, default_value_t = false)]
    pub include_src: bool,
}

fn parse_suffix_mode(value: &str) -> Result<KeySuffixMode, ferry_core::Error> {
    value.parse()
}

impl MigrateArgs {
    pub fn stages(&self) -> Stages {
        Stages {
            download: self.download,
            upload: self.upload,
            emit_mapping: self.emit_mapping,
        }
    }

    /// Layer flags over the loaded configuration.
    pub fn apply(&self, config: &mut FerryConfig) {
        if let Some(root) = &self.root {
            config.scan.root = root.clone();
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        if let Some(prefix) = &self.key_prefix {
            config.keys.prefix = Some(prefix.clone());
        }
        if self.key_suffix.is_some() {
            config.keys.suffix = self.key_suffix;
        }
        if let Some(base_url) = &self.public_base_url {
            config.publish.public_base_url = Some(base_url.clone());
        }
        if let Some(cache_control) = &self.cache_control {
            config.publish.cache_control = cache_control.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.workers.concurrency = concurrency;
        }
        config.scan.content_only |= self.content_only;
        config.scan.allow_all |= self.allow_all;
        config.scan.allow_segments.extend(self.allow_segments.iter().cloned());
        config.scan.allow_prefixes.extend(self.allow_prefixes.iter().cloned());
        config.scan.extra_paths.extend(self.extra_paths.iter().cloned());
    }
}

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = settings::load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Migrate(args) => {
            args.apply(&mut config);
            handle_migrate(&config, args.stages()).await
        }
        Command::Rewrite(args) => {
            if let Some(root) = args.root.clone() {
                config.scan.root = root;
            }
            handle_rewrite(&config, &args)
        }
        Command::Guard(args) => {
            if let Some(root) = args.root.clone() {
                config.scan.root = root;
            }
            handle_guard(&config, &args)
        }
    }
}

async fn handle_migrate(config: &FerryConfig, stages: Stages) -> Result<ExitCode> {
    let summary = pipeline::migrate(config, stages).await?;
    for line in summary.lines() {
        println!("{line}");
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_rewrite(config: &FerryConfig, args: &RewriteArgs) -> Result<ExitCode> {
    let root = &config.scan.root;
    let mapping_path = match &args.mapping {
        Some(path) => root.join(path),
        None => config.output_dir().join(MAPPING_FILE),
    };
    let mapping = Mapping::load(&mapping_path)
        .with_context(|| format!("failed to read mapping {}", mapping_path.display()))?
        .with_context(|| format!("mapping not found: {}", mapping_path.display()))?;

    let roots = scanner::target_roots(&args.paths, args.include_src);
    let files = scanner::collect_files(
        root,
        &roots,
        &config.scan.extensions,
        std::slice::from_ref(&config.output_dir),
    );
    let extractor = UrlExtractor::new(&config.source)?;
    let summary = rewrite::rewrite_files(root, &files, &extractor, &mapping, args.write);

    for line in summary.lines() {
        println!("{line}");
    }
    if summary.is_success() {
        return Ok(ExitCode::SUCCESS);
    }
    for failure in &summary.failures {
        eprintln!("ferry: failed to rewrite {}: {}", failure.file, failure.error);
    }
    Ok(ExitCode::FAILURE)
}

fn handle_guard(config: &FerryConfig, args: &GuardArgs) -> Result<ExitCode> {
    let root = &config.scan.root;
    let roots = scanner::target_roots(&args.paths, args.include_src);
    let files = scanner::collect_files(
        root,
        &roots,
        &config.scan.extensions,
        std::slice::from_ref(&config.output_dir),
    );
    let report = guard::guard(root, &files, &config.source)?;

    if report.is_clean() {
        for line in report.lines() {
            println!("{line}");
        }
        return Ok(ExitCode::SUCCESS);
    }
    for line in report.lines() {
        eprintln!("{line}");
    }
    Ok(ExitCode::FAILURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_flags_override_config() {
        let cli = Cli::try_parse_from([
            "ferry",
            "migrate",
            "--download",
            "--key-suffix",
            "sha8",
            "--key-prefix",
            "images",
            "--public-base-url",
            "https://public.example",
            "--concurrency",
            "2",
            "--allow-segment",
            "notes",
            "--extra-path",
            "src",
            "--content-only",
        ])
        .unwrap();
        let Command::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };

        let mut config = FerryConfig::default();
        args.apply(&mut config);
        assert!(args.stages().download && !args.stages().upload);
        assert_eq!(config.keys.suffix, Some(KeySuffixMode::Sha8));
        assert_eq!(config.keys.prefix.as_deref(), Some("images"));
        assert_eq!(config.public_base_url(), Some("https://public.example"));
        assert_eq!(config.workers.concurrency, 2);
        assert_eq!(config.scan.allow_segments, vec!["notes"]);
        assert_eq!(config.scan.extra_paths, vec![PathBuf::from("src")]);
        assert!(config.scan.content_only);
    }

    #[test]
    fn unknown_suffix_mode_is_rejected() {
        assert!(Cli::try_parse_from(["ferry", "migrate", "--key-suffix", "md5"]).is_err());
    }

    #[test]
    fn rewrite_and_guard_take_repeated_paths() {
        let cli = Cli::try_parse_from([
            "ferry", "rewrite", "--write", "--path", "docs", "--path", "notes",
        ])
        .unwrap();
        let Command::Rewrite(args) = cli.command else {
            panic!("expected rewrite");
        };
        assert!(args.write);
        assert_eq!(
            args.paths,
            vec![PathBuf::from("docs"), PathBuf::from("notes")]
        );

        let cli = Cli::try_parse_from(["ferry", "guard", "--include-src"]).unwrap();
        assert!(matches!(cli.command, Command::Guard(GuardArgs { include_src: true, .. })));
    }
}
