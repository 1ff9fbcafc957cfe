// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};

const DEFAULT_SECRET_ENV: &str = "SEQORBIT_SECRET";

#[derive(Parser, Debug)]
#[command(
    name = "seqorbit",
    version,
    about = "Offloads genomic read classification to a Slurm cluster over SSH.",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < SEQORBIT_CONFIG_PATH < command-line flags.\n\
If --config is omitted, seqorbit tries SEQORBIT_CONFIG_PATH, then the default config file location; missing default config is OK.\n\
The login secret is read from the environment variable named by --secret-env, or from one line of standard input when that variable is unset."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, seqorbit uses SEQORBIT_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging and include logs from dependencies. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Directory retrieved artifacts are written to. Overrides `download_dir` from the config file."
    )]
    pub download_dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "NAME",
        help = "Staging directory name under the cluster scratch space. Overrides `staging_dir` from the config file."
    )]
    pub staging_dir: Option<String>,
    #[arg(
        long,
        global = true,
        help = "Print progress as one JSON object per line instead of text."
    )]
    pub json_progress: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Upload reads, build the reference index and classify the reads.
    Classify(ClassifyArgs),
    /// Turn the last classification output into an interactive HTML report.
    Aggregate(RemoteArgs),
    /// Extract the reads that were not assigned to any taxon.
    Extract(RemoteArgs),
    /// Print the headline metrics of a classification report. Runs locally.
    Summarize(SummarizeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    /// Cluster login node.
    #[arg(long, value_name = "HOST")]
    pub host: String,
    /// Login user name.
    #[arg(long = "user", value_name = "USER")]
    pub username: String,
    /// Scheduler account the job is charged to.
    #[arg(long, value_name = "ACCOUNT")]
    pub account: String,
    /// Environment variable holding the login secret.
    #[arg(long, value_name = "VAR", default_value = DEFAULT_SECRET_ENV)]
    pub secret_env: String,
}

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,
    /// Reference domain to index (repeatable).
    #[arg(long = "domain", value_name = "DOMAIN", required = true, action = clap::ArgAction::Append)]
    pub domains: Vec<String>,
    /// Read file; pass twice with --paired.
    #[arg(long, value_name = "PATH", required = true, num_args = 1, action = clap::ArgAction::Append)]
    pub reads: Vec<PathBuf>,
    /// Treat the two read files as mate pairs.
    #[arg(long)]
    pub paired: bool,
}

#[derive(Args, Debug)]
pub struct SummarizeArgs {
    /// Classification report (tab separated).
    pub report: PathBuf,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

const HELP_TEMPLATE: &str = r#"███████╗███████╗ ██████╗  ██████╗ ██████╗ ██████╗ ██╗████████╗
██╔════╝██╔════╝██╔═══██╗██╔═══██╗██╔══██╗██╔══██╗██║╚══██╔══╝
███████╗█████╗  ██║   ██║██║   ██║██████╔╝██████╔╝██║   ██║
╚════██║██╔══╝  ██║▄▄ ██║██║   ██║██╔══██╗██╔══██╗██║   ██║
███████║███████╗╚██████╔╝╚██████╔╝██║  ██║██████╔╝██║   ██║
╚══════╝╚══════╝ ╚══▀▀═╝  ╚═════╝ ╚═╝  ╚═╝╚═════╝ ╚═╝   ╚═╝

{before-help}{about-with-newline}{usage-heading} {usage}

{all-args}{after-help}
"#;

fn apply_help_template_recursively(cmd: &mut clap::Command) {
    let mut owned = std::mem::take(cmd);
    owned = owned.help_template(HELP_TEMPLATE);
    for sub in owned.get_subcommands_mut() {
        apply_help_template_recursively(sub);
    }
    *cmd = owned;
}

pub fn cli_command() -> clap::Command {
    let mut cmd = Opts::command();
    apply_help_template_recursively(&mut cmd);
    cmd
}

pub fn parse_opts() -> ParsedOpts {
    let cmd = cli_command();
    let matches = cmd.get_matches();
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Opts, clap::Error> {
        let matches = cli_command().try_get_matches_from(args)?;
        Opts::from_arg_matches(&matches)
    }

    #[test]
    fn command_definition_is_consistent() {
        cli_command().debug_assert();
    }

    #[test]
    fn classify_collects_repeated_flags() {
        let opts = parse(&[
            "seqorbit",
            "classify",
            "--host",
            "login.hpc.example.org",
            "--user",
            "alice",
            "--account",
            "proj01",
            "--domain",
            "viral",
            "--domain",
            "bacteria",
            "--reads",
            "s_1.fastq",
            "--reads",
            "s_2.fastq",
            "--paired",
            "--json-progress",
        ])
        .unwrap();
        assert!(opts.json_progress);
        let Cmd::Classify(args) = opts.cmd else {
            panic!("expected classify");
        };
        assert_eq!(args.domains, vec!["viral", "bacteria"]);
        assert_eq!(args.reads.len(), 2);
        assert!(args.paired);
        assert_eq!(args.remote.secret_env, "SEQORBIT_SECRET");
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let opts = parse(&[
            "seqorbit",
            "aggregate",
            "--host",
            "h",
            "--user",
            "u",
            "--account",
            "a",
            "--staging-dir",
            "run2",
            "--secret-env",
            "CLUSTER_PW",
        ])
        .unwrap();
        assert_eq!(opts.staging_dir.as_deref(), Some("run2"));
        let Cmd::Aggregate(args) = opts.cmd else {
            panic!("expected aggregate");
        };
        assert_eq!(args.secret_env, "CLUSTER_PW");
    }

    #[test]
    fn classify_requires_reads_and_domains() {
        let err = parse(&[
            "seqorbit", "classify", "--host", "h", "--user", "u", "--account", "a",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn there_is_no_secret_flag() {
        let err = parse(&[
            "seqorbit", "extract", "--host", "h", "--user", "u", "--account", "a", "--secret",
            "hunter2",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
