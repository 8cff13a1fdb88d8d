use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Grounded question answering over uploaded documents.
#[derive(Debug, Parser)]
#[command(name = "docqa", version, about)]
pub(crate) struct Cli {
    /// Configuration file (defaults to `DOCQA_CONFIG` or `config/default.toml`).
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub(crate) json: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Upload files, or every supported file under a directory, and index them.
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List documents and their processing status.
    List,
    /// Show one document.
    Show { id: String },
    /// Delete a document and all of its indexed chunks.
    Delete {
        id: String,
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },
    /// Re-run extraction and indexing for an indexed or failed document.
    Reprocess { id: String },
    /// Ask one question.
    Query {
        question: String,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Print the retrieved passages instead of generating an answer.
        #[arg(long)]
        retrieve_only: bool,
    },
    /// Interactive question loop.
    Chat {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Provider, storage and index statistics.
    Stats,
}

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct ScopeArgs {
    /// Restrict answers to one document instead of the whole knowledge base.
    #[arg(long)]
    pub(crate) document: Option<String>,

    /// Number of passages to retrieve.
    #[arg(long)]
    pub(crate) top_k: Option<usize>,

    /// Upload these files first (useful with ephemeral storage).
    #[arg(long = "load", value_name = "PATH")]
    pub(crate) load: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_upload_with_global_flags() {
        let cli = Cli::try_parse_from([
            "docqa", "upload", "a.pdf", "docs/", "--config", "x.toml", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        let Command::Upload { paths } = cli.command else {
            panic!("expected upload");
        };
        assert_eq!(paths, vec![PathBuf::from("a.pdf"), PathBuf::from("docs/")]);
    }

    #[test]
    fn upload_requires_a_path() {
        assert!(Cli::try_parse_from(["docqa", "upload"]).is_err());
    }

    #[test]
    fn parse_scoped_query() {
        let cli = Cli::try_parse_from([
            "docqa",
            "query",
            "What is SR 11-7?",
            "--document",
            "abc",
            "--top-k",
            "3",
            "--load",
            "policy.pdf",
        ])
        .unwrap();
        let Command::Query {
            question,
            scope,
            retrieve_only,
        } = cli.command
        else {
            panic!("expected query");
        };
        assert_eq!(question, "What is SR 11-7?");
        assert_eq!(scope.document.as_deref(), Some("abc"));
        assert_eq!(scope.top_k, Some(3));
        assert_eq!(scope.load, vec![PathBuf::from("policy.pdf")]);
        assert!(!retrieve_only);
    }

    #[test]
    fn parse_delete_yes() {
        let cli = Cli::try_parse_from(["docqa", "delete", "abc", "-y"]).unwrap();
        assert!(matches!(cli.command, Command::Delete { yes: true, .. }));
    }
}
