use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use svnc_core::association::Association;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) target: Target,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Which repository to talk to. Without flags the last used saved server is picked.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct Target {
    /// Id of a saved server
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Repository URL for a one-off connection
    #[arg(long, global = true, conflicts_with = "server")]
    pub url: Option<String>,

    /// Username, overriding the saved one
    #[arg(long, short = 'u', global = true)]
    pub username: Option<String>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Manage saved servers
    #[command(subcommand)]
    Servers(ServersCommand),
    /// List a directory, optionally expanding subdirectories inline
    Ls(LsArgs),
    /// Download files and directories
    Download(DownloadArgs),
    /// Upload local files, replacing remote files that already exist
    Upload(UploadArgs),
    /// Delete a remote file or directory
    Rm(RmArgs),
    /// Create a remote directory
    Mkdir(MkdirArgs),
    /// Show the history of a path
    Log(PathArgs),
    /// Print file content, optionally at a revision
    Cat(CatArgs),
    /// Open a path the way its extension is associated
    Open(PathArgs),
    /// Manage extension associations
    #[command(subcommand)]
    Assoc(AssocCommand),
    /// Print version information
    Version,
}

#[derive(Subcommand)]
pub(crate) enum ServersCommand {
    /// List saved servers
    List,
    /// Verify and save a server
    Add(AddServerArgs),
    /// Forget a saved server
    Remove { id: String },
    /// Make a saved server the default
    Use { id: String },
}

#[derive(Args, Debug)]
pub(crate) struct AddServerArgs {
    /// Repository URL
    pub url: String,

    /// Display name
    #[arg(long)]
    pub alias: Option<String>,

    /// Id to update; a new one is generated when omitted
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Subcommand)]
pub(crate) enum AssocCommand {
    /// Show the association table
    List,
    /// Associate an extension with a handling mode
    Set { extension: String, mode: Association },
    /// Drop an association; the extension opens externally afterwards
    Remove { extension: String },
}

#[derive(Args, Debug)]
pub(crate) struct PathArgs {
    /// Path relative to the repository root, or a full URL
    pub path: String,
}

#[derive(Args, Debug)]
pub(crate) struct LsArgs {
    /// Directory relative to the repository root, or a full URL
    pub path: Option<String>,

    /// Subdirectory to expand, relative to the listed directory; repeatable
    #[arg(long, short = 'e', value_name = "DIR")]
    pub expand: Vec<String>,
}

#[derive(Args, Debug)]
pub(crate) struct DownloadArgs {
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Destination directory
    #[arg(long, short = 'd', default_value = ".")]
    pub dest: PathBuf,
}

#[derive(Args, Debug)]
pub(crate) struct UploadArgs {
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Remote directory, relative to the repository root
    #[arg(long)]
    pub dir: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct RmArgs {
    pub path: String,

    /// Commit message
    #[arg(long, short = 'm')]
    pub message: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct MkdirArgs {
    /// New directory, relative to the repository root
    pub path: String,

    /// Commit message
    #[arg(long, short = 'm')]
    pub message: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct CatArgs {
    pub path: String,

    /// Revision to read instead of HEAD
    #[arg(long, short = 'r')]
    pub revision: Option<u64>,
}

pub(crate) fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_target_after_subcommand() {
        let cli = Cli::try_parse_from(["svnc", "ls", "src", "--server", "work", "-e", "bin"])
            .unwrap();
        assert_eq!(cli.target.server.as_deref(), Some("work"));
        match cli.command {
            Commands::Ls(args) => {
                assert_eq!(args.path.as_deref(), Some("src"));
                assert_eq!(args.expand, vec!["bin".to_string()]);
            }
            _ => panic!("expected ls"),
        }
    }

    #[test]
    fn test_assoc_set_parses_mode() {
        let cli = Cli::try_parse_from(["svnc", "assoc", "set", ".LOG", "internal"]).unwrap();
        match cli.command {
            Commands::Assoc(AssocCommand::Set { extension, mode }) => {
                assert_eq!(extension, ".LOG");
                assert_eq!(mode, Association::Internal);
            }
            _ => panic!("expected assoc set"),
        }
    }

    #[test]
    fn test_url_conflicts_with_server() {
        let result = Cli::try_parse_from([
            "svnc",
            "--server",
            "work",
            "--url",
            "https://svn.example.com/repo",
            "ls",
        ]);
        assert!(result.is_err());
    }
}
