use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "archivetube")]
#[command(author, version, about = "Browse and play local video archives in the browser")]
#[command(subcommand_negates_reqs = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub run: RunArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Arguments of the default mode: register, re-index and serve.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Register an archive directory before indexing
    #[arg(short = 'f', long = "folder", value_name = "ARCHIVEDIR")]
    pub folder: Option<PathBuf>,

    /// Treat the registered folder as a parent and discover archives below it
    #[arg(short, long, requires = "folder")]
    pub recursive: bool,

    /// Stop after indexing instead of starting the server
    #[arg(long)]
    pub no_serve: bool,

    /// Address to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Videos per page on channel listings
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Working directory holding tube.db
    #[arg(value_name = "DIR", required = true)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create an empty metadata store in DIR
    Init {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Recalculate archive statistics for DIR
    Stats {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recursive_registration() {
        let cli = Cli::try_parse_from(["archivetube", "-r", "-f", "/srv/archives", "/srv/tube"])
            .unwrap();
        assert!(cli.command.is_none());
        assert!(cli.run.recursive);
        assert_eq!(cli.run.folder, Some(PathBuf::from("/srv/archives")));
        assert_eq!(cli.run.dir, Some(PathBuf::from("/srv/tube")));
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["archivetube", "init", "data"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Init { dir }) if dir == PathBuf::from("data")));

        let cli = Cli::try_parse_from(["archivetube", "-v", "stats", "data"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Commands::Stats { .. })));
    }

    #[test]
    fn dir_is_required_without_subcommand() {
        assert!(Cli::try_parse_from(["archivetube", "--no-serve"]).is_err());
    }

    #[test]
    fn recursive_needs_a_folder() {
        assert!(Cli::try_parse_from(["archivetube", "-r", "data"]).is_err());
    }
}
