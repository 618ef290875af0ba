use crate::config::EngineKind;
use crate::ident::Identifier;
use std::path::PathBuf;
use structopt::StructOpt;

/// Clone databases under a prefixed name and provision least-privilege
/// credentials for the copies
#[derive(Debug, StructOpt)]
pub struct Cli {
    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Clone and provision the configured databases
    Clone {
        /// The path to the config file
        #[structopt(short, long, parse(from_os_str))]
        file: PathBuf,

        /// Source databases, comma separated (overrides `databases`)
        #[structopt(long, use_delimiter = true)]
        databases: Option<Vec<Identifier>>,

        /// Target name prefix (overrides `prefix`)
        #[structopt(long)]
        prefix: Option<String>,

        /// postgres or mongodb (overrides `engine`)
        #[structopt(short, long)]
        engine: Option<EngineKind>,

        /// Dry run
        #[structopt(short, long)]
        dryrun: bool,
    },

    /// Validate target file
    Validate {
        /// The path to the file or directory to read
        #[structopt(short, long, default_value = ".", parse(from_os_str))]
        file: PathBuf,
    },

    /// Generate random password
    GenPass {
        /// The password length
        #[structopt(short, long, default_value = "24")]
        length: u8,
        /// The username, using to create md5 hash
        #[structopt(short, long)]
        username: Option<String>,
        /// The password, using to create md5 hash
        #[structopt(short, long)]
        password: Option<String>,
    },
}

// Parse the command line arguments
pub fn parse() -> Cli {
    Cli::from_args()
}
