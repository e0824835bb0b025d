use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Keeps a corpus of capability and enabler documents consistent")]
pub struct Cli {
    /// Path to the configuration file
    #[clap(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase log output (-v info, -vv debug)
    #[clap(long, short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum NewCommand {
    /// Create a capability document in the default root
    Capability {
        /// Name of the capability
        #[clap(long)]
        name: Option<String>,

        /// Description of the capability
        #[clap(long)]
        description: Option<String>,

        /// Folder under the default root to create it in
        #[clap(long)]
        dir: Option<PathBuf>,

        /// Use interactive mode (prompts)
        #[clap(long)]
        interactive: bool,
    },

    /// Create an enabler document next to its parent capability
    Enabler {
        /// Parent capability ID (e.g. CAP-100001)
        #[clap(long)]
        capability: Option<String>,

        /// Name of the enabler
        #[clap(long)]
        name: Option<String>,

        /// Description of the enabler
        #[clap(long)]
        description: Option<String>,

        /// Priority of the enabler
        #[clap(long)]
        priority: Option<String>,

        /// Owner of the enabler
        #[clap(long)]
        owner: Option<String>,

        /// Use interactive mode (prompts)
        #[clap(long)]
        interactive: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Allocate a fresh identifier (CAP, ENB, FR or NFR)
    Id {
        /// Identifier prefix
        prefix: String,
    },

    /// Create a new document
    #[clap(subcommand)]
    New(NewCommand),

    /// Show a document by ID or logical path
    Show {
        /// Document ID (e.g. ENB-654321) or path relative to a root
        target: String,

        /// Print the raw document text
        #[clap(long)]
        raw: bool,
    },

    /// Save a document and update the documents that depend on it
    Save {
        /// Logical path of the document, relative to a root
        path: PathBuf,

        /// File to read the new text from (defaults to the document itself)
        #[clap(long)]
        from: Option<PathBuf>,
    },

    /// Mirror a capability's declared dependencies onto its peers
    Sync {
        /// Capability ID
        id: String,
    },

    /// Move an enabler to a different capability
    Reparent {
        /// Enabler ID
        id: String,

        /// New parent capability ID
        #[clap(long)]
        to: String,
    },

    /// Delete a document
    Rm {
        /// Document ID or logical path
        target: String,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Rename or move a document within its root
    Mv {
        /// Current logical path
        from: PathBuf,

        /// New logical path
        to: PathBuf,
    },

    /// List every document in the corpus
    List {
        /// Only list this kind (capability or enabler)
        #[clap(long)]
        kind: Option<String>,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Check the corpus for inconsistencies
    Audit {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },
}
