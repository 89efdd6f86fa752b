//! Rolegate CLI Module
//! Command-line interface for managing roles, permissions and assignments

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rolegate")]
#[command(author = "Rolegate Team")]
#[command(version)]
#[command(about = "SQL-backed role and permission access control", long_about = None)]
pub struct Cli {
    /// Project directory holding rolegate.config.json (defaults to current directory)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default config and create the access-control tables
    Init {
        /// Database file, relative to the project directory
        #[arg(long)]
        database: Option<PathBuf>,

        /// Also create a bare account table when it does not exist
        #[arg(long)]
        create_accounts: bool,
    },

    /// Role registry
    Role {
        #[command(subcommand)]
        action: RoleAction,
    },

    /// Permission registry
    Permission {
        #[command(subcommand)]
        action: PermissionAction,
    },

    /// Link permissions to a role
    Grant {
        /// Role name
        role: String,

        /// Permission names
        #[arg(required = true)]
        permissions: Vec<String>,
    },

    /// Assign a role to an account
    Assign {
        /// Account ID
        user_id: i64,

        /// Role name
        role: String,
    },

    /// Grant a permission directly to an account
    Allow {
        /// Account ID
        user_id: i64,

        /// Permission name
        permission: String,
    },

    /// Evaluate an access expression for an account
    Check {
        /// Account ID
        user_id: i64,

        /// Expression such as "role:admin,editor|permission:read"
        expression: String,

        /// Resource module; requires --method
        #[arg(long, requires = "method")]
        module: Option<String>,

        /// Request method; requires --module
        #[arg(long, requires = "module")]
        method: Option<String>,
    },

    /// Start the admin API server
    Serve {
        /// Port to listen on (defaults to the configured port)
        #[arg(short = 'P', long)]
        port: Option<u16>,

        /// Host to bind to (defaults to the configured host)
        #[arg(long)]
        host: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum RoleAction {
    /// Register a new role
    Add {
        /// Role name
        name: String,
    },

    /// List registered roles
    List,
}

#[derive(Subcommand, Debug)]
pub enum PermissionAction {
    /// Register a new permission
    Add {
        /// Permission name, e.g. products.get
        name: String,
    },

    /// List registered permissions
    List,
}

impl Cli {
    pub fn get_project_dir(&self) -> PathBuf {
        self.project
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}
