//! Rolegate CLI - Main entry point for CLI binary
//!
//! This binary provides the `rolegate-cli` tool for managing access control.

use anyhow::{Context, Result};
use axum::http::HeaderName;
use clap::Parser;
use rolegate::engine::{
    api::{create_router, ApiState},
    cli::{Cli, Commands, OutputFormat, PermissionAction, RoleAction},
    config::{Config, ConfigError},
    context::QueryContext,
    database::Database,
    gate::AclGate,
    rbac::{AccessExpression, AclService, ResourceScope},
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rolegate=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_cli(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let project_dir = cli.get_project_dir();
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Init {
            database,
            create_accounts,
        } => {
            cmd_init(&project_dir, database, create_accounts, json_output)?;
        }
        Commands::Role { action } => {
            cmd_role(action, &project_dir, json_output)?;
        }
        Commands::Permission { action } => {
            cmd_permission(action, &project_dir, json_output)?;
        }
        Commands::Grant { role, permissions } => {
            cmd_grant(&project_dir, &role, &permissions, json_output)?;
        }
        Commands::Assign { user_id, role } => {
            cmd_assign(&project_dir, user_id, &role, json_output)?;
        }
        Commands::Allow {
            user_id,
            permission,
        } => {
            cmd_allow(&project_dir, user_id, &permission, json_output)?;
        }
        Commands::Check {
            user_id,
            expression,
            module,
            method,
        } => {
            let scope = module
                .zip(method)
                .map(|(module, method)| ResourceScope::new(&module, &method));
            cmd_check(&project_dir, user_id, &expression, scope, json_output)?;
        }
        Commands::Serve { port, host } => {
            cmd_serve(&project_dir, host, port)?;
        }
    }

    Ok(())
}

struct Project {
    config: Config,
    service: AclService,
}

fn open_database(project_dir: &Path, config: &Config) -> Result<Database> {
    let db_path = config.database_path(project_dir);
    Database::with_options(
        &db_path,
        config.database.pool_size,
        config.database.busy_timeout(),
    )
    .with_context(|| format!("Failed to open database {}", db_path.display()))
}

fn open_project(project_dir: &Path) -> Result<Project> {
    let config = Config::load(project_dir)
        .with_context(|| format!("No rolegate project in {}", project_dir.display()))?;
    let db = open_database(project_dir, &config)?;
    let service = AclService::sqlite(db, config.acl.store_options())?
        .with_superadmin_roles(config.acl.superadmin_roles.clone());
    Ok(Project { config, service })
}

/// Context for one CLI operation, bounded by the configured gate timeout
fn context(config: &Config) -> QueryContext {
    match config.gate.timeout() {
        Some(timeout) => QueryContext::with_timeout(timeout),
        None => QueryContext::background(),
    }
}

fn cmd_init(
    project_dir: &Path,
    database: Option<PathBuf>,
    create_accounts: bool,
    json: bool,
) -> Result<()> {
    std::fs::create_dir_all(project_dir)?;

    let config = match Config::load(project_dir) {
        Ok(config) => config,
        Err(ConfigError::NotFound(_)) => {
            let mut config = Config::default_for_project();
            if let Some(path) = database {
                config.database.path = path;
            }
            config.save(project_dir)?;
            config
        }
        Err(e) => return Err(e.into()),
    };

    let options = config.acl.store_options();
    let db = open_database(project_dir, &config)?;
    db.init_acl_schema(&options)?;
    if create_accounts {
        db.ensure_account_table(&options)?;
    }
    let tables = db.get_tables()?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "success": true,
                "project_dir": project_dir.display().to_string(),
                "database": config.database_path(project_dir).display().to_string(),
                "tables": tables
            })
        );
    } else {
        println!("Initialized rolegate project in {}", project_dir.display());
        println!("   Database: {}", config.database_path(project_dir).display());
        println!("   Tables: {}", tables.join(", "));
    }

    Ok(())
}

fn cmd_role(action: RoleAction, project_dir: &Path, json: bool) -> Result<()> {
    let project = open_project(project_dir)?;
    let ctx = context(&project.config);

    match action {
        RoleAction::Add { name } => {
            let role = project.service.register_role(&ctx, &name)?;
            if json {
                println!("{}", serde_json::to_string(&role)?);
            } else {
                println!("Registered role {} (id {})", role.name, role.id);
            }
        }
        RoleAction::List => {
            let roles = project.service.list_roles(&ctx)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&roles)?);
            } else if roles.is_empty() {
                println!("No roles registered");
            } else {
                for role in roles {
                    println!("{:>6}  {}", role.id, role.name);
                }
            }
        }
    }

    Ok(())
}

fn cmd_permission(action: PermissionAction, project_dir: &Path, json: bool) -> Result<()> {
    let project = open_project(project_dir)?;
    let ctx = context(&project.config);

    match action {
        PermissionAction::Add { name } => {
            let permission = project.service.register_permission(&ctx, &name)?;
            if json {
                println!("{}", serde_json::to_string(&permission)?);
            } else {
                println!(
                    "Registered permission {} (id {})",
                    permission.name, permission.id
                );
            }
        }
        PermissionAction::List => {
            let permissions = project.service.list_permissions(&ctx)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&permissions)?);
            } else if permissions.is_empty() {
                println!("No permissions registered");
            } else {
                for permission in permissions {
                    println!("{:>6}  {}", permission.id, permission.name);
                }
            }
        }
    }

    Ok(())
}

fn cmd_grant(project_dir: &Path, role: &str, permissions: &[String], json: bool) -> Result<()> {
    let project = open_project(project_dir)?;
    let ctx = context(&project.config);
    project
        .service
        .assign_permissions_to_role(&ctx, role, permissions)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "success": true, "role": role, "permissions": permissions })
        );
    } else {
        println!("Granted {} to role {}", permissions.join(", "), role);
    }
    Ok(())
}

fn cmd_assign(project_dir: &Path, user_id: i64, role: &str, json: bool) -> Result<()> {
    let project = open_project(project_dir)?;
    let ctx = context(&project.config);
    project.service.assign_user_to_role(&ctx, user_id, role)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "success": true, "user_id": user_id, "role": role })
        );
    } else {
        println!("Assigned role {} to account {}", role, user_id);
    }
    Ok(())
}

fn cmd_allow(project_dir: &Path, user_id: i64, permission: &str, json: bool) -> Result<()> {
    let project = open_project(project_dir)?;
    let ctx = context(&project.config);
    project
        .service
        .assign_permission_to_user(&ctx, user_id, permission)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "success": true, "user_id": user_id, "permission": permission })
        );
    } else {
        println!("Granted permission {} to account {}", permission, user_id);
    }
    Ok(())
}

fn cmd_check(
    project_dir: &Path,
    user_id: i64,
    expression: &str,
    scope: Option<ResourceScope>,
    json: bool,
) -> Result<()> {
    let project = open_project(project_dir)?;
    let ctx = context(&project.config);
    let expression: AccessExpression = expression.parse()?;
    let decision = project
        .service
        .evaluate(&ctx, user_id, &expression, scope.as_ref())?;

    if json {
        println!("{}", serde_json::to_string(&decision)?);
    } else if decision.allowed {
        match decision.granted_by {
            Some(grant) => println!("allowed ({:?})", grant),
            None => println!("allowed"),
        }
    } else {
        println!(
            "denied: {}",
            decision.reason.as_deref().unwrap_or("insufficient permissions")
        );
    }
    Ok(())
}

#[tokio::main]
async fn cmd_serve(project_dir: &Path, host: Option<String>, port: Option<u16>) -> Result<()> {
    let project = open_project(project_dir)?;
    let config = project.config;

    let admin_gate = match &config.api.admin_expression {
        Some(expression) => {
            let header = HeaderName::from_bytes(config.gate.identity_header.as_bytes())
                .with_context(|| format!("Invalid identity header {:?}", config.gate.identity_header))?;
            let mut gate = AclGate::new(project.service.clone(), expression)
                .context("Invalid admin expression")?
                .with_identity_header(header);
            if let Some(timeout) = config.gate.timeout() {
                gate = gate.with_timeout(timeout);
            }
            Some(gate)
        }
        None => None,
    };

    let state = ApiState::new(project.service).with_timeout(config.gate.timeout());
    let app = create_router(state, admin_gate);

    let host = host.unwrap_or_else(|| config.api.host.clone());
    let addr = format!("{}:{}", host, port.unwrap_or(config.api.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(%addr, guarded = config.api.admin_expression.is_some(), "rolegate admin API listening");
    println!("Rolegate admin API on http://{}", addr);
    println!("   Press Ctrl+C to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
