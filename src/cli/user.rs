//! `user` command: account administration.

use crate::db::Database;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};

/// Scope granted to the token minted with a new user.
pub const FULL_SCOPE: &str = "*";

#[derive(Args, Debug)]
pub struct UserArgs {
    #[command(subcommand)]
    pub action: UserAction,
}

#[derive(Subcommand, Debug)]
pub enum UserAction {
    /// Create a user and print an initial API token
    Create {
        /// Login name (also the CalDAV username)
        username: String,

        /// Name recorded for the initial token
        #[arg(long, default_value = "initial")]
        token_name: String,
    },
}

/// Outcome of `user create`.
#[derive(Debug)]
pub struct CreatedUser {
    pub user_id: i64,
    pub username: String,
    pub token: String,
}

pub fn create_user(db: &Database, username: &str, token_name: &str) -> Result<CreatedUser> {
    let user = db
        .create_user(username)
        .with_context(|| format!("creating user '{}'", username.trim()))?;
    let (_, token) = db
        .create_app_token(user.id, token_name, &[FULL_SCOPE.to_string()], None)
        .context("minting initial token")?;
    Ok(CreatedUser {
        user_id: user.id,
        username: user.username,
        token,
    })
}

pub fn run_user(db: &Database, args: &UserArgs) -> Result<()> {
    match &args.action {
        UserAction::Create {
            username,
            token_name,
        } => {
            let created = create_user(db, username, token_name)?;
            println!("Created user '{}' (id {})", created.username, created.user_id);
            println!("Token (shown once): {}", created.token);
        }
    }
    Ok(())
}
