//! `migrate` command: apply, revert or list schema migrations.

use crate::db::Database;
use crate::db::migrations::{self, SchemaVersion};
use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use std::path::Path;

/// Arguments for the migrate command.
#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[command(subcommand)]
    pub action: MigrateAction,
}

#[derive(Subcommand, Debug)]
pub enum MigrateAction {
    /// Apply every pending migration
    Up,
    /// Revert migrations newer than the target version
    Down {
        /// Version to keep (0 removes every table)
        #[arg(long)]
        to: SchemaVersion,
    },
    /// List migrations and whether they are applied
    Status,
}

/// Run the migrate command against the database at `db_path`.
pub fn run_migrate(db_path: &Path, args: &MigrateArgs) -> Result<()> {
    let db = Database::open_unmigrated(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;

    match &args.action {
        MigrateAction::Up => {
            let applied = db.with_conn_mut(migrations::migrate_up)?;
            if applied.is_empty() {
                println!("Schema is up to date (version {}).", migrations::latest_version());
            } else {
                for version in applied {
                    println!("Applied migration {}", version);
                }
            }
        }
        MigrateAction::Down { to } => {
            if *to > migrations::latest_version() {
                bail!(
                    "target version {} is newer than the latest known version {}",
                    to,
                    migrations::latest_version()
                );
            }
            let reverted = db.with_conn_mut(|conn| migrations::migrate_down(conn, *to))?;
            if reverted.is_empty() {
                println!("Nothing to revert.");
            } else {
                for version in reverted {
                    println!("Reverted migration {}", version);
                }
            }
        }
        MigrateAction::Status => {
            let rows = db.with_conn(|conn| migrations::status(conn))?;
            println!("{:<8} {:<20} APPLIED", "VERSION", "NAME");
            for row in rows {
                let applied = row
                    .applied_at
                    .map(|ms| crate::db::from_ms(ms).to_rfc3339())
                    .unwrap_or_else(|| "pending".to_string());
                println!("{:<8} {:<20} {}", row.version, row.name, applied);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn up_status_down_on_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tw.db");

        run_migrate(&path, &MigrateArgs { action: MigrateAction::Up }).unwrap();
        let db = Database::open_unmigrated(&path).unwrap();
        let version = db.with_conn(|c| migrations::current_version(c)).unwrap();
        assert_eq!(version, migrations::latest_version());
        drop(db);

        run_migrate(&path, &MigrateArgs { action: MigrateAction::Status }).unwrap();
        run_migrate(&path, &MigrateArgs { action: MigrateAction::Down { to: 0 } }).unwrap();

        let db = Database::open_unmigrated(&path).unwrap();
        assert_eq!(db.with_conn(|c| migrations::current_version(c)).unwrap(), 0);
    }

    #[test]
    fn unknown_target_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tw.db");
        let args = MigrateArgs {
            action: MigrateAction::Down { to: 99 },
        };
        assert!(run_migrate(&path, &args).is_err());
    }
}
