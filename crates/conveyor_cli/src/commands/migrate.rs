//! Database migration commands.

use conveyor::migration::Migrator;
use sea_orm_migration::MigratorTrait;

use crate::MigrateAction;

pub async fn handle_migrate(action: MigrateAction, database_url: &str) -> anyhow::Result<()> {
    let db = conveyor::connect(database_url).await?;

    match action {
        MigrateAction::Up => {
            Migrator::up(&db, None).await?;
            println!("Migrations applied");
        }
        MigrateAction::Down => {
            Migrator::down(&db, Some(1)).await?;
            println!("Rolled back the last migration");
        }
        MigrateAction::Status => {
            let pending = Migrator::get_pending_migrations(&db).await?;
            if pending.is_empty() {
                println!("Schema is up to date");
            } else {
                println!("{} pending migration(s):", pending.len());
                for migration in pending {
                    println!("  {}", migration.name());
                }
            }
        }
        MigrateAction::Fresh => {
            Migrator::fresh(&db).await?;
            println!("Schema recreated from scratch");
        }
    }

    Ok(())
}
