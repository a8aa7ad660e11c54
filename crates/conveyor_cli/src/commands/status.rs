//! Subscription sync status reporting.

use conveyor::entity::prelude::{Subscription, SubscriptionColumn};
use sea_orm::{EntityTrait, QueryOrder};

/// Print one line per subscription with its sync progress.
pub async fn handle_status(database_url: &str) -> anyhow::Result<()> {
    let db = conveyor::connect(database_url).await?;

    let subscriptions = Subscription::find()
        .order_by_asc(SubscriptionColumn::Id)
        .all(&db)
        .await?;

    if subscriptions.is_empty() {
        println!("No subscriptions");
        return Ok(());
    }

    for subscription in subscriptions {
        let status = subscription
            .sync_status
            .as_ref()
            .map_or_else(|| "never-synced".to_string(), |s| s.to_string());
        let synced = subscription.number_of_synced_repos.unwrap_or(0);
        let total = subscription
            .total_number_of_repos
            .map_or_else(|| "?".to_string(), |t| t.to_string());

        println!(
            "#{} {} installation={} {} ({synced}/{total} repos){}",
            subscription.id,
            subscription.jira_host,
            subscription.github_installation_id,
            status,
            subscription
                .sync_warning
                .as_deref()
                .map(|w| format!(" warning: {w}"))
                .unwrap_or_default(),
        );
    }

    Ok(())
}
