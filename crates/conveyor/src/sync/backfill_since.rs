//! Decides the effective backfill horizon for a new sync.

use chrono::{DateTime, Utc};

use super::types::SyncType;

/// Compute the since-date a new sync generation should use.
///
/// - A partial sync never moves the horizon: the existing date wins,
///   whatever was requested.
/// - The first full sync of a subscription adopts the requested date
///   verbatim, empty included.
/// - A later full sync can only reach *further back* or clear the
///   horizon entirely; a requested date more recent than the existing
///   one is ignored, since shrinking the horizon would silently drop
///   already-synced history. An already-empty horizon (sync everything)
///   stays empty.
pub fn calc_new_backfill_since_date(
    existing_backfill_since: Option<DateTime<Utc>>,
    new_backfill_since: Option<DateTime<Utc>>,
    sync_type: SyncType,
    is_initial_sync: bool,
) -> Option<DateTime<Utc>> {
    match sync_type {
        SyncType::Partial => existing_backfill_since,
        SyncType::Full if is_initial_sync => new_backfill_since,
        SyncType::Full => {
            let existing = existing_backfill_since?;
            match new_backfill_since {
                Some(incoming) if incoming < existing => Some(incoming),
                Some(_) => Some(existing),
                None => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn dates() -> (DateTime<Utc>, DateTime<Utc>, DateTime<Utc>) {
        let middle = Utc::now();
        (middle - Duration::seconds(1), middle, middle + Duration::seconds(1))
    }

    #[test]
    fn partial_sync_keeps_existing_date_when_new_is_empty() {
        let (_, middle, _) = dates();
        assert_eq!(
            calc_new_backfill_since_date(Some(middle), None, SyncType::Partial, false),
            Some(middle)
        );
    }

    #[test]
    fn partial_sync_keeps_existing_date_when_new_is_earlier() {
        let (earlier, middle, _) = dates();
        assert_eq!(
            calc_new_backfill_since_date(Some(middle), Some(earlier), SyncType::Partial, false),
            Some(middle)
        );
    }

    #[test]
    fn partial_sync_keeps_existing_date_when_new_is_recent() {
        let (_, middle, recent) = dates();
        assert_eq!(
            calc_new_backfill_since_date(Some(middle), Some(recent), SyncType::Partial, false),
            Some(middle)
        );
    }

    #[test]
    fn initial_full_sync_takes_whatever_was_supplied() {
        let (_, middle, _) = dates();
        assert_eq!(
            calc_new_backfill_since_date(None, Some(middle), SyncType::Full, true),
            Some(middle)
        );
        assert_eq!(
            calc_new_backfill_since_date(None, None, SyncType::Full, true),
            None
        );
    }

    #[test]
    fn full_sync_with_empty_existing_stays_empty() {
        let (_, _, recent) = dates();
        assert_eq!(
            calc_new_backfill_since_date(None, None, SyncType::Full, false),
            None
        );
        assert_eq!(
            calc_new_backfill_since_date(None, Some(recent), SyncType::Full, false),
            None
        );
    }

    #[test]
    fn full_sync_can_clear_an_existing_horizon() {
        let (_, _, recent) = dates();
        assert_eq!(
            calc_new_backfill_since_date(Some(recent), None, SyncType::Full, false),
            None
        );
    }

    #[test]
    fn full_sync_ignores_a_more_recent_horizon() {
        let (earlier, _, recent) = dates();
        assert_eq!(
            calc_new_backfill_since_date(Some(earlier), Some(recent), SyncType::Full, false),
            Some(earlier)
        );
    }

    #[test]
    fn full_sync_adopts_an_earlier_horizon() {
        let (earlier, _, recent) = dates();
        assert_eq!(
            calc_new_backfill_since_date(Some(recent), Some(earlier), SyncType::Full, false),
            Some(earlier)
        );
    }
}
