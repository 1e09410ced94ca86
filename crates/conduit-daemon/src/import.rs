use conduit_core::JobConfiguration;
use conduit_store::{JobRepository, StoreError};
use tracing::info;

/// Upsert `[[jobs]]` seed entries by name. Returns how many were written.
///
/// An existing job keeps its id, so re-importing the same file changes
/// nothing but the stored fields.
pub fn import_jobs(
    jobs: &dyn JobRepository,
    seeds: &[JobConfiguration],
) -> Result<usize, StoreError> {
    for seed in seeds {
        let existing = jobs.find_by_name(&seed.name)?;
        let saved = jobs.save(&JobConfiguration {
            id: existing.and_then(|job| job.id),
            ..seed.clone()
        })?;
        info!(job_id = ?saved.id, name = %saved.name, "job imported");
    }
    Ok(seeds.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use conduit_core::RepeatUnit;
    use conduit_store::{Database, SqliteJobStore};

    fn seed(name: &str, hours: u32) -> JobConfiguration {
        JobConfiguration {
            id: None,
            name: name.into(),
            plugin_type: "file-sync".into(),
            target_id: "invoices".into(),
            start_date: Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap(),
            end_date: None,
            repeat_unit: RepeatUnit::Hours,
            repeat_value: Some(hours),
            active: true,
        }
    }

    #[test]
    fn reimport_updates_in_place() {
        let store = SqliteJobStore::new(Database::open_in_memory().unwrap());
        import_jobs(&store, &[seed("invoices", 1), seed("ledger", 2)]).unwrap();
        let first_id = store.find_by_name("invoices").unwrap().unwrap().id;

        import_jobs(&store, &[seed("invoices", 6)]).unwrap();

        let jobs = store.list().unwrap();
        assert_eq!(jobs.len(), 2);
        let invoices = store.find_by_name("invoices").unwrap().unwrap();
        assert_eq!(invoices.id, first_id);
        assert_eq!(invoices.repeat_value, Some(6));
    }
}
