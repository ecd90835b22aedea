use serde::{Deserialize, Serialize};

use sam_api_types::{ArSetType, CopyName};

use crate::archive_sets::archive_sets;
use crate::ArchiverConfig;

/// Outcome of the activation check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CheckReport {
    /// Problems that prevent activation.
    pub errors: Vec<String>,
    /// Problems that are reported but do not stop activation.
    pub warnings: Vec<String>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks that every copy in use can be written somewhere.
pub fn check_config(config: &ArchiverConfig) -> CheckReport {
    let mut report = CheckReport::default();

    for set in archive_sets(config) {
        match set.set_type() {
            ArSetType::AllSetsPseudo | ArSetType::NoArchive | ArSetType::Unassigned => continue,
            _ => {}
        }
        for copy in set.copy_numbers() {
            let copy_name = CopyName::new(set.name(), copy, false).to_string();
            match config.vsn_map(&copy_name) {
                None => report
                    .errors
                    .push(format!("copy '{}' has no VSN map", copy_name)),
                Some(map) if map.is_empty() => report
                    .errors
                    .push(format!("VSN map of copy '{}' has no VSNs or pools", copy_name)),
                Some(_) => {}
            }
        }
    }

    for map in config.vsn_maps.iter() {
        for pool_name in map.pool_names() {
            match config.pool(pool_name) {
                None => report.errors.push(format!(
                    "VSN map of copy '{}' references unknown pool '{}'",
                    map.copy_name(),
                    pool_name
                )),
                Some(pool) if pool.is_empty() => report.warnings.push(format!(
                    "VSN map of copy '{}' references empty pool '{}'",
                    map.copy_name(),
                    pool_name
                )),
                Some(_) => {}
            }
        }
    }

    for msg in report.errors.iter() {
        log::warn!("archiver check: {}", msg);
    }
    for msg in report.warnings.iter() {
        log::info!("archiver check: {}", msg);
    }

    report
}

#[cfg(test)]
mod test {
    use super::*;
    use sam_api_types::{ArchiveCopy, Criterion, VsnMap, VsnPool, GLOBAL};

    #[test]
    fn missing_and_empty_maps() -> Result<(), anyhow::Error> {
        let mut config = ArchiverConfig::default();
        config.add_criterion(Criterion::with_copies(
            GLOBAL,
            "images",
            vec![ArchiveCopy::new(1), ArchiveCopy::new(2)],
        )?)?;
        config.upsert_vsn_map(VsnMap::new("images.2", "lt"))?;

        let report = check_config(&config);
        assert_eq!(
            report.errors,
            vec![
                "copy 'images.1' has no VSN map".to_string(),
                "VSN map of copy 'images.2' has no VSNs or pools".to_string(),
            ]
        );
        assert!(!report.is_ok());
        Ok(())
    }

    #[test]
    fn pool_references() -> Result<(), anyhow::Error> {
        let mut config = ArchiverConfig::default();
        config.add_criterion(Criterion::with_copies(GLOBAL, "images", vec![ArchiveCopy::new(1)])?)?;
        config.add_pool(VsnPool::new("empty", "lt", Vec::new()))?;

        let mut map = VsnMap::new("images.1", "lt");
        map.set_pool_names(Some(vec!["empty".into()]));
        config.upsert_vsn_map(map)?;

        let report = check_config(&config);
        assert!(report.is_ok());
        assert_eq!(report.warnings.len(), 1);

        let mut map = VsnMap::new("images.1", "lt");
        map.set_pool_names(Some(vec!["gone".into()]));
        config.upsert_vsn_map(map)?;

        let report = check_config(&config);
        assert_eq!(
            report.errors,
            vec!["VSN map of copy 'images.1' references unknown pool 'gone'".to_string()]
        );
        Ok(())
    }
}
