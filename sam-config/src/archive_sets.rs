//! Archive sets assembled from a configuration snapshot

use anyhow::{bail, Error};

use sam_api_types::{
    ArSetType, ArchiveSet, CopyName, Criterion, Tracked, ALL_SETS, ARCHIVE_SET_NAME_SCHEMA,
    GLOBAL, NO_ARCHIVE,
};

use crate::{ArchiverConfig, ConfigError};

fn copy_set(copy_name: &str) -> Option<String> {
    match copy_name.parse::<CopyName>() {
        Ok(copy) => Some(copy.set),
        Err(err) => {
            log::warn!("skipping entry with bad copy name '{}' - {}", copy_name, err);
            None
        }
    }
}

fn attach_copies(config: &ArchiverConfig, set: &mut ArchiveSet) {
    for params in config.copy_params.iter() {
        if copy_set(params.name()).as_deref() == Some(set.name()) {
            if let Err(err) = set.set_copy_params(params.clone()) {
                log::warn!("{}", err);
            }
        }
    }
    for map in config.vsn_maps.iter() {
        if copy_set(map.copy_name()).as_deref() == Some(set.name()) {
            if let Err(err) = set.set_vsn_map(map.clone()) {
                log::warn!("{}", err);
            }
        }
    }
}

fn default_sets(config: &ArchiverConfig) -> Vec<ArchiveSet> {
    let mut list = Vec::new();
    for fs in config.filesystems.iter() {
        if fs.is_no_archive() || fs.has_explicit_default() {
            continue;
        }
        let mut crit = Criterion::new(fs.fs_name(), fs.fs_name());
        if let Err(err) = crit.set_copies(fs.metadata_copies().cloned().collect()) {
            log::warn!("file system '{}': {}", fs.fs_name(), err);
        }
        crit.clear_changes();

        let mut set = ArchiveSet::new(fs.fs_name(), ArSetType::Default);
        set.set_criteria(Some(vec![crit]));
        list.push(set);
    }
    list
}

fn criteria_set(config: &ArchiverConfig, name: &str) -> Option<ArchiveSet> {
    let criteria: Vec<Criterion> = config
        .all_criteria()
        .filter(|c| c.ar_set_name() == name)
        .cloned()
        .collect();
    if criteria.is_empty() {
        return None;
    }

    let set_type = if name == NO_ARCHIVE {
        ArSetType::NoArchive
    } else if criteria.iter().any(|c| c.is_default_criteria()) {
        ArSetType::ExplicitDefault
    } else {
        ArSetType::General
    };

    let mut set = ArchiveSet::new(name, set_type);
    set.set_criteria(Some(criteria));
    Some(set)
}

/// All archive sets of `config`: `allsets` first, then the default sets
/// of the archiving file systems, the criteria sets in order of
/// appearance and finally sets that only have copy parameters or maps.
pub fn archive_sets(config: &ArchiverConfig) -> Vec<ArchiveSet> {
    let mut list = vec![ArchiveSet::new(ALL_SETS, ArSetType::AllSetsPseudo)];
    list.extend(default_sets(config));
    list.extend(
        config
            .criteria_names()
            .iter()
            .filter_map(|name| criteria_set(config, name)),
    );

    let copy_names = config
        .copy_params
        .iter()
        .map(|p| p.name())
        .chain(config.vsn_maps.iter().map(|m| m.copy_name()));
    for set_name in copy_names.filter_map(copy_set) {
        if !list.iter().any(|set| set.name() == set_name) {
            let mut set = ArchiveSet::new(&set_name, ArSetType::Unassigned);
            set.set_criteria(Some(Vec::new()));
            list.push(set);
        }
    }

    for set in list.iter_mut() {
        attach_copies(config, set);
    }
    list
}

/// The archive set called `name`.
pub fn archive_set(config: &ArchiverConfig, name: &str) -> Result<ArchiveSet, Error> {
    archive_sets(config)
        .into_iter()
        .find(|set| set.name() == name)
        .ok_or_else(|| ConfigError::NotFound(format!("archive set '{}'", name)).into())
}

fn check_criteria(config: &ArchiverConfig, set: &ArchiveSet) -> Result<(), Error> {
    for crit in set.criteria().unwrap_or(&[]) {
        if crit.ar_set_name() != set.name() {
            bail!(
                "criterion routes to set '{}', not to '{}'",
                crit.ar_set_name(),
                set.name()
            );
        }
        if crit.fs_name() != GLOBAL && config.fs(crit.fs_name()).is_none() {
            return Err(ConfigError::NotFound(format!("file system '{}'", crit.fs_name())).into());
        }
        crit.validate()?;
    }
    for params in set.all_copy_params() {
        params.validate()?;
    }
    for map in set.all_vsn_maps() {
        map.validate()?;
    }
    Ok(())
}

/// Replaces the copy parameters and VSN maps of `set` in `config`.
fn store_copies(config: &mut ArchiverConfig, set: &ArchiveSet) -> Result<(), Error> {
    let name = set.name();
    config
        .copy_params
        .retain(|p| copy_set(p.name()).as_deref() != Some(name));
    config
        .vsn_maps
        .retain(|m| copy_set(m.copy_name()).as_deref() != Some(name));

    for params in set.all_copy_params() {
        let mut params = params.clone();
        params.clear_changes();
        config.upsert_copy_params(params);
    }
    for map in set.all_vsn_maps() {
        config.upsert_vsn_map(map.clone())?;
    }
    Ok(())
}

fn store_criteria(config: &mut ArchiverConfig, set: &ArchiveSet) -> Result<(), Error> {
    for crit in set.criteria().unwrap_or(&[]) {
        config.add_criterion(crit.clone())?;
    }
    Ok(())
}

/// Adds a new set. Criteria get keys, copy parameters and maps are
/// registered under their copy names.
pub fn create_archive_set(config: &mut ArchiverConfig, set: &ArchiveSet) -> Result<(), Error> {
    ARCHIVE_SET_NAME_SCHEMA.parse_simple_value(set.name())?;

    if archive_sets(config).iter().any(|s| s.name() == set.name()) {
        return Err(ConfigError::AlreadyExists(format!("archive set '{}'", set.name())).into());
    }
    check_criteria(config, set)?;

    store_criteria(config, set)?;
    store_copies(config, set)?;

    log::info!("created archive set '{}'", set.name());
    Ok(())
}

/// Replaces criteria, copy parameters and maps of an existing set.
///
/// For a file system default set the copies of its criterion become the
/// metadata copies of the file system. `allsets` only has parameters and
/// maps.
pub fn modify_archive_set(config: &mut ArchiverConfig, set: &ArchiveSet) -> Result<(), Error> {
    let existing = archive_set(config, set.name())?;

    match existing.set_type() {
        ArSetType::AllSetsPseudo => {
            check_criteria(config, &without_criteria(set))?;
        }
        ArSetType::Default => {
            check_criteria(config, &without_criteria(set))?;
            let copies = match set.criteria().and_then(|list| list.first()) {
                Some(crit) => crit.copies().cloned().collect(),
                None => Vec::new(),
            };
            let fs = config.fs_mut(set.name()).ok_or_else(|| {
                ConfigError::NotFound(format!("file system '{}'", set.name()))
            })?;
            fs.set_metadata_copies(copies)?;
            for copy in 1..=sam_api_types::MAX_COPIES as u8 {
                if let Some(copy) = fs.metadata_copy_mut(copy) {
                    copy.clear_changes();
                }
            }
        }
        _ => {
            check_criteria(config, set)?;
            remove_set_criteria(config, set.name());
            store_criteria(config, set)?;
        }
    }

    store_copies(config, set)?;
    log::info!("modified archive set '{}'", set.name());
    Ok(())
}

fn without_criteria(set: &ArchiveSet) -> ArchiveSet {
    let mut copy = set.clone();
    copy.set_criteria(None);
    copy
}

fn remove_set_criteria(config: &mut ArchiverConfig, name: &str) {
    if config.global.criteria().is_some() {
        config.global.criteria_mut().retain(|c| c.ar_set_name() != name);
    }
    for fs in config.filesystems.iter_mut() {
        fs.criteria_mut().retain(|c| c.ar_set_name() != name);
    }
}

/// Removes criteria, copy parameters and maps of set `name`.
pub fn delete_archive_set(config: &mut ArchiverConfig, name: &str) -> Result<(), Error> {
    if name == ALL_SETS {
        bail!("archive set '{}' cannot be deleted", name);
    }
    if default_sets(config).iter().any(|set| set.name() == name) {
        bail!("default archive set '{}' cannot be deleted", name);
    }

    if !config.purge_set(name) {
        return Err(ConfigError::NotFound(format!("archive set '{}'", name)).into());
    }

    log::info!("deleted archive set '{}'", name);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use sam_api_types::{ArchiveCopy, CopyParams, FsDirective, Interval, VsnMap};

    fn sample() -> Result<ArchiverConfig, Error> {
        let mut config = ArchiverConfig::default();

        let mut fs = FsDirective::new("samfs1");
        let mut meta = ArchiveCopy::new(1);
        meta.set_ar_age(Interval::from_secs(240));
        fs.set_metadata_copies(vec![meta])?;
        config.filesystems.push(fs);

        let mut shared = FsDirective::new("shared1");
        shared.mark_no_archive(true);
        config.filesystems.push(shared);

        config.add_criterion(Criterion::with_copies(
            "samfs1",
            "images",
            vec![ArchiveCopy::new(1), ArchiveCopy::new(2)],
        )?)?;
        config.add_criterion(Criterion::new(GLOBAL, NO_ARCHIVE))?;

        config.upsert_copy_params(CopyParams::new("images.1"));
        config.upsert_copy_params(CopyParams::new("images.1R"));
        config.upsert_copy_params(CopyParams::new("spare.1"));
        config.upsert_copy_params(CopyParams::new("allsets.1"));
        Ok(config)
    }

    #[test]
    fn assembly() -> Result<(), Error> {
        let config = sample()?;
        let sets = archive_sets(&config);

        let summary: Vec<(&str, ArSetType)> =
            sets.iter().map(|s| (s.name(), s.set_type())).collect();
        assert_eq!(
            summary,
            vec![
                (ALL_SETS, ArSetType::AllSetsPseudo),
                ("samfs1", ArSetType::Default),
                (NO_ARCHIVE, ArSetType::NoArchive),
                ("images", ArSetType::General),
                ("spare", ArSetType::Unassigned),
            ]
        );

        let allsets = &sets[0];
        assert!(allsets.criteria().is_none());
        assert!(allsets.copy_params(1, false).is_some());

        let default = &sets[1];
        let meta = &default.criteria().unwrap()[0];
        assert_eq!(meta.num_copies(), 1);
        assert_eq!(meta.copy(1).unwrap().ar_age().as_secs(), 240);

        let images = &sets[3];
        assert_eq!(images.copy_numbers(), vec![1, 2]);
        assert!(images.copy_params(1, false).is_some());
        assert!(images.copy_params(1, true).is_some());
        assert!(images.copy_params(2, false).is_none());

        assert_eq!(sets[4].criteria().map(|c| c.len()), Some(0));
        Ok(())
    }

    #[test]
    fn explicit_default() -> Result<(), Error> {
        let mut config = sample()?;
        let mut crit = Criterion::new("samfs1", "fallback");
        crit.mark_default_criteria(true);
        config.add_criterion(crit)?;
        config.fs_mut("samfs1").unwrap().mark_explicit_default(true);

        let sets = archive_sets(&config);
        assert!(sets.iter().all(|s| s.set_type() != ArSetType::Default));
        assert_eq!(
            archive_set(&config, "fallback")?.set_type(),
            ArSetType::ExplicitDefault
        );
        Ok(())
    }

    #[test]
    fn lookup_missing_set() -> Result<(), Error> {
        let config = sample()?;
        let err = archive_set(&config, "nothing").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::NotFound("archive set 'nothing'".into()))
        );
        Ok(())
    }

    #[test]
    fn create_modify_delete() -> Result<(), Error> {
        let mut config = sample()?;

        let mut set = ArchiveSet::new("logs", ArSetType::General);
        set.criteria_mut().push(Criterion::with_copies(GLOBAL, "logs", vec![ArchiveCopy::new(1)])?);
        set.criteria_mut().push(Criterion::new("samfs1", "logs"));
        set.set_copy_params(CopyParams::new("logs.1"))?;
        let mut map = VsnMap::new("logs.1", "lt");
        map.set_vsn_names(Some(vec!["VSN0.*".into()]));
        set.set_vsn_map(map)?;

        create_archive_set(&mut config, &set)?;
        assert!(create_archive_set(&mut config, &set).is_err());

        let stored = archive_set(&config, "logs")?;
        assert_eq!(stored.criteria().map(|c| c.len()), Some(2));
        assert!(stored.criteria().unwrap().iter().all(|c| c.key().is_some()));
        assert!(stored.vsn_map(1, false).is_some());
        assert_eq!(config.global.criteria().map(|c| c.len()), Some(2));

        let mut changed = stored.clone();
        changed.criteria_mut().truncate(1);
        modify_archive_set(&mut config, &changed)?;
        let stored = archive_set(&config, "logs")?;
        assert_eq!(stored.criteria().map(|c| c.len()), Some(1));
        assert_eq!(stored.criteria().unwrap()[0].key(), changed.criteria().unwrap()[0].key());

        delete_archive_set(&mut config, "logs")?;
        assert!(archive_set(&config, "logs").is_err());
        assert!(config.copy_params("logs.1").is_none());
        assert!(config.vsn_map("logs.1").is_none());
        assert!(delete_archive_set(&mut config, "logs").is_err());
        Ok(())
    }

    #[test]
    fn protected_sets() -> Result<(), Error> {
        let mut config = sample()?;
        assert!(delete_archive_set(&mut config, ALL_SETS).is_err());
        assert!(delete_archive_set(&mut config, "samfs1").is_err());

        let bad = ArchiveSet::new("bad name", ArSetType::General);
        assert!(create_archive_set(&mut config, &bad).is_err());

        let mut stray = ArchiveSet::new("stray", ArSetType::General);
        stray.criteria_mut().push(Criterion::new("nofs", "stray"));
        assert!(create_archive_set(&mut config, &stray).is_err());
        assert!(archive_set(&config, "stray").is_err());
        Ok(())
    }

    #[test]
    fn modify_default_updates_metadata_copies() -> Result<(), Error> {
        let mut config = sample()?;
        let mut set = archive_set(&config, "samfs1")?;
        set.criteria_mut()[0].set_copies(vec![ArchiveCopy::new(1), ArchiveCopy::new(3)])?;

        modify_archive_set(&mut config, &set)?;
        let fs = config.fs("samfs1").unwrap();
        let seqs: Vec<u8> = fs.metadata_copies().map(|c| c.copy_seq()).collect();
        assert_eq!(seqs, vec![1, 3]);
        Ok(())
    }
}
