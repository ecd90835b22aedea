use anyhow::Error;

use sam_api_types::{
    ArchiveCopy, ArchiveSet, ArSetType, CopyParams, CriteriaKey, Criterion, FsDirective, Interval,
    ProtocolVersion, SortMethod, Tracked, GLOBAL,
};
use sam_archiver::{ArchiverDaemon, ArchiverError, EditSession, ErrorKind, MemoryArchiver};
use sam_config::ArchiverConfig;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn daemon(version: ProtocolVersion) -> Result<MemoryArchiver, Error> {
    let mut config = ArchiverConfig::default();
    config.filesystems.push(FsDirective::new("samfs1"));
    config.add_criterion(Criterion::with_copies(
        "samfs1",
        "images",
        vec![ArchiveCopy::new(1)],
    )?)?;
    Ok(MemoryArchiver::new(config).with_protocol(version))
}

#[test]
fn newer_fields_are_rejected_before_sending() -> Result<(), Error> {
    init_log();
    let daemon = daemon(ProtocolVersion::V4_4)?;
    let session = EditSession::new(&daemon);

    let mut params = CopyParams::new("images.1");
    params.set_drives(2);
    params.set_queue_time_limit(Interval::from_secs(3600));

    let err = session.submit_copy_params(&mut params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);
    match &err {
        ArchiverError::ProtocolMismatch { version, fields } => {
            assert_eq!(*version, ProtocolVersion::V4_4);
            assert_eq!(fields, &vec!["queue_time_limit".to_string()]);
        }
        other => panic!("unexpected error {:?}", other),
    }

    // nothing reached the daemon and the edit is still pending
    assert!(daemon.copy_params_for("images.1").is_err());
    assert!(params.is_dirty());

    params.reset_queue_time_limit();
    assert!(session.submit_copy_params(&mut params)?);
    assert!(!params.is_dirty());
    assert_eq!(daemon.copy_params_for("images.1")?.drives(), 2);
    Ok(())
}

#[test]
fn only_flagged_fields_reach_the_daemon() -> Result<(), Error> {
    init_log();
    let daemon = daemon(ProtocolVersion::CURRENT)?;
    let session = EditSession::new(&daemon);

    let mut params = CopyParams::new("images.1");
    params.set_drives(3);
    params.set_sort_method(SortMethod::Age);
    session.submit_copy_params(&mut params)?;

    // a stale snapshot with a local change that is withdrawn again
    let mut other = CopyParams::new("images.1");
    other.set_drives(7);
    other.reset_drives();
    other.set_start_count(10);
    session.submit_copy_params(&mut other)?;

    let stored = daemon.copy_params_for("images.1")?;
    assert_eq!(stored.drives(), 3);
    assert_eq!(stored.sort_method(), SortMethod::Age);
    assert_eq!(stored.start_count(), 10);
    Ok(())
}

#[test]
fn invalid_patch_is_not_submitted() -> Result<(), Error> {
    init_log();
    let daemon = daemon(ProtocolVersion::CURRENT)?;
    let session = EditSession::new(&daemon);

    let mut fs = daemon.fs_directive("samfs1")?;
    fs.set_fs_interval(Interval::from_secs(300));
    fs.set_bg_time("2500");

    let err = session.submit_fs_directive(&mut fs).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(daemon.fs_directive("samfs1")?.fs_interval().is_zero());

    fs.set_bg_time("0230");
    session.submit_fs_directive(&mut fs)?;
    let stored = daemon.fs_directive("samfs1")?;
    assert_eq!(stored.fs_interval().as_secs(), 300);
    assert_eq!(stored.bg_time(), "0230");
    Ok(())
}

#[test]
fn criterion_edit_by_identity() -> Result<(), Error> {
    init_log();
    let daemon = daemon(ProtocolVersion::CURRENT)?;
    let session = EditSession::new(&daemon);

    let set = session.daemon().archive_set("images")?;
    let mut crit = set.criteria().unwrap()[0].clone();
    crit.set_path("data/images");
    crit.set_minsize(Some("1M".parse()?));

    assert!(session.submit_criterion(&mut crit)?);
    assert!(!session.submit_criterion(&mut crit)?);

    let stored = daemon.archive_set("images")?;
    let stored = &stored.criteria().unwrap()[0];
    assert_eq!(stored.path(), "data/images");
    assert_eq!(stored.minsize().map(|s| s.as_u64()), Some(1 << 20));
    assert!(stored.same_as(&crit));
    Ok(())
}

#[test]
fn criteria_edited_through_fs_directive() -> Result<(), Error> {
    init_log();
    let daemon = daemon(ProtocolVersion::CURRENT)?;
    let session = EditSession::new(&daemon);

    let mut fs = daemon.fs_directive("samfs1")?;
    fs.criteria_mut()[0].set_path("data/images");
    if let Some(copy) = fs.criteria_mut()[0].copy_mut(1) {
        copy.set_ar_age(Interval::from_secs(900));
    }

    assert!(session.submit_fs_directive(&mut fs)?);
    assert!(!fs.is_dirty());

    let stored = daemon.archive_set("images")?;
    let stored = &stored.criteria().unwrap()[0];
    assert_eq!(stored.path(), "data/images");
    assert_eq!(stored.copy(1).map(|c| c.ar_age().as_secs()), Some(900));
    Ok(())
}

#[test]
fn unknown_criteria_in_directives_are_not_dropped() -> Result<(), Error> {
    init_log();
    let daemon = daemon(ProtocolVersion::CURRENT)?;
    let session = EditSession::new(&daemon);

    let mut fs = daemon.fs_directive("samfs1")?;
    fs.set_wait(true);
    fs.criteria_mut().push(Criterion::new("samfs1", "logs"));
    fs.criteria_mut()[1].set_path("logs");

    let err = session.submit_fs_directive(&mut fs).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(fs.is_dirty());
    assert!(!daemon.fs_directive("samfs1")?.wait());

    fs.criteria_mut()[1].assign_key(CriteriaKey::new(&[0xaa; 8]));
    let err = session.submit_fs_directive(&mut fs).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(fs.is_dirty());

    let mut global = daemon.global_directive()?;
    assert!(global.criteria().is_none());
    let mut crit = Criterion::new(GLOBAL, "images");
    crit.assign_key(CriteriaKey::new(&[0xaa; 8]));
    crit.set_path("data");
    global.criteria_mut().push(crit);

    let err = session.submit_global_directive(&mut global).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(global.is_dirty());
    assert!(daemon.global_directive()?.criteria().is_none());
    Ok(())
}

#[test]
fn archive_set_round_trip() -> Result<(), Error> {
    init_log();
    let daemon = daemon(ProtocolVersion::CURRENT)?;
    let session = EditSession::new(&daemon);

    let mut set = ArchiveSet::new("logs", ArSetType::General);
    set.criteria_mut()
        .push(Criterion::with_copies(GLOBAL, "logs", vec![ArchiveCopy::new(1)])?);
    let mut params = CopyParams::new("logs.1");
    params.set_drives(1);
    set.set_copy_params(params)?;

    session.create_archive_set(&mut set)?;
    assert!(!set.copy_params(1, false).unwrap().is_dirty());

    let err = session.create_archive_set(&mut set).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let names = daemon.criteria_names()?;
    assert_eq!(names, vec!["logs", "images"]);

    daemon.delete_archive_set("logs")?;
    let err = daemon.archive_set("logs").unwrap_err();
    assert_eq!(err, ArchiverError::NotFound("archive set 'logs'".into()));
    Ok(())
}
