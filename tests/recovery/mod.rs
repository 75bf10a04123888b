use dtest::assert_one;
use dtest::row;
use dtest::LastTestDir;
use dtest::Recovery;
use dtest::SessionOptions;
use dtest::Tester;
use dtest::TesterOptions;
use serial_test::serial;

use crate::common::Harness;
use crate::enable_logger;

#[test]
#[serial]
fn interrupted_run_is_cleaned_up_by_next_set_up() {
    enable_logger();
    let harness = Harness::new();

    let mut crashed = harness.tester(TesterOptions::default());
    assert_eq!(crashed.set_up("recovery::crashed").unwrap(), Recovery::Clean);
    crashed.cluster_mut().unwrap().populate(1).unwrap().start().unwrap();
    let leftover = crashed.cluster().unwrap().test_path().to_path_buf();
    // no teardown: the process "died" here
    drop(crashed);

    let mut tester = harness.tester(TesterOptions::default());
    let recovery = tester.set_up("recovery::next").unwrap();

    assert_eq!(recovery, Recovery::CleanedUp("test".to_string()));
    assert!(harness.world.is_removed(&leftover));
    assert!(!leftover.exists());

    let current = tester.cluster().unwrap().test_path().to_path_buf();
    assert_ne!(current, leftover);
    let sentinel = LastTestDir::read(&harness.config.sentinel_path).unwrap().unwrap();
    assert_eq!(sentinel.test_path, current);

    tester.tear_down(false).unwrap();
    assert!(!harness.config.sentinel_path.exists());
}

#[test]
#[serial]
fn sentinel_naming_a_wiped_directory_is_ignored() {
    let harness = Harness::new();
    LastTestDir::new("/nonexistent/dtest-wiped", "test")
        .write(&harness.config.sentinel_path)
        .unwrap();

    let mut tester = harness.tester(TesterOptions::default());
    assert_eq!(tester.set_up("recovery::wiped").unwrap(), Recovery::Unloadable);
    assert_eq!(harness.world.cluster_count(), 1);
    tester.tear_down(false).unwrap();
}

#[test]
#[serial]
fn reused_cluster_survives_between_tests() {
    let harness = Harness::with_config(|c| c.reuse_cluster = true);
    let options = TesterOptions::default().can_reuse_cluster(&harness.config);
    let mut tester = harness.tester(options);

    tester
        .run("reuse::first", |t| {
            t.cluster_mut()?.populate(3)?.start()?;
            let node1 = t.cluster()?.nodes()[0].clone();
            let session = t.patient_cql_connection(node1.as_ref(), SessionOptions::default())?;
            t.create_ks(session.as_ref(), "ks", 3)?;
            session.query("CREATE TABLE t (k int PRIMARY KEY, v text)")?;
            session.query("INSERT INTO t (k, v) VALUES (0, 'a')")?;
            Ok(())
        })
        .unwrap();

    let test_path = tester.cluster().unwrap().test_path().to_path_buf();
    assert!(harness.world.is_started(&test_path));
    assert!(harness.config.sentinel_path.exists());

    tester
        .run("reuse::second", |t| {
            assert_eq!(t.cluster()?.node_count(), 3);
            assert!(t.connections().is_empty());
            let node2 = t.cluster()?.nodes()[1].clone();
            let session = t.patient_cql_connection(node2.as_ref(), SessionOptions::default().keyspace("ks"))?;
            assert_one(session.as_ref(), "SELECT * FROM t WHERE k = 0", row![0, "a"])
        })
        .unwrap();
    assert_eq!(tester.cluster().unwrap().test_path(), test_path);

    tester
        .run("reuse::fresh", |t| {
            t.fresh_cluster()?;
            assert_eq!(t.cluster()?.node_count(), 0);
            assert_ne!(t.cluster()?.test_path(), test_path);
            Ok(())
        })
        .unwrap();

    assert!(harness.world.is_removed(&test_path));
    assert!(tester.cluster().is_err());
    assert!(!harness.config.sentinel_path.exists());
}

#[test]
#[serial]
fn tear_down_class_removes_the_reused_cluster() {
    let harness = Harness::with_config(|c| c.reuse_cluster = true);
    let options = TesterOptions::default().can_reuse_cluster(&harness.config);
    let mut tester = harness.tester(options);

    tester
        .run("reuse::only", |t| {
            t.cluster_mut()?.populate(1)?.start()?;
            Ok(())
        })
        .unwrap();
    let test_path = tester.cluster().unwrap().test_path().to_path_buf();

    Tester::tear_down_class(&harness.config, &harness.manager()).unwrap();

    assert!(harness.world.is_removed(&test_path));
    assert!(!test_path.exists());
    assert!(!harness.config.sentinel_path.exists());

    // nothing left to clean
    Tester::tear_down_class(&harness.config, &harness.manager()).unwrap();
}

#[test]
#[serial]
fn keep_test_dir_stops_without_removing() {
    let harness = Harness::with_config(|c| c.keep_test_dir = true);
    let mut tester = harness.tester(TesterOptions::default());

    tester
        .run("keep::dir", |t| {
            t.cluster_mut()?.populate(1)?.start()?;
            Ok(())
        })
        .unwrap();

    let test_path = tester.cluster().unwrap().test_path().to_path_buf();
    assert!(test_path.join("test").is_dir());
    assert!(!harness.world.is_removed(&test_path));
    assert!(!harness.world.is_started(&test_path));

    std::fs::remove_dir_all(&test_path).unwrap();
}

#[test]
#[serial]
fn environment_changes_are_undone_at_teardown() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());

    temp_env::with_var_unset("DTEST_SCRATCH_VAR", || {
        tester
            .run("env::scratch", |_| {
                std::env::set_var("DTEST_SCRATCH_VAR", "1");
                Ok(())
            })
            .unwrap();

        assert!(std::env::var_os("DTEST_SCRATCH_VAR").is_none());
    });
}
