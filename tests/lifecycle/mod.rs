use std::path::PathBuf;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use dtest::assert_all;
use dtest::assert_invalid;
use dtest::assert_none;
use dtest::assert_one;
use dtest::assert_row_count;
use dtest::assert_unavailable;
use dtest::row;
use dtest::CfOptions;
use dtest::Consistency;
use dtest::CqlSession;
use dtest::Error;
use dtest::FailureKind;
use dtest::SessionOptions;
use dtest::Statement;
use dtest::Tester;
use dtest::TesterOptions;
use serial_test::serial;

use crate::common::append_log;
use crate::common::Harness;
use crate::enable_logger;

/// Three started nodes and a patient session on node1 using keyspace `ks`.
fn three_nodes(
    t: &mut Tester,
    rf: u32,
) -> dtest::Result<Arc<dyn CqlSession>> {
    t.cluster_mut()?.populate(3)?.start()?;
    let node1 = t.cluster()?.nodes()[0].clone();
    let session = t.patient_cql_connection(node1.as_ref(), SessionOptions::default())?;
    t.create_ks(session.as_ref(), "ks", rf)?;
    session.query("CREATE TABLE t (k int PRIMARY KEY, v text)")?;
    Ok(session)
}

#[test]
#[serial]
fn run_provisions_queries_and_removes_the_cluster() {
    enable_logger();
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());
    let mut test_path = PathBuf::new();

    tester
        .run("lifecycle::basic", |t| {
            test_path = t.cluster()?.test_path().to_path_buf();
            let session = three_nodes(t, 1)?;

            for (k, v) in [(0, "a"), (1, "b"), (2, "c")] {
                session.query(&format!("INSERT INTO t (k, v) VALUES ({}, '{}')", k, v))?;
            }

            assert_one(session.as_ref(), "SELECT * FROM t WHERE k = 1", row![1, "b"])?;
            assert_none(session.as_ref(), "SELECT * FROM t WHERE k = 7")?;
            assert_all(
                session.as_ref(),
                "SELECT k, v FROM t",
                vec![row![0, "a"], row![1, "b"], row![2, "c"]],
            )?;
            assert_row_count(session.as_ref(), "t", 3)?;
            Ok(())
        })
        .unwrap();

    assert!(harness.world.is_removed(&test_path));
    assert!(!test_path.exists());
    assert!(!harness.config.sentinel_path.exists());
    assert!(tester.cluster().is_err());
    assert!(tester.connections().is_empty());
}

#[test]
#[serial]
fn set_up_applies_default_cluster_configuration() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());

    tester.set_up("lifecycle::configuration").unwrap();
    let test_path = tester.cluster().unwrap().test_path().to_path_buf();
    let options = harness.world.configuration(&test_path).unwrap();

    assert_eq!(options["phi_convict_threshold"], Some("5".to_string()));
    assert_eq!(options["num_tokens"], Some("256".to_string()));
    assert_eq!(options["initial_token"], None);
    assert_eq!(options["read_request_timeout_in_ms"], Some("10000".to_string()));
    assert_eq!(options["request_timeout_in_ms"], Some("10000".to_string()));
    assert!(!options.contains_key("memtable_allocation_type"));

    let sentinel = std::fs::read_to_string(&harness.config.sentinel_path).unwrap();
    assert_eq!(sentinel, format!("{}\ntest", test_path.display()));

    tester.tear_down(false).unwrap();
}

#[test]
#[serial]
fn debug_and_trace_settings_reach_the_cluster() {
    let harness = Harness::with_config(|c| {
        c.debug = dtest::LogLevelToggle::All;
        c.trace = dtest::LogLevelToggle::Classes(vec!["org.apache.cassandra.gms".to_string()]);
    });
    let mut tester = harness.tester(TesterOptions::default());

    tester.set_up("lifecycle::log_levels").unwrap();
    let test_path = tester.cluster().unwrap().test_path().to_path_buf();

    assert_eq!(
        harness.world.log_levels(&test_path),
        vec![
            ("DEBUG".to_string(), Vec::<String>::new()),
            ("TRACE".to_string(), vec!["org.apache.cassandra.gms".to_string()]),
        ]
    );
    tester.tear_down(false).unwrap();
}

#[test]
#[serial]
fn wrong_row_order_fails_and_saves_logs() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());

    let err = tester
        .run("lifecycle::order", |t| {
            let session = three_nodes(t, 1)?;
            session.query("INSERT INTO t (k, v) VALUES (0, 'a')")?;
            session.query("INSERT INTO t (k, v) VALUES (1, 'b')")?;
            assert_all(
                session.as_ref(),
                "SELECT k, v FROM t",
                vec![row![1, "b"], row![0, "a"]],
            )
        })
        .unwrap_err();

    assert!(err.is_assertion());
    assert!(err
        .to_string()
        .contains("Expected [[1, 'b'], [0, 'a']] from SELECT k, v FROM t, but got [[0, 'a'], [1, 'b']]"));
    for node in ["node1", "node2", "node3"] {
        assert!(harness.saved_log(node).exists(), "{} log not saved", node);
    }
}

#[test]
#[serial]
fn patient_connection_waits_for_the_node() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());
    tester.set_up("lifecycle::patient").unwrap();
    tester.cluster_mut().unwrap().populate(1).unwrap().start().unwrap();
    let node1 = tester.cluster().unwrap().nodes()[0].clone();

    harness.world.refuse_connections(1);
    let err = tester
        .cql_connection(node1.as_ref(), SessionOptions::default())
        .unwrap_err();
    assert_eq!(err.failure_kind(), Some(FailureKind::NoHostAvailable));

    harness.world.refuse_connections(3);
    let before = harness.world.connect_attempts();
    let session = tester
        .patient_exclusive_cql_connection(node1.as_ref(), SessionOptions::default())
        .unwrap();
    assert_eq!(harness.world.connect_attempts() - before, 4);
    session.query("CREATE KEYSPACE ks WITH replication = {'class':'SimpleStrategy', 'replication_factor':1}").unwrap();

    let options = harness.world.last_session_options().unwrap();
    assert_eq!(options.protocol_version, Some(3));
    assert_eq!(options.exclusive_host, node1.binary_address());
    assert_eq!(tester.connections().len(), 1);

    tester.tear_down(false).unwrap();
    assert_eq!(
        session.query("SELECT * FROM ks.t").unwrap_err().kind,
        FailureKind::NoHostAvailable
    );
}

#[test]
#[serial]
fn stopped_replicas_make_all_unavailable() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());

    tester
        .run("lifecycle::unavailable", |t| {
            let session = three_nodes(t, 3)?;
            session.query("INSERT INTO t (k, v) VALUES (0, 'a')")?;

            let nodes = t.cluster()?.nodes();
            nodes[1].stop(false)?;
            nodes[2].stop(false)?;

            assert_unavailable(|| {
                session.execute(&Statement::new("SELECT * FROM t").with_consistency(Consistency::All))
            })?;
            assert_unavailable(|| {
                session.execute(
                    &Statement::new("INSERT INTO t (k, v) VALUES (1, 'b')")
                        .with_consistency(Consistency::Quorum),
                )
            })?;
            assert_one(
                session.as_ref(),
                Statement::new("SELECT * FROM t").with_consistency(Consistency::One),
                row![0, "a"],
            )?;

            // a read that succeeds is an assertion failure
            let err = assert_unavailable(|| session.query("SELECT * FROM t")).unwrap_err();
            assert!(err.is_assertion());
            Ok(())
        })
        .unwrap();
}

#[test]
#[serial]
fn invalid_queries_are_matched_by_kind_and_message() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());

    tester
        .run("lifecycle::invalid", |t| {
            let session = three_nodes(t, 1)?;
            assert_invalid(
                session.as_ref(),
                "SELECT * FROM missing",
                Some("unconfigured table"),
                FailureKind::InvalidRequest,
            )?;
            assert_invalid(
                session.as_ref(),
                "INSERT INTO t (k, nope) VALUES (0, 'a')",
                None,
                FailureKind::InvalidRequest,
            )?;

            let err = assert_invalid(
                session.as_ref(),
                "SELECT * FROM t",
                None,
                FailureKind::InvalidRequest,
            )
            .unwrap_err();
            assert!(err.to_string().contains("Expecting query to be invalid"));
            Ok(())
        })
        .unwrap();
}

#[test]
#[serial]
fn create_cf_builds_the_default_table_layout() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());

    tester
        .run("lifecycle::create_cf", |t| {
            let session = three_nodes(t, 1)?;
            t.create_cf(session.as_ref(), "cf", &CfOptions::default().gc_grace(0))?;
            session.query("INSERT INTO cf (key, c, v) VALUES ('k1', 'c1', 'v1')")?;
            session.query("INSERT INTO cf (key, c, v) VALUES ('k1', 'c2', 'v2')")?;
            session.query("INSERT INTO cf (key, c, v) VALUES ('k1', 'c1', 'v3')")?;
            assert_all(
                session.as_ref(),
                "SELECT c, v FROM cf WHERE key = 'k1'",
                vec![row!["c1", "v3"], row!["c2", "v2"]],
            )
        })
        .unwrap();
}

#[test]
#[serial]
fn node_log_errors_fail_an_otherwise_passing_test() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());

    let err = tester
        .run("lifecycle::log_errors", |t| {
            t.cluster_mut()?.populate(2)?.start()?;
            let node2 = t.cluster()?.nodes()[1].clone();
            append_log(node2.as_ref(), "INFO  [main] Starting listening for CQL clients");
            append_log(node2.as_ref(), "ERROR [CompactionExecutor:1] Exception in thread");
            append_log(node2.as_ref(), "\tat org.apache.cassandra.db.Compaction.run");
            Ok(())
        })
        .unwrap_err();

    match err {
        Error::LogErrors { node, errors } => {
            assert_eq!(node, "node2");
            assert_eq!(
                errors,
                vec!["ERROR [CompactionExecutor:1] Exception in thread \tat org.apache.cassandra.db.Compaction.run"]
            );
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(harness.saved_log("node2").exists());
}

#[test]
#[serial]
fn ignored_log_errors_and_allowed_errors_pass() {
    let harness = Harness::new();

    let options = TesterOptions::default()
        .ignore_log_pattern("Compaction")
        .unwrap();
    let mut tester = harness.tester(options);
    tester
        .run("lifecycle::ignored", |t| {
            t.cluster_mut()?.populate(1)?.start()?;
            let node1 = t.cluster()?.nodes()[0].clone();
            append_log(node1.as_ref(), "ERROR [CompactionExecutor:1] expected");
            Ok(())
        })
        .unwrap();

    let mut tester = harness.tester(TesterOptions::default().allow_log_errors());
    tester
        .run("lifecycle::allowed", |t| {
            t.cluster_mut()?.populate(1)?.start()?;
            let node1 = t.cluster()?.nodes()[0].clone();
            append_log(node1.as_ref(), "ERROR [main] anything goes");
            Ok(())
        })
        .unwrap();

    assert!(!harness.saved_log("node1").exists());
}

#[test]
#[serial]
fn background_writer_runs_until_stopped() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());

    tester
        .run("lifecycle::runner", |t| {
            let session = three_nodes(t, 1)?;
            let writer_session = session.clone();
            let writer = t.go("writer", move |step| {
                writer_session
                    .query(&format!("INSERT INTO t (k, v) VALUES ({}, 'x')", step))
                    .map(|_| ())
            })?;

            while writer.steps() < 5 {
                sleep(Duration::from_millis(1));
            }
            writer.stop()?;

            let written = writer.steps() as i64;
            assert_row_count(session.as_ref(), "t", written)?;
            Ok(())
        })
        .unwrap();
}

#[test]
#[serial]
fn failing_background_task_is_reported_by_check() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());

    tester
        .run("lifecycle::runner_failure", |t| {
            let session = three_nodes(t, 1)?;
            let reader_session = session.clone();
            let reader = t.go("reader", move |_| {
                reader_session.query("SELECT * FROM missing").map(|_| ())
            })?;

            while reader.is_running() {
                sleep(Duration::from_millis(1));
            }
            let failure = reader.check().unwrap_err();
            assert_eq!(failure.task, "reader");
            assert_eq!(failure.step, 0);
            assert!(failure.to_string().contains("unconfigured table missing"));
            Ok(())
        })
        .unwrap();
}

#[test]
#[serial]
fn version_gates_skip_without_failing() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());

    let err = tester
        .run("lifecycle::skipped", |t| {
            t.require_version("3.0", None)?;
            unreachable!("the cluster runs 2.1.3");
        })
        .unwrap_err();

    assert!(err.is_skipped());
    assert_eq!(err.to_string(), "Skipped: 2.1.3 < 3.0");
    assert!(!harness.config.log_saved_dir.join(dtest::LAST_LOG).exists());
}
