use std::cell::Cell;

use dtest::assert_one;
use dtest::row;
use dtest::run_scenarios;
use dtest::Error;
use dtest::SessionOptions;
use dtest::Tester;
use dtest::TesterOptions;
use serial_test::serial;

use crate::common::Harness;

fn seed(t: &mut Tester) -> dtest::Result<std::sync::Arc<dyn dtest::CqlSession>> {
    t.cluster_mut()?.populate(1)?.start()?;
    let node1 = t.cluster()?.nodes()[0].clone();
    let session = t.patient_cql_connection(node1.as_ref(), SessionOptions::default())?;
    t.create_ks(session.as_ref(), "ks", 1)?;
    session.query("CREATE TABLE t (k int PRIMARY KEY, v text)")?;
    for (k, v) in [(0, "a"), (1, "b"), (2, "c")] {
        session.query(&format!("INSERT INTO t (k, v) VALUES ({}, '{}')", k, v))?;
    }
    Ok(session)
}

#[test]
#[serial]
fn batch_reports_every_deferred_failure() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());

    let err = tester
        .run("scenarios::deferred", |t| {
            let session = seed(t)?;
            let cases = vec![(0, "a"), (1, "x"), (2, "c"), (3, "d")];
            run_scenarios(
                cases,
                |(k, v)| {
                    assert_one(
                        session.as_ref(),
                        format!("SELECT * FROM t WHERE k = {}", k),
                        row![*k, *v],
                    )
                },
                Error::is_assertion,
            )?;
            Ok(())
        })
        .unwrap_err();

    let failures = match err {
        Error::Scenarios(failures) => failures,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(failures.len(), 2);
    assert_eq!(
        failures.results.iter().map(|r| r.passed).collect::<Vec<_>>(),
        vec![true, false, true, false]
    );
    assert_eq!(failures.exceptions[0].scenario, "(1, \"x\")");
    assert_eq!(failures.exceptions[0].kind, "AssertionError");
    assert_eq!(failures.exceptions[1].scenario, "(3, \"d\")");

    let report = failures.to_string();
    assert!(report.contains("encountered AssertionError"));
    assert!(report.contains("Expected [[3, 'd']] from SELECT * FROM t WHERE k = 3, but got []"));
}

#[test]
#[serial]
fn undeferrable_failure_stops_the_batch() {
    let harness = Harness::new();
    let mut tester = harness.tester(TesterOptions::default());
    let calls = Cell::new(0);

    let err = tester
        .run("scenarios::abort", |t| {
            let session = seed(t)?;
            run_scenarios(
                ["t", "missing", "t"],
                |table| {
                    calls.set(calls.get() + 1);
                    session.query(&format!("SELECT * FROM {}", table))?;
                    Ok(())
                },
                Error::is_assertion,
            )?;
            Ok(())
        })
        .unwrap_err();

    assert_eq!(calls.get(), 2);
    let failures = match err {
        Error::Scenarios(failures) => failures,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures.exceptions[0].kind, "InvalidRequest");
    assert_eq!(failures.results.len(), 2);
}
