//! Integration tests for managed objects, governance and administration.

mod test_utils;

use cadre_core::config::OfficeConfig;
use cadre_core::escalation::{Escalation, ExecutionError};
use cadre_core::index::ManagedObjectScope;
use cadre_core::object::source_fn;
use cadre_core::office::OfficeBuilder;
use cadre_execution::hooks::ExecutionEvent;
use cadre_execution::office::Office;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use test_utils::{
    Audit, Connection, DeferredSource, EventLog, ExecutionLog, Latch, Latched, SlowHandshake,
    Tracked, TypeErrorX, failing, handling, logging,
};

fn builder() -> OfficeBuilder {
    OfficeBuilder::new(OfficeConfig::default())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ASYNCHRONOUS SOURCING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn object_is_sourced_and_coordinated_once() {
    let log = ExecutionLog::new();
    let source = DeferredSource::default();
    let coordinations = Arc::new(AtomicUsize::new(0));

    let mut builder = builder();
    builder.add_managed_object("conn", ManagedObjectScope::Process, source.clone());
    builder
        .add_fn("F", logging(&log, "F"))
        .with_object("conn")
        .with_next("G");
    builder.add_fn("G", logging(&log, "G")).with_object("conn");

    let office = Office::new(builder.build());
    let events = EventLog::attach(&office);
    let handle = office.invoke_process("F", None).unwrap();

    assert!(!handle.is_complete());
    assert!(log.entries().is_empty());
    assert_eq!(
        events.count(|event| matches!(event, ExecutionEvent::FunctionSuspended { .. })),
        1
    );

    let user = source.take_user().unwrap();
    user.set_object(Connection {
        coordinations: Arc::clone(&coordinations),
    });

    assert!(handle.wait().is_completed());
    assert_eq!(log.entries(), vec!["F", "G"]);
    assert_eq!(source.sourced.load(Ordering::SeqCst), 1);
    assert_eq!(coordinations.load(Ordering::SeqCst), 1);
    assert_eq!(
        events.count(|event| matches!(event, ExecutionEvent::ProtectionEngaged { .. })),
        1
    );
}

#[test]
fn object_provided_from_another_thread_resumes_function() {
    let log = ExecutionLog::new();
    let source = DeferredSource::default();

    let mut builder = builder();
    builder.add_managed_object("conn", ManagedObjectScope::Thread, source.clone());
    builder.add_fn("F", logging(&log, "F")).with_object("conn");

    let office = Office::new(builder.build());
    let handle = office.invoke_process("F", None).unwrap();

    let user = source.take_user().unwrap();
    let provider = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        user.set_object(Connection {
            coordinations: Arc::new(AtomicUsize::new(0)),
        });
    });

    let outcome = handle.wait_timeout(Duration::from_secs(5)).unwrap();
    provider.join().unwrap();
    assert!(outcome.is_completed());
    assert_eq!(log.entries(), vec!["F"]);
}

#[test]
fn failed_sourcing_escalates() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    builder.add_managed_object(
        "broken",
        ManagedObjectScope::Function,
        source_fn(|| -> Result<Tracked, Escalation> { Err(TypeErrorX.into()) }),
    );
    builder
        .add_fn("F", logging(&log, "F"))
        .with_object("broken")
        .with_escalation::<TypeErrorX>("recover");
    builder.add_fn("recover", handling(&log, "recover"));

    let office = Office::new(builder.build());
    assert!(office.invoke_process("F", None).unwrap().wait().is_completed());
    assert_eq!(log.entries(), vec!["recover: type error x"]);
}

#[test]
fn expired_operation_escalates_timeout() {
    let log = ExecutionLog::new();
    let source = DeferredSource::default();

    let mut builder = builder();
    builder.add_managed_object("slow", ManagedObjectScope::Function, source.clone());
    builder
        .add_fn("F", logging(&log, "F"))
        .with_object("slow")
        .with_async_timeout(Duration::from_millis(1));

    let office = Office::new(builder.build());
    let handle = office.invoke_process("F", None).unwrap();
    assert!(!handle.is_complete());

    thread::sleep(Duration::from_millis(10));
    assert_eq!(office.check_async_operations(), 1);

    let outcome = handle.wait_timeout(Duration::from_secs(5)).unwrap();
    let escalation = outcome.escalation().unwrap();
    assert!(matches!(
        escalation.downcast_ref::<ExecutionError>(),
        Some(ExecutionError::AsyncOperationTimedOut { .. })
    ));
    assert!(log.entries().is_empty());
    assert!(source.take_user().is_some());
}

#[test]
fn pending_coordination_resumes_function_once_settled() {
    let log = ExecutionLog::new();
    let latch = Latch::default();
    let coordinations = Arc::new(AtomicUsize::new(0));

    let mut builder = builder();
    let handshake_latch = latch.clone();
    let handshake_count = Arc::clone(&coordinations);
    builder.add_managed_object(
        "conn",
        ManagedObjectScope::Thread,
        source_fn(move || {
            Ok(SlowHandshake {
                latch: handshake_latch.clone(),
                coordinations: Arc::clone(&handshake_count),
            })
        }),
    );
    builder.add_fn("F", logging(&log, "F")).with_object("conn");

    let office = Office::new(builder.build());
    let handle = office.invoke_process("F", None).unwrap();
    assert!(!handle.is_complete());
    assert!(log.entries().is_empty());

    assert!(latch.open());
    assert!(handle.wait().is_completed());
    assert_eq!(log.entries(), vec!["F"]);
    assert_eq!(coordinations.load(Ordering::SeqCst), 1);
}

#[test]
fn dependency_chain_of_deferred_objects_sources_each_once() {
    let log = ExecutionLog::new();
    let first = DeferredSource::default();
    let second = DeferredSource::default();

    let mut builder = builder();
    builder.add_managed_object("a", ManagedObjectScope::Thread, first.clone());
    builder
        .add_managed_object("b", ManagedObjectScope::Thread, second.clone())
        .with_dependency("a", "a");
    builder.add_fn("F", logging(&log, "F")).with_object("b");

    let office = Office::new(builder.build());
    let events = EventLog::attach(&office);
    let handle = office.invoke_process("F", None).unwrap();
    assert_eq!(first.sourced.load(Ordering::SeqCst), 1);
    assert_eq!(second.sourced.load(Ordering::SeqCst), 0);

    first.take_user().unwrap().set_object(Connection {
        coordinations: Arc::new(AtomicUsize::new(0)),
    });
    assert!(!handle.is_complete());
    assert_eq!(second.sourced.load(Ordering::SeqCst), 1);

    second.take_user().unwrap().set_object(Connection {
        coordinations: Arc::new(AtomicUsize::new(0)),
    });
    assert!(handle.wait().is_completed());
    assert_eq!(log.entries(), vec!["F"]);
    assert_eq!(first.sourced.load(Ordering::SeqCst), 1);
    assert_eq!(second.sourced.load(Ordering::SeqCst), 1);
    assert_eq!(
        events.count(|event| matches!(event, ExecutionEvent::FunctionSuspended { .. })),
        2
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn monitor_sweeps_timeouts_in_background() {
    let source = DeferredSource::default();
    let config = OfficeConfig::default().with_monitor_interval(Duration::from_millis(5));

    let mut builder = OfficeBuilder::new(config);
    builder.add_managed_object("slow", ManagedObjectScope::Function, source.clone());
    builder
        .add_fn("F", |_| Ok(()))
        .with_object("slow")
        .with_async_timeout(Duration::from_millis(20));

    let office = Office::new(builder.build());
    let monitor = office.spawn_monitor();
    let handle = office.invoke_process("F", None).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.completed())
        .await
        .unwrap();
    assert!(!outcome.is_completed());
    monitor.abort();
}

// ═══════════════════════════════════════════════════════════════════════════════
// GOVERNANCE
// ═══════════════════════════════════════════════════════════════════════════════

fn governed_builder(log: &ExecutionLog) -> OfficeBuilder {
    let mut builder = builder();
    let audit_log = log.clone();
    builder.add_governance("audit", move || Audit {
        log: audit_log.clone(),
    });
    let source_log = log.clone();
    builder
        .add_managed_object(
            "cart",
            ManagedObjectScope::Thread,
            source_fn(move || Ok(Tracked::new("cart", &source_log))),
        )
        .with_governance("audit");
    builder
}

#[test]
fn governance_is_enforced_when_no_longer_required() {
    let log = ExecutionLog::new();
    let mut builder = governed_builder(&log);
    builder
        .add_fn("F", logging(&log, "F"))
        .with_object("cart")
        .with_governance("audit")
        .with_next("G");
    builder.add_fn("G", logging(&log, "G"));

    let office = Office::new(builder.build());
    assert!(office.invoke_process("F", None).unwrap().wait().is_completed());
    assert_eq!(
        log.entries(),
        vec!["activate", "govern cart", "F", "enforce", "G", "release cart"]
    );
}

#[test]
fn governance_is_enforced_when_thread_ends() {
    let log = ExecutionLog::new();
    let mut builder = governed_builder(&log);
    builder
        .add_fn("F", logging(&log, "F"))
        .with_object("cart")
        .with_governance("audit");

    let office = Office::new(builder.build());
    assert!(office.invoke_process("F", None).unwrap().wait().is_completed());
    assert_eq!(
        log.entries(),
        vec!["activate", "govern cart", "F", "enforce", "release cart"]
    );
}

#[test]
fn pending_activation_runs_function_after_it_settles() {
    let log = ExecutionLog::new();
    let latch = Latch::default();

    let mut builder = builder();
    let governance_log = log.clone();
    let governance_latch = latch.clone();
    builder.add_governance("latched", move || Latched {
        log: governance_log.clone(),
        latch: governance_latch.clone(),
    });
    builder.add_fn("F", logging(&log, "F")).with_governance("latched");

    let office = Office::new(builder.build());
    let handle = office.invoke_process("F", None).unwrap();
    assert!(!handle.is_complete());
    assert_eq!(log.entries(), vec!["activate"]);

    assert!(latch.open());
    assert!(handle.wait().is_completed());
    assert_eq!(log.entries(), vec!["activate", "F", "enforce"]);
    assert_eq!(log.count("activate"), 1);
}

#[test]
fn escalation_handler_disregards_governance() {
    let log = ExecutionLog::new();
    let mut builder = governed_builder(&log);
    builder
        .add_fn("F", failing(&log, "F"))
        .with_object("cart")
        .with_governance("audit")
        .with_escalation::<TypeErrorX>("rollback");
    builder.add_fn("rollback", handling(&log, "rollback"));

    let office = Office::new(builder.build());
    assert!(office.invoke_process("F", None).unwrap().wait().is_completed());
    assert_eq!(
        log.entries(),
        vec![
            "activate",
            "govern cart",
            "F",
            "disregard",
            "rollback: type error x",
            "release cart"
        ]
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADMINISTRATION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn administration_runs_around_all_passes() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    let source_log = log.clone();
    builder.add_managed_object(
        "cart",
        ManagedObjectScope::Function,
        source_fn(move || Ok(Tracked::new("cart", &source_log))),
    );

    let body_log = log.clone();
    let mut pass = 0;
    let pre_log = log.clone();
    let post_log = log.clone();
    builder
        .add_fn("F", move |ctx| {
            pass += 1;
            body_log.push(format!("F{pass}"));
            if pass == 1 {
                ctx.mark_not_complete();
            }
            Ok(())
        })
        .with_object("cart")
        .with_pre_administration("check", &["cart"], move |ctx| {
            let names: Vec<&str> = ctx.objects().iter().map(|object| object.name()).collect();
            pre_log.push(format!("pre {} {names:?}", ctx.function()));
            Ok(())
        })
        .with_post_administration("audit", &["cart"], move |ctx| {
            post_log.push(format!("post {}", ctx.function()));
            Ok(())
        });

    let office = Office::new(builder.build());
    assert!(office.invoke_process("F", None).unwrap().wait().is_completed());
    assert_eq!(
        log.entries(),
        vec![
            "pre F [\"cart\"]",
            "F1",
            "F2",
            "post F",
            "release cart"
        ]
    );
}

#[test]
fn failing_administration_escalates() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    builder
        .add_fn("F", logging(&log, "F"))
        .with_pre_administration("deny", &[], |_| Err(TypeErrorX.into()))
        .with_escalation::<TypeErrorX>("recover");
    builder.add_fn("recover", handling(&log, "recover"));

    let office = Office::new(builder.build());
    assert!(office.invoke_process("F", None).unwrap().wait().is_completed());
    assert_eq!(log.entries(), vec!["recover: type error x"]);
}
