//! Integration tests for escalation routing.
//!
//! Escalations are offered to the failing function, then to its parallel
//! owners, then to the global levels in order. Anything still unhandled tears
//! the process down.

mod test_utils;

use cadre_core::config::OfficeConfig;
use cadre_core::escalation::{Escalation, EscalationLevel, EscalationMatcher, ExecutionError};
use cadre_core::function::FlowKind;
use cadre_core::index::ManagedObjectScope;
use cadre_core::object::source_fn;
use cadre_core::office::OfficeBuilder;
use cadre_execution::hooks::ExecutionEvent;
use cadre_execution::office::Office;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use test_utils::{
    Connection, DeferredSource, EventLog, ExecutionLog, Tracked, TypeErrorX, TypeErrorY, failing,
    handling, logging,
};

fn builder() -> OfficeBuilder {
    OfficeBuilder::new(OfficeConfig::default())
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCAL HANDLING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn parallel_owner_handles_escalation_of_nested_flow() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    let a_log = log.clone();
    builder
        .add_fn("A", move |ctx| {
            a_log.push("A");
            ctx.do_flow("B", FlowKind::Parallel);
            ctx.do_flow("S", FlowKind::Sequential);
            Ok(())
        })
        .with_escalation::<TypeErrorX>("handleA");
    let b_log = log.clone();
    builder.add_fn("B", move |ctx| {
        b_log.push("B");
        ctx.do_flow("C", FlowKind::Parallel);
        Ok(())
    });
    builder.add_fn("C", failing(&log, "C"));
    builder
        .add_fn("handleA", handling(&log, "handleA"))
        .with_parameter::<Escalation>();
    builder.add_fn("S", logging(&log, "S"));

    let office = Office::new(builder.build());
    let events = EventLog::attach(&office);
    let outcome = office.invoke_process("A", None).unwrap().wait();

    assert!(outcome.is_completed());
    assert_eq!(log.entries(), vec!["A", "B", "C", "handleA: type error x", "S"]);

    let cleared: Vec<String> = events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ExecutionEvent::FunctionCleared { function, .. } => Some(function),
            _ => None,
        })
        .collect();
    assert_eq!(cleared, vec!["C", "B"]);
    assert_eq!(
        events.count(|event| matches!(
            event,
            ExecutionEvent::Escalated { handler: Some(handler), level: None, .. } if handler == "handleA"
        )),
        1
    );
}

#[test]
fn first_matching_handler_wins() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    builder
        .add_fn("F", failing(&log, "F"))
        .with_escalation::<TypeErrorY>("onY")
        .with_escalation::<TypeErrorX>("onX")
        .with_escalation_matcher(EscalationMatcher::any(), "onAny");
    builder.add_fn("onY", handling(&log, "onY"));
    builder.add_fn("onX", handling(&log, "onX"));
    builder.add_fn("onAny", handling(&log, "onAny"));

    let office = Office::new(builder.build());
    assert!(office.invoke_process("F", None).unwrap().wait().is_completed());
    assert_eq!(log.entries(), vec!["F", "onX: type error x"]);
}

#[test]
fn handler_runs_after_failed_function_released_its_objects() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    let source_log = log.clone();
    builder.add_managed_object(
        "scratch",
        ManagedObjectScope::Function,
        source_fn(move || Ok(Tracked::new("scratch", &source_log))),
    );
    builder
        .add_fn("root", failing(&log, "root"))
        .with_object("scratch");
    builder
        .add_fn("handlerH", handling(&log, "handlerH"))
        .with_parameter::<Escalation>();
    builder.add_escalation::<TypeErrorX>("handlerH");

    let office = Office::new(builder.build());
    let events = EventLog::attach(&office);
    assert!(office.invoke_process("root", None).unwrap().wait().is_completed());

    assert_eq!(
        log.entries(),
        vec!["root", "release scratch", "handlerH: type error x"]
    );
    assert_eq!(log.count("handlerH: type error x"), 1);
    assert_eq!(
        events.count(|event| matches!(
            event,
            ExecutionEvent::Escalated { level: Some(EscalationLevel::Flow), .. }
        )),
        1
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL LEVELS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn global_levels_are_tried_in_order() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    builder.add_fn("F", failing(&log, "F"));
    let office_log = log.clone();
    builder.with_office_handler(move |escalation| {
        office_log.push("office");
        Err(escalation.clone())
    });
    let floor_log = log.clone();
    builder.with_floor_handler(move |_| {
        floor_log.push("floor");
        Ok(())
    });

    let office = Office::new(builder.build());
    let events = EventLog::attach(&office);
    let invocation_log = log.clone();
    let outcome = office
        .invoke_process_with_handler("F", None, move |escalation| {
            invocation_log.push(format!("invocation {escalation}"));
            Ok(())
        })
        .unwrap()
        .wait();

    assert!(outcome.is_completed());
    assert_eq!(log.entries(), vec!["F", "office", "invocation type error x"]);

    let levels: Vec<EscalationLevel> = events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ExecutionEvent::Escalated { level, .. } => level,
            _ => None,
        })
        .collect();
    assert_eq!(
        levels,
        vec![EscalationLevel::Office, EscalationLevel::InvocationHandler]
    );
}

#[test]
fn floor_handler_is_the_last_resort() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    builder.add_fn("F", failing(&log, "F"));
    let floor_log = log.clone();
    builder.with_floor_handler(move |escalation| {
        floor_log.push(format!("floor {escalation}"));
        Ok(())
    });

    let office = Office::new(builder.build());
    assert!(office.invoke_process("F", None).unwrap().wait().is_completed());
    assert_eq!(log.entries(), vec!["F", "floor type error x"]);
}

#[test]
fn unhandled_escalation_fails_the_process() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    builder.add_fn("F", failing(&log, "F")).with_next("G");
    builder.add_fn("G", logging(&log, "G"));

    let office = Office::new(builder.build());
    let events = EventLog::attach(&office);
    let outcome = office.invoke_process("F", None).unwrap().wait();

    assert!(outcome.escalation().unwrap().is::<TypeErrorX>());
    assert_eq!(log.entries(), vec!["F"]);
    assert_eq!(
        events.count(|event| matches!(event, ExecutionEvent::ProcessComplete { failed: true, .. })),
        1
    );
}

#[test]
fn torn_down_process_keeps_its_objects_until_every_thread_state_abandons() {
    let log = ExecutionLog::new();
    let gate = DeferredSource::default();
    let conn = DeferredSource::default();

    let mut builder = builder();
    let ledger_log = log.clone();
    builder.add_managed_object(
        "ledger",
        ManagedObjectScope::Process,
        source_fn(move || Ok(Tracked::new("ledger", &ledger_log))),
    );
    builder.add_managed_object("gate", ManagedObjectScope::Thread, gate.clone());
    builder
        .add_managed_object("conn", ManagedObjectScope::Thread, conn.clone())
        .with_dependency("ledger", "ledger");
    let root_log = log.clone();
    builder.add_fn("root", move |ctx| {
        root_log.push("root");
        ctx.do_flow("child", FlowKind::Asynchronous);
        ctx.do_flow("fail", FlowKind::Sequential);
        Ok(())
    });
    builder.add_fn("fail", failing(&log, "fail")).with_object("gate");
    builder.add_fn("child", logging(&log, "child")).with_object("conn");

    let office = Office::new(builder.build());
    let handle = office.invoke_process("root", None).unwrap();
    assert!(!handle.is_complete());

    let connection = || Connection {
        coordinations: Arc::new(AtomicUsize::new(0)),
    };
    gate.take_user().unwrap().set_object(connection());
    let outcome = handle.wait();
    assert!(outcome.escalation().unwrap().is::<TypeErrorX>());
    assert_eq!(log.entries(), vec!["root", "fail"]);

    conn.take_user().unwrap().set_object(connection());
    assert_eq!(log.entries(), vec!["root", "fail", "release ledger"]);
}

#[test]
fn panicking_function_escalates() {
    let mut builder = builder();
    builder.add_fn("F", |_| -> Result<(), Escalation> { panic!("boom") });

    let office = Office::new(builder.build());
    let outcome = office.invoke_process("F", None).unwrap().wait();

    let escalation = outcome.escalation().unwrap();
    match escalation.downcast_ref::<ExecutionError>() {
        Some(ExecutionError::FunctionPanicked { function, message }) => {
            assert_eq!(function, "F");
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected escalation: {other:?}"),
    }
}

#[test]
fn flow_callback_receives_unwinding_escalation() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    let root_log = log.clone();
    builder
        .add_fn("root", move |ctx| {
            let callback_log = root_log.clone();
            ctx.do_flow_with_callback("child", FlowKind::Parallel, None, move |outcome| {
                let cause = outcome.as_ref().map(Escalation::to_string).unwrap_or_default();
                callback_log.push(format!("callback {cause}"));
            });
            Ok(())
        })
        .with_escalation::<TypeErrorX>("recover");
    builder.add_fn("child", failing(&log, "child"));
    builder.add_fn("recover", handling(&log, "recover"));

    let office = Office::new(builder.build());
    assert!(office.invoke_process("root", None).unwrap().wait().is_completed());
    assert_eq!(
        log.entries(),
        vec!["child", "callback type error x", "recover: type error x"]
    );
}
