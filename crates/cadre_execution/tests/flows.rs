//! Integration tests for flow scheduling.
//!
//! Covers the ordering guarantees between parallel, sequential and
//! asynchronous flows, repeated execution passes, static next functions and
//! the release of scoped managed objects.

mod test_utils;

use cadre_core::config::OfficeConfig;
use cadre_core::escalation::{Escalation, ExecutionError};
use cadre_core::function::FlowKind;
use cadre_core::index::ManagedObjectScope;
use cadre_core::object::source_fn;
use cadre_core::office::OfficeBuilder;
use cadre_execution::hooks::ExecutionEvent;
use cadre_execution::office::Office;
use test_utils::{EventLog, ExecutionLog, Tracked, failing, logging};

fn builder() -> OfficeBuilder {
    OfficeBuilder::new(OfficeConfig::default())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORDERING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn parallel_runs_before_next_pass_and_sequential_after_completion() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    let a_log = log.clone();
    let mut pass = 0;
    builder.add_fn("A", move |ctx| {
        pass += 1;
        a_log.push(format!("A{pass}"));
        if pass == 1 {
            ctx.do_flow("B", FlowKind::Parallel);
            ctx.do_flow("C", FlowKind::Sequential);
            ctx.mark_not_complete();
        }
        Ok(())
    });
    builder.add_fn("B", logging(&log, "B"));
    builder.add_fn("C", logging(&log, "C"));

    let office = Office::new(builder.build());
    let outcome = office.invoke_process("A", None).unwrap().wait();

    assert!(outcome.is_completed());
    assert_eq!(log.entries(), vec!["A1", "B", "A2", "C"]);
}

#[test]
fn parallel_flows_run_in_request_order() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    let root_log = log.clone();
    builder.add_fn("root", move |ctx| {
        root_log.push("root");
        ctx.do_flow("first", FlowKind::Parallel);
        ctx.do_flow("second", FlowKind::Parallel);
        Ok(())
    });
    let first_log = log.clone();
    builder.add_fn("first", move |ctx| {
        first_log.push("first");
        ctx.do_flow("nested", FlowKind::Parallel);
        Ok(())
    });
    builder.add_fn("nested", logging(&log, "nested"));
    builder.add_fn("second", logging(&log, "second"));

    let office = Office::new(builder.build());
    assert!(office.invoke_process("root", None).unwrap().wait().is_completed());
    assert_eq!(log.entries(), vec!["root", "first", "nested", "second"]);
}

#[test]
fn sequential_flows_keep_request_order_across_passes() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    let mut pass = 0;
    builder.add_fn("A", move |ctx| {
        pass += 1;
        if pass == 1 {
            ctx.do_flow("S1", FlowKind::Sequential);
            ctx.mark_not_complete();
        } else {
            ctx.do_flow("S2", FlowKind::Sequential);
        }
        Ok(())
    });
    builder.add_fn("S1", logging(&log, "S1"));
    builder.add_fn("S2", logging(&log, "S2"));

    let office = Office::new(builder.build());
    assert!(office.invoke_process("A", None).unwrap().wait().is_completed());
    assert_eq!(log.entries(), vec!["S1", "S2"]);
}

#[test]
fn not_complete_function_executes_until_complete() {
    let mut builder = builder();
    let mut passes = 0;
    builder.add_fn("poll", move |ctx| {
        passes += 1;
        if passes < 4 {
            ctx.mark_not_complete();
        }
        Ok(())
    });

    let office = Office::new(builder.build());
    let events = EventLog::attach(&office);
    assert!(office.invoke_process("poll", None).unwrap().wait().is_completed());

    let executed: Vec<usize> = events
        .events()
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::FunctionExecuted { pass, .. } => Some(*pass),
            _ => None,
        })
        .collect();
    assert_eq!(executed, vec![1, 2, 3, 4]);
    assert_eq!(
        events.count(|event| matches!(event, ExecutionEvent::CompletionHandled { .. })),
        1
    );
}

#[test]
fn next_function_receives_result() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    builder
        .add_fn("greet", |ctx| {
            ctx.set_result(String::from("hello"));
            Ok(())
        })
        .with_next("reply");
    let reply_log = log.clone();
    builder
        .add_fn("reply", move |ctx| {
            let greeting = ctx.parameter::<String>().cloned().unwrap_or_default();
            reply_log.push(format!("reply to {greeting}"));
            Ok(())
        })
        .with_parameter::<String>();

    let office = Office::new(builder.build());
    assert!(office.invoke_process("greet", None).unwrap().wait().is_completed());
    assert_eq!(log.entries(), vec!["reply to hello"]);
}

#[test]
fn mistyped_flow_parameter_escalates() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    builder.add_fn("start", |ctx| {
        ctx.do_flow_with("count", FlowKind::Parallel, "three");
        Ok(())
    });
    builder.add_fn("count", logging(&log, "count")).with_parameter::<u32>();

    let office = Office::new(builder.build());
    let outcome = office.invoke_process("start", None).unwrap().wait();

    let escalation = outcome.escalation().unwrap();
    assert!(matches!(
        escalation.downcast_ref::<ExecutionError>(),
        Some(ExecutionError::ParameterTypeMismatch { .. })
    ));
    assert!(log.entries().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════════
// ASYNCHRONOUS FLOWS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn asynchronous_flow_callback_runs_after_flow() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    let start_log = log.clone();
    builder.add_fn("start", move |ctx| {
        start_log.push("start");
        let callback_log = start_log.clone();
        ctx.do_flow_with_callback("background", FlowKind::Asynchronous, None, move |outcome| {
            callback_log.push(format!("callback {}", outcome.is_none()));
        });
        Ok(())
    });
    builder.add_fn("background", logging(&log, "background"));

    let office = Office::new(builder.build());
    let handle = office.invoke_process("start", None).unwrap();

    assert!(handle.wait().is_completed());
    assert_eq!(log.entries(), vec!["start", "background", "callback true"]);
}

#[test]
fn asynchronous_flow_escalation_reaches_callback() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    let start_log = log.clone();
    builder.add_fn("start", move |ctx| {
        let callback_log = start_log.clone();
        ctx.do_flow_with_callback("background", FlowKind::Asynchronous, None, move |outcome| {
            let cause = outcome.as_ref().map(Escalation::to_string).unwrap_or_default();
            callback_log.push(format!("callback {cause}"));
        });
        Ok(())
    });
    builder.add_fn("background", failing(&log, "background"));

    let office = Office::new(builder.build());
    let outcome = office.invoke_process("start", None).unwrap().wait();

    assert!(outcome.is_completed());
    assert_eq!(log.entries(), vec!["background", "callback type error x"]);
}

// ═══════════════════════════════════════════════════════════════════════════════
// OBJECT SCOPES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn function_scoped_object_is_released_before_next_function() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    let source_log = log.clone();
    builder.add_managed_object(
        "scratch",
        ManagedObjectScope::Function,
        source_fn(move || Ok(Tracked::new("scratch", &source_log))),
    );
    builder
        .add_fn("F", logging(&log, "F"))
        .with_object("scratch")
        .with_next("G");
    builder.add_fn("G", logging(&log, "G"));

    let office = Office::new(builder.build());
    assert!(office.invoke_process("F", None).unwrap().wait().is_completed());
    assert_eq!(log.entries(), vec!["F", "release scratch", "G"]);
}

#[test]
fn process_scoped_object_is_shared_until_process_ends() {
    let log = ExecutionLog::new();
    let mut builder = builder();
    let source_log = log.clone();
    builder.add_managed_object(
        "ledger",
        ManagedObjectScope::Process,
        source_fn(move || Ok(Tracked::new("ledger", &source_log))),
    );

    for (name, next) in [("F", Some("G")), ("G", None)] {
        let body_log = log.clone();
        let function = builder
            .add_fn(name, move |ctx| {
                let mut ledger = ctx.object_mut::<Tracked>("ledger")?;
                ledger.uses += 1;
                body_log.push(format!("{name} saw {}", ledger.uses));
                Ok(())
            })
            .with_object("ledger");
        if let Some(next) = next {
            function.with_next(next);
        }
    }

    let office = Office::new(builder.build());
    assert!(office.invoke_process("F", None).unwrap().wait().is_completed());
    assert_eq!(log.entries(), vec!["F saw 1", "G saw 2", "release ledger"]);
}
