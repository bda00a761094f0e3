#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

mod common;

use common::{TestConfig, TestError, cooperative, schedulers, task, work_stealing};
use flowdag::{
    Cause, ConcurrencyLayer, DagBuilder, EdgeKind, Interrupt, NodeIndex, SchedulerConfig,
    SchedulerError, Statement, TaskPriority, TaskState,
    interrupt::BreakpointId,
    scheduler,
    task::FailureKind,
};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

#[test]
fn data_inputs_flow_positionally() {
    for (name, sched) in schedulers() {
        let mut b = DagBuilder::<TestConfig>::new();
        let one = b.add_constant(1);
        let two = b.add_constant(2);
        let three = b.add_constant(3);
        let sum = b
            .add_task_node(task(|cx| Ok(cx.inputs().iter().sum())), &[one, two, three])
            .unwrap();
        let weighted = b
            .add_task_node(
                task(|cx| Ok(cx.inputs()[0] * 10 + cx.inputs()[1])),
                &[sum, three],
            )
            .unwrap();
        b.set_output(weighted).unwrap();
        let dag = b.finish().unwrap();
        assert_eq!(sched.run_dag(dag).unwrap(), 63, "{name}");
        assert_eq!(sched.stats().dags_submitted, 1, "{name}");
    }
}

#[test]
fn shared_resource_accesses_keep_program_order() {
    for (name, sched) in schedulers() {
        for _ in 0..1000 {
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut b = DagBuilder::<TestConfig>::new();
            b.let_constant("log", 0);
            let writer = {
                let log = Arc::clone(&log);
                task(move |_| {
                    std::thread::sleep(Duration::from_micros(50));
                    log.lock().push("write");
                    Ok(1)
                })
            };
            let reader = {
                let log = Arc::clone(&log);
                task(move |_| {
                    log.lock().push("read");
                    Ok(2)
                })
            };
            b.push(Statement::new(writer).uses("log")).unwrap();
            let read = b.push(Statement::new(reader).uses("log")).unwrap();
            b.set_output(read).unwrap();
            assert_eq!(sched.run_dag(b.finish().unwrap()).unwrap(), 2, "{name}");
            assert_eq!(*log.lock(), vec!["write", "read"], "{name}");
        }
    }
}

#[test]
fn failure_reaches_dependents_but_not_siblings() {
    for (name, sched) in schedulers() {
        let invoked = Arc::new(AtomicUsize::new(0));
        let mut b = DagBuilder::<TestConfig>::new();
        let failing = b
            .add_task_node(task(|_| Err(TestError("boom"))), &[])
            .unwrap();
        let dependent = {
            let invoked = Arc::clone(&invoked);
            b.add_task_node(
                task(move |_| {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }),
                &[failing],
            )
            .unwrap()
        };
        let sibling = b.add_task_node(task(|_| Ok(7)), &[]).unwrap();
        let output = b
            .add_task_node(task(|cx| Ok(cx.inputs().iter().sum())), &[dependent, sibling])
            .unwrap();
        let handle = sched.submit_dag(b.finish().unwrap());
        let id = |node| handle.task_id(node).unwrap();

        let at_output = sched.await_task(handle.output()).unwrap_err();
        let at_origin = sched.await_task(id(failing)).unwrap_err();
        assert_eq!(sched.await_task(id(sibling)).unwrap(), 7, "{name}");

        let (at_output, at_origin) = (at_output.failure().unwrap(), at_origin.failure().unwrap());
        assert_eq!(at_output.origin(), id(failing), "{name}");
        assert_eq!(at_output.origin_node(), Some(failing), "{name}");
        assert_eq!(at_output.error(), Some(&TestError("boom")), "{name}");
        assert!(
            Arc::ptr_eq(
                at_output.shared_error().unwrap(),
                at_origin.shared_error().unwrap()
            ),
            "{name}"
        );

        let graph = at_output.error_graph().unwrap();
        assert_eq!(graph.origin().node, failing, "{name}");
        assert!(graph.contains(dependent) && graph.contains(output), "{name}");
        assert!(!graph.contains(sibling), "{name}");
        assert_eq!(graph.path_to(output), Some(vec![failing, dependent, output]), "{name}");

        assert_eq!(invoked.load(Ordering::SeqCst), 0, "{name}");
        assert_eq!(
            sched.status(id(dependent)),
            Some(TaskState::Failed(FailureKind::Propagated { origin: id(failing) })),
            "{name}"
        );
        assert_eq!(
            sched.status(id(failing)),
            Some(TaskState::Failed(FailureKind::Local)),
            "{name}"
        );
        assert_eq!(sched.status(id(sibling)), Some(TaskState::Completed), "{name}");
        sched.release(&handle);
    }
}

/// Chain of `len` tasks; the first raises a breakpoint. Returns the graph and
/// the invocation counter.
fn breakpoint_chain(len: usize) -> (flowdag::Dag<TestConfig>, Arc<AtomicUsize>) {
    let invoked = Arc::new(AtomicUsize::new(0));
    let mut b = DagBuilder::<TestConfig>::new();
    let mut prev = {
        let invoked = Arc::clone(&invoked);
        b.add_task_node(
            task(move |cx| {
                invoked.fetch_add(1, Ordering::SeqCst);
                cx.interrupt_handle().set_breakpoint(BreakpointId(7));
                Ok(0)
            }),
            &[],
        )
        .unwrap()
    };
    for _ in 1..len {
        let invoked = Arc::clone(&invoked);
        prev = b
            .add_task_node(
                task(move |cx| {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok(cx.inputs()[0] + 1)
                }),
                &[prev],
            )
            .unwrap();
    }
    (b.finish().unwrap(), invoked)
}

#[test]
fn interrupt_halts_at_next_node_boundary() {
    common::init_tracing();
    for (name, sched, bound) in [
        ("cooperative", cooperative(), 1),
        ("work-stealing/1", work_stealing(1), 2),
    ] {
        let (dag, invoked) = breakpoint_chain(10);
        let err = sched.run_dag(dag).unwrap_err();
        assert_eq!(
            err.interrupt(),
            Some(&Interrupt::Breakpoint(BreakpointId(7))),
            "{name}"
        );
        assert!(invoked.load(Ordering::SeqCst) <= bound, "{name}");
        assert_eq!(sched.halted(), Some(Interrupt::Breakpoint(BreakpointId(7))), "{name}");
        assert_eq!(sched.stats().interrupts, 1, "{name}");
    }
}

#[test]
fn resume_after_breakpoint_finishes_the_graph() {
    for (name, sched) in schedulers() {
        let (dag, invoked) = breakpoint_chain(5);
        let handle = sched.submit_dag(dag);
        let err = sched.await_task(handle.output()).unwrap_err();
        assert!(
            matches!(err, SchedulerError::Interrupted(Interrupt::Breakpoint(_))),
            "{name}"
        );
        assert_eq!(
            sched.resume(),
            Some(Interrupt::Breakpoint(BreakpointId(7))),
            "{name}"
        );
        assert_eq!(sched.halted(), None, "{name}");
        assert_eq!(sched.await_task(handle.output()).unwrap(), 4, "{name}");
        assert_eq!(invoked.load(Ordering::SeqCst), 5, "{name}");
        sched.release(&handle);
    }
}

#[test]
fn check_interrupt_consumes_and_halts() {
    for (name, sched) in schedulers() {
        assert_eq!(sched.check_interrupt(), None, "{name}");
        sched.interrupt_handle().report_stack_overflow();
        assert_eq!(sched.check_interrupt(), Some(Interrupt::StackOverflow), "{name}");
        assert_eq!(sched.check_interrupt(), None, "{name}");
        assert_eq!(sched.halted(), Some(Interrupt::StackOverflow), "{name}");

        let id = sched.spawn(task(|_| Ok(1)));
        assert!(
            matches!(
                sched.await_task(id),
                Err(SchedulerError::Interrupted(Interrupt::StackOverflow))
            ),
            "{name}"
        );
        assert_eq!(sched.resume(), Some(Interrupt::StackOverflow), "{name}");
        assert_eq!(sched.await_task(id).unwrap(), 1, "{name}");
    }
}

#[test]
fn armed_timeout_interrupts_a_slow_graph() {
    for (name, sched) in [("cooperative", cooperative()), ("work-stealing/1", work_stealing(1))] {
        let mut b = DagBuilder::<TestConfig>::new();
        let slow = b
            .add_task_node(
                task(|_| {
                    std::thread::sleep(Duration::from_millis(100));
                    Ok(1)
                }),
                &[],
            )
            .unwrap();
        b.add_task_node(task(|cx| Ok(cx.inputs()[0] + 1)), &[slow])
            .unwrap();
        let guard = sched
            .interrupt_handle()
            .arm_timeout(Duration::from_millis(10))
            .unwrap();
        let err = sched.run_dag(b.finish().unwrap()).unwrap_err();
        drop(guard);
        assert_eq!(
            err.interrupt(),
            Some(&Interrupt::Timeout(Duration::from_millis(10))),
            "{name}"
        );
    }
}

#[test]
fn disarmed_timeout_never_fires() {
    let sched = cooperative();
    let guard = sched
        .interrupt_handle()
        .arm_timeout(Duration::from_millis(5))
        .unwrap();
    guard.cancel();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(sched.check_interrupt(), None);
}

#[test]
fn many_spawns_all_complete() {
    common::init_tracing();
    let sched = work_stealing(4);
    let ids: Vec<_> = (0..100)
        .map(|i| {
            sched.spawn(task(move |_| {
                thread::sleep(Duration::from_millis(1));
                Ok(i)
            }))
        })
        .collect();
    for (i, id) in (0..).zip(ids) {
        assert_eq!(sched.await_task(id).unwrap(), i);
    }
    let stats = sched.stats();
    assert_eq!(stats.spawned, 100);
    assert_eq!(stats.per_worker.len(), 4);
    assert!(stats.checkpoints >= 100);
    let busy_workers = stats.per_worker.iter().filter(|&&count| count > 0).count();
    assert!(busy_workers > 1, "{:?}", stats.per_worker);
    assert!(stats.imbalance().is_some());
}

/// `layers` x `width` grid of tasks sleeping `pause`; node `(l, j)` reads
/// `(l - 1, j)` and `(l - 1, j + 1)` and yields its layer number, a join node
/// sums the last layer. Returns the graph and a counter of started tasks.
fn grid(
    layers: usize,
    width: usize,
    pause: Duration,
) -> (flowdag::Dag<TestConfig>, Arc<AtomicUsize>) {
    let started = Arc::new(AtomicUsize::new(0));
    let mut b = DagBuilder::<TestConfig>::new();
    let mut previous: Vec<NodeIndex> = vec![];
    for _ in 0..layers {
        let layer: Vec<NodeIndex> = (0..width)
            .map(|j| {
                let inputs: Vec<NodeIndex> = if previous.is_empty() {
                    vec![]
                } else {
                    vec![previous[j], previous[(j + 1) % width]]
                };
                let started = Arc::clone(&started);
                b.add_task_node(
                    task(move |cx| {
                        started.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(pause);
                        Ok(cx.inputs().iter().copied().max().unwrap_or(0) + 1)
                    }),
                    &inputs,
                )
                .unwrap()
            })
            .collect();
        previous = layer;
    }
    b.add_task_node(task(|cx| Ok(cx.inputs().iter().sum())), &previous)
        .unwrap();
    (b.finish().unwrap(), started)
}

#[test]
fn timeout_halts_a_wide_graph_mid_flight() {
    common::init_tracing();
    let sched = work_stealing(4);
    let (dag, started) = grid(20, 8, Duration::from_millis(1));
    let guard = sched
        .interrupt_handle()
        .arm_timeout(Duration::from_millis(10))
        .unwrap();
    let handle = sched.submit_dag(dag);
    let err = sched.await_task(handle.output()).unwrap_err();
    drop(guard);
    assert_eq!(
        err.interrupt(),
        Some(&Interrupt::Timeout(Duration::from_millis(10)))
    );

    // Nodes already running finish; nothing new starts while halted.
    thread::sleep(Duration::from_millis(10));
    let halted_at = started.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(started.load(Ordering::SeqCst), halted_at);
    assert!(halted_at < 20 * 8, "{halted_at}");

    assert!(sched.resume().is_some());
    assert_eq!(sched.await_task(handle.output()).unwrap(), 8 * 20);
    assert_eq!(started.load(Ordering::SeqCst), 20 * 8);
    sched.release(&handle);
}

#[test]
fn awaiting_task_never_helps_its_own_awaiter() {
    common::init_tracing();
    let sched = work_stealing(2);
    let guard = sched
        .interrupt_handle()
        .arm_timeout(Duration::from_secs(5))
        .unwrap();
    let gate = Arc::new(AtomicBool::new(false));
    let blocker = {
        let gate = Arc::clone(&gate);
        sched.spawn(task(move |_| {
            while !gate.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(1)
        }))
    };
    let waiter = sched.spawn(task(move |cx| {
        cx.await_task(blocker)
            .map(|value| value + 1)
            .map_err(|_| TestError("waiter"))
    }));
    let outer = sched.spawn(task(move |cx| {
        cx.await_task(waiter)
            .map(|value| value * 10)
            .map_err(|_| TestError("outer"))
    }));

    thread::sleep(Duration::from_millis(100));
    gate.store(true, Ordering::SeqCst);
    assert_eq!(sched.await_task(outer).unwrap(), 20);
    assert_eq!(sched.await_task(waiter).unwrap(), 2);
    drop(guard);
    assert_eq!(sched.halted(), None);
}

#[test]
fn released_tasks_become_unknown() {
    for (name, sched) in schedulers() {
        let id = sched.spawn(task(|_| Ok(9)));
        assert_eq!(sched.join(id).unwrap(), 9, "{name}");
        assert_eq!(sched.status(id), None, "{name}");
        assert!(!sched.release_task(id), "{name}");
        assert!(
            matches!(sched.await_task(id), Err(SchedulerError::UnknownTask(got)) if got == id),
            "{name}"
        );

        // Releasing before completion still runs the task.
        let ran = Arc::new(AtomicBool::new(false));
        let fire = {
            let ran = Arc::clone(&ran);
            sched.spawn(task(move |_| {
                ran.store(true, Ordering::SeqCst);
                Ok(0)
            }))
        };
        assert!(sched.release_task(fire), "{name}");
        let after = sched.spawn(task(|_| Ok(1)));
        assert_eq!(sched.join(after).unwrap(), 1, "{name}");
        assert_eq!(sched.stats().spawned, 3, "{name}");
        if name == "cooperative" {
            assert!(ran.load(Ordering::SeqCst), "{name}");
        }
    }
}

#[test]
fn cooperative_dispatch_follows_priority() {
    let sched = flowdag::executor::CooperativeScheduler::<TestConfig>::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for priority in [
        TaskPriority::Low,
        TaskPriority::Normal,
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Normal,
    ] {
        let order = Arc::clone(&order);
        flowdag::Scheduler::spawn(
            &sched,
            task(move |_| {
                order.lock().push(priority);
                Ok(0)
            })
            .with_priority(priority),
        );
    }
    sched.run_until_idle().unwrap();
    assert_eq!(
        *order.lock(),
        vec![
            TaskPriority::Critical,
            TaskPriority::High,
            TaskPriority::Normal,
            TaskPriority::Normal,
            TaskPriority::Low,
        ]
    );
}

#[test]
fn pool_takes_urgent_work_first_and_background_work_last() {
    let sched = work_stealing(1);
    let running = Arc::new(AtomicBool::new(false));
    let gate = Arc::new(AtomicBool::new(false));
    let blocker = {
        let (running, gate) = (Arc::clone(&running), Arc::clone(&gate));
        sched.spawn(task(move |_| {
            running.store(true, Ordering::SeqCst);
            while !gate.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(0)
        }))
    };
    while !running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }

    let order = Arc::new(Mutex::new(Vec::new()));
    let ids: Vec<_> = [TaskPriority::Low, TaskPriority::Normal, TaskPriority::High]
        .into_iter()
        .map(|priority| {
            let order = Arc::clone(&order);
            sched.spawn(
                task(move |_| {
                    order.lock().push(priority);
                    Ok(0)
                })
                .with_priority(priority),
            )
        })
        .collect();
    gate.store(true, Ordering::SeqCst);
    sched.await_task(blocker).unwrap();
    for id in ids {
        sched.await_task(id).unwrap();
    }
    assert_eq!(
        *order.lock(),
        vec![TaskPriority::High, TaskPriority::Normal, TaskPriority::Low]
    );
}

#[test]
fn execution_time_is_recorded() {
    for (name, sched) in schedulers() {
        let id = sched.spawn(task(|_| {
            thread::sleep(Duration::from_millis(20));
            Ok(0)
        }));
        sched.await_task(id).unwrap();
        assert!(sched.exec_duration(id).unwrap() >= Duration::from_millis(20), "{name}");

        let mut b = DagBuilder::<TestConfig>::new();
        let x = b.add_constant(1);
        let slow = b
            .add_task_node(
                task(|cx| {
                    thread::sleep(Duration::from_millis(5));
                    Ok(cx.inputs()[0])
                }),
                &[x],
            )
            .unwrap();
        let handle = sched.submit_dag(b.finish().unwrap());
        sched.await_task(handle.output()).unwrap();
        let slow = handle.task_id(slow).unwrap();
        assert!(sched.exec_duration(slow).unwrap() >= Duration::from_millis(5), "{name}");
        assert_eq!(sched.exec_duration(handle.task_id(x).unwrap()), None, "{name}");
        sched.release(&handle);
        assert_eq!(sched.exec_duration(slow), None, "{name}");
        assert!(sched.stats().busy >= Duration::from_millis(20), "{name}");
    }
}

#[test]
fn tasks_spawn_and_await_children() {
    for (name, sched) in schedulers() {
        let parent = sched.spawn(task(|cx| {
            let children: Vec<_> = (1..=10).map(|i| cx.spawn(task(move |_| Ok(i)))).collect();
            children
                .into_iter()
                .map(|child| cx.await_task(child).map_err(|_| TestError("child")))
                .sum()
        }));
        assert_eq!(sched.await_task(parent).unwrap(), 55, "{name}");
    }
}

#[test]
fn task_runs_nested_graph() {
    for (name, sched) in schedulers() {
        let id = sched.spawn(task(|cx| {
            let mut b = DagBuilder::<TestConfig>::new();
            let x = b.add_constant(20);
            b.add_task_node(task(|cx| Ok(cx.inputs()[0] + 1)), &[x])
                .map_err(|_| TestError("build"))?;
            let dag = b.finish().map_err(|_| TestError("build"))?;
            cx.run_dag(dag).map(|v| v * 2).map_err(|_| TestError("nested"))
        }));
        assert_eq!(sched.await_task(id).unwrap(), 42, "{name}");
    }
}

#[test]
fn await_is_idempotent() {
    for (name, sched) in schedulers() {
        let ok = sched.spawn(task(|_| Ok(5)));
        let bad = sched.spawn(task(|_| Err(TestError("bad"))));
        assert_eq!(sched.await_task(ok).unwrap(), 5, "{name}");
        assert_eq!(sched.await_task(ok).unwrap(), 5, "{name}");

        let first = sched.await_task(bad).unwrap_err();
        let second = sched.await_task(bad).unwrap_err();
        let (first, second) = (first.failure().unwrap(), second.failure().unwrap());
        assert_eq!(first.origin(), bad, "{name}");
        assert_eq!(first.origin_node(), None, "{name}");
        assert!(first.error_graph().is_none(), "{name}");
        assert!(
            Arc::ptr_eq(first.shared_error().unwrap(), second.shared_error().unwrap()),
            "{name}"
        );
        assert_eq!(sched.status(ok), Some(TaskState::Completed), "{name}");
    }
}

#[test]
fn panic_becomes_failure() {
    for (name, sched) in schedulers() {
        let id = sched.spawn(task(|_| panic!("kaboom")));
        let err = sched.await_task(id).unwrap_err();
        let failure = err.failure().unwrap();
        assert!(failure.error().is_none(), "{name}");
        assert!(
            matches!(failure.cause(), Cause::Panic(msg) if msg.contains("kaboom")),
            "{name}"
        );
        // The worker survives the panic.
        let next = sched.spawn(task(|_| Ok(3)));
        assert_eq!(sched.await_task(next).unwrap(), 3, "{name}");
    }
}

#[test]
fn awaiting_self_or_own_dependent_is_a_deadlock() {
    for (name, sched) in schedulers() {
        let id = sched.spawn(task(|cx| match cx.await_task(cx.id()) {
            Err(SchedulerError::Deadlock(id)) if id == cx.id() => Ok(1),
            _ => Ok(0),
        }));
        assert_eq!(sched.await_task(id).unwrap(), 1, "{name}");

        let mut b = DagBuilder::<TestConfig>::new();
        let ctl = b.add_control_node();
        let root = b
            .add_task_node(
                task(|cx| {
                    // Identifiers of a graph are contiguous: the output follows.
                    let output = flowdag::TaskId::try_from(cx.id().get() + 1)
                        .map_err(|_| TestError("id"))?;
                    match cx.await_task(output) {
                        Err(SchedulerError::Deadlock(_)) => Ok(1),
                        _ => Ok(0),
                    }
                }),
                &[],
            )
            .unwrap();
        b.add_task_node(task(|cx| Ok(cx.inputs()[0] + 1)), &[root])
            .unwrap();
        b.connect(ctl, root, EdgeKind::Control).unwrap();
        assert_eq!(sched.run_dag(b.finish().unwrap()).unwrap(), 2, "{name}");
    }
}

#[test]
fn cooperative_await_cycle_reports_deadlock() {
    common::init_tracing();
    let sched = cooperative();
    let outer = sched.spawn(task(|cx| {
        let parent = cx.id();
        let child = cx.spawn(task(move |cx| match cx.await_task(parent) {
            Err(SchedulerError::Deadlock(id)) if id == parent => Ok(-1),
            _ => Ok(0),
        }));
        cx.await_task(child).map_err(|_| TestError("child"))
    }));
    assert_eq!(sched.await_task(outer).unwrap(), -1);
}

#[test]
fn released_graph_ids_become_unknown() {
    for (name, sched) in schedulers() {
        let mut b = DagBuilder::<TestConfig>::new();
        let x = b.add_constant(4);
        b.add_task_node(task(|cx| Ok(cx.inputs()[0] * cx.inputs()[0])), &[x])
            .unwrap();
        let handle = sched.submit_dag(b.finish().unwrap());
        assert_eq!(handle.len(), 2, "{name}");
        assert_eq!(sched.await_task(handle.output()).unwrap(), 16, "{name}");
        assert_eq!(sched.status(handle.output()), Some(TaskState::Completed), "{name}");
        assert_eq!(
            sched.status(handle.task_id(x).unwrap()),
            Some(TaskState::Completed),
            "{name}"
        );

        sched.release(&handle);
        assert_eq!(sched.status(handle.output()), None, "{name}");
        assert!(
            matches!(
                sched.await_task(handle.output()),
                Err(SchedulerError::UnknownTask(id)) if id == handle.output()
            ),
            "{name}"
        );
    }
}

#[test]
fn control_node_awaits_as_no_value() {
    for (name, sched) in schedulers() {
        let mut b = DagBuilder::<TestConfig>::new();
        let x = b.add_constant(1);
        let ctl = b.add_control_node();
        b.connect(x, ctl, EdgeKind::Control).unwrap();
        b.set_output(x).unwrap();
        let handle = sched.submit_dag(b.finish().unwrap());
        let id = handle.task_id(ctl).unwrap();
        assert!(
            matches!(sched.await_task(id), Err(SchedulerError::NoValue(got)) if got == id),
            "{name}"
        );
        sched.release(&handle);
    }
}

#[test]
fn cooperative_runs_only_inside_await() {
    let sched = flowdag::executor::CooperativeScheduler::<TestConfig>::new();
    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let ran = Arc::clone(&ran);
        flowdag::Scheduler::spawn(
            &sched,
            task(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            }),
        );
    }
    assert_eq!(sched.queued(), 3);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    sched.run_until_idle().unwrap();
    assert_eq!(sched.queued(), 0);
    assert_eq!(ran.load(Ordering::SeqCst), 3);
}

#[test]
fn build_selects_variant_from_layer() {
    common::init_tracing();
    for layer in [
        ConcurrencyLayer::Sequential,
        ConcurrencyLayer::Explicit,
        ConcurrencyLayer::Transparent,
    ] {
        let config = SchedulerConfig::default()
            .with_workers(2)
            .unwrap()
            .with_idle_park(Duration::from_millis(1))
            .with_layer(layer);
        let sched = scheduler::build::<TestConfig>(config).unwrap();
        let mut b = DagBuilder::<TestConfig>::new();
        let x = b.add_constant(2);
        let y = b.add_constant(3);
        b.add_task_node(task(|cx| Ok(cx.inputs()[0] * cx.inputs()[1])), &[x, y])
            .unwrap();
        assert_eq!(sched.run_dag(b.finish().unwrap()).unwrap(), 6, "{layer:?}");
    }
}
