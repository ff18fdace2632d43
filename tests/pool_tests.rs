use std::{sync::Arc, thread, time::Duration};

use kiln::bytecode::{builder::FunctionBuilder, op_code::OpCode};
use kiln::runtime::{
    closure::Closure,
    error::ErrorKind,
    pool::{PoolError, PromiseState, SubmitPolicy, ThreadPool, par_call},
    registry::Registry,
    value::Value,
    vm::Vm,
};

fn closure(b: FunctionBuilder) -> Value {
    Value::Closure(Arc::new(Closure::new(b.build_arc().unwrap(), Vec::new())))
}

fn square(vm: &Vm) -> Value {
    let mut b = FunctionBuilder::new(vm.registry(), "square");
    b.params(["x"])
        .get_local(1)
        .get_local(1)
        .op(OpCode::Mul)
        .op(OpCode::Return);
    closure(b)
}

/// `record(n)`: appends `n` to the global `order` array.
fn record(vm: &Vm) -> Value {
    vm.registry().define_global("order", Value::array(Vec::new()));
    let mut b = FunctionBuilder::new(vm.registry(), "record");
    b.params(["n"])
        .get_global("order")
        .get_local(1)
        .invoke("push", 1)
        .op(OpCode::Return);
    closure(b)
}

/// `hold(m)`: locks and unlocks `m`, blocking while someone else holds it.
fn hold(vm: &Vm) -> Value {
    let mut b = FunctionBuilder::new(vm.registry(), "hold");
    b.params(["m"])
        .get_local(1)
        .invoke("lock", 0)
        .op(OpCode::Pop)
        .get_local(1)
        .invoke("unlock", 0)
        .op(OpCode::Return);
    closure(b)
}

fn new_mutex(vm: &mut Vm) -> Value {
    let constructor = vm.registry().global_named("Mutex").unwrap();
    vm.call_value(&constructor, &[]).unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("condition not reached in time");
}

#[test]
fn calls_run_on_worker_vms() {
    let vm = Vm::new(Registry::new());
    let square = square(&vm);
    let pool = ThreadPool::new(&vm, 2, 8, SubmitPolicy::Block).unwrap();

    let promises: Vec<_> = (1..=6)
        .map(|n| pool.submit_call(square.clone(), vec![Value::Int(n)]).unwrap())
        .collect();
    let results: Vec<Value> = promises.iter().map(|p| p.wait().unwrap()).collect();

    assert_eq!(pool.worker_count(), 2);
    assert_eq!(
        results,
        [1, 4, 9, 16, 25, 36].map(Value::Int).to_vec()
    );
}

#[test]
fn a_single_worker_starts_jobs_in_submission_order() {
    let vm = Vm::new(Registry::new());
    let record = record(&vm);
    let mut pool = ThreadPool::new(&vm, 1, 16, SubmitPolicy::Block).unwrap();

    for n in 0..5 {
        pool.submit_call(record.clone(), vec![Value::Int(n)]).unwrap();
    }
    pool.shutdown();

    let order = vm.registry().global_named("order").unwrap();
    assert_eq!(order.to_string(), "[0, 1, 2, 3, 4]");
}

#[test]
fn reject_policy_fails_fast_when_the_queue_is_full() {
    let mut vm = Vm::new(Registry::new());
    let hold = hold(&vm);
    let mutex = new_mutex(&mut vm);
    let Value::Mutex(raw) = &mutex else {
        panic!("expected a mutex, got {mutex:?}");
    };
    raw.lock();
    let pool = ThreadPool::new(&vm, 1, 1, SubmitPolicy::Reject).unwrap();

    let running = pool.submit_call(hold.clone(), vec![mutex.clone()]).unwrap();
    wait_until(|| matches!(running.state(), PromiseState::Running));
    assert_eq!(pool.pending(), 0);
    let queued = pool.submit_call(hold.clone(), vec![mutex.clone()]).unwrap();
    let err = pool.submit_call(hold, vec![mutex.clone()]).unwrap_err();

    assert!(matches!(err, PoolError::QueueFull { capacity: 1 }));
    raw.unlock().unwrap();
    assert_eq!(running.wait().unwrap(), Value::Nil);
    assert_eq!(queued.wait().unwrap(), Value::Nil);
}

#[test]
fn generators_are_driven_to_completion() {
    let mut vm = Vm::new(Registry::new());
    let mut b = FunctionBuilder::new(vm.registry(), "pair");
    b.generator()
        .load_const(Value::Int(1))
        .op(OpCode::Yield)
        .load_const(Value::Int(2))
        .op(OpCode::Yield)
        .load_const(Value::string("done"))
        .op(OpCode::Return);
    let Value::Generator(generator) = vm.run(b.build_arc().unwrap(), &[]).unwrap() else {
        panic!("expected a generator");
    };
    let pool = ThreadPool::new(&vm, 2, 4, SubmitPolicy::Block).unwrap();

    let promise = pool.submit(generator).unwrap();

    assert_eq!(promise.wait().unwrap(), Value::string("done"));
    assert_eq!(promise.yielded(), vec![Value::Int(1), Value::Int(2)]);
    assert!(promise.is_settled());
}

#[test]
fn failed_jobs_reject_their_promise() {
    let vm = Vm::new(Registry::new());
    let square = square(&vm);
    let pool = ThreadPool::new(&vm, 1, 4, SubmitPolicy::Block).unwrap();

    let promise = pool
        .submit_call(square, vec![Value::string("x")])
        .unwrap();
    let err = promise.wait().unwrap_err();

    assert_eq!(err.error_kind(), Some(ErrorKind::Type));
    assert!(matches!(promise.state(), PromiseState::Rejected(_)));
}

#[test]
fn submitting_after_shutdown_fails() {
    let vm = Vm::new(Registry::new());
    let square = square(&vm);
    let mut pool = ThreadPool::new(&vm, 1, 4, SubmitPolicy::Block).unwrap();

    pool.shutdown();

    assert!(matches!(
        pool.submit_call(square, vec![Value::Int(1)]),
        Err(PoolError::ShutDown)
    ));
}

#[test]
fn wait_timeout_gives_up_on_blocked_jobs() {
    let mut vm = Vm::new(Registry::new());
    let hold = hold(&vm);
    let mutex = new_mutex(&mut vm);
    let Value::Mutex(raw) = &mutex else {
        panic!("expected a mutex");
    };
    raw.lock();
    let pool = ThreadPool::new(&vm, 1, 4, SubmitPolicy::Block).unwrap();

    let promise = pool.submit_call(hold, vec![mutex.clone()]).unwrap();

    assert!(promise.wait_timeout(Duration::from_millis(20)).is_none());
    raw.unlock().unwrap();
    assert!(promise.wait().is_ok());
}

#[test]
fn par_call_keeps_input_order() {
    let vm = Vm::new(Registry::new());
    let square = square(&vm);
    let calls: Vec<(Value, Vec<Value>)> = (0..20)
        .map(|n| (square.clone(), vec![Value::Int(n)]))
        .collect();

    let results = par_call(&vm, &calls);

    let values: Vec<Value> = results.into_iter().map(Result::unwrap).collect();
    let expected: Vec<Value> = (0..20).map(|n| Value::Int(n * n)).collect();
    assert_eq!(values, expected);
}
